use std::{collections::HashMap, time::Duration};

use anyhow::{Context, Result};

use crate::{
    prompts::SystemPrompts,
    types::{Authority, ContextMode},
};

pub const DEFAULT_MODELS: &str = "mistralai/mistral-7b-instruct,meta-llama/llama-3.3-70b-instruct";
pub const DEFAULT_CEILINGS: &str = "100000,50000,28000";
pub const DEFAULT_LEXML_BASE_URL: &str = "https://www.lexml.gov.br";

/// Full application configuration.
/// Sensitive fields (API keys) come from env/.env only and are never logged.
#[derive(Debug, Clone)]
pub struct Config {
    pub openrouter_api_key: String,
    pub openrouter_base_url: String,
    pub models: Vec<String>,

    // Transport
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub request_timeout_s: u64,

    // Retrieval
    pub num_queries: usize,
    pub docs_per_query: usize,
    pub search_authority: Option<Authority>,
    pub lexml_base_url: String,
    pub lexml_page_size: usize,
    pub lexml_max_pages: usize,
    pub lexml_timeout_s: u64,

    // Context fitting
    pub context_mode: ContextMode,
    pub context_budget_chars: usize,
    pub context_ceilings: Vec<usize>,
    pub min_answer_chars: usize,
    pub min_summary_chars: usize,

    pub max_concurrent_models: usize,

    /// One question per line; empty = built-in list.
    pub questions_file: String,
    pub system_prompt_queries: String,
    pub system_prompt_answer: String,
}

/// Plain values the orchestrator runs with. How they were sourced is not its concern.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub models: Vec<String>,
    pub num_queries: usize,
    pub docs_per_query: usize,
    pub authority: Option<Authority>,
    pub context_mode: ContextMode,
    pub context_budget_chars: usize,
    /// Descending fallback ceilings tried after a payload-too-large rejection.
    pub context_ceilings: Vec<usize>,
    pub min_answer_chars: usize,
    pub min_summary_chars: usize,
    pub max_concurrent_models: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            models: parse_list(DEFAULT_MODELS),
            num_queries: 3,
            docs_per_query: 10,
            authority: None,
            context_mode: ContextMode::Truncar,
            context_budget_chars: 120_000,
            context_ceilings: parse_ceilings(DEFAULT_CEILINGS),
            min_answer_chars: 10,
            min_summary_chars: 100,
            max_concurrent_models: 1,
        }
    }
}

/// Parse `KEY=VALUE` lines. Missing file yields an empty map.
pub fn parse_dotenv(path: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    let Ok(contents) = std::fs::read_to_string(path) else {
        return map;
    };
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), unquote(v.trim()).to_string());
        }
    }
    map
}

fn unquote(v: &str) -> &str {
    for q in ['"', '\''] {
        if v.len() >= 2 && v.starts_with(q) && v.ends_with(q) {
            return &v[1..v.len() - 1];
        }
    }
    v
}

fn get(key: &str, vars: &HashMap<String, String>) -> Option<String> {
    vars.get(key).cloned()
}

fn get_str(key: &str, vars: &HashMap<String, String>, default: &str) -> String {
    get(key, vars).unwrap_or_else(|| default.to_string())
}

fn get_u32(key: &str, vars: &HashMap<String, String>, default: u32) -> u32 {
    get(key, vars)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn get_u64(key: &str, vars: &HashMap<String, String>, default: u64) -> u64 {
    get(key, vars)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn get_usize(key: &str, vars: &HashMap<String, String>, default: usize) -> usize {
    get(key, vars)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Comma-separated list, blanks dropped.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Comma-separated positive sizes, sorted descending and deduplicated.
pub fn parse_ceilings(raw: &str) -> Vec<usize> {
    let mut out: Vec<usize> = raw
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .filter(|n| *n > 0)
        .collect();
    out.sort_unstable_by(|a, b| b.cmp(a));
    out.dedup();
    out
}

impl Config {
    /// Load from the process environment, falling back to `.env` in the working directory.
    pub fn from_env() -> Result<Self> {
        let mut vars = parse_dotenv(".env");
        vars.extend(std::env::vars());
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let defaults = PipelineSettings::default();
        let prompts = SystemPrompts::default();

        let mut models = parse_list(&get_str("MODELS", vars, DEFAULT_MODELS));
        if models.is_empty() {
            models = defaults.models.clone();
        }

        let mut context_ceilings = parse_ceilings(&get_str("CONTEXT_CEILINGS", vars, DEFAULT_CEILINGS));
        if context_ceilings.is_empty() {
            context_ceilings = defaults.context_ceilings.clone();
        }

        let search_authority = match get("SEARCH_AUTHORITY", vars).filter(|s| !s.trim().is_empty()) {
            Some(raw) => Some(raw.parse::<Authority>().context("SEARCH_AUTHORITY")?),
            None => None,
        };

        let context_mode = match get("CONTEXT_MODE", vars).filter(|s| !s.trim().is_empty()) {
            Some(raw) => raw.parse::<ContextMode>().context("CONTEXT_MODE")?,
            None => defaults.context_mode,
        };

        Ok(Config {
            openrouter_api_key: get_str("OPENROUTER_API_KEY", vars, ""),
            openrouter_base_url: get_str("OPENROUTER_BASE_URL", vars, "https://openrouter.ai/api/v1"),
            models,
            max_attempts: get_u32("MAX_ATTEMPTS", vars, 5).max(1),
            retry_base_delay_ms: get_u64("RETRY_BASE_DELAY_MS", vars, 1000),
            request_timeout_s: get_u64("REQUEST_TIMEOUT_S", vars, 120),
            num_queries: get_usize("NUM_QUERIES", vars, defaults.num_queries).max(1),
            docs_per_query: get_usize("DOCS_PER_QUERY", vars, defaults.docs_per_query).max(1),
            search_authority,
            lexml_base_url: get_str("LEXML_BASE_URL", vars, DEFAULT_LEXML_BASE_URL),
            lexml_page_size: get_usize("LEXML_PAGE_SIZE", vars, 10).max(1),
            lexml_max_pages: get_usize("LEXML_MAX_PAGES", vars, 20).max(1),
            lexml_timeout_s: get_u64("LEXML_TIMEOUT_S", vars, 30),
            context_mode,
            context_budget_chars: get_usize("CONTEXT_BUDGET_CHARS", vars, defaults.context_budget_chars),
            context_ceilings,
            min_answer_chars: get_usize("MIN_ANSWER_CHARS", vars, defaults.min_answer_chars),
            min_summary_chars: get_usize("MIN_SUMMARY_CHARS", vars, defaults.min_summary_chars),
            max_concurrent_models: get_usize("MAX_CONCURRENT_MODELS", vars, 1).max(1),
            questions_file: get_str("QUESTIONS_FILE", vars, ""),
            system_prompt_queries: get_str("SYSTEM_PROMPT_QUERIES", vars, &prompts.queries),
            system_prompt_answer: get_str("SYSTEM_PROMPT_ANSWER", vars, &prompts.answer),
        })
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            models: self.models.clone(),
            num_queries: self.num_queries,
            docs_per_query: self.docs_per_query,
            authority: self.search_authority,
            context_mode: self.context_mode,
            context_budget_chars: self.context_budget_chars,
            context_ceilings: self.context_ceilings.clone(),
            min_answer_chars: self.min_answer_chars,
            min_summary_chars: self.min_summary_chars,
            max_concurrent_models: self.max_concurrent_models,
        }
    }

    pub fn system_prompts(&self) -> SystemPrompts {
        SystemPrompts {
            queries: self.system_prompt_queries.clone(),
            answer: self.system_prompt_answer.clone(),
            ..SystemPrompts::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let cfg = Config::from_vars(&HashMap::new()).unwrap();
        assert_eq!(cfg.models.len(), 2);
        assert_eq!(cfg.num_queries, 3);
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.context_mode, ContextMode::Truncar);
        assert_eq!(cfg.context_ceilings, vec![100_000, 50_000, 28_000]);
        assert_eq!(cfg.search_authority, None);
        assert_eq!(cfg.lexml_base_url, DEFAULT_LEXML_BASE_URL);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = Config::from_vars(&vars(&[
            ("MODELS", "a/one, b/two ,,"),
            ("CONTEXT_MODE", "resumir"),
            ("SEARCH_AUTHORITY", "federal"),
            ("NUM_QUERIES", "5"),
            ("CONTEXT_CEILINGS", "28000, 100000,50000,28000"),
        ]))
        .unwrap();
        assert_eq!(cfg.models, vec!["a/one", "b/two"]);
        assert_eq!(cfg.context_mode, ContextMode::Resumir);
        assert_eq!(cfg.search_authority, Some(Authority::Federal));
        assert_eq!(cfg.num_queries, 5);
        assert_eq!(cfg.context_ceilings, vec![100_000, 50_000, 28_000]);
    }

    #[test]
    fn unparseable_numbers_fall_back() {
        let cfg = Config::from_vars(&vars(&[("MAX_ATTEMPTS", "lots"), ("NUM_QUERIES", "0")])).unwrap();
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.num_queries, 1);
    }

    #[test]
    fn bad_context_mode_is_an_error() {
        assert!(Config::from_vars(&vars(&[("CONTEXT_MODE", "squash")])).is_err());
    }

    #[test]
    fn empty_model_list_keeps_defaults() {
        let cfg = Config::from_vars(&vars(&[("MODELS", " , ")])).unwrap();
        assert_eq!(cfg.models, parse_list(DEFAULT_MODELS));
    }

    #[test]
    fn dotenv_parsing_skips_comments_and_unquotes() {
        use std::io::Write;
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "# comment\nOPENROUTER_API_KEY=\"sk-test\"\n\nNUM_QUERIES = 4\nnot a pair").unwrap();
        let map = parse_dotenv(tmp.path().to_str().unwrap());
        assert_eq!(map.get("OPENROUTER_API_KEY").map(String::as_str), Some("sk-test"));
        assert_eq!(map.get("NUM_QUERIES").map(String::as_str), Some("4"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn dotenv_missing_file_is_empty() {
        assert!(parse_dotenv("/nonexistent/.env").is_empty());
    }

    #[test]
    fn settings_mirror_config() {
        let cfg = Config::from_vars(&vars(&[("MAX_CONCURRENT_MODELS", "3")])).unwrap();
        let s = cfg.pipeline_settings();
        assert_eq!(s.models, cfg.models);
        assert_eq!(s.max_concurrent_models, 3);
        assert_eq!(s.context_budget_chars, 120_000);
    }
}
