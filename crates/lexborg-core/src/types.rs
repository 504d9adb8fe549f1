use std::{fmt, str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use serde::{ser::SerializeMap, Deserialize, Serialize, Serializer};

// ── Documents ────────────────────────────────────────────────────────────

/// Fields of a retrieved legal document.
///
/// `Link` is populated from the title anchor and never from a table label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKey {
    Titulo,
    Subtitulo,
    Ementa,
    Autor,
    Autoridade,
    Localidade,
    Data,
    Link,
    Assuntos,
}

impl FieldKey {
    /// Serialization order.
    pub const ALL: [FieldKey; 9] = [
        FieldKey::Titulo,
        FieldKey::Subtitulo,
        FieldKey::Ementa,
        FieldKey::Link,
        FieldKey::Autor,
        FieldKey::Autoridade,
        FieldKey::Data,
        FieldKey::Localidade,
        FieldKey::Assuntos,
    ];

    /// Look up a field from an already-normalized table label
    /// (lower-case ASCII letters only, e.g. "titulo").
    pub fn from_label(normalized: &str) -> Option<Self> {
        match normalized {
            "titulo" => Some(Self::Titulo),
            "subtitulo" => Some(Self::Subtitulo),
            "ementa" => Some(Self::Ementa),
            "autor" => Some(Self::Autor),
            "autoridade" => Some(Self::Autoridade),
            "localidade" => Some(Self::Localidade),
            "data" => Some(Self::Data),
            "assuntos" | "assunto" => Some(Self::Assuntos),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Titulo => "titulo",
            Self::Subtitulo => "subtitulo",
            Self::Ementa => "ementa",
            Self::Autor => "autor",
            Self::Autoridade => "autoridade",
            Self::Localidade => "localidade",
            Self::Data => "data",
            Self::Link => "link",
            Self::Assuntos => "assuntos",
        }
    }

    /// Text written in place of a field the source did not carry.
    pub fn sentinel(self) -> &'static str {
        match self {
            Self::Titulo => "Título não disponível",
            Self::Subtitulo => "Subtítulo não disponível",
            Self::Ementa => "Ementa não disponível",
            Self::Autor => "Autor não informado",
            Self::Autoridade => "Autoridade não informada",
            Self::Localidade => "Localidade não informada",
            Self::Data => "Data não informada",
            Self::Link => "Link não disponível",
            Self::Assuntos => "Assuntos não informados",
        }
    }

    /// Optional fields are left out of the serialized form when absent.
    pub fn is_optional(self) -> bool {
        matches!(self, Self::Subtitulo | Self::Assuntos)
    }
}

/// One search hit. `None` means the source did not carry the field;
/// `Some("")` means it was present but empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievedDocument {
    pub titulo: Option<String>,
    pub subtitulo: Option<String>,
    pub ementa: Option<String>,
    pub autor: Option<String>,
    pub autoridade: Option<String>,
    pub localidade: Option<String>,
    pub data: Option<String>,
    pub link: Option<String>,
    pub assuntos: Option<String>,
}

impl RetrievedDocument {
    pub fn get(&self, key: FieldKey) -> Option<&str> {
        self.slot(key).as_deref()
    }

    pub fn set(&mut self, key: FieldKey, value: impl Into<String>) {
        *self.slot_mut(key) = Some(value.into());
    }

    /// Value for display or serialization, with the field's sentinel when absent.
    pub fn get_or_sentinel(&self, key: FieldKey) -> &str {
        self.get(key).unwrap_or(key.sentinel())
    }

    /// A block without a non-blank title is parsing noise, not a hit.
    pub fn has_title(&self) -> bool {
        self.titulo.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    fn slot(&self, key: FieldKey) -> &Option<String> {
        match key {
            FieldKey::Titulo => &self.titulo,
            FieldKey::Subtitulo => &self.subtitulo,
            FieldKey::Ementa => &self.ementa,
            FieldKey::Autor => &self.autor,
            FieldKey::Autoridade => &self.autoridade,
            FieldKey::Localidade => &self.localidade,
            FieldKey::Data => &self.data,
            FieldKey::Link => &self.link,
            FieldKey::Assuntos => &self.assuntos,
        }
    }

    fn slot_mut(&mut self, key: FieldKey) -> &mut Option<String> {
        match key {
            FieldKey::Titulo => &mut self.titulo,
            FieldKey::Subtitulo => &mut self.subtitulo,
            FieldKey::Ementa => &mut self.ementa,
            FieldKey::Autor => &mut self.autor,
            FieldKey::Autoridade => &mut self.autoridade,
            FieldKey::Localidade => &mut self.localidade,
            FieldKey::Data => &mut self.data,
            FieldKey::Link => &mut self.link,
            FieldKey::Assuntos => &mut self.assuntos,
        }
    }
}

impl Serialize for RetrievedDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let present = FieldKey::ALL
            .iter()
            .filter(|k| !k.is_optional() || self.get(**k).is_some())
            .count();
        let mut map = serializer.serialize_map(Some(present))?;
        for key in FieldKey::ALL {
            if key.is_optional() && self.get(key).is_none() {
                continue;
            }
            map.serialize_entry(key.as_str(), self.get_or_sentinel(key))?;
        }
        map.end()
    }
}

/// Issuing-authority filter understood by the search engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Authority {
    Estadual,
    Federal,
    Municipal,
    Distrital,
}

impl Authority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Estadual => "Estadual",
            Self::Federal => "Federal",
            Self::Municipal => "Municipal",
            Self::Distrital => "Distrital",
        }
    }
}

impl FromStr for Authority {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "estadual" => Ok(Self::Estadual),
            "federal" => Ok(Self::Federal),
            "municipal" => Ok(Self::Municipal),
            "distrital" => Ok(Self::Distrital),
            other => anyhow::bail!("unknown authority filter: {other}"),
        }
    }
}

// ── Transport outcomes ───────────────────────────────────────────────────

/// Classified failure of a completion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Prompt exceeds the model's context; needs a smaller payload.
    PayloadTooLarge,
    RateLimited,
    ServerError,
    /// Account out of credits; fatal for this model only.
    InsufficientCredits,
    /// Success status but the expected content field is missing.
    MalformedResponse,
    Other,
    Cancelled,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::ServerError | Self::Other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::PayloadTooLarge => "payload_too_large",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::InsufficientCredits => "insufficient_credits",
            Self::MalformedResponse => "malformed_response",
            Self::Other => "other",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one transport call, after retries.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryAttempt {
    Success {
        content: String,
        elapsed: Duration,
        attempts: u32,
    },
    Failure {
        kind: FailureKind,
        attempts: u32,
    },
}

impl QueryAttempt {
    /// Failures report zero elapsed time.
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Success { elapsed, .. } => *elapsed,
            Self::Failure { .. } => Duration::ZERO,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::Failure { attempts, .. } => *attempts,
        }
    }

    pub fn failure(&self) -> Option<FailureKind> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// A single chat-completion request: one system and one user message.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: String,
    pub user_prompt: String,
    /// Ask the provider for a JSON object response.
    pub structured_output: bool,
}

// ── Context handling ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextMode {
    /// Drop trailing documents until the context fits.
    #[default]
    Truncar,
    /// Ask the model for a condensed version of the context.
    Resumir,
}

impl FromStr for ContextMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "truncar" | "truncate" => Ok(Self::Truncar),
            "resumir" | "summarize" => Ok(Self::Resumir),
            other => anyhow::bail!("unknown context mode: {other}"),
        }
    }
}

// ── Run bookkeeping ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Idle,
    GeneratingQueries,
    Retrieving,
    FittingContext,
    GeneratingAnswer,
    Done,
    DoneWithIssues,
}

impl PipelineStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::DoneWithIssues)
    }
}

/// Per-(question, model) diagnostics. Owned by a single model run.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRunLog {
    pub stage: PipelineStage,
    #[serde(with = "secs")]
    pub query_time: Duration,
    #[serde(with = "secs")]
    pub answer_time: Duration,
    /// Word count of the answer.
    pub answer_tokens: usize,
    pub issues: Vec<String>,
}

impl Default for ModelRunLog {
    fn default() -> Self {
        Self {
            stage: PipelineStage::Idle,
            query_time: Duration::ZERO,
            answer_time: Duration::ZERO,
            answer_tokens: 0,
            issues: Vec::new(),
        }
    }
}

impl ModelRunLog {
    pub fn issue(&mut self, text: impl Into<String>) {
        self.issues.push(text.into());
    }

    pub fn enter(&mut self, stage: PipelineStage) {
        self.stage = stage;
    }

    /// Move to the terminal state matching the recorded issues.
    pub fn finish(&mut self) {
        self.stage = if self.issues.is_empty() {
            PipelineStage::Done
        } else {
            PipelineStage::DoneWithIssues
        };
    }
}

/// Everything downstream evaluation needs about one (question, model) run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub question: String,
    pub model: String,
    pub queries: Vec<String>,
    pub retrieved_count: usize,
    /// The serialized context the model actually saw.
    pub context: String,
    pub answer: String,
    /// System prompts in effect, so results can be compared across prompt sets.
    pub system_prompt_queries: String,
    pub system_prompt_answer: String,
    #[serde(flatten)]
    pub log: ModelRunLog,
    pub started_at: DateTime<Utc>,
}

mod secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_fields_serialize_as_sentinels() {
        let mut doc = RetrievedDocument::default();
        doc.set(FieldKey::Titulo, "Lei nº 13.709");
        doc.set(FieldKey::Ementa, "");
        let v = serde_json::to_value(&doc).unwrap();
        assert_eq!(v["titulo"], "Lei nº 13.709");
        assert_eq!(v["ementa"], "");
        assert_eq!(v["autor"], "Autor não informado");
        assert_eq!(v["link"], "Link não disponível");
        assert!(v.get("subtitulo").is_none());
        assert!(v.get("assuntos").is_none());
    }

    #[test]
    fn sentinel_only_replaces_absent_values() {
        let mut doc = RetrievedDocument::default();
        assert_eq!(doc.get_or_sentinel(FieldKey::Data), "Data não informada");
        doc.set(FieldKey::Data, "");
        assert_eq!(doc.get_or_sentinel(FieldKey::Data), "");
    }

    #[test]
    fn blank_title_is_not_a_title() {
        let mut doc = RetrievedDocument::default();
        assert!(!doc.has_title());
        doc.set(FieldKey::Titulo, "   ");
        assert!(!doc.has_title());
        doc.set(FieldKey::Titulo, "Decreto 1");
        assert!(doc.has_title());
    }

    #[test]
    fn label_lookup_ignores_unknown() {
        assert_eq!(FieldKey::from_label("titulo"), Some(FieldKey::Titulo));
        assert_eq!(FieldKey::from_label("assunto"), Some(FieldKey::Assuntos));
        assert_eq!(FieldKey::from_label("link"), None);
        assert_eq!(FieldKey::from_label("observacao"), None);
    }

    #[test]
    fn retry_classes() {
        assert!(FailureKind::RateLimited.is_retryable());
        assert!(FailureKind::ServerError.is_retryable());
        assert!(FailureKind::Other.is_retryable());
        assert!(!FailureKind::PayloadTooLarge.is_retryable());
        assert!(!FailureKind::InsufficientCredits.is_retryable());
        assert!(!FailureKind::MalformedResponse.is_retryable());
        assert!(!FailureKind::Cancelled.is_retryable());
    }

    #[test]
    fn failure_elapsed_is_zero() {
        let a = QueryAttempt::Failure { kind: FailureKind::Other, attempts: 5 };
        assert_eq!(a.elapsed(), Duration::ZERO);
        assert_eq!(a.attempts(), 5);
    }

    #[test]
    fn context_mode_parses_both_spellings() {
        assert_eq!("truncar".parse::<ContextMode>().unwrap(), ContextMode::Truncar);
        assert_eq!("RESUMIR".parse::<ContextMode>().unwrap(), ContextMode::Resumir);
        assert!("shrink".parse::<ContextMode>().is_err());
    }

    #[test]
    fn authority_parse_is_case_insensitive() {
        assert_eq!("federal".parse::<Authority>().unwrap(), Authority::Federal);
        assert_eq!(" Distrital ".parse::<Authority>().unwrap(), Authority::Distrital);
        assert!("Estadual e Municipal".parse::<Authority>().is_err());
    }

    #[test]
    fn run_log_terminal_state_follows_issues() {
        let mut log = ModelRunLog::default();
        log.finish();
        assert_eq!(log.stage, PipelineStage::Done);
        log.issue("no context retrieved");
        log.finish();
        assert_eq!(log.stage, PipelineStage::DoneWithIssues);
        assert!(log.stage.is_terminal());
    }
}
