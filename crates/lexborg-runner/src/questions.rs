use anyhow::{Context, Result};

pub const DEFAULT_QUESTIONS: &[&str] = &[
    "Quais são os direitos do consumidor no Brasil?",
    "Como funciona o processo de aposentadoria no INSS?",
    "Quais são as regras para abertura de empresa no Brasil?",
];

/// One question per non-empty line; `#` starts a comment line.
pub fn parse_questions(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Questions from `path`, or the built-in list when `path` is empty.
pub fn load_questions(path: &str) -> Result<Vec<String>> {
    if path.is_empty() {
        return Ok(DEFAULT_QUESTIONS.iter().map(|q| q.to_string()).collect());
    }
    let text = std::fs::read_to_string(path).with_context(|| format!("reading questions from {path}"))?;
    let questions = parse_questions(&text);
    anyhow::ensure!(!questions.is_empty(), "{path} contains no questions");
    Ok(questions)
}
