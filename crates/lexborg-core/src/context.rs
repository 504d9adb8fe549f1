use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    agent::ChatBackend,
    prompts,
    types::{ChatRequest, ContextMode, QueryAttempt, RetrievedDocument},
};

/// How a context was brought under its budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FitStrategy {
    /// Everything fit as-is.
    Complete,
    /// A prefix of the documents was kept.
    Truncated { dropped: usize },
    Summarized,
    /// Summarization was attempted but not trusted; the truncated form is used.
    SummaryRejected { reason: String, dropped: usize },
}

#[derive(Debug, Clone)]
pub struct FittedContext {
    pub serialized: String,
    /// Number of leading documents represented (all of them for a summary).
    pub documents_kept: usize,
    pub strategy: FitStrategy,
}

impl FittedContext {
    pub fn chars(&self) -> usize {
        char_len(&self.serialized)
    }

    pub fn is_empty(&self) -> bool {
        self.serialized.is_empty()
    }
}

pub(crate) fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// JSON array of the documents; an empty selection serializes to "".
pub fn serialize_documents(docs: &[RetrievedDocument]) -> String {
    if docs.is_empty() {
        return String::new();
    }
    serde_json::to_string(docs).unwrap_or_default()
}

/// Largest document prefix whose exact serialization is within `limit` characters.
///
/// Starts from an estimate based on the average serialized document size and
/// shrinks one document at a time until the re-serialization fits.
pub fn truncate_to_fit(docs: &[RetrievedDocument], limit: usize) -> FittedContext {
    let full = serialize_documents(docs);
    let total = char_len(&full);
    if total <= limit {
        return FittedContext {
            serialized: full,
            documents_kept: docs.len(),
            strategy: FitStrategy::Complete,
        };
    }

    let avg = (total / docs.len()).max(1);
    let mut keep = (limit / avg).min(docs.len());
    let mut serialized = serialize_documents(&docs[..keep]);
    while keep > 0 && char_len(&serialized) > limit {
        keep -= 1;
        serialized = serialize_documents(&docs[..keep]);
    }

    FittedContext {
        serialized,
        documents_kept: keep,
        strategy: FitStrategy::Truncated {
            dropped: docs.len() - keep,
        },
    }
}

/// Brings retrieved documents under a character budget. Holds no state
/// between calls; a new controller is cheap to build per model run.
pub struct ContextController<'a> {
    pub mode: ContextMode,
    pub chat: &'a dyn ChatBackend,
    /// Model asked for summaries in summarize mode.
    pub model: &'a str,
    pub summary_system_prompt: &'a str,
    /// Summaries shorter than this are treated as a degenerate response.
    pub min_summary_chars: usize,
    pub cancel: &'a CancellationToken,
}

impl ContextController<'_> {
    pub async fn fit(&self, docs: &[RetrievedDocument], limit: usize) -> FittedContext {
        let truncated = truncate_to_fit(docs, limit);
        if truncated.strategy == FitStrategy::Complete {
            return truncated;
        }
        let dropped = docs.len() - truncated.documents_kept;

        match self.mode {
            ContextMode::Truncar => {
                info!(
                    model = %self.model,
                    limit,
                    kept = truncated.documents_kept,
                    dropped,
                    "context truncated to fit"
                );
                truncated
            },
            ContextMode::Resumir => match self.summarize(docs, limit).await {
                Ok(summary) => {
                    info!(model = %self.model, limit, chars = char_len(&summary), "context summarized");
                    FittedContext {
                        serialized: summary,
                        documents_kept: docs.len(),
                        strategy: FitStrategy::Summarized,
                    }
                },
                Err(reason) => {
                    warn!(model = %self.model, limit, %reason, "summary rejected, falling back to truncation");
                    FittedContext {
                        strategy: FitStrategy::SummaryRejected { reason, dropped },
                        ..truncated
                    }
                },
            },
        }
    }

    /// Refit after the model rejected a context as too large. Always truncates:
    /// the full set was already summarized or rejected by the first fit.
    pub fn refit(&self, docs: &[RetrievedDocument], limit: usize) -> FittedContext {
        let fitted = truncate_to_fit(docs, limit);
        info!(
            model = %self.model,
            limit,
            kept = fitted.documents_kept,
            "context refitted by truncation"
        );
        fitted
    }

    async fn summarize(&self, docs: &[RetrievedDocument], limit: usize) -> Result<String, String> {
        let request = ChatRequest {
            model: self.model.to_string(),
            system_prompt: self.summary_system_prompt.to_string(),
            user_prompt: prompts::summary_prompt(&serialize_documents(docs), limit),
            structured_output: false,
        };
        match self.chat.complete(&request, self.cancel).await {
            QueryAttempt::Success { content, .. } => {
                let summary = content.trim().to_string();
                let chars = char_len(&summary);
                if chars < self.min_summary_chars {
                    Err(format!("summary too short ({chars} chars)"))
                } else if chars > limit {
                    Err(format!("summary over budget ({chars} > {limit} chars)"))
                } else {
                    Ok(summary)
                }
            },
            QueryAttempt::Failure { kind, .. } => Err(format!("summary request failed: {kind}")),
        }
    }
}
