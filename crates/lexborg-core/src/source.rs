use async_trait::async_trait;

use crate::types::{Authority, RetrievedDocument};

/// A legal-document search engine.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Returns at most `desired` documents. Upstream trouble yields a short
    /// (possibly empty) list rather than an error; partial results are valid.
    async fn search(
        &self,
        term: &str,
        desired: usize,
        authority: Option<Authority>,
    ) -> Vec<RetrievedDocument>;
}
