use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::types::{ChatRequest, QueryAttempt};

/// A chat-completion provider. Failures are returned as values so a caller
/// can react to the failure kind instead of unwinding.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: &ChatRequest, cancel: &CancellationToken) -> QueryAttempt;
}
