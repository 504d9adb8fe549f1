pub mod openrouter;
pub mod retry;

pub use openrouter::OpenRouterBackend;
pub use retry::RetryPolicy;
