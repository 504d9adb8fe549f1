pub mod agent;
pub mod config;
pub mod context;
pub mod pipeline;
pub mod prompts;
pub mod queries;
pub mod source;
pub mod types;

pub use types::*;
