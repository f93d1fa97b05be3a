pub mod config;
pub mod context;
pub mod core;
pub mod llm_client;
pub mod logging;
pub mod memory;
pub mod stats;
pub mod tools;
pub mod utils;

pub use crate::core::{Agent, AgentError};
pub use crate::llm_client::{LlmClient, MistralClient, ModelReply};
