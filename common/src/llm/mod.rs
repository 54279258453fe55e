pub mod anthropic;
pub mod client;
pub mod config;
pub mod message;
pub mod ollama;
pub mod openai;

pub use client::{FnClient, LlmClient};
pub use config::{build_client, LlmConfig, Provider};
pub use message::{format_transcript, Message, MessageRole};
