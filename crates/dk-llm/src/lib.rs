pub mod error;
pub mod provider;
pub mod types;

pub use error::LlmError;
pub use provider::{ChatProvider, OpenAiClient, OpenAiOptions};
pub use types::{ChatCompletion, ChatMessage, ChatRequest, MessageRole};
