pub mod chat_service;
pub mod conversation;
pub mod llm_service;
pub mod stream_encoder;

pub use chat_service::ChatService;
pub use llm_service::{GenerationRequest, LlmProvider, LlmService};
pub use stream_encoder::{StreamEncoder, StreamEvent};
