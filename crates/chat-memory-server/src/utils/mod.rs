pub mod error;
pub mod limiters;
pub mod logger;

pub use error::{ApiError, ChatError, LlmError, MemoryError};
pub use limiters::Limiters;
