//! Conversation memory management module
//!
//! Provides in-memory conversation state management with:
//! - Thread-safe store with per-conversation locking (DashMap + RwLock)
//! - Pluggable size estimation
//! - Progressive summarization of old turns

pub mod memory;
mod store;
pub mod summarizer;
mod token_counter;
pub mod types;

pub use memory::{memory_from_config, ConversationMemory, LiveMemory, LoadedContext, NullMemory, SaveOutcome};
pub use store::{ConversationStore, SharedConversation, StoreStats};
pub use summarizer::{LlmSummarizer, Summarizer};
pub use token_counter::{estimator_for, MessageCountEstimator, SizeEstimator, TokenEstimator};
pub use types::ConversationState;
