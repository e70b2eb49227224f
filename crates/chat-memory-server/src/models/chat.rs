use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ===== MEMORY MODEL =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One stored message. Immutable once appended to a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Insertion order within the conversation, starting at 0.
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>, sequence: u64) -> Self {
        Self {
            role,
            content: content.into(),
            sequence,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>, sequence: u64) -> Self {
        Self::new(Role::User, content, sequence)
    }

    pub fn assistant(content: impl Into<String>, sequence: u64) -> Self {
        Self::new(Role::Assistant, content, sequence)
    }
}

// ===== REQUEST MODELS =====

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConversationQuery {
    #[serde(default)]
    pub conversation_id: Option<String>,
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub message_count: usize,
    pub has_summary: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReply {
    pub ai_response: String,
    pub conversation_id: String,
    pub memory_stats: MemoryStats,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentMessageView {
    pub role: Role,
    /// First 100 characters, suffixed with "..." when cut.
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InspectMemoryStats {
    /// Character length of the running summary.
    pub buffer_size: usize,
    pub chat_memory_size: usize,
    pub is_using_compression: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationView {
    pub conversation_id: String,
    pub summary: Option<String>,
    pub message_count: usize,
    pub has_long_history: bool,
    pub recent_messages: Vec<RecentMessageView>,
    pub memory_stats: InspectMemoryStats,
}

impl ConversationView {
    /// View reported for a conversation that does not exist.
    pub fn empty(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            summary: None,
            message_count: 0,
            has_long_history: false,
            recent_messages: Vec::new(),
            memory_stats: InspectMemoryStats::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearReply {
    pub conversation_id: String,
    pub cleared: bool,
    pub message: String,
}
