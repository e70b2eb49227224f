use std::time::{Duration, Instant};

use crate::models::chat::{ChatMessage, Role};

/// Bounded context of one conversation, owned by the store.
#[derive(Debug, Clone)]
pub struct ConversationState {
    pub id: String,

    /// Most recent messages kept verbatim, oldest first.
    pub recent_messages: Vec<ChatMessage>,

    /// Running summary of everything folded out of `recent_messages`.
    pub summary: Option<String>,

    /// Size of `recent_messages` under the configured metric.
    pub estimated_size: usize,

    /// Sequence number handed to the next appended message.
    pub next_sequence: u64,

    /// Successful compaction passes so far.
    pub compactions: u64,

    pub created_at: Instant,
    pub last_activity: Instant,
}

impl ConversationState {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            recent_messages: Vec::new(),
            summary: None,
            estimated_size: 0,
            next_sequence: 0,
            compactions: 0,
            created_at: now,
            last_activity: now,
        }
    }

    /// Appends a message and returns its sequence number.
    pub fn push(&mut self, role: Role, content: &str) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.recent_messages
            .push(ChatMessage::new(role, content, sequence));
        sequence
    }

    pub fn has_summary(&self) -> bool {
        self.summary.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// Idle longer than `ttl`. A zero ttl never expires.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        !ttl.is_zero() && self.last_activity.elapsed() > ttl
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}
