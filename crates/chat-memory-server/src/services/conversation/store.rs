use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::System;
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::types::ConversationState;

/// Handle to one conversation. The lock is the per-id exclusion: writers
/// serialize, readers only ever see a complete state.
pub type SharedConversation = Arc<RwLock<ConversationState>>;

/// Thread-safe in-memory registry of conversations.
/// DashMap shards keep different ids from contending on one lock.
#[derive(Clone)]
pub struct ConversationStore {
    storage: Arc<DashMap<String, SharedConversation>>,
    /// Idle time after which a conversation is dropped. Zero keeps them forever.
    ttl: Duration,
    system: Arc<parking_lot::Mutex<System>>,
}

impl ConversationStore {
    pub fn new(ttl: Duration) -> Self {
        info!("Initializing conversation store (ttl: {:?})", ttl);
        Self {
            storage: Arc::new(DashMap::new()),
            ttl,
            system: Arc::new(parking_lot::Mutex::new(System::new())),
        }
    }

    /// Returns the existing conversation or registers an empty one.
    /// Concurrent callers with the same id always get the same handle.
    pub fn get_or_create(&self, id: &str) -> SharedConversation {
        if let Some(existing) = self.get(id) {
            return existing;
        }

        // The entry API holds the shard lock across check-and-insert.
        self.storage
            .entry(id.to_string())
            .or_insert_with(|| {
                debug!("Creating conversation {}", id);
                Arc::new(RwLock::new(ConversationState::new(id)))
            })
            .value()
            .clone()
    }

    /// Lookup only. Expired entries are removed and reported as missing.
    pub fn get(&self, id: &str) -> Option<SharedConversation> {
        let handle = self.storage.get(id)?.value().clone();

        if self.is_expired(&handle) {
            self.storage
                .remove_if(id, |_, current| Arc::ptr_eq(current, &handle));
            debug!("Conversation {} expired, removed from store", id);
            return None;
        }

        Some(handle)
    }

    pub fn delete(&self, id: &str) -> bool {
        let removed = self.storage.remove(id).is_some();
        if removed {
            debug!("Conversation {} deleted", id);
        }
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.storage.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Drops every idle conversation. Returns how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        if self.ttl.is_zero() {
            return 0;
        }

        let start_len = self.storage.len();
        self.storage.retain(|_, handle| !self.is_expired(handle));
        let count = start_len.saturating_sub(self.storage.len());

        if count > 0 {
            info!("Cleaned up {} expired conversations", count);
        }
        count
    }

    pub fn stats(&self) -> StoreStats {
        let mut sys = self.system.lock();
        sys.refresh_memory();

        let total = sys.total_memory();
        let used = sys.used_memory();
        StoreStats {
            active_conversations: self.len(),
            memory_usage_mb: used / 1024 / 1024,
            memory_total_mb: total / 1024 / 1024,
            memory_usage_percent: if total == 0 {
                0.0
            } else {
                (used as f64 / total as f64) * 100.0
            },
        }
    }

    // A conversation that is being mutated right now is busy, not idle.
    fn is_expired(&self, handle: &SharedConversation) -> bool {
        match handle.try_read() {
            Ok(state) => state.is_expired(self.ttl),
            Err(_) => false,
        }
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(Duration::ZERO)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub active_conversations: usize,
    pub memory_usage_mb: u64,
    pub memory_total_mb: u64,
    pub memory_usage_percent: f64,
}
