//! Summarizing conversation memory.
//!
//! A conversation keeps its latest messages verbatim. When their size passes
//! the budget, the oldest ones are folded into a single running summary,
//! always leaving the newest `keep_recent` messages untouched.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::summarizer::{format_lines, Summarizer};
use super::token_counter::{estimator_for, SizeEstimator};
use super::types::ConversationState;
use crate::config::MemoryConfig;
use crate::models::chat::{ChatMessage, MemoryStats, Role};
use crate::utils::error::MemoryError;

/// Context handed to generation.
#[derive(Debug, Clone, Default)]
pub struct LoadedContext {
    pub summary: Option<String>,
    pub recent_messages: Vec<ChatMessage>,
    /// Set when a pending compaction failed and the prior view was returned.
    pub degraded: Option<MemoryError>,
}

#[derive(Debug, Clone, Default)]
pub struct SaveOutcome {
    pub compacted: bool,
    /// Set when compaction failed; the turn was still stored verbatim.
    pub degraded: Option<MemoryError>,
}

#[async_trait]
pub trait ConversationMemory: Send + Sync {
    /// Current compacted view. Never fails; see `LoadedContext::degraded`.
    async fn load_context(&self, state: &mut ConversationState) -> LoadedContext;

    /// Appends the user input then the assistant output, compacting if needed.
    async fn save_turn(
        &self,
        state: &mut ConversationState,
        input: &str,
        output: &str,
    ) -> Result<SaveOutcome, MemoryError>;

    fn stats(&self, state: &ConversationState) -> MemoryStats;

    /// "live" or "null", for readiness reporting.
    fn kind(&self) -> &'static str;
}

/// Picks the memory variant once, at construction. `summarizer` is `None`
/// when its backend could not be set up; memory then runs without history.
pub fn memory_from_config(
    cfg: &MemoryConfig,
    summarizer: Option<Arc<dyn Summarizer>>,
) -> Arc<dyn ConversationMemory> {
    match summarizer {
        Some(summarizer) if cfg.enabled => {
            info!(
                "Conversation memory enabled (metric={:?}, budget={}, keep_recent={})",
                cfg.size_metric, cfg.max_token_limit, cfg.keep_recent_messages
            );
            Arc::new(LiveMemory::new(
                summarizer,
                estimator_for(cfg.size_metric),
                cfg.max_token_limit,
                cfg.keep_recent_messages,
            ))
        }
        _ if !cfg.enabled => {
            warn!("Conversation memory disabled, replies are generated without history");
            Arc::new(NullMemory)
        }
        _ => {
            warn!("Summarizer unavailable, falling back to memory without history");
            Arc::new(NullMemory)
        }
    }
}

pub struct LiveMemory {
    summarizer: Arc<dyn Summarizer>,
    estimator: Arc<dyn SizeEstimator>,
    budget: usize,
    keep_recent: usize,
}

impl LiveMemory {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        estimator: Arc<dyn SizeEstimator>,
        budget: usize,
        keep_recent: usize,
    ) -> Self {
        Self {
            summarizer,
            estimator,
            budget,
            keep_recent,
        }
    }

    fn over_budget(&self, state: &ConversationState) -> bool {
        state.estimated_size > self.budget
    }

    /// Smallest oldest prefix whose removal fits the rest in the budget,
    /// never reaching into the newest `keep_recent` messages.
    fn fold_len(&self, messages: &[ChatMessage]) -> usize {
        let max_fold = messages.len().saturating_sub(self.keep_recent);
        let mut n = 0;
        while n < max_fold && self.estimator.estimate(&messages[n..]) > self.budget {
            n += 1;
        }
        n
    }

    /// All-or-nothing: on summarizer failure the state is left untouched.
    async fn compact(&self, state: &mut ConversationState) -> Result<bool, MemoryError> {
        if !self.over_budget(state) {
            return Ok(false);
        }

        let n = self.fold_len(&state.recent_messages);
        if n == 0 {
            debug!(
                "Conversation {} over budget ({} > {}) but nothing foldable",
                state.id, state.estimated_size, self.budget
            );
            return Ok(false);
        }

        let previous = state.summary.clone().unwrap_or_default();
        let new_lines = format_lines(&state.recent_messages[..n]);
        let summary = self.summarizer.summarize(&previous, &new_lines).await?;

        state.summary = Some(summary);
        state.recent_messages.drain(..n);
        state.estimated_size = self.estimator.estimate(&state.recent_messages);
        state.compactions += 1;

        info!(
            "Compacted conversation {}: folded {} messages, {} kept (size {})",
            state.id,
            n,
            state.recent_messages.len(),
            state.estimated_size
        );
        Ok(true)
    }
}

#[async_trait]
impl ConversationMemory for LiveMemory {
    async fn load_context(&self, state: &mut ConversationState) -> LoadedContext {
        state.touch();

        // Only happens when an earlier compaction failed.
        let degraded = match self.compact(state).await {
            Ok(_) => None,
            Err(e) => {
                warn!("Memory degraded for conversation {}: {}", state.id, e);
                Some(e)
            }
        };

        LoadedContext {
            summary: state.summary.clone(),
            recent_messages: state.recent_messages.clone(),
            degraded,
        }
    }

    async fn save_turn(
        &self,
        state: &mut ConversationState,
        input: &str,
        output: &str,
    ) -> Result<SaveOutcome, MemoryError> {
        state.push(Role::User, input);
        state.push(Role::Assistant, output);
        state.estimated_size = self.estimator.estimate(&state.recent_messages);
        state.touch();

        match self.compact(state).await {
            Ok(compacted) => Ok(SaveOutcome {
                compacted,
                degraded: None,
            }),
            Err(e) => {
                warn!(
                    "Compaction failed for conversation {}, turn kept verbatim: {}",
                    state.id, e
                );
                Ok(SaveOutcome {
                    compacted: false,
                    degraded: Some(e),
                })
            }
        }
    }

    fn stats(&self, state: &ConversationState) -> MemoryStats {
        MemoryStats {
            message_count: state.recent_messages.len(),
            has_summary: state.has_summary(),
        }
    }

    fn kind(&self) -> &'static str {
        "live"
    }
}

/// Stand-in used when memory is disabled or the summarizer could not be
/// set up: no history, saves are dropped.
pub struct NullMemory;

#[async_trait]
impl ConversationMemory for NullMemory {
    async fn load_context(&self, _state: &mut ConversationState) -> LoadedContext {
        LoadedContext::default()
    }

    async fn save_turn(
        &self,
        _state: &mut ConversationState,
        _input: &str,
        _output: &str,
    ) -> Result<SaveOutcome, MemoryError> {
        Ok(SaveOutcome::default())
    }

    fn stats(&self, _state: &ConversationState) -> MemoryStats {
        MemoryStats {
            message_count: 0,
            has_summary: false,
        }
    }

    fn kind(&self) -> &'static str {
        "null"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::conversation::summarizer::MockSummarizer;
    use crate::services::conversation::token_counter::{MessageCountEstimator, TokenEstimator};

    /// Summary is the previous summary plus the new lines, so nothing is lost.
    fn concatenating_summarizer() -> MockSummarizer {
        let mut mock = MockSummarizer::new();
        mock.expect_summarize().returning(|previous, lines| {
            if previous.is_empty() {
                Ok(lines.to_string())
            } else {
                Ok(format!("{}\n{}", previous, lines))
            }
        });
        mock
    }

    fn by_count(summarizer: MockSummarizer, budget: usize, keep_recent: usize) -> LiveMemory {
        LiveMemory::new(
            Arc::new(summarizer),
            Arc::new(MessageCountEstimator),
            budget,
            keep_recent,
        )
    }

    #[tokio::test]
    async fn test_save_turn_appends_in_order() {
        let memory = by_count(MockSummarizer::new(), 100, 4);
        let mut state = ConversationState::new("c1");

        memory.save_turn(&mut state, "hi", "hello").await.unwrap();

        assert_eq!(state.recent_messages.len(), 2);
        assert_eq!(state.recent_messages[0].role, Role::User);
        assert_eq!(state.recent_messages[0].content, "hi");
        assert_eq!(state.recent_messages[1].role, Role::Assistant);
        assert_eq!(state.estimated_size, 2);
        assert!(state.summary.is_none());
    }

    #[tokio::test]
    async fn test_compaction_folds_oldest_and_keeps_recent() {
        let memory = by_count(concatenating_summarizer(), 4, 2);
        let mut state = ConversationState::new("c1");

        for i in 0..3 {
            memory
                .save_turn(&mut state, &format!("q{i}"), &format!("a{i}"))
                .await
                .unwrap();
        }

        assert_eq!(state.summary.as_deref(), Some("Human: q0\nAI: a0"));
        let kept: Vec<_> = state.recent_messages.iter().map(|m| m.sequence).collect();
        assert_eq!(kept, vec![2, 3, 4, 5]);
        assert_eq!(state.compactions, 1);
        assert_eq!(memory.stats(&state), MemoryStats { message_count: 4, has_summary: true });
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_saves_keep_one_total_order() {
        const TURNS: usize = 8;
        let memory = Arc::new(by_count(concatenating_summarizer(), 4, 2));
        let state = Arc::new(tokio::sync::RwLock::new(ConversationState::new("c1")));

        let handles: Vec<_> = (0..TURNS)
            .map(|i| {
                let memory = memory.clone();
                let state = state.clone();
                tokio::spawn(async move {
                    let mut guard = state.write().await;
                    memory
                        .save_turn(&mut guard, &format!("q{i}"), &format!("a{i}"))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let state = state.read().await;
        assert!(state.compactions > 0);
        let sequences: Vec<_> = state.recent_messages.iter().map(|m| m.sequence).collect();
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));

        let history = format!(
            "{}\n{}",
            state.summary.as_deref().unwrap_or_default(),
            format_lines(&state.recent_messages)
        );
        let lines: Vec<&str> = history.lines().collect();
        assert_eq!(lines.len(), 2 * TURNS);

        let mut seen = Vec::new();
        for pair in lines.chunks(2) {
            let turn = pair[0].strip_prefix("Human: q").unwrap();
            assert_eq!(pair[1], format!("AI: a{turn}"));
            seen.push(turn.parse::<usize>().unwrap());
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..TURNS).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_chronology_is_preserved_across_compactions() {
        let memory = by_count(concatenating_summarizer(), 3, 2);
        let mut state = ConversationState::new("c1");
        let mut transcript = Vec::new();

        for i in 0..10 {
            let (q, a) = (format!("q{i}"), format!("a{i}"));
            memory.save_turn(&mut state, &q, &a).await.unwrap();
            transcript.push(format!("Human: {q}"));
            transcript.push(format!("AI: {a}"));
        }

        let mut decoded: Vec<String> = state
            .summary
            .as_deref()
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect();
        decoded.extend(format_lines(&state.recent_messages).lines().map(str::to_string));

        assert_eq!(decoded, transcript);
        assert!(state.recent_messages.len() >= 2);
    }

    #[tokio::test]
    async fn test_keep_recent_wins_over_budget() {
        let memory = LiveMemory::new(
            Arc::new(concatenating_summarizer()),
            Arc::new(TokenEstimator),
            1,
            4,
        );
        let mut state = ConversationState::new("c1");

        for i in 0..3 {
            memory
                .save_turn(&mut state, &format!("question number {i}"), "a long enough answer")
                .await
                .unwrap();
        }

        assert_eq!(state.recent_messages.len(), 4);
        assert_eq!(state.recent_messages[3].sequence, 5);
        assert!(state.estimated_size > 1);
    }

    #[tokio::test]
    async fn test_failed_compaction_keeps_turn_verbatim() {
        let mut mock = MockSummarizer::new();
        mock.expect_summarize()
            .times(1)
            .returning(|_, _| Err(MemoryError::Summarization("backend down".into())));
        let memory = by_count(mock, 4, 2);
        let mut state = ConversationState::new("c1");

        for i in 0..2 {
            memory.save_turn(&mut state, &format!("q{i}"), "a").await.unwrap();
        }
        let outcome = memory.save_turn(&mut state, "q2", "a").await.unwrap();

        assert!(!outcome.compacted);
        assert!(outcome.degraded.is_some());
        assert_eq!(state.recent_messages.len(), 6);
        assert!(state.summary.is_none());
        assert_eq!(state.compactions, 0);
    }

    #[tokio::test]
    async fn test_load_context_retries_pending_compaction() {
        let mut mock = MockSummarizer::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_summarize()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Err(MemoryError::Summarization("timeout".into())));
        mock.expect_summarize()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok("earlier chat".into()));
        let memory = by_count(mock, 2, 0);
        let mut state = ConversationState::new("c1");

        memory.save_turn(&mut state, "q0", "a0").await.unwrap();
        let outcome = memory.save_turn(&mut state, "q1", "a1").await.unwrap();
        assert!(outcome.degraded.is_some());

        let context = memory.load_context(&mut state).await;
        assert!(context.degraded.is_none());
        assert_eq!(context.summary.as_deref(), Some("earlier chat"));
        assert_eq!(context.recent_messages.len(), 2);
    }

    #[tokio::test]
    async fn test_load_context_degrades_to_prior_view() {
        let mut mock = MockSummarizer::new();
        mock.expect_summarize()
            .returning(|_, _| Err(MemoryError::Summarization("still down".into())));
        let memory = by_count(mock, 2, 0);
        let mut state = ConversationState::new("c1");

        memory.save_turn(&mut state, "q0", "a0").await.unwrap();
        memory.save_turn(&mut state, "q1", "a1").await.unwrap();

        let context = memory.load_context(&mut state).await;
        assert!(matches!(context.degraded, Some(MemoryError::Summarization(_))));
        assert_eq!(context.recent_messages.len(), 4);
    }

    #[tokio::test]
    async fn test_empty_conversation_is_never_over_budget() {
        // any summarize call would panic: no expectation is set
        let memory = by_count(MockSummarizer::new(), 0, 0);
        let mut state = ConversationState::new("c1");

        let context = memory.load_context(&mut state).await;
        assert!(context.degraded.is_none());
        assert!(context.recent_messages.is_empty());
        assert!(context.summary.is_none());
    }

    #[tokio::test]
    async fn test_null_memory_ignores_everything() {
        let memory = NullMemory;
        let mut state = ConversationState::new("c1");

        let outcome = memory.save_turn(&mut state, "hi", "hello").await.unwrap();
        assert!(!outcome.compacted);
        assert!(state.recent_messages.is_empty());
        assert!(memory.load_context(&mut state).await.recent_messages.is_empty());
    }

    #[test]
    fn test_config_selects_variant() {
        let cfg = MemoryConfig {
            enabled: false,
            ..MemoryConfig::default()
        };
        let summarizer: Arc<dyn Summarizer> = Arc::new(MockSummarizer::new());
        let memory = memory_from_config(&cfg, Some(summarizer.clone()));
        assert_eq!(memory.kind(), "null");

        let memory = memory_from_config(&MemoryConfig::default(), Some(summarizer));
        assert_eq!(memory.kind(), "live");
    }

    #[test]
    fn test_missing_summarizer_selects_null_memory() {
        let memory = memory_from_config(&MemoryConfig::default(), None);
        assert_eq!(memory.kind(), "null");
    }
}
