use futures::stream::{Stream, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::models::chat::{BatchReply, ConversationView, InspectMemoryStats, MemoryStats, RecentMessageView};
use crate::services::conversation::{ConversationMemory, ConversationStore, StoreStats};
use crate::services::llm_service::{GenerationRequest, LlmProvider};
use crate::services::stream_encoder::{StreamEncoder, StreamEvent};
use crate::utils::error::{ChatError, LlmError};
use crate::utils::limiters::Limiters;

const INSPECT_RECENT_MESSAGES: usize = 4;
const INSPECT_PREVIEW_CHARS: usize = 100;
const LONG_HISTORY_THRESHOLD: usize = 10;

/// Where a request currently is. Logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    LoadingContext,
    Generating,
    Persisting,
    Error,
}

fn enter(phase: Phase) {
    debug!(?phase, "chat phase");
}

/// Orchestrates one chat turn: context, generation, persistence.
pub struct ChatService {
    store: ConversationStore,
    memory: Arc<dyn ConversationMemory>,
    generator: Arc<dyn LlmProvider>,
    limiters: Arc<Limiters>,
    system_prompt: String,
    stream_buffer: usize,
}

impl ChatService {
    pub fn new(
        store: ConversationStore,
        memory: Arc<dyn ConversationMemory>,
        generator: Arc<dyn LlmProvider>,
        limiters: Arc<Limiters>,
        system_prompt: String,
        stream_buffer: usize,
    ) -> Self {
        Self {
            store,
            memory,
            generator,
            limiters,
            system_prompt,
            stream_buffer: stream_buffer.max(1),
        }
    }

    fn validate(conversation_id: &str, message: &str) -> Result<(), ChatError> {
        if conversation_id.trim().is_empty() {
            return Err(ChatError::InvalidInput("conversationId must not be empty".to_string()));
        }
        if message.trim().is_empty() {
            return Err(ChatError::InvalidInput("Message is required".to_string()));
        }
        Ok(())
    }

    /// Streams one turn. Input errors are returned before any state is touched;
    /// everything after that ends in exactly one terminal event.
    ///
    /// Generation runs in its own task behind a bounded channel. Dropping the
    /// returned stream cancels it and the turn is not saved.
    pub fn send_streaming(
        self: &Arc<Self>,
        conversation_id: &str,
        message: &str,
    ) -> Result<impl Stream<Item = StreamEvent> + Send + 'static, ChatError> {
        Self::validate(conversation_id, message)?;

        let (tx, rx) = flume::bounded(self.stream_buffer);
        let token = CancellationToken::new();
        let guard = token.clone().drop_guard();

        let service = Arc::clone(self);
        let id = conversation_id.to_string();
        let input = message.to_string();
        tokio::spawn(
            async move { service.produce(id, input, tx, token).await }.instrument(tracing::Span::current()),
        );

        Ok(async_stream::stream! {
            let _guard = guard;
            let mut events = rx.into_stream();
            let mut terminated = false;

            while let Some(event) = events.next().await {
                let terminal = event.is_terminal();
                yield event;
                if terminal {
                    terminated = true;
                    break;
                }
            }

            // producer vanished (panic) without a terminal event
            if !terminated {
                yield StreamEvent::Error {
                    description: "Generation ended unexpectedly".to_string(),
                };
            }
        })
    }

    async fn produce(
        self: Arc<Self>,
        id: String,
        input: String,
        tx: flume::Sender<StreamEvent>,
        token: CancellationToken,
    ) {
        let started = Instant::now();
        let mut encoder = StreamEncoder::new();

        enter(Phase::LoadingContext);
        let request = self.load_request(&id, &input).await;

        enter(Phase::Generating);
        let stream_start = async {
            let (permit, waited) = Limiters::acquire_timed(
                self.limiters.llm_stream.clone(),
                self.limiters.acquire_timeout,
                "llm_stream",
            )
            .await?;
            debug!("Stream permit acquired after {:?}", waited);
            let fragments = self.generator.generate_stream(&request).await?;
            Ok::<_, LlmError>((permit, fragments))
        };

        let (permit, mut fragments) = tokio::select! {
            _ = token.cancelled() => {
                info!("Client disconnected before generation started");
                return;
            }
            result = stream_start => match result {
                Ok(opened) => opened,
                Err(e) => {
                    enter(Phase::Error);
                    error!("Generation failed for conversation {}: {}", id, e);
                    Self::emit(&tx, &token, encoder.error(e.to_string())).await;
                    enter(Phase::Idle);
                    return;
                }
            },
        };

        loop {
            let next = tokio::select! {
                _ = token.cancelled() => {
                    info!(
                        "Client disconnected after {} chunks, abandoning turn",
                        encoder.chunk_count()
                    );
                    return;
                }
                next = fragments.next() => next,
            };

            match next {
                Some(Ok(fragment)) => {
                    if !Self::emit(&tx, &token, encoder.chunk(&fragment)).await {
                        info!("Client went away mid-stream, abandoning turn");
                        return;
                    }
                }
                Some(Err(e)) => {
                    enter(Phase::Error);
                    error!(
                        "Generation failed mid-stream after {} chunks: {}",
                        encoder.chunk_count(),
                        e
                    );
                    Self::emit(&tx, &token, encoder.error(e.to_string())).await;
                    enter(Phase::Idle);
                    return;
                }
                None => break,
            }
        }
        drop(fragments);
        drop(permit);

        enter(Phase::Persisting);
        self.persist(&id, &input, encoder.full_text()).await;

        info!(
            "Streamed {} chunks for conversation {} in {:?}",
            encoder.chunk_count(),
            id,
            started.elapsed()
        );
        Self::emit(&tx, &token, encoder.complete()).await;
        enter(Phase::Idle);
    }

    /// Waits for room in the channel. False once the consumer is gone.
    async fn emit(
        tx: &flume::Sender<StreamEvent>,
        token: &CancellationToken,
        event: Option<StreamEvent>,
    ) -> bool {
        let Some(event) = event else {
            return true;
        };
        tokio::select! {
            _ = token.cancelled() => false,
            sent = tx.send_async(event) => sent.is_ok(),
        }
    }

    /// Single-shot turn.
    pub async fn send_batch(&self, conversation_id: &str, message: &str) -> Result<BatchReply, ChatError> {
        Self::validate(conversation_id, message)?;

        enter(Phase::LoadingContext);
        let request = self.load_request(conversation_id, message).await;

        enter(Phase::Generating);
        let generated = async {
            let (_permit, waited) = Limiters::acquire_timed(
                self.limiters.llm_generate.clone(),
                self.limiters.acquire_timeout,
                "llm_generate",
            )
            .await?;
            debug!("Generate permit acquired after {:?}", waited);
            self.generator.generate(&request).await
        }
        .await;

        let reply = match generated {
            Ok(reply) => reply,
            Err(e) => {
                enter(Phase::Error);
                error!("Generation failed for conversation {}: {}", conversation_id, e);
                enter(Phase::Idle);
                return Err(e.into());
            }
        };

        enter(Phase::Persisting);
        self.persist(conversation_id, message, &reply).await;
        let memory_stats = self.memory_stats(conversation_id).await;
        enter(Phase::Idle);

        Ok(BatchReply {
            ai_response: reply,
            conversation_id: conversation_id.to_string(),
            memory_stats,
        })
    }

    async fn load_request(&self, conversation_id: &str, input: &str) -> GenerationRequest {
        let handle = self.store.get_or_create(conversation_id);
        let context = {
            let mut state = handle.write().await;
            self.memory.load_context(&mut state).await
        };

        if let Some(e) = &context.degraded {
            warn!(
                "Using degraded context for conversation {}: {}",
                conversation_id, e
            );
        }
        debug!(
            "Loaded context: summary={}, recent_messages={}",
            context.summary.is_some(),
            context.recent_messages.len()
        );

        GenerationRequest {
            system_prompt: self.system_prompt.clone(),
            summary: context.summary,
            history: context.recent_messages,
            input: input.to_string(),
        }
    }

    /// Saves the turn. Failures are logged, never returned: the reply is already out.
    async fn persist(&self, conversation_id: &str, input: &str, output: &str) {
        let handle = self.store.get_or_create(conversation_id);
        let mut state = handle.write().await;

        match self.memory.save_turn(&mut state, input, output).await {
            Ok(outcome) => {
                if let Some(e) = outcome.degraded {
                    warn!("Memory degraded for conversation {}: {}", conversation_id, e);
                }
                if outcome.compacted {
                    debug!("Conversation {} compacted", conversation_id);
                }
            }
            Err(e) => warn!("Failed to save turn for conversation {}: {}", conversation_id, e),
        }
    }

    async fn memory_stats(&self, conversation_id: &str) -> MemoryStats {
        match self.store.get(conversation_id) {
            Some(handle) => self.memory.stats(&*handle.read().await),
            None => MemoryStats {
                message_count: 0,
                has_summary: false,
            },
        }
    }

    /// Read-only view. Unknown ids get an empty view and are not created.
    pub async fn inspect(&self, conversation_id: &str) -> ConversationView {
        let Some(handle) = self.store.get(conversation_id) else {
            return ConversationView::empty(conversation_id);
        };
        let state = handle.read().await;

        let message_count = state.recent_messages.len();
        let recent_messages = state
            .recent_messages
            .iter()
            .skip(message_count.saturating_sub(INSPECT_RECENT_MESSAGES))
            .map(|m| RecentMessageView {
                role: m.role,
                content: preview(&m.content),
                timestamp: m.created_at,
            })
            .collect();

        ConversationView {
            conversation_id: conversation_id.to_string(),
            summary: state.summary.clone(),
            message_count,
            has_long_history: message_count > LONG_HISTORY_THRESHOLD,
            recent_messages,
            memory_stats: InspectMemoryStats {
                buffer_size: state.summary.as_deref().map_or(0, |s| s.chars().count()),
                chat_memory_size: message_count,
                is_using_compression: state.has_summary(),
            },
        }
    }

    /// True when there was something to delete.
    pub fn clear(&self, conversation_id: &str) -> bool {
        let cleared = self.store.delete(conversation_id);
        info!("Clear conversation {}: existed={}", conversation_id, cleared);
        cleared
    }

    pub fn memory_kind(&self) -> &'static str {
        self.memory.kind()
    }

    pub fn store_stats(&self) -> StoreStats {
        self.store.stats()
    }

    pub fn cleanup_expired(&self) -> usize {
        self.store.cleanup_expired()
    }
}

fn preview(content: &str) -> String {
    if content.chars().count() > INSPECT_PREVIEW_CHARS {
        let cut: String = content.chars().take(INSPECT_PREVIEW_CHARS).collect();
        format!("{}...", cut)
    } else {
        content.to_string()
    }
}
