use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::config::Settings;
use crate::services::conversation::{memory_from_config, ConversationStore, LlmSummarizer, Summarizer};
use crate::services::{ChatService, LlmProvider, LlmService};
use crate::utils::limiters::Limiters;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub chat_service: Arc<ChatService>,
    pub settings: Arc<Settings>,
}

impl AppState {
    pub fn new(chat_service: Arc<ChatService>, settings: Settings) -> Self {
        Self {
            chat_service,
            settings: Arc::new(settings),
        }
    }

    /// Wires the backends, memory and store described by `settings`.
    /// Only the generation backend is required; a summarizer that cannot be
    /// built leaves the service running without history.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let limiters = Arc::new(Limiters::new(&settings.limits));

        let generator: Arc<dyn LlmProvider> = Arc::new(LlmService::new(settings.llm.clone())?);

        let summarizer: Option<Arc<dyn Summarizer>> =
            match LlmService::new(settings.summarizer.clone().into()) {
                Ok(backend) => {
                    let summarizer: Arc<dyn Summarizer> = Arc::new(LlmSummarizer::new(
                        Arc::new(backend),
                        settings.prompts.summary_prompt.clone(),
                        limiters.clone(),
                    ));
                    Some(summarizer)
                }
                Err(e) => {
                    warn!("Summarizer backend unavailable: {}", e);
                    None
                }
            };

        let memory = memory_from_config(&settings.memory, summarizer);
        let store = ConversationStore::new(Duration::from_secs(
            settings.memory.conversation_ttl_seconds,
        ));

        let chat_service = Arc::new(ChatService::new(
            store,
            memory,
            generator,
            limiters,
            settings.prompts.system_prompt.clone(),
            settings.limits.stream_buffer,
        ));

        Ok(Self::new(chat_service, settings))
    }

    /// Requested id, or the configured default when absent or blank.
    pub fn conversation_id(&self, requested: Option<String>) -> String {
        requested
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| self.settings.memory.default_conversation_id.clone())
    }
}
