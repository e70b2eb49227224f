use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::models::chat::{ChatMessage, Role};
use crate::services::llm_service::{GenerationRequest, LlmProvider};
use crate::utils::error::MemoryError;
use crate::utils::limiters::Limiters;

/// Folds new conversation lines into a running summary.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// `previous` is empty when nothing has been summarized yet.
    async fn summarize(&self, previous: &str, new_lines: &str) -> Result<String, MemoryError>;
}

/// Renders messages as the transcript lines handed to the summarizer.
pub fn format_lines(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| {
            let speaker = match m.role {
                Role::User => "Human",
                Role::Assistant => "AI",
            };
            format!("{}: {}", speaker, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Summarizer backed by the secondary generation backend.
pub struct LlmSummarizer {
    provider: Arc<dyn LlmProvider>,
    prompt_template: String,
    limiters: Arc<Limiters>,
}

impl LlmSummarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, prompt_template: String, limiters: Arc<Limiters>) -> Self {
        Self {
            provider,
            prompt_template,
            limiters,
        }
    }

    /// Fills both placeholders in one pass; substituted text is never rescanned.
    fn render(&self, previous: &str, new_lines: &str) -> String {
        self.prompt_template
            .split("{new_lines}")
            .map(|part| part.replace("{summary}", previous))
            .collect::<Vec<_>>()
            .join(new_lines)
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, previous: &str, new_lines: &str) -> Result<String, MemoryError> {
        let (_permit, waited) = Limiters::acquire_timed(
            self.limiters.summarize.clone(),
            self.limiters.acquire_timeout,
            "summarize",
        )
        .await?;
        debug!("Summarize permit acquired after {:?}", waited);

        let request = GenerationRequest {
            input: self.render(previous, new_lines),
            ..GenerationRequest::default()
        };

        let summary = self.provider.generate(&request).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(MemoryError::Summarization(
                "summarizer returned an empty summary".to_string(),
            ));
        }
        Ok(summary.to_string())
    }
}
