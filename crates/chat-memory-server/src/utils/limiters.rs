use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::LimitsConfig;
use crate::utils::error::LlmError;

/// Concurrency caps for backend calls, shared by every conversation.
#[derive(Clone)]
pub struct Limiters {
    pub llm_stream: Arc<Semaphore>,
    pub llm_generate: Arc<Semaphore>,
    pub summarize: Arc<Semaphore>,
    pub acquire_timeout: Duration,
}

impl Limiters {
    pub fn new(cfg: &LimitsConfig) -> Self {
        Self {
            llm_stream: Arc::new(Semaphore::new(cfg.llm_stream_concurrency.max(1))),
            llm_generate: Arc::new(Semaphore::new(cfg.llm_generate_concurrency.max(1))),
            summarize: Arc::new(Semaphore::new(cfg.summarize_concurrency.max(1))),
            acquire_timeout: Duration::from_millis(cfg.acquire_timeout_ms.max(1)),
        }
    }

    /// Waits at most `acquire_timeout` for a permit; returns it with the time spent waiting.
    pub async fn acquire_timed(
        sem: Arc<Semaphore>,
        acquire_timeout: Duration,
        op: &'static str,
    ) -> Result<(OwnedSemaphorePermit, Duration), LlmError> {
        let start = Instant::now();

        let permit = tokio::time::timeout(acquire_timeout, sem.acquire_owned())
            .await
            .map_err(|_| LlmError::Busy(format!("limiter acquire timeout for op={}", op)))?
            .map_err(|_| LlmError::Busy(format!("limiter closed for op={}", op)))?;

        Ok((permit, start.elapsed()))
    }
}

impl Default for Limiters {
    fn default() -> Self {
        Self::new(&LimitsConfig::default())
    }
}
