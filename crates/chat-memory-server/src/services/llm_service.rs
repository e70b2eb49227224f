use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

use crate::config::LlmConfig;
use crate::models::chat::ChatMessage;
use crate::utils::error::LlmError;

pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// Message in the wire format of `/v1/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

impl PromptMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// Everything the backend needs for one reply. Not stored anywhere.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub system_prompt: String,
    pub summary: Option<String>,
    pub history: Vec<ChatMessage>,
    pub input: String,
}

impl GenerationRequest {
    /// `[system, earlier-conversation summary, history.., user input]`;
    /// empty system prompt and summary are left out.
    pub fn to_messages(&self) -> Vec<PromptMessage> {
        let mut messages = Vec::with_capacity(self.history.len() + 3);

        if !self.system_prompt.is_empty() {
            messages.push(PromptMessage::new("system", self.system_prompt.clone()));
        }
        if let Some(summary) = self.summary.as_deref().filter(|s| !s.is_empty()) {
            messages.push(PromptMessage::new(
                "system",
                format!("Summary of the earlier conversation:\n{}", summary),
            ));
        }
        messages.extend(
            self.history
                .iter()
                .map(|m| PromptMessage::new(m.role.as_str(), m.content.clone())),
        );
        messages.push(PromptMessage::new("user", self.input.clone()));
        messages
    }
}

/// Language-generation backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Starts generation and returns the fragments as they arrive.
    /// A fault after the call started is yielded as the last item.
    async fn generate_stream(&self, request: &GenerationRequest) -> Result<FragmentStream, LlmError>;

    /// Single-shot generation of the whole reply.
    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError>;
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<PromptMessage>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChoiceChunk>,
}

#[derive(Debug, Deserialize)]
struct ChoiceChunk {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

/// OpenAI-compatible HTTP backend. Sampling parameters are fixed at construction.
#[derive(Clone)]
pub struct LlmService {
    client: Client,
    config: LlmConfig,
}

impl LlmService {
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        if config.base_url.trim().is_empty() {
            return Err(LlmError::Request("base_url must not be empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| LlmError::Request(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    async fn send(&self, request: &GenerationRequest, stream: bool) -> Result<reqwest::Response, LlmError> {
        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages: request.to_messages(),
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
            stream,
        };

        debug!(
            "Calling {} (stream={}, messages={})",
            self.config.model,
            stream,
            body.messages.len()
        );

        let mut builder = self
            .client
            .post(format!(
                "{}/v1/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .json(&body);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for LlmService {
    async fn generate_stream(&self, request: &GenerationRequest) -> Result<FragmentStream, LlmError> {
        let response = self.send(request, true).await?;
        let mut bytes = response.bytes_stream();

        // Dropping this stream drops the response body, which aborts the HTTP call.
        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::default();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(LlmError::Stream(e.to_string()));
                        return;
                    }
                };
                for frame in decoder.push(&chunk) {
                    match frame {
                        SseFrame::Delta(text) => yield Ok(text),
                        SseFrame::Done => return,
                    }
                }
            }

            for frame in decoder.finish() {
                match frame {
                    SseFrame::Delta(text) => yield Ok(text),
                    SseFrame::Done => return,
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
        let response = self.send(request, false).await?;

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse)
    }
}

#[derive(Debug, PartialEq)]
enum SseFrame {
    Delta(String),
    Done,
}

/// Line-buffered decoder for the `data: {...}` frames of a streaming completion.
/// Network chunks may split a line (or a UTF-8 sequence) anywhere.
#[derive(Default)]
struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        self.pending.extend_from_slice(bytes);

        let mut frames = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(frame) = Self::parse_line(&String::from_utf8_lossy(&line)) {
                frames.push(frame);
            }
        }
        frames
    }

    fn finish(&mut self) -> Vec<SseFrame> {
        let rest = std::mem::take(&mut self.pending);
        Self::parse_line(&String::from_utf8_lossy(&rest))
            .into_iter()
            .collect()
    }

    fn parse_line(line: &str) -> Option<SseFrame> {
        let data = line.trim().strip_prefix("data:")?.trim();

        if data == "[DONE]" {
            return Some(SseFrame::Done);
        }

        match serde_json::from_str::<ChatCompletionChunk>(data) {
            Ok(chunk) => chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
                .filter(|text| !text.is_empty())
                .map(SseFrame::Delta),
            Err(e) => {
                debug!("Skipping unparsable stream line: {}", e);
                None
            }
        }
    }
}
