use axum::response::sse::Event;
use serde::Serialize;

/// One client-visible event of a streamed reply.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    Chunk { index: usize, content: String },
    #[serde(rename_all = "camelCase")]
    Complete { full_text: String, chunk_count: usize },
    #[serde(rename_all = "camelCase")]
    Error { description: String },
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Chunk { .. } => "chunk",
            StreamEvent::Complete { .. } => "complete",
            StreamEvent::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk { .. })
    }

    /// SSE frame named after the event type, JSON payload.
    pub fn to_sse_event(&self) -> Event {
        Event::default()
            .event(self.kind())
            .data(serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string()))
    }
}

/// Frames generator output into events. Chunk indexes start at 1 and
/// at most one terminal event ever leaves the encoder.
#[derive(Debug, Default)]
pub struct StreamEncoder {
    chunk_count: usize,
    full_text: String,
    finished: bool,
}

impl StreamEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` for empty fragments and after termination.
    pub fn chunk(&mut self, fragment: &str) -> Option<StreamEvent> {
        if self.finished || fragment.is_empty() {
            return None;
        }
        self.chunk_count += 1;
        self.full_text.push_str(fragment);
        Some(StreamEvent::Chunk {
            index: self.chunk_count,
            content: fragment.to_string(),
        })
    }

    pub fn complete(&mut self) -> Option<StreamEvent> {
        if std::mem::replace(&mut self.finished, true) {
            return None;
        }
        Some(StreamEvent::Complete {
            full_text: self.full_text.clone(),
            chunk_count: self.chunk_count,
        })
    }

    pub fn error(&mut self, description: impl Into<String>) -> Option<StreamEvent> {
        if std::mem::replace(&mut self.finished, true) {
            return None;
        }
        Some(StreamEvent::Error {
            description: description.into(),
        })
    }

    pub fn full_text(&self) -> &str {
        &self.full_text
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }
}
