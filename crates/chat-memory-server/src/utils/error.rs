use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures of the generation backend (primary or summarization).
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Failed to call LLM API: {0}")]
    Request(String),

    #[error("LLM API error: {status} - {body}")]
    Status { status: u16, body: String },

    #[error("Failed to parse LLM response: {0}")]
    InvalidResponse(String),

    #[error("No choices returned from LLM")]
    EmptyResponse,

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Backend busy: {0}")]
    Busy(String),
}

/// Internal memory faults. Never fails a request, only degrades its context.
#[derive(Error, Debug, Clone)]
pub enum MemoryError {
    #[error("Summarization failed: {0}")]
    Summarization(String),

    #[error("Memory unavailable: {0}")]
    Unavailable(String),
}

impl From<LlmError> for MemoryError {
    fn from(err: LlmError) -> Self {
        match err {
            // No summarize slot freed up in time; the backend itself was not asked.
            LlmError::Busy(msg) => MemoryError::Unavailable(msg),
            other => MemoryError::Summarization(other.to_string()),
        }
    }
}

/// Errors returned by `ChatService` operations.
#[derive(Error, Debug, Clone)]
pub enum ChatError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Upstream error: {0}")]
    Upstream(String),
}

impl From<LlmError> for ChatError {
    fn from(err: LlmError) -> Self {
        ChatError::Upstream(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("LLM error: {0}")]
    LlmError(String),
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        match err {
            ChatError::InvalidInput(msg) => ApiError::BadRequest(msg),
            ChatError::Upstream(msg) => ApiError::LlmError(msg),
        }
    }
}

/// Malformed or non-JSON request bodies get the same error shape as the rest.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::BadRequest(msg) => {
                tracing::warn!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, "BadRequest", msg)
            }
            ApiError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg)
            }
            ApiError::LlmError(msg) => {
                tracing::error!("LLM error: {}", msg);
                (StatusCode::SERVICE_UNAVAILABLE, "LlmError", msg)
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_busy_summarizer_is_unavailable() {
        assert!(matches!(
            MemoryError::from(LlmError::Busy("summarize".into())),
            MemoryError::Unavailable(_)
        ));
        assert!(matches!(
            MemoryError::from(LlmError::EmptyResponse),
            MemoryError::Summarization(_)
        ));
    }

    #[test]
    fn test_chat_error_maps_to_status() {
        let response = ApiError::from(ChatError::InvalidInput("empty".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ApiError::from(ChatError::Upstream("down".into())).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = ApiError::InternalError("boom".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_llm_error_becomes_upstream() {
        let err: ChatError = LlmError::Status {
            status: 502,
            body: "bad gateway".into(),
        }
        .into();
        match err {
            ChatError::Upstream(msg) => assert!(msg.contains("502")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
