pub mod config;
pub mod handlers;
pub mod models;
pub mod services;
pub mod state;
pub mod utils;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};

pub use state::AppState;

pub fn build_router(state: AppState) -> Router {
    let body_limit = state.settings.server.request_body_limit_bytes;

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/ready", get(handlers::health::readiness_check))
        .route(
            "/api/chat",
            post(handlers::chat::chat_stream_handler)
                .put(handlers::chat::chat_batch_handler)
                .get(handlers::chat::inspect_handler)
                .delete(handlers::chat::clear_handler),
        )
        .with_state(state)
        // the browser client is served from a different origin
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default().include_headers(false)))
        .layer(DefaultBodyLimit::max(body_limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::services::conversation::summarizer::MockSummarizer;
    use crate::services::conversation::{ConversationStore, LiveMemory, MessageCountEstimator};
    use crate::services::llm_service::{FragmentStream, GenerationRequest, LlmProvider};
    use crate::services::ChatService;
    use crate::utils::error::LlmError;
    use crate::utils::limiters::Limiters;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct EchoGenerator {
        fail: bool,
    }

    #[async_trait]
    impl LlmProvider for EchoGenerator {
        async fn generate_stream(&self, request: &GenerationRequest) -> Result<FragmentStream, LlmError> {
            if self.fail {
                return Err(LlmError::Request("connection refused".into()));
            }
            let reply = format!("echo: {}", request.input);
            Ok(Box::pin(futures::stream::iter(vec![Ok(reply)])))
        }

        async fn generate(&self, request: &GenerationRequest) -> Result<String, LlmError> {
            if self.fail {
                return Err(LlmError::Request("connection refused".into()));
            }
            Ok(format!("echo: {}", request.input))
        }
    }

    fn app(fail: bool) -> Router {
        let settings = Settings::default();
        let memory = Arc::new(LiveMemory::new(
            Arc::new(MockSummarizer::new()),
            Arc::new(MessageCountEstimator),
            1000,
            4,
        ));
        let service = Arc::new(ChatService::new(
            ConversationStore::default(),
            memory,
            Arc::new(EchoGenerator { fail }),
            Arc::new(Limiters::default()),
            settings.prompts.system_prompt.clone(),
            4,
        ));
        build_router(AppState::new(service, settings))
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty_request(method: Method, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_stream_then_inspect() {
        let app = app(false);

        let response = app
            .clone()
            .oneshot(json_request(
                Method::POST,
                "/api/chat",
                json!({"conversationId": "c1", "message": "hi"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains("event: chunk"));
        assert!(body.contains("event: complete"));
        assert!(body.contains(r#""fullText":"echo: hi""#));

        let response = app
            .oneshot(empty_request(Method::GET, "/api/chat?conversationId=c1"))
            .await
            .unwrap();
        let view = body_json(response).await;
        assert_eq!(view["messageCount"], 2);
        assert_eq!(view["hasLongHistory"], false);
        assert_eq!(view["recentMessages"][0]["role"], "user");
        assert_eq!(view["memoryStats"]["isUsingCompression"], false);
    }

    #[tokio::test]
    async fn test_stream_upstream_error_is_terminal_event() {
        let response = app(true)
            .oneshot(json_request(Method::POST, "/api/chat", json!({"message": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.contains("event: error"));
        assert!(!body.contains("event: complete"));
    }

    #[tokio::test]
    async fn test_missing_message_is_bad_request() {
        let response = app(false)
            .oneshot(json_request(Method::POST, "/api/chat", json!({"conversationId": "c1"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "BadRequest");
    }

    #[tokio::test]
    async fn test_batch_uses_default_conversation() {
        let app = app(false);

        let response = app
            .clone()
            .oneshot(json_request(Method::PUT, "/api/chat", json!({"message": "ping"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let reply = body_json(response).await;
        assert_eq!(reply["aiResponse"], "echo: ping");
        assert_eq!(reply["conversationId"], "default");
        assert_eq!(reply["memoryStats"], json!({"messageCount": 2, "hasSummary": false}));

        let response = app
            .oneshot(empty_request(Method::DELETE, "/api/chat"))
            .await
            .unwrap();
        let cleared = body_json(response).await;
        assert_eq!(cleared["conversationId"], "default");
        assert_eq!(cleared["cleared"], true);
    }

    #[tokio::test]
    async fn test_batch_upstream_failure_is_503() {
        let response = app(true)
            .oneshot(json_request(Method::PUT, "/api/chat", json!({"message": "ping"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body_json(response).await["error"], "LlmError");
    }

    #[tokio::test]
    async fn test_clear_and_inspect_unknown() {
        let app = app(false);

        let response = app
            .clone()
            .oneshot(empty_request(Method::DELETE, "/api/chat?conversationId=nope"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["cleared"], false);

        let response = app
            .oneshot(empty_request(Method::GET, "/api/chat?conversationId=nope"))
            .await
            .unwrap();
        let view = body_json(response).await;
        assert_eq!(view["messageCount"], 0);
        assert_eq!(view["summary"], Value::Null);
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        let app = app(false);

        let response = app
            .clone()
            .oneshot(empty_request(Method::GET, "/health"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(empty_request(Method::GET, "/health/ready"))
            .await
            .unwrap();
        let ready = body_json(response).await;
        assert_eq!(ready["status"], "ready");
        assert_eq!(ready["memory"], "live");
        assert_eq!(ready["store"]["active_conversations"], 0);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let app = app(false);

        for method in [Method::POST, Method::PUT] {
            let request = Request::builder()
                .method(method)
                .uri("/api/chat")
                .header("content-type", "application/json")
                .body(Body::from("not json"))
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            let body = body_json(response).await;
            assert_eq!(body["error"], "BadRequest");
            assert!(!body["message"].as_str().unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_missing_content_type_is_bad_request() {
        let request = Request::builder()
            .method(Method::PUT)
            .uri("/api/chat")
            .body(Body::from(r#"{"message":"hi"}"#))
            .unwrap();
        let response = app(false).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["error"], "BadRequest");
    }
}
