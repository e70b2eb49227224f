use axum::{
    extract::{rejection::JsonRejection, Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::models::chat::{BatchReply, ChatRequest, ClearReply, ConversationQuery, ConversationView};
use crate::state::AppState;
use crate::utils::error::ApiError;

fn request_span(conversation_id: &str) -> tracing::Span {
    info_span!(
        "chat",
        conversation_id = %conversation_id,
        request_id = %Uuid::new_v4()
    )
}

/// POST /api/chat: reply as Server-Sent Events.
pub async fn chat_stream_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let Json(request) = payload?;
    let conversation_id = state.conversation_id(request.conversation_id);
    let message = request.message.unwrap_or_default();
    let span = request_span(&conversation_id);

    let events = span.in_scope(|| {
        info!("Chat stream request: message_len={}", message.len());
        state.chat_service.send_streaming(&conversation_id, &message)
    })?;

    let stream = events.map(|event| Ok::<_, Infallible>(event.to_sse_event()));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// PUT /api/chat: reply in one JSON body.
pub async fn chat_batch_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<BatchReply>, ApiError> {
    let Json(request) = payload?;
    let conversation_id = state.conversation_id(request.conversation_id);
    let message = request.message.unwrap_or_default();
    let span = request_span(&conversation_id);

    let reply = state
        .chat_service
        .send_batch(&conversation_id, &message)
        .instrument(span)
        .await?;

    Ok(Json(reply))
}

/// GET /api/chat?conversationId=
pub async fn inspect_handler(
    State(state): State<AppState>,
    Query(query): Query<ConversationQuery>,
) -> Json<ConversationView> {
    let conversation_id = state.conversation_id(query.conversation_id);
    Json(state.chat_service.inspect(&conversation_id).await)
}

/// DELETE /api/chat?conversationId=
pub async fn clear_handler(
    State(state): State<AppState>,
    Query(query): Query<ConversationQuery>,
) -> Json<ClearReply> {
    let conversation_id = state.conversation_id(query.conversation_id);
    let cleared = state.chat_service.clear(&conversation_id);

    let message = if cleared {
        "Conversation memory cleared"
    } else {
        "No conversation memory found"
    };

    Json(ClearReply {
        conversation_id,
        cleared,
        message: message.to_string(),
    })
}
