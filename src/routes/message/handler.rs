use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};

use super::model::{CreateMessageRequest, GetMessagesRequest, MessageRecord};
use crate::AppState;
use crate::realtime::event_kinds;
use crate::utils::{error_codes, error_to_api_response, success_to_api_response};

#[axum::debug_handler]
pub async fn create_message(
    State(state): State<AppState>,
    Json(req): Json<CreateMessageRequest>,
) -> impl IntoResponse {
    match MessageRecord::create(&state.pool, &state.redis, req).await {
        Ok(message) => {
            state.hub.publish(
                event_kinds::CHAT_MESSAGE,
                serde_json::json!({
                    "thread_id": message.thread_id.clone(),
                    "message": &message,
                }),
            );
            (StatusCode::CREATED, success_to_api_response(message))
        }
        Err(e) => {
            tracing::error!("Failed to store message: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response::<MessageRecord>(error_codes::INTERNAL_ERROR, e.to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn get_messages(
    State(state): State<AppState>,
    Json(req): Json<GetMessagesRequest>,
) -> impl IntoResponse {
    match MessageRecord::get_messages(&state.pool, &state.redis, req).await {
        Ok(messages) => (StatusCode::OK, success_to_api_response(messages)),
        Err(e) => {
            tracing::error!("Failed to get messages: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response::<Vec<MessageRecord>>(
                    error_codes::INTERNAL_ERROR,
                    e.to_string(),
                ),
            )
        }
    }
}
