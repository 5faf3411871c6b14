use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
};

use super::model::{GetPollRequest, Poll, VoteOutcome, VoteRequest};
use crate::AppState;
use crate::realtime::event_kinds;
use crate::utils::{error_codes, error_to_api_response, success_to_api_response};

#[axum::debug_handler]
pub async fn vote(
    State(state): State<AppState>,
    Json(req): Json<VoteRequest>,
) -> impl IntoResponse {
    match Poll::record_vote(&state.pool, &req).await {
        Ok(VoteOutcome::Recorded) => {
            state.hub.publish(
                event_kinds::POLL_UPDATE,
                serde_json::json!({ "poll_id": req.poll_id }),
            );
            (
                StatusCode::OK,
                success_to_api_response(serde_json::json!({ "poll_id": req.poll_id })),
            )
        }
        Ok(VoteOutcome::PollNotFound) => (
            StatusCode::NOT_FOUND,
            error_to_api_response(error_codes::NOT_FOUND, "Poll not found".to_string()),
        ),
        Ok(VoteOutcome::PollClosed) => (
            StatusCode::CONFLICT,
            error_to_api_response(
                error_codes::POLL_CLOSED,
                "Poll is closed to new votes".to_string(),
            ),
        ),
        Ok(VoteOutcome::UnknownOption) => (
            StatusCode::NOT_FOUND,
            error_to_api_response(error_codes::NOT_FOUND, "Unknown poll option".to_string()),
        ),
        Err(e) => {
            tracing::error!("Failed to record vote: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response(error_codes::INTERNAL_ERROR, e.to_string()),
            )
        }
    }
}

#[axum::debug_handler]
pub async fn get_poll(
    State(state): State<AppState>,
    Json(req): Json<GetPollRequest>,
) -> impl IntoResponse {
    match Poll::fetch(&state.pool, &req.poll_id).await {
        Ok(Some(poll)) => (StatusCode::OK, success_to_api_response(poll)),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            error_to_api_response::<Poll>(error_codes::NOT_FOUND, "Poll not found".to_string()),
        ),
        Err(e) => {
            tracing::error!("Failed to fetch poll: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                error_to_api_response::<Poll>(error_codes::INTERNAL_ERROR, e.to_string()),
            )
        }
    }
}
