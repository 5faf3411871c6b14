use axum::Json;
use axum::{
    http::{StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::Serialize;

#[derive(Debug)]
pub enum AppError {
    /// The shared counter store could not be reached; requests fail closed.
    CounterStoreUnavailable(String),
    RateLimited { retry_after_secs: u64 },
    InternalServerError,
}

#[derive(Serialize)]
struct ErrorResponse {
    code: i32,
    error_message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::RateLimited { retry_after_secs } => {
                let body = Json(ErrorResponse {
                    code: StatusCode::TOO_MANY_REQUESTS.as_u16() as i32,
                    error_message: format!(
                        "Too many requests, retry in {} seconds",
                        retry_after_secs
                    ),
                });
                return (
                    StatusCode::TOO_MANY_REQUESTS,
                    [(RETRY_AFTER, retry_after_secs.to_string())],
                    body,
                )
                    .into_response();
            }
            AppError::CounterStoreUnavailable(detail) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Counter store unavailable: {}", detail),
            ),
            AppError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            code: status.as_u16() as i32,
            error_message,
        });

        (status, body).into_response()
    }
}
