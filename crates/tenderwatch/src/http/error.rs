//! HTTP error responses.
//!
//! Every failure leaves the API as `{"error": "<message>"}`. Refused records
//! and malformed requests are 400s carrying the validation message; anything
//! unexpected is a 500 whose message is cut to 50 characters. A 503 says only
//! `Service Unavailable`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use tenderwatch_store::StoreError;

use crate::error::ServiceError;

const UNHANDLED_PREFIX_CHARS: usize = 50;

#[derive(Debug)]
pub enum ApiError {
    /// A request the handler refused before reaching the service.
    BadRequest(String),
    NotFound,
    MethodNotAllowed,
    Service(ServiceError),
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        ApiError::Service(e)
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "Not Found".into()),
            ApiError::MethodNotAllowed => {
                (StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed".into())
            }
            ApiError::Service(e) => (service_status(e), e.to_string()),
        }
    }
}

fn service_status(e: &ServiceError) -> StatusCode {
    match e {
        ServiceError::Validation(_) | ServiceError::Core(_) => StatusCode::BAD_REQUEST,
        ServiceError::ReadOnly => StatusCode::METHOD_NOT_ALLOWED,
        ServiceError::Store(store) => match store {
            StoreError::AlreadyExists(_)
            | StoreError::TooManyIds(_)
            | StoreError::ModelMismatch { .. }
            | StoreError::InvalidData(_) => StatusCode::BAD_REQUEST,
            StoreError::BackendUnavailable(_) | StoreError::Closed => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %message, "request refused");
        }
        let message = public_message(status, message);
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Backend failures carry driver text; only the log sees it.
fn public_message(status: StatusCode, message: String) -> String {
    match status {
        StatusCode::INTERNAL_SERVER_ERROR => {
            let head: String = message.chars().take(UNHANDLED_PREFIX_CHARS).collect();
            format!("Unhandled error: {head}")
        }
        StatusCode::SERVICE_UNAVAILABLE => "Service Unavailable".into(),
        _ => message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenderwatch_core::ValidationError;

    fn status(e: ApiError) -> StatusCode {
        e.into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status(ServiceError::Validation(ValidationError::BadHashId).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(ServiceError::Store(StoreError::AlreadyExists("x".into())).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status(ServiceError::Store(StoreError::BackendUnavailable("down".into())).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status(ServiceError::ReadOnly.into()), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(status(ApiError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status(ServiceError::Store(StoreError::Internal("lock".into())).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_unhandled_message_is_truncated() {
        let message = public_message(StatusCode::INTERNAL_SERVER_ERROR, "é".repeat(200));
        assert_eq!(message, format!("Unhandled error: {}", "é".repeat(50)));
        assert_eq!(
            public_message(StatusCode::BAD_REQUEST, "bad hash id".into()),
            "bad hash id"
        );
    }

    #[tokio::test]
    async fn test_backend_detail_stays_out_of_body() {
        let detail = "error connecting to server: host=db.internal port=5432 user=tw";
        let response: Response =
            ApiError::from(ServiceError::Store(StoreError::BackendUnavailable(detail.into())))
                .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"error": "Service Unavailable"}));
    }
}
