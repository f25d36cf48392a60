use axum::{
    Json,
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::{ErrorKind, ErrorResponse};

/// Replaces the body of internal-error responses with a generic message so
/// cause chains never reach clients in production.
pub async fn redact_internal_errors(req: Request, next: Next) -> Response {
    let response = next.run(req).await;

    if response.extensions().get::<ErrorKind>() != Some(&ErrorKind::InternalError) {
        return response;
    }

    let mut redacted = (
        ErrorKind::InternalError.status(),
        Json(ErrorResponse {
            kind: ErrorKind::InternalError,
            message: "Internal server error".to_string(),
            errors: None,
            reason: Vec::new(),
        }),
    )
        .into_response();
    redacted.extensions_mut().insert(ErrorKind::InternalError);
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use axum::{Router, body::Body, http::StatusCode, middleware::from_fn, routing::get};
    use tower::ServiceExt;

    async fn failing() -> Result<(), AppError> {
        Err(AppError::DatabaseError(anyhow::anyhow!("connection refused")).context("load client"))
    }

    #[tokio::test]
    async fn internal_error_bodies_are_redacted() {
        let app = Router::new()
            .route("/", get(failing))
            .layer(from_fn(redact_internal_errors));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["kind"], "internalError");
        assert!(json.get("reason").is_none());
    }

    #[tokio::test]
    async fn other_errors_pass_through() {
        let app = Router::new()
            .route(
                "/",
                get(|| async { Err::<(), _>(AppError::NotFound(anyhow::anyhow!("missing"))) }),
            )
            .layer(from_fn(redact_internal_errors));

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "missing");
    }
}
