use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts},
    middleware::Next,
    response::Response,
};
use service_core::error::{AppError, ErrorKind};

use crate::models::AccessToken;
use crate::oauth2::scope;
use crate::services::AccessTokenStore;
use crate::utils::SharedClock;

/// State of one protected route: the scope it requires and where to look
/// bearer tokens up.
#[derive(Clone)]
pub struct Permission {
    pub tokens: AccessTokenStore,
    pub clock: SharedClock,
    pub required: &'static str,
}

fn bearer_token(req: &Request) -> Result<String, AppError> {
    let value = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("missing \"Authorization\" header")))?;

    let value = value.to_str().map_err(|_| {
        AppError::BadRequest(anyhow::anyhow!("malformed \"Authorization\" header"))
    })?;

    let parts: Vec<&str> = value.split_whitespace().collect();
    match parts.as_slice() {
        ["Bearer", token] => Ok(token.to_string()),
        _ => Err(AppError::BadRequest(anyhow::anyhow!(
            "malformed \"Authorization\" header"
        ))),
    }
}

/// Resolves the bearer token and checks it grants `required`. The token is
/// stored in the request extensions for the handler.
pub async fn require_permission(
    State(permission): State<Permission>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = bearer_token(&req)?;

    let access = match permission.tokens.get(&token).await {
        Ok(Some(access)) => access,
        Ok(None) => return Err(AppError::Unauthorized(anyhow::anyhow!("invalid session"))),
        Err(e) if e.kind() == ErrorKind::ValidationError => {
            return Err(AppError::Unauthorized(anyhow::anyhow!("invalid session")))
        }
        Err(e) => return Err(e.context("failed to get the access token")),
    };

    if access.is_expired(permission.clock.now()) {
        return Err(AppError::Unauthorized(anyhow::anyhow!("session expired")));
    }

    if !scope::grants(&access.scopes, permission.required) {
        tracing::warn!(
            client_id = %access.client_id,
            required_scope = %permission.required,
            granted_scopes = ?access.scopes,
            "Insufficient scope"
        );
        return Err(AppError::Unauthorized(anyhow::anyhow!(
            "doesn't have required permission"
        )));
    }

    req.extensions_mut().insert(access);
    Ok(next.run(req).await)
}

/// The access token that passed [`require_permission`].
pub struct Authenticated(pub AccessToken);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Authenticated
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts.extensions.get::<AccessToken>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Access token missing from request extensions"
            ))
        })?;

        Ok(Authenticated(token.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::NewAccessToken;
    use crate::utils::FixedClock;
    use axum::{
        body::Body,
        http::{Request as HttpRequest, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Router,
    };
    use chrono::{Duration, Utc};
    use service_core::store::MemoryStore;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn setup(required: &'static str) -> (Router, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let tokens = AccessTokenStore::new(
            Arc::new(MemoryStore::new(AccessTokenStore::indexes())),
            clock.clone(),
        );
        tokens
            .create(NewAccessToken {
                client_id: "ops-console".to_string(),
                access_token: "users-token-1".to_string(),
                refresh_token: None,
                expires_in: 60,
                scopes: vec!["users".to_string()],
            })
            .await
            .unwrap();
        tokens
            .create(NewAccessToken {
                client_id: "ops-console".to_string(),
                access_token: "reader-token-1".to_string(),
                refresh_token: None,
                expires_in: 60,
                scopes: vec!["users.read".to_string()],
            })
            .await
            .unwrap();

        let permission = Permission {
            tokens,
            clock: clock.clone(),
            required,
        };
        let router = Router::new()
            .route(
                "/",
                get(|Authenticated(token): Authenticated| async move { token.client_id }),
            )
            .layer(from_fn_with_state(permission, require_permission));
        (router, clock)
    }

    async fn call(router: Router, authorization: Option<&str>) -> StatusCode {
        let mut request = HttpRequest::builder().uri("/");
        if let Some(value) = authorization {
            request = request.header(header::AUTHORIZATION, value);
        }
        router
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn parent_scope_grants_child_permission() {
        let (router, _) = setup("users.read").await;
        assert_eq!(call(router, Some("Bearer users-token-1")).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn child_scope_does_not_grant_parent_permission() {
        let (router, _) = setup("users").await;
        assert_eq!(
            call(router, Some("Bearer reader-token-1")).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn header_problems_are_bad_requests() {
        let (router, _) = setup("users.read").await;
        assert_eq!(call(router.clone(), None).await, StatusCode::BAD_REQUEST);
        assert_eq!(
            call(router.clone(), Some("Basic dXNlcjpwYXNz")).await,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            call(router, Some("Bearer a b")).await,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn unknown_malformed_and_expired_tokens_are_unauthorized() {
        let (router, clock) = setup("users.read").await;
        assert_eq!(
            call(router.clone(), Some("Bearer unknown-token")).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            call(router.clone(), Some("Bearer abc")).await,
            StatusCode::UNAUTHORIZED
        );

        clock.advance(Duration::seconds(61));
        assert_eq!(
            call(router, Some("Bearer users-token-1")).await,
            StatusCode::UNAUTHORIZED
        );
    }
}
