use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use service_core::error::AppError;
use std::fmt;
use thiserror::Error;

/// Error codes of RFC 6749 sections 4.1.2.1 and 5.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    UnsupportedResponseType,
    InvalidScope,
    AccessDenied,
    ServerError,
}

impl OAuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthErrorCode::InvalidRequest => "invalid_request",
            OAuthErrorCode::InvalidClient => "invalid_client",
            OAuthErrorCode::InvalidGrant => "invalid_grant",
            OAuthErrorCode::UnauthorizedClient => "unauthorized_client",
            OAuthErrorCode::UnsupportedGrantType => "unsupported_grant_type",
            OAuthErrorCode::UnsupportedResponseType => "unsupported_response_type",
            OAuthErrorCode::InvalidScope => "invalid_scope",
            OAuthErrorCode::AccessDenied => "access_denied",
            OAuthErrorCode::ServerError => "server_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            OAuthErrorCode::InvalidClient => StatusCode::UNAUTHORIZED,
            OAuthErrorCode::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl fmt::Display for OAuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an authorize error is reported once the redirect URI is trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectTarget {
    pub uri: String,
    pub state: String,
    /// Implicit grants carry their parameters in the fragment.
    pub fragment: bool,
}

#[derive(Debug, Error)]
#[error("{code}: {description}")]
pub struct OAuthError {
    pub code: OAuthErrorCode,
    pub description: String,
    pub redirect: Option<RedirectTarget>,
    #[source]
    pub source: Option<AppError>,
}

impl OAuthError {
    pub fn new(code: OAuthErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            redirect: None,
            source: None,
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InvalidRequest, description)
    }

    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InvalidClient, description)
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InvalidGrant, description)
    }

    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InvalidScope, description)
    }

    pub fn unauthorized_client(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::UnauthorizedClient, description)
    }

    /// Storage or infrastructure failure. The cause is logged, never rendered.
    pub fn server_error(source: AppError) -> Self {
        Self {
            code: OAuthErrorCode::ServerError,
            description: "The authorization server encountered an unexpected condition"
                .to_string(),
            redirect: None,
            source: Some(source),
        }
    }

    pub fn with_redirect(mut self, target: RedirectTarget) -> Self {
        self.redirect = Some(target);
        self
    }

    fn redirect_location(&self, target: &RedirectTarget) -> String {
        let mut params = vec![
            ("error", self.code.as_str()),
            ("error_description", self.description.as_str()),
        ];
        if !target.state.is_empty() {
            params.push(("state", target.state.as_str()));
        }
        redirect_url(&target.uri, &params, target.fragment)
    }
}

#[derive(Serialize)]
struct OAuthErrorBody<'a> {
    error: OAuthErrorCode,
    error_description: &'a str,
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        if self.code == OAuthErrorCode::ServerError {
            tracing::error!(error = ?self.source, "OAuth2 request failed");
        } else {
            tracing::info!(
                code = %self.code,
                description = %self.description,
                "OAuth2 request rejected"
            );
        }

        if let Some(target) = &self.redirect {
            let location = self.redirect_location(target);
            if let Ok(location) = HeaderValue::from_str(&location) {
                return (StatusCode::FOUND, [(header::LOCATION, location)]).into_response();
            }
        }

        let mut response = (
            self.code.status(),
            Json(OAuthErrorBody {
                error: self.code,
                error_description: &self.description,
            }),
        )
            .into_response();

        let headers = response.headers_mut();
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        if self.code == OAuthErrorCode::InvalidClient {
            headers.insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"oauth2\""),
            );
        }
        response
    }
}

/// Appends URL-encoded `params` to `uri`, in the query or in the fragment.
pub fn redirect_url(uri: &str, params: &[(&str, &str)], fragment: bool) -> String {
    let encoded = serde_urlencoded::to_string(params).unwrap_or_default();
    let separator = if fragment {
        '#'
    } else if uri.contains('?') {
        '&'
    } else {
        '?'
    };
    format!("{}{}{}", uri, separator, encoded)
}
