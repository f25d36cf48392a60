//! Protocol endpoints under `/oauth2`.

use axum::{
    extract::{
        rejection::{FormRejection, QueryRejection},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    Form, Json,
};
use serde::Deserialize;

use crate::dtos::Credentials;
use crate::oauth2::{
    AuthorizeOutcome, AuthorizeParams, ClientCredentials, OAuthError, RevokeParams, TokenParams,
};
use crate::AppState;

const NO_STORE: [(header::HeaderName, &str); 2] = [
    (header::CACHE_CONTROL, "no-store"),
    (header::PRAGMA, "no-cache"),
];

#[derive(Debug, Deserialize)]
pub struct AuthorizeForm {
    #[serde(flatten)]
    pub params: AuthorizeParams,
    #[serde(flatten)]
    pub credentials: Credentials,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InfoQuery {
    pub code: String,
    pub access_token: String,
}

fn form_error(rejection: FormRejection) -> OAuthError {
    OAuthError::invalid_request(rejection.body_text())
}

fn query_error(rejection: QueryRejection) -> OAuthError {
    OAuthError::invalid_request(rejection.body_text())
}

fn respond(state: &AppState, outcome: Result<AuthorizeOutcome, OAuthError>) -> Response {
    match outcome {
        Ok(AuthorizeOutcome::PendingUserApproval(view)) => {
            let status = if view.error.is_some() {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::OK
            };
            match state.flow.render(&view) {
                Ok(html) => (status, NO_STORE, Html(html)).into_response(),
                Err(e) => e.into_response(),
            }
        }
        Ok(AuthorizeOutcome::Issued(location)) => {
            (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// Validates the authorize request and shows the login form.
pub async fn authorize_page(
    State(state): State<AppState>,
    query: Result<Query<AuthorizeParams>, QueryRejection>,
) -> Response {
    let params = match query {
        Ok(Query(params)) => params,
        Err(rejection) => return query_error(rejection).into_response(),
    };
    respond(&state, state.flow.authorize(params, None).await)
}

/// Login form submission. Redirects to the client on success.
pub async fn authorize_submit(
    State(state): State<AppState>,
    form: Result<Form<AuthorizeForm>, FormRejection>,
) -> Response {
    let form = match form {
        Ok(Form(form)) => form,
        Err(rejection) => return form_error(rejection).into_response(),
    };
    respond(
        &state,
        state.flow.authorize(form.params, Some(form.credentials)).await,
    )
}

pub async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<TokenParams>, FormRejection>,
) -> Result<impl IntoResponse, OAuthError> {
    let Form(params) = form.map_err(form_error)?;
    let credentials =
        ClientCredentials::from_request(&headers, &params.client_id, &params.client_secret)?;

    let token = state.flow.token(credentials, params).await?;
    Ok((NO_STORE, Json(token)))
}

/// Introspection. The token comes from `code`, `access_token` or a bearer header.
pub async fn info(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<InfoQuery>, QueryRejection>,
) -> Result<impl IntoResponse, OAuthError> {
    let Query(query) = query.map_err(query_error)?;

    let token = if !query.code.is_empty() {
        query.code
    } else if !query.access_token.is_empty() {
        query.access_token
    } else {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    };

    let info = state.flow.info(&token).await?;
    Ok((NO_STORE, Json(info)))
}

pub async fn revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<RevokeParams>, FormRejection>,
) -> Result<StatusCode, OAuthError> {
    let Form(params) = form.map_err(form_error)?;
    let credentials =
        ClientCredentials::from_request(&headers, &params.client_id, &params.client_secret)?;

    state.flow.revoke(credentials, params).await?;
    Ok(StatusCode::OK)
}
