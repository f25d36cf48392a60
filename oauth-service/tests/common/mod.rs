//! Shared setup for the HTTP-level tests: an in-memory store, a fixed clock
//! and helpers to drive the router with `oneshot`.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use http_body_util::BodyExt;
use oauth_service::{
    build_router,
    config::OAuthConfig,
    db::Buckets,
    dtos::CreateClientRequest,
    services::NewAccessToken,
    utils::{generate_token, FixedClock},
    AppState,
};
use std::sync::Arc;
use tower::ServiceExt;

pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin1234";
pub const REDIRECT_URI: &str = "https://ops.example.com/callback";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub clock: Arc<FixedClock>,
}

pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).expect("response body is JSON")
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn location(&self) -> String {
        self.headers
            .get(header::LOCATION)
            .expect("Location header")
            .to_str()
            .unwrap()
            .to_string()
    }
}

pub struct RegisteredClient {
    pub id: String,
    pub secret: String,
}

impl RegisteredClient {
    pub fn basic_auth(&self) -> String {
        format!(
            "Basic {}",
            STANDARD.encode(format!("{}:{}", self.id, self.secret))
        )
    }
}

impl TestApp {
    pub async fn new() -> Self {
        let mut config = OAuthConfig::default();
        config.log_level = "error".to_string();
        Self::with_config(config).await
    }

    pub async fn with_config(config: OAuthConfig) -> Self {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let state = AppState::new(config, Buckets::in_memory(), clock.clone());

        state
            .accounts
            .bootstrap_admin(ADMIN_USERNAME, ADMIN_PASSWORD)
            .await
            .expect("Failed to bootstrap admin");

        let router = build_router(state.clone())
            .await
            .expect("Failed to build router");

        Self {
            router,
            state,
            clock,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec();
        Response {
            status,
            headers,
            body,
        }
    }

    pub async fn get(&self, uri: &str, authorization: Option<&str>) -> Response {
        let mut request = Request::builder().method("GET").uri(uri);
        if let Some(value) = authorization {
            request = request.header(header::AUTHORIZATION, value);
        }
        self.send(request.body(Body::empty()).unwrap()).await
    }

    pub async fn post_form(
        &self,
        uri: &str,
        authorization: Option<&str>,
        fields: &[(&str, &str)],
    ) -> Response {
        let mut request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(value) = authorization {
            request = request.header(header::AUTHORIZATION, value);
        }
        let body = serde_urlencoded::to_string(fields).unwrap();
        self.send(request.body(Body::from(body)).unwrap()).await
    }

    pub async fn send_json(
        &self,
        method: &str,
        uri: &str,
        authorization: Option<&str>,
        body: serde_json::Value,
    ) -> Response {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(value) = authorization {
            request = request.header(header::AUTHORIZATION, value);
        }
        self.send(request.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// Stores an access token with `scopes` directly and returns its bearer header.
    pub async fn bearer(&self, scopes: &[&str]) -> String {
        let token = generate_token();
        self.state
            .access_tokens
            .create(NewAccessToken {
                client_id: "test-harness".to_string(),
                access_token: token.clone(),
                refresh_token: None,
                expires_in: 3600,
                scopes: scopes.iter().map(|s| s.to_string()).collect(),
            })
            .await
            .expect("Failed to store access token");
        format!("Bearer {}", token)
    }

    pub async fn register_client(&self, name: &str, public: bool) -> RegisteredClient {
        let created = self
            .state
            .clients
            .create(CreateClientRequest {
                name: name.to_string(),
                redirect_uris: vec![REDIRECT_URI.to_string()],
                grant_types: vec![
                    "authorization_code".to_string(),
                    "refresh_token".to_string(),
                    "client_credentials".to_string(),
                    "implicit".to_string(),
                ],
                response_types: vec!["code".to_string(), "token".to_string()],
                scopes: vec!["users".to_string(), "clients".to_string()],
                public,
            })
            .await
            .expect("Failed to register client");

        RegisteredClient {
            id: created.client.id,
            secret: created.secret.unwrap_or_default(),
        }
    }

    /// Logs the admin in on the authorize endpoint and returns the issued code.
    pub async fn authorize(&self, client: &RegisteredClient, scope: &str, state: &str) -> String {
        let response = self
            .post_form(
                "/oauth2/authorize",
                None,
                &[
                    ("response_type", "code"),
                    ("client_id", &client.id),
                    ("redirect_uri", REDIRECT_URI),
                    ("scope", scope),
                    ("state", state),
                    ("username", ADMIN_USERNAME),
                    ("password", ADMIN_PASSWORD),
                ],
            )
            .await;
        assert_eq!(response.status, StatusCode::FOUND, "{}", response.text());
        query_param(&response.location(), "code").expect("code in redirect")
    }

    pub async fn exchange_code(&self, client: &RegisteredClient, code: &str) -> Response {
        self.post_form(
            "/oauth2/token",
            Some(&client.basic_auth()),
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", REDIRECT_URI),
            ],
        )
        .await
    }
}

/// Value of `name` in the query or fragment of `url`.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once(['?', '#'])?;
    serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .ok()?
        .into_iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value)
}
