pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod oauth2;
pub mod services;
pub mod utils;

use std::sync::Arc;

use axum::{
    handler::Handler,
    http::{header, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use futures::future::try_join_all;
use service_core::error::AppError;
use service_core::middleware::{
    errors::redact_internal_errors,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::OAuthConfig;
use crate::db::Buckets;
use crate::middleware::{require_permission, Permission};
use crate::oauth2::{AuthorizationFlow, DefaultLoginPage, ProtocolEngine, StorageAdapter};
use crate::services::{AccessTokenStore, AccountStore, AuthorizationCodeStore, ClientRegistry};
use crate::utils::SharedClock;

#[derive(Clone)]
pub struct AppState {
    pub config: OAuthConfig,
    pub clock: SharedClock,
    pub buckets: Buckets,
    pub clients: ClientRegistry,
    pub accounts: AccountStore,
    pub authorization_codes: AuthorizationCodeStore,
    pub access_tokens: AccessTokenStore,
    pub flow: AuthorizationFlow,
    pub login_rate_limiter: IpRateLimiter,
    pub token_rate_limiter: IpRateLimiter,
}

impl AppState {
    pub fn new(config: OAuthConfig, buckets: Buckets, clock: SharedClock) -> Self {
        let clients = ClientRegistry::new(buckets.clients.clone(), clock.clone());
        let accounts = AccountStore::new(buckets.accounts.clone(), clock.clone());
        let authorization_codes = AuthorizationCodeStore::new(buckets.authorization_codes.clone());
        let access_tokens = AccessTokenStore::new(buckets.access_tokens.clone(), clock.clone());

        let storage = StorageAdapter::new(
            clients.clone(),
            authorization_codes.clone(),
            access_tokens.clone(),
        );
        let engine = ProtocolEngine::new(Arc::new(storage), config.oauth.clone(), clock.clone());
        let flow = AuthorizationFlow::new(engine, accounts.clone(), Arc::new(DefaultLoginPage));

        let login_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.login_attempts,
            config.rate_limit.login_window_seconds,
        );
        let token_rate_limiter = create_ip_rate_limiter(
            config.rate_limit.token_attempts,
            config.rate_limit.token_window_seconds,
        );

        Self {
            config,
            clock,
            buckets,
            clients,
            accounts,
            authorization_codes,
            access_tokens,
            flow,
            login_rate_limiter,
            token_rate_limiter,
        }
    }

    /// Route state for [`require_permission`] demanding `scope`.
    pub fn permission(&self, scope: &'static str) -> Permission {
        Permission {
            tokens: self.access_tokens.clone(),
            clock: self.clock.clone(),
            required: scope,
        }
    }

    pub async fn store_health(&self) -> Result<(), AppError> {
        let buckets = [
            &self.buckets.clients,
            &self.buckets.accounts,
            &self.buckets.authorization_codes,
            &self.buckets.access_tokens,
        ];
        try_join_all(buckets.iter().map(|store| store.health_check())).await?;
        Ok(())
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(origin) => Some(origin),
            Err(e) => {
                tracing::error!("Invalid CORS origin '{}': {}. Skipping.", o, e);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let guard = |scope: &'static str| state.permission(scope);

    let resource_routes = Router::new()
        .route(
            "/clients",
            post(handlers::clients::create_client.layer(from_fn_with_state(
                guard("clients.write"),
                require_permission,
            )))
            .get(handlers::clients::list_clients.layer(from_fn_with_state(
                guard("clients.read"),
                require_permission,
            ))),
        )
        .route(
            "/clients/:client_id",
            get(handlers::clients::get_client.layer(from_fn_with_state(
                guard("clients.read"),
                require_permission,
            ))),
        )
        .route(
            "/users",
            post(handlers::accounts::create_user.layer(from_fn_with_state(
                guard("users.write"),
                require_permission,
            )))
            .get(handlers::accounts::list_users.layer(from_fn_with_state(
                guard("users.read"),
                require_permission,
            ))),
        )
        .route(
            "/users/:user_id",
            get(handlers::accounts::get_user.layer(from_fn_with_state(
                guard("users.read"),
                require_permission,
            )))
            .put(handlers::accounts::update_user.layer(from_fn_with_state(
                guard("users.write"),
                require_permission,
            ))),
        );

    // Only the credential submission is rate limited, not the form itself
    let login_limiter =
        from_fn_with_state(state.login_rate_limiter.clone(), ip_rate_limit_middleware);
    let authorize_route = Router::new().route(
        "/oauth2/authorize",
        get(handlers::oauth2::authorize_page)
            .post(handlers::oauth2::authorize_submit.layer(login_limiter)),
    );

    let token_route = Router::new()
        .route("/oauth2/token", post(handlers::oauth2::token))
        .layer(from_fn_with_state(
            state.token_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let app = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/oauth2/info", get(handlers::oauth2::info))
        .route("/oauth2/revoke", post(handlers::oauth2::revoke))
        .merge(authorize_route)
        .merge(token_route)
        .merge(resource_routes)
        .with_state(state.clone());

    let app = if state.config.is_prod() {
        app.layer(from_fn(redact_internal_errors))
    } else {
        app
    };

    let app = app
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get(REQUEST_ID_HEADER)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config.security.allowed_origins));

    Ok(app)
}
