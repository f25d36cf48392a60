use std::sync::Arc;

use service_core::error::{AppError, ErrorKind};
use validator::Validate;

use super::engine::{
    AuthorizeParams, ClientCredentials, InfoResponse, ProtocolEngine, RevokeParams, TokenParams,
    TokenResponse,
};
use super::error::OAuthError;
use super::login_page::{LoginPageRenderer, LoginView};
use crate::dtos::Credentials;
use crate::services::AccountStore;

const INVALID_CREDENTIALS: &str = "Invalid username or password";

#[derive(Debug, Clone)]
pub enum AuthorizeOutcome {
    /// Show the login form. Carries an error after a failed attempt.
    PendingUserApproval(LoginView),
    /// Redirect location holding the code or token.
    Issued(String),
}

/// Drives the protocol engine for the HTTP endpoints and performs the
/// interactive login of the authorize step.
#[derive(Clone)]
pub struct AuthorizationFlow {
    engine: ProtocolEngine,
    accounts: AccountStore,
    renderer: Arc<dyn LoginPageRenderer>,
}

impl AuthorizationFlow {
    pub fn new(
        engine: ProtocolEngine,
        accounts: AccountStore,
        renderer: Arc<dyn LoginPageRenderer>,
    ) -> Self {
        Self {
            engine,
            accounts,
            renderer,
        }
    }

    pub fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    pub fn render(&self, view: &LoginView) -> Result<String, AppError> {
        self.renderer.render(view)
    }

    /// Without credentials the request only gets validated and the login form
    /// is shown. With credentials the account is checked and, on success, the
    /// grant is issued.
    #[tracing::instrument(skip(self, params, credentials), fields(client_id = %params.client_id))]
    pub async fn authorize(
        &self,
        params: AuthorizeParams,
        credentials: Option<Credentials>,
    ) -> Result<AuthorizeOutcome, OAuthError> {
        let mut request = self.engine.handle_authorize_request(&params).await?;

        let pending = |username: String, error: Option<&str>| {
            AuthorizeOutcome::PendingUserApproval(LoginView {
                client_name: request.client.name.clone(),
                scopes: request.scopes.clone(),
                params: params.clone(),
                username,
                error: error.map(str::to_string),
            })
        };

        let Some(credentials) = credentials else {
            return Ok(pending(String::new(), None));
        };

        if credentials.validate().is_err() {
            return Ok(pending(credentials.username, Some(INVALID_CREDENTIALS)));
        }

        let account = match self.accounts.validate(&credentials).await {
            Ok(Some(account)) => account,
            Ok(None) => {
                tracing::info!(username = %credentials.username, "Login failed");
                return Ok(pending(credentials.username, Some(INVALID_CREDENTIALS)));
            }
            Err(e) if e.kind() == ErrorKind::ValidationError => {
                return Ok(pending(credentials.username, Some(INVALID_CREDENTIALS)));
            }
            Err(e) => return Err(OAuthError::server_error(e)),
        };

        tracing::info!(account_id = %account.id, "Resource owner authorized the request");
        request.authorized = true;
        let location = self.engine.finish_authorize_request(&request).await?;
        Ok(AuthorizeOutcome::Issued(location))
    }

    /// Token endpoint. A request that passes the grant checks is always authorized.
    pub async fn token(
        &self,
        credentials: ClientCredentials,
        params: TokenParams,
    ) -> Result<TokenResponse, OAuthError> {
        let mut request = self.engine.handle_access_request(&credentials, &params).await?;
        request.authorized = true;
        self.engine.finish_access_request(&request).await
    }

    pub async fn info(&self, token: &str) -> Result<InfoResponse, OAuthError> {
        self.engine.handle_info_request(token).await
    }

    pub async fn revoke(
        &self,
        credentials: ClientCredentials,
        params: RevokeParams,
    ) -> Result<(), OAuthError> {
        self.engine.handle_revoke_request(&credentials, &params).await
    }
}
