use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use service_core::error::{AppError, ErrorKind};

use crate::models::{AccessToken, AuthorizationCode, Client};
use crate::services::{
    AccessTokenStore, AuthorizationCodeStore, ClientRegistry, NewAccessToken, NewAuthorizationCode,
};

/// Authorization code as the protocol engine sees it, with its client resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizeData {
    pub client: Client,
    pub code: String,
    pub expires_in: i64,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

impl AuthorizeData {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.created_at + Duration::seconds(self.expires_in)
    }
}

/// Access and optional refresh token pair, with its client resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessData {
    pub client: Client,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: i64,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl AccessData {
    fn record(&self) -> AccessToken {
        AccessToken {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            client_id: self.client.id.clone(),
            expires_in: self.expires_in,
            scopes: self.scopes.clone(),
            created_at: self.created_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.record().is_expired(now)
    }

    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> i64 {
        self.record().remaining_seconds(now)
    }
}

/// Persistence the protocol engine needs. A missing record is reported as
/// `AppError::NotFound`; anything else is a storage failure. Removals return
/// whether this call deleted the record, so a consumer racing another one
/// learns that it lost.
#[async_trait]
pub trait OAuthStorage: Send + Sync {
    async fn get_client(&self, id: &str) -> Result<Client, AppError>;

    async fn save_authorize(&self, data: &AuthorizeData) -> Result<(), AppError>;
    async fn load_authorize(&self, code: &str) -> Result<AuthorizeData, AppError>;
    async fn remove_authorize(&self, code: &str) -> Result<bool, AppError>;

    async fn save_access(&self, data: &AccessData) -> Result<(), AppError>;
    async fn load_access(&self, token: &str) -> Result<AccessData, AppError>;
    async fn remove_access(&self, token: &str) -> Result<bool, AppError>;

    async fn load_refresh(&self, token: &str) -> Result<AccessData, AppError>;
    async fn remove_refresh(&self, token: &str) -> Result<bool, AppError>;
}

/// Storage backed by the client registry and the code and token stores.
/// Holds no state of its own.
#[derive(Clone)]
pub struct StorageAdapter {
    clients: ClientRegistry,
    codes: AuthorizationCodeStore,
    tokens: AccessTokenStore,
}

fn not_found(what: &str, key: &str) -> AppError {
    AppError::NotFound(anyhow::anyhow!("{} {:?} not found", what, key))
}

impl StorageAdapter {
    pub fn new(
        clients: ClientRegistry,
        codes: AuthorizationCodeStore,
        tokens: AccessTokenStore,
    ) -> Self {
        Self {
            clients,
            codes,
            tokens,
        }
    }

    async fn access_data(&self, token: AccessToken) -> Result<AccessData, AppError> {
        let client = self.get_client(&token.client_id).await?;
        Ok(AccessData {
            client,
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_in: token.expires_in,
            scopes: token.scopes,
            created_at: token.created_at,
        })
    }
}

#[async_trait]
impl OAuthStorage for StorageAdapter {
    async fn get_client(&self, id: &str) -> Result<Client, AppError> {
        match self.clients.get(id).await {
            Ok(Some(client)) => Ok(client),
            Ok(None) => Err(not_found("client", id)),
            Err(e) if e.kind() == ErrorKind::ValidationError => Err(not_found("client", id)),
            Err(e) => Err(e),
        }
    }

    async fn save_authorize(&self, data: &AuthorizeData) -> Result<(), AppError> {
        self.codes
            .create(NewAuthorizationCode {
                client_id: data.client.id.clone(),
                code: data.code.clone(),
                expires_in: data.expires_in,
                scopes: data.scopes.clone(),
                redirect_uri: data.redirect_uri.clone(),
                state: data.state.clone(),
                created_at: data.created_at,
                code_challenge: data.code_challenge.clone(),
                code_challenge_method: data.code_challenge_method.clone(),
            })
            .await?;
        Ok(())
    }

    async fn load_authorize(&self, code: &str) -> Result<AuthorizeData, AppError> {
        let record: AuthorizationCode = self
            .codes
            .get(code)
            .await?
            .ok_or_else(|| not_found("authorization code", code))?;
        let client = self.get_client(&record.client_id).await?;

        Ok(AuthorizeData {
            client,
            code: record.code,
            expires_in: record.expires_in,
            scopes: record.scopes,
            redirect_uri: record.redirect_uri,
            state: record.state,
            created_at: record.created_at,
            code_challenge: record.code_challenge,
            code_challenge_method: record.code_challenge_method,
        })
    }

    async fn remove_authorize(&self, code: &str) -> Result<bool, AppError> {
        self.codes.delete(code).await
    }

    async fn save_access(&self, data: &AccessData) -> Result<(), AppError> {
        self.tokens
            .create(NewAccessToken {
                client_id: data.client.id.clone(),
                access_token: data.access_token.clone(),
                refresh_token: data.refresh_token.clone(),
                expires_in: data.expires_in,
                scopes: data.scopes.clone(),
            })
            .await?;
        Ok(())
    }

    async fn load_access(&self, token: &str) -> Result<AccessData, AppError> {
        let record = self
            .tokens
            .get(token)
            .await?
            .ok_or_else(|| not_found("access token", token))?;
        self.access_data(record).await
    }

    async fn remove_access(&self, token: &str) -> Result<bool, AppError> {
        self.tokens.delete(token).await
    }

    async fn load_refresh(&self, token: &str) -> Result<AccessData, AppError> {
        let record = self
            .tokens
            .find_one_by_refresh_token(token)
            .await?
            .ok_or_else(|| not_found("refresh token", token))?;
        self.access_data(record).await
    }

    async fn remove_refresh(&self, token: &str) -> Result<bool, AppError> {
        match self.tokens.find_one_by_refresh_token(token).await? {
            Some(record) => self.tokens.delete(&record.access_token).await,
            None => Ok(false),
        }
    }
}
