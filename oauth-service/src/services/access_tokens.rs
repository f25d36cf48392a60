use service_core::error::AppError;
use service_core::store::{Collection, IndexDefinition, SharedStore};
use validator::{Validate, ValidationError};

use crate::models::AccessToken;
use crate::oauth2::scope;
use crate::utils::validation::{check_count, check_length, check_lookup_key};
use crate::utils::SharedClock;

pub const BUCKET: &str = "access_tokens";
pub const BY_REFRESH_TOKEN: &str = "by_refresh_token";

#[derive(Debug, Clone, Validate)]
pub struct NewAccessToken {
    #[validate(custom(function = "validate_client_id"))]
    pub client_id: String,
    #[validate(custom(function = "validate_token"))]
    pub access_token: String,
    #[validate(length(min = 10, max = 50, code = "INVALID_LENGTH"))]
    pub refresh_token: Option<String>,
    #[validate(range(min = 1, code = "TOO_SHORT"))]
    pub expires_in: i64,
    #[validate(custom(function = "validate_scopes"))]
    pub scopes: Vec<String>,
}

fn validate_client_id(client_id: &str) -> Result<(), ValidationError> {
    check_length(client_id, 3, 100)
}

fn validate_token(token: &str) -> Result<(), ValidationError> {
    check_length(token, 10, 50)
}

fn validate_scopes(scopes: &[String]) -> Result<(), ValidationError> {
    check_count(scopes, 1, scope::MAX_COUNT)?;
    let (min, max) = scope::LENGTH;
    scopes.iter().try_for_each(|s| check_length(s, min, max))
}

#[derive(Clone)]
pub struct AccessTokenStore {
    tokens: Collection<AccessToken>,
    clock: SharedClock,
}

impl AccessTokenStore {
    pub fn indexes() -> Vec<IndexDefinition> {
        vec![IndexDefinition::new(BY_REFRESH_TOKEN, "refresh_token").unique()]
    }

    pub fn new(store: SharedStore, clock: SharedClock) -> Self {
        Self {
            tokens: Collection::new(BUCKET, store),
            clock,
        }
    }

    /// Stores the token, stamping its creation time from the clock.
    pub async fn create(&self, new_token: NewAccessToken) -> Result<AccessToken, AppError> {
        new_token.validate()?;

        let token = AccessToken {
            access_token: new_token.access_token,
            refresh_token: new_token.refresh_token,
            client_id: new_token.client_id,
            expires_in: new_token.expires_in,
            scopes: new_token.scopes,
            created_at: self.clock.now(),
        };

        self.tokens
            .insert(&token.access_token, &token)
            .await
            .map_err(|e| e.context("failed to save the access token"))?;

        tracing::debug!(
            client_id = %token.client_id,
            refreshable = token.refresh_token.is_some(),
            "Access token stored"
        );
        Ok(token)
    }

    pub async fn get(&self, access_token: &str) -> Result<Option<AccessToken>, AppError> {
        check_lookup_key("access_token", access_token, 8, 256)?;

        Ok(self
            .tokens
            .get(access_token)
            .await
            .map_err(|e| e.context("failed to get the access token"))?
            .map(|doc| doc.value))
    }

    /// Removing an unknown token succeeds with `false`.
    pub async fn delete(&self, access_token: &str) -> Result<bool, AppError> {
        check_lookup_key("access_token", access_token, 8, 256)?;

        self.tokens
            .remove(access_token)
            .await
            .map_err(|e| e.context("failed to delete the access token"))
    }

    pub async fn find_one_by_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<AccessToken>, AppError> {
        check_lookup_key("refresh_token", refresh_token, 8, 256)?;

        Ok(self
            .tokens
            .find_one_by(BY_REFRESH_TOKEN, refresh_token)
            .await
            .map_err(|e| e.context("failed to look up the refresh token"))?
            .map(|(_, doc)| doc.value))
    }
}
