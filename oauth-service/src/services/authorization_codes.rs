use chrono::{DateTime, Utc};
use service_core::error::AppError;
use service_core::store::{Collection, IndexDefinition, SharedStore};
use validator::{Validate, ValidationError};

use crate::models::AuthorizationCode;
use crate::utils::validation::{check_length, check_lookup_key};

pub const BUCKET: &str = "authorization_codes";

#[derive(Debug, Clone, Validate)]
pub struct NewAuthorizationCode {
    #[validate(custom(function = "validate_client_id"))]
    pub client_id: String,
    #[validate(custom(function = "validate_code"))]
    pub code: String,
    #[validate(range(min = 1, code = "TOO_SHORT"))]
    pub expires_in: i64,
    pub scopes: Vec<String>,
    #[validate(custom(function = "validate_redirect_uri"))]
    pub redirect_uri: String,
    pub state: String,
    pub created_at: DateTime<Utc>,
    #[validate(length(min = 43, max = 128, code = "INVALID_LENGTH"))]
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

fn validate_client_id(client_id: &str) -> Result<(), ValidationError> {
    check_length(client_id, 3, 100)
}

fn validate_code(code: &str) -> Result<(), ValidationError> {
    check_length(code, 8, 256)
}

fn validate_redirect_uri(uri: &str) -> Result<(), ValidationError> {
    check_length(uri, 3, 512)
}

#[derive(Clone)]
pub struct AuthorizationCodeStore {
    codes: Collection<AuthorizationCode>,
}

impl AuthorizationCodeStore {
    pub fn indexes() -> Vec<IndexDefinition> {
        Vec::new()
    }

    pub fn new(store: SharedStore) -> Self {
        Self {
            codes: Collection::new(BUCKET, store),
        }
    }

    pub async fn create(
        &self,
        new_code: NewAuthorizationCode,
    ) -> Result<AuthorizationCode, AppError> {
        new_code.validate()?;

        let code = AuthorizationCode {
            code: new_code.code,
            client_id: new_code.client_id,
            expires_in: new_code.expires_in,
            scopes: new_code.scopes,
            redirect_uri: new_code.redirect_uri,
            state: new_code.state,
            created_at: new_code.created_at,
            code_challenge: new_code.code_challenge,
            code_challenge_method: new_code.code_challenge_method,
        };

        self.codes
            .insert(&code.code, &code)
            .await
            .map_err(|e| e.context("failed to save the authorization code"))?;

        tracing::debug!(client_id = %code.client_id, "Authorization code stored");
        Ok(code)
    }

    pub async fn get(&self, code: &str) -> Result<Option<AuthorizationCode>, AppError> {
        check_lookup_key("code", code, 8, 256)?;

        Ok(self
            .codes
            .get(code)
            .await
            .map_err(|e| e.context("failed to get the authorization code"))?
            .map(|doc| doc.value))
    }

    /// `Ok(false)` when the code was already gone, which includes losing a
    /// race against another delete of the same code.
    pub async fn delete(&self, code: &str) -> Result<bool, AppError> {
        check_lookup_key("code", code, 8, 256)?;

        let removed = self
            .codes
            .remove(code)
            .await
            .map_err(|e| e.context("failed to delete the authorization code"))?;
        if removed {
            tracing::debug!("Authorization code consumed");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::error::{codes, ErrorKind};
    use service_core::store::MemoryStore;
    use std::sync::Arc;

    fn store() -> AuthorizationCodeStore {
        AuthorizationCodeStore::new(Arc::new(MemoryStore::new(AuthorizationCodeStore::indexes())))
    }

    fn new_code(code: &str) -> NewAuthorizationCode {
        NewAuthorizationCode {
            client_id: "ops-console".to_string(),
            code: code.to_string(),
            expires_in: 250,
            scopes: vec!["users".to_string()],
            redirect_uri: "https://ops.example.com/callback".to_string(),
            state: "xyz".to_string(),
            created_at: Utc::now(),
            code_challenge: None,
            code_challenge_method: None,
        }
    }

    #[tokio::test]
    async fn create_get_delete() {
        let store = store();
        let created = store.create(new_code("code-12345678")).await.unwrap();

        assert_eq!(store.get("code-12345678").await.unwrap(), Some(created));

        assert!(store.delete("code-12345678").await.unwrap());
        assert!(store.get("code-12345678").await.unwrap().is_none());

        // second delete is a no-op
        assert!(!store.delete("code-12345678").await.unwrap());
    }

    #[tokio::test]
    async fn rejects_invalid_fields() {
        let store = store();
        let mut bad = new_code("short");
        bad.expires_in = 0;
        bad.redirect_uri = String::new();

        match store.create(bad).await.unwrap_err() {
            AppError::ValidationError(failure) => {
                assert_eq!(failure.code_for("code"), Some(codes::TOO_SHORT));
                assert_eq!(failure.code_for("expires_in"), Some(codes::TOO_SHORT));
                assert_eq!(failure.code_for("redirect_uri"), Some(codes::MISSING_FIELD));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn lookup_keys_are_length_checked() {
        let store = store();
        let err = store.get("abc").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }
}
