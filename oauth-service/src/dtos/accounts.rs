use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::models::{Role, SanitizedAccount};
use crate::utils::validation::{check_length, check_one_of};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAccountRequest {
    #[validate(custom(function = "validate_username"))]
    pub username: String,
    #[validate(custom(function = "validate_password"))]
    pub password: String,
    #[validate(custom(function = "validate_role"))]
    pub role: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateAccountRequest {
    #[validate(custom(function = "validate_username"))]
    pub username: String,
    #[validate(custom(function = "validate_role"))]
    pub role: String,
}

/// Username and password submitted on the login form.
#[derive(Clone, Default, Deserialize, Validate)]
pub struct Credentials {
    #[serde(default)]
    #[validate(custom(function = "validate_username"))]
    pub username: String,
    #[serde(default)]
    #[validate(custom(function = "validate_password"))]
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAccountResponse {
    pub account: SanitizedAccount,
}

fn validate_username(username: &str) -> Result<(), ValidationError> {
    check_length(username, 4, 128)
}

fn validate_password(password: &str) -> Result<(), ValidationError> {
    check_length(password, 8, 256)
}

fn validate_role(role: &str) -> Result<(), ValidationError> {
    check_one_of(role, &Role::ALL)
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::error::{codes, ValidationFailure};

    #[test]
    fn create_rules() {
        let req = CreateAccountRequest {
            username: "bob".to_string(),
            password: "short".to_string(),
            role: "root".to_string(),
        };
        let failure: ValidationFailure = req.validate().unwrap_err().into();

        assert_eq!(failure.code_for("username"), Some(codes::TOO_SHORT));
        assert_eq!(failure.code_for("password"), Some(codes::TOO_SHORT));
        assert_eq!(failure.code_for("role"), Some(codes::UNEXPECTED_VALUE));
    }

    #[test]
    fn empty_credentials_are_missing() {
        let failure: ValidationFailure = Credentials::default().validate().unwrap_err().into();
        assert_eq!(failure.code_for("username"), Some(codes::MISSING_FIELD));
        assert_eq!(failure.code_for("password"), Some(codes::MISSING_FIELD));
    }
}
