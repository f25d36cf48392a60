use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::models::{GrantType, ResponseType, SanitizedClient};
use crate::utils::validation::{check_count, check_length, check_one_of, check_url};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateClientRequest {
    #[validate(custom(function = "validate_name"))]
    pub name: String,
    #[serde(default)]
    #[validate(custom(function = "validate_redirect_uris"))]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    #[validate(custom(function = "validate_grant_types"))]
    pub grant_types: Vec<String>,
    #[serde(default)]
    #[validate(custom(function = "validate_response_types"))]
    pub response_types: Vec<String>,
    #[serde(default)]
    #[validate(custom(function = "validate_scopes"))]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub public: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateClientResponse {
    pub client: SanitizedClient,
    /// Plaintext secret, returned only here. Absent for public clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    check_length(name.trim(), 3, 50)
}

fn validate_redirect_uris(uris: &[String]) -> Result<(), ValidationError> {
    check_count(uris, 0, 20)?;
    uris.iter().try_for_each(|uri| check_url(uri))
}

fn validate_grant_types(grants: &[String]) -> Result<(), ValidationError> {
    check_count(grants, 1, 50)?;
    grants
        .iter()
        .try_for_each(|grant| check_one_of(grant, &GrantType::ALL))
}

fn validate_response_types(responses: &[String]) -> Result<(), ValidationError> {
    responses
        .iter()
        .try_for_each(|response| check_one_of(response, &ResponseType::ALL))
}

fn validate_scopes(scopes: &[String]) -> Result<(), ValidationError> {
    check_count(scopes, 0, 50)?;
    scopes.iter().try_for_each(|scope| {
        check_length(scope, 3, 50)?;
        if scope.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
            Ok(())
        } else {
            Err(ValidationError::new(service_core::error::codes::INVALID_FORMAT))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_core::error::{codes, ValidationFailure};

    fn request() -> CreateClientRequest {
        CreateClientRequest {
            name: "Ops Console".to_string(),
            redirect_uris: vec!["https://ops.example.com/callback".to_string()],
            grant_types: vec!["authorization_code".to_string(), "refresh_token".to_string()],
            response_types: vec!["code".to_string()],
            scopes: vec!["users".to_string(), "clients.read".to_string()],
            public: false,
        }
    }

    fn failure(req: &CreateClientRequest) -> ValidationFailure {
        req.validate().unwrap_err().into()
    }

    #[test]
    fn accepts_a_well_formed_client() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn reports_a_code_per_field() {
        let mut req = request();
        req.name = "ab".to_string();
        req.grant_types = vec!["device_code".to_string()];
        req.scopes = vec!["users:*".to_string()];

        let failure = failure(&req);
        assert_eq!(failure.code_for("name"), Some(codes::TOO_SHORT));
        assert_eq!(failure.code_for("grant_types"), Some(codes::UNEXPECTED_VALUE));
        assert_eq!(failure.code_for("scopes"), Some(codes::INVALID_FORMAT));
    }

    #[test]
    fn requires_at_least_one_grant_type() {
        let mut req = request();
        req.grant_types.clear();
        assert_eq!(failure(&req).code_for("grant_types"), Some(codes::MISSING_FIELD));
    }

    #[test]
    fn rejects_relative_redirect_uris() {
        let mut req = request();
        req.redirect_uris = vec!["/callback".to_string()];
        assert_eq!(failure(&req).code_for("redirect_uris"), Some(codes::INVALID_FORMAT));
    }
}
