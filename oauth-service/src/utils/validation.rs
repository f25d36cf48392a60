use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    Json,
};
use serde::de::DeserializeOwned;
use service_core::error::{codes, AppError};
use validator::{Validate, ValidateUrl, ValidationError};

/// JSON body extractor that answers `badRequest` on malformed JSON and
/// `validationError` when the payload fails its `Validate` rules.
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate + 'static,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e: JsonRejection| {
                AppError::BadRequest(anyhow::anyhow!("Json parse error: {}", e.body_text()))
            })?;

        value.validate()?;

        Ok(ValidatedJson(value))
    }
}

fn error(code: &'static str) -> ValidationError {
    ValidationError::new(code)
}

/// Length check on characters that reports `MISSING_FIELD`, `TOO_SHORT` or `TOO_LONG`.
pub fn check_length(value: &str, min: usize, max: usize) -> Result<(), ValidationError> {
    let len = value.chars().count();
    if len == 0 && min > 0 {
        Err(error(codes::MISSING_FIELD))
    } else if len < min {
        Err(error(codes::TOO_SHORT))
    } else if len > max {
        Err(error(codes::TOO_LONG))
    } else {
        Ok(())
    }
}

/// Same as [`check_length`] but for collection sizes.
pub fn check_count<T>(items: &[T], min: usize, max: usize) -> Result<(), ValidationError> {
    if items.len() < min {
        Err(error(if items.is_empty() {
            codes::MISSING_FIELD
        } else {
            codes::TOO_SHORT
        }))
    } else if items.len() > max {
        Err(error(codes::TOO_LONG))
    } else {
        Ok(())
    }
}

pub fn check_one_of(value: &str, allowed: &[&str]) -> Result<(), ValidationError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(error(codes::UNEXPECTED_VALUE))
    }
}

/// URL accepted by validator's `url` rule, restricted to `http`/`https`
/// and without a fragment.
pub fn check_url(value: &str) -> Result<(), ValidationError> {
    let web = value.starts_with("https://") || value.starts_with("http://");
    if !value.validate_url() || !web || value.contains('#') {
        return Err(error(codes::INVALID_FORMAT));
    }
    Ok(())
}

/// Rejects a lookup key whose length is outside `min..=max`, reported on `field`.
pub fn check_lookup_key(field: &str, key: &str, min: usize, max: usize) -> Result<(), AppError> {
    check_length(key, min, max).map_err(|e| AppError::validation(field, e.code.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_codes() {
        assert_eq!(check_length("", 3, 5).unwrap_err().code, codes::MISSING_FIELD);
        assert_eq!(check_length("ab", 3, 5).unwrap_err().code, codes::TOO_SHORT);
        assert_eq!(check_length("abcdef", 3, 5).unwrap_err().code, codes::TOO_LONG);
        assert!(check_length("abc", 3, 5).is_ok());
    }

    #[test]
    fn url_format() {
        assert!(check_url("https://app.example.com/callback").is_ok());
        assert!(check_url("http://localhost:8080/cb?x=1").is_ok());
        assert!(check_url("ftp://example.com").is_err());
        assert!(check_url("not a url").is_err());
        assert!(check_url("https://exa mple.com/cb").is_err());
        assert!(check_url("javascript:alert(1)").is_err());
        assert!(check_url("https://example.com/#frag").is_err());
    }

    #[test]
    fn one_of() {
        assert!(check_one_of("code", &["code", "token"]).is_ok());
        assert_eq!(
            check_one_of("id_token", &["code", "token"]).unwrap_err().code,
            codes::UNEXPECTED_VALUE
        );
    }
}
