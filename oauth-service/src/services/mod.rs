//! Persistent stores for clients, accounts, authorization codes and access tokens.

pub mod access_tokens;
pub mod accounts;
pub mod authorization_codes;
pub mod clients;

pub use access_tokens::{AccessTokenStore, NewAccessToken};
pub use accounts::AccountStore;
pub use authorization_codes::{AuthorizationCodeStore, NewAuthorizationCode};
pub use clients::{ClientRegistry, CreatedClient};

use service_core::error::{codes, AppError, ErrorKind};

/// A unique-index collision at write time means another writer claimed the
/// value between the pre-check and the write.
pub(crate) fn conflict_as_already_used(field: &'static str) -> impl FnOnce(AppError) -> AppError {
    move |err| match err.kind() {
        ErrorKind::Conflict => AppError::validation(field, codes::ALREADY_USED),
        _ => err,
    }
}
