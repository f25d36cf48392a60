pub mod access_token;
pub mod account;
pub mod authorization_code;
pub mod client;

pub use access_token::AccessToken;
pub use account::{Account, Role, SanitizedAccount};
pub use authorization_code::AuthorizationCode;
pub use client::{Client, GrantType, ResponseType, SanitizedClient};
