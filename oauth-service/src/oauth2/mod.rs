//! OAuth2 protocol handling: request validation, code and token minting, and
//! the storage contract the protocol depends on.

pub mod engine;
pub mod error;
pub mod flow;
pub mod login_page;
pub mod pkce;
pub mod scope;
pub mod storage;

pub use engine::{
    AccessGrant, AccessRequest, AuthorizeParams, AuthorizeRequest, ClientCredentials, InfoResponse,
    ProtocolEngine, RevokeParams, TokenParams, TokenResponse,
};
pub use error::{OAuthError, OAuthErrorCode};
pub use flow::{AuthorizationFlow, AuthorizeOutcome};
pub use login_page::{DefaultLoginPage, LoginPageRenderer, LoginView};
pub use storage::{AccessData, AuthorizeData, OAuthStorage, StorageAdapter};
