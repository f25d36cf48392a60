pub mod accounts;
pub mod clients;

pub use accounts::{CreateAccountRequest, CreateAccountResponse, Credentials, UpdateAccountRequest};
pub use clients::{CreateClientRequest, CreateClientResponse};
