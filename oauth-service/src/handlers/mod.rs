pub mod accounts;
pub mod clients;
pub mod health;
pub mod oauth2;
