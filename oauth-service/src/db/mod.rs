//! Bucket wiring for the configured storage backend.

use std::sync::Arc;

use service_core::error::AppError;
use service_core::store::{mongo, MemoryStore, MongoStore, SharedStore};

use crate::config::{StoreBackend, StoreConfig};
use crate::services::{
    access_tokens, accounts, authorization_codes, clients, AccessTokenStore, AccountStore,
    AuthorizationCodeStore, ClientRegistry,
};

/// One document store per bucket.
#[derive(Clone)]
pub struct Buckets {
    pub clients: SharedStore,
    pub accounts: SharedStore,
    pub authorization_codes: SharedStore,
    pub access_tokens: SharedStore,
}

impl Buckets {
    pub fn in_memory() -> Self {
        Self {
            clients: Arc::new(MemoryStore::new(ClientRegistry::indexes())),
            accounts: Arc::new(MemoryStore::new(AccountStore::indexes())),
            authorization_codes: Arc::new(MemoryStore::new(AuthorizationCodeStore::indexes())),
            access_tokens: Arc::new(MemoryStore::new(AccessTokenStore::indexes())),
        }
    }

    /// Connects to MongoDB and makes sure every bucket's indexes exist.
    pub async fn mongo(uri: &str, database: &str) -> Result<Self, AppError> {
        let database = mongo::connect(uri, database).await?;

        let clients = MongoStore::new(&database, clients::BUCKET, ClientRegistry::indexes());
        let accounts = MongoStore::new(&database, accounts::BUCKET, AccountStore::indexes());
        let authorization_codes = MongoStore::new(
            &database,
            authorization_codes::BUCKET,
            AuthorizationCodeStore::indexes(),
        );
        let access_tokens = MongoStore::new(
            &database,
            access_tokens::BUCKET,
            AccessTokenStore::indexes(),
        );

        for store in [&clients, &accounts, &authorization_codes, &access_tokens] {
            store.initialize_indexes().await?;
        }

        Ok(Self {
            clients: Arc::new(clients),
            accounts: Arc::new(accounts),
            authorization_codes: Arc::new(authorization_codes),
            access_tokens: Arc::new(access_tokens),
        })
    }

    pub async fn connect(config: &StoreConfig) -> Result<Self, AppError> {
        match config.backend {
            StoreBackend::Memory => {
                tracing::warn!("Using the in-memory store; data is lost on restart");
                Ok(Self::in_memory())
            }
            StoreBackend::Mongo => Self::mongo(&config.mongodb_uri, &config.mongodb_database).await,
        }
    }
}
