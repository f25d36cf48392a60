use service_core::error::{codes, AppError};
use service_core::store::{Collection, IndexDefinition, SharedStore};
use validator::Validate;

use crate::dtos::CreateClientRequest;
use crate::models::{Client, GrantType, ResponseType};
use crate::services::conflict_as_already_used;
use crate::utils::validation::check_lookup_key;
use crate::utils::{
    generate_token, hash_password, verify_password, KeyedLocks, Password, PasswordHashString,
    SharedClock,
};

pub const BUCKET: &str = "clients";
pub const BY_NAME: &str = "by_name";

/// Freshly registered client and its plaintext secret (confidential clients only).
#[derive(Debug, Clone)]
pub struct CreatedClient {
    pub client: Client,
    pub secret: Option<String>,
}

#[derive(Clone)]
pub struct ClientRegistry {
    clients: Collection<Client>,
    clock: SharedClock,
    name_locks: KeyedLocks,
}

impl ClientRegistry {
    pub fn indexes() -> Vec<IndexDefinition> {
        vec![IndexDefinition::new(BY_NAME, "name").unique()]
    }

    pub fn new(store: SharedStore, clock: SharedClock) -> Self {
        Self {
            clients: Collection::new(BUCKET, store),
            clock,
            name_locks: KeyedLocks::new(),
        }
    }

    pub async fn create(&self, request: CreateClientRequest) -> Result<CreatedClient, AppError> {
        request.validate()?;

        let name = request.name.trim().to_string();
        let _guard = self.name_locks.lock(&name).await;
        self.create_unique(name.clone(), request).await
    }

    async fn create_unique(
        &self,
        name: String,
        request: CreateClientRequest,
    ) -> Result<CreatedClient, AppError> {
        let id = Client::id_from_name(&name);

        if self.find_one_by_name(&name).await?.is_some() || self.clients.get(&id).await?.is_some()
        {
            return Err(AppError::validation("name", codes::ALREADY_USED));
        }

        let grant_types = request
            .grant_types
            .iter()
            .map(|g| g.parse::<GrantType>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| AppError::validation("grant_types", codes::UNEXPECTED_VALUE))?;
        let response_types = request
            .response_types
            .iter()
            .map(|r| r.parse::<ResponseType>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| AppError::validation("response_types", codes::UNEXPECTED_VALUE))?;

        let (secret, secret_hash) = if request.public {
            (None, String::new())
        } else {
            let secret = generate_token();
            let hash = hash_password(&Password::new(secret.clone()))
                .map_err(|e| AppError::InternalError(e.context("Failed to hash client secret")))?;
            (Some(secret), hash.into_string())
        };

        let client = Client {
            id: id.clone(),
            secret: secret_hash,
            name,
            redirect_uris: request.redirect_uris,
            grant_types,
            response_types,
            scopes: request.scopes,
            public: request.public,
            created_at: self.clock.now(),
        };

        self.clients
            .insert(&id, &client)
            .await
            .map_err(conflict_as_already_used("name"))
            .map_err(|e| e.context("failed to save the client"))?;

        tracing::info!(
            client_id = %client.id,
            public = client.public,
            scopes = ?client.scopes,
            "New client registered"
        );

        Ok(CreatedClient { client, secret })
    }

    /// `Ok(None)` when no client has this id.
    pub async fn get(&self, id: &str) -> Result<Option<Client>, AppError> {
        check_lookup_key("id", id, 3, 100)?;

        Ok(self
            .clients
            .get(id)
            .await
            .map_err(|e| e.context("failed to get the client"))?
            .map(|doc| doc.value))
    }

    pub async fn find_one_by_name(&self, name: &str) -> Result<Option<Client>, AppError> {
        Ok(self
            .clients
            .find_one_by(BY_NAME, name)
            .await
            .map_err(|e| e.context("failed to look up the client by name"))?
            .map(|(_, doc)| doc.value))
    }

    /// Up to 200 clients ordered by name.
    pub async fn get_all(&self) -> Result<Vec<Client>, AppError> {
        let mut clients: Vec<Client> = self
            .clients
            .list(BY_NAME)
            .await
            .map_err(|e| e.context("failed to get all clients"))?
            .into_values()
            .collect();
        clients.sort_by(|a, b| a.name.cmp(&b.name));

        tracing::debug!(count = clients.len(), "Listed clients");
        Ok(clients)
    }

    /// Checks a presented secret against a confidential client's stored hash.
    pub fn verify_secret(client: &Client, secret: &str) -> bool {
        !client.public
            && !client.secret.is_empty()
            && verify_password(
                &Password::new(secret),
                &PasswordHashString::new(client.secret.clone()),
            )
            .is_ok()
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        self.clients.store().health_check().await
    }
}
