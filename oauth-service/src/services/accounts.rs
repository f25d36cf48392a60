use service_core::error::{codes, AppError, ErrorKind};
use service_core::store::{Collection, IndexDefinition, Revisioned, SharedStore};
use uuid::Uuid;
use validator::Validate;

use crate::dtos::{CreateAccountRequest, Credentials, UpdateAccountRequest};
use crate::models::{Account, Role};
use crate::services::conflict_as_already_used;
use crate::utils::{
    hash_password, verify_password, KeyedLocks, Password, PasswordHashString, SharedClock,
};

pub const BUCKET: &str = "accounts";
pub const BY_USERNAME: &str = "by_username";

/// Credential store for end users who log in on the authorize page.
#[derive(Clone)]
pub struct AccountStore {
    accounts: Collection<Account>,
    clock: SharedClock,
    username_locks: KeyedLocks,
}

fn parse_role(role: &str) -> Result<Role, AppError> {
    role.parse()
        .map_err(|_| AppError::validation("role", codes::UNEXPECTED_VALUE))
}

fn check_id(id: &str) -> Result<(), AppError> {
    Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| AppError::validation("id", codes::INVALID_FORMAT))
}

impl AccountStore {
    pub fn indexes() -> Vec<IndexDefinition> {
        vec![IndexDefinition::new(BY_USERNAME, "username").unique()]
    }

    pub fn new(store: SharedStore, clock: SharedClock) -> Self {
        Self {
            accounts: Collection::new(BUCKET, store),
            clock,
            username_locks: KeyedLocks::new(),
        }
    }

    pub async fn create(&self, request: CreateAccountRequest) -> Result<Account, AppError> {
        request.validate()?;
        let role = parse_role(&request.role)?;

        let _guard = self.username_locks.lock(&request.username).await;
        self.create_unique(request.username.clone(), request.password, role).await
    }

    async fn create_unique(
        &self,
        username: String,
        password: String,
        role: Role,
    ) -> Result<Account, AppError> {
        self.ensure_username_available(&username).await?;

        let hash = hash_password(&Password::new(password))
            .map_err(|e| AppError::InternalError(e.context("failed to hash the password")))?;
        let salt = hash.salt().unwrap_or_default();
        let now = self.clock.now();

        let account = Account {
            id: Uuid::new_v4().to_string(),
            username,
            password_hash: hash.into_string(),
            salt,
            role,
            created_at: now,
            updated_at: now,
        };

        self.accounts
            .insert(&account.id, &account)
            .await
            .map_err(conflict_as_already_used("username"))
            .map_err(|e| e.context("failed to save the account"))?;

        tracing::info!(account_id = %account.id, role = %account.role, "Account created");
        Ok(account)
    }

    async fn ensure_username_available(&self, username: &str) -> Result<(), AppError> {
        if self.find_one_by_username(username).await?.is_some() {
            return Err(AppError::validation("username", codes::ALREADY_USED));
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Account>, AppError> {
        check_id(id)?;

        Ok(self
            .accounts
            .get(id)
            .await
            .map_err(|e| e.context("failed to get the account"))?
            .map(|doc| doc.value))
    }

    pub async fn find_one_by_username(&self, username: &str) -> Result<Option<Account>, AppError> {
        Ok(self
            .accounts
            .find_one_by(BY_USERNAME, username)
            .await
            .map_err(|e| e.context("failed to look up the account"))?
            .map(|(_, doc)| doc.value))
    }

    /// Up to 200 accounts ordered by username.
    pub async fn get_all(&self) -> Result<Vec<Account>, AppError> {
        let mut accounts: Vec<Account> = self
            .accounts
            .list(BY_USERNAME)
            .await
            .map_err(|e| e.context("failed to get all accounts"))?
            .into_values()
            .collect();
        accounts.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(accounts)
    }

    /// Changes username and role. Credentials are left untouched.
    pub async fn update(
        &self,
        id: &str,
        request: UpdateAccountRequest,
    ) -> Result<Account, AppError> {
        check_id(id)?;
        request.validate()?;
        let role = parse_role(&request.role)?;

        let _guard = self.username_locks.lock(&request.username).await;
        let current = self
            .accounts
            .get(id)
            .await
            .map_err(|e| e.context("failed to retrieve the account"))?
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("account {} not found", id)))?;

        self.update_unique(current, request.username, role).await
    }

    async fn update_unique(
        &self,
        current: Revisioned<Account>,
        username: String,
        role: Role,
    ) -> Result<Account, AppError> {
        if current.value.username != username {
            self.ensure_username_available(&username).await?;
        }

        let account = Account {
            username,
            role,
            updated_at: self.clock.now(),
            ..current.value
        };

        if let Err(e) = self
            .accounts
            .replace(&account.id, &current.revision, &account)
            .await
        {
            let e = self.replace_failure(&account, e).await;
            return Err(e.context("failed to save the account"));
        }

        tracing::info!(account_id = %account.id, role = %account.role, "Account updated");
        Ok(account)
    }

    /// A conflicting replace is either a stale revision or a unique-index
    /// collision. Only the latter is `ALREADY_USED`.
    async fn replace_failure(&self, account: &Account, err: AppError) -> AppError {
        if err.kind() != ErrorKind::Conflict {
            return err;
        }
        match self.find_one_by_username(&account.username).await {
            Ok(Some(holder)) if holder.id != account.id => {
                AppError::validation("username", codes::ALREADY_USED)
            }
            Ok(_) => {
                tracing::warn!(account_id = %account.id, "Account was modified concurrently");
                AppError::Conflict(anyhow::anyhow!(
                    "account {} was modified concurrently",
                    account.id
                ))
            }
            Err(e) => e,
        }
    }

    /// Returns the account when the credentials match, `None` otherwise.
    pub async fn validate(&self, credentials: &Credentials) -> Result<Option<Account>, AppError> {
        let Some(account) = self
            .find_one_by_username(&credentials.username)
            .await
            .map_err(|e| e.context("failed to get the credentials"))?
        else {
            return Ok(None);
        };

        let matches = verify_password(
            &Password::new(credentials.password.clone()),
            &PasswordHashString::new(account.password_hash.clone()),
        )
        .is_ok();

        Ok(matches.then_some(account))
    }

    pub async fn count(&self) -> Result<u64, AppError> {
        self.accounts
            .count()
            .await
            .map_err(|e| e.context("failed to count accounts"))
    }

    /// Creates the initial admin account when no account exists yet.
    pub async fn bootstrap_admin(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<Account>, AppError> {
        if self.count().await? > 0 {
            return Ok(None);
        }

        let account = self
            .create(CreateAccountRequest {
                username: username.to_string(),
                password: password.to_string(),
                role: Role::Admin.as_str().to_string(),
            })
            .await
            .map_err(|e| e.context("failed to create the admin account"))?;

        tracing::warn!(username = %account.username, "Bootstrapped admin account");
        Ok(Some(account))
    }
}
