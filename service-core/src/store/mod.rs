//! Key/value document storage with optimistic revisions and secondary indexes.
//!
//! Every bucket (clients, accounts, codes, tokens) is its own [`DocumentStore`].
//! Writes carry the revision the caller last read; an empty revision means
//! "create". Secondary indexes map one top-level string field of the stored
//! value to the document key.

pub mod memory;
pub mod mongo;

use std::{collections::HashMap, marker::PhantomData, sync::Arc, sync::Mutex, time::Duration};

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Serialize, de::DeserializeOwned};
use tokio_util::sync::CancellationToken;

use crate::error::AppError;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Raw stored value with its current revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub revision: String,
    pub value: serde_json::Value,
}

/// A secondary index over a single top-level field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub name: String,
    pub field: String,
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
            unique: false,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Every document that has the indexed field.
    All,
    Equals(String),
    /// Inclusive start, exclusive end. Open on a side when `None`.
    Range {
        start: Option<String>,
        end: Option<String>,
    },
}

impl Selector {
    pub fn matches(&self, key: &str) -> bool {
        match self {
            Selector::All => true,
            Selector::Equals(value) => key == value,
            Selector::Range { start, end } => {
                start.as_deref().is_none_or(|s| key >= s) && end.as_deref().is_none_or(|e| key < e)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub index: String,
    pub selector: Selector,
    pub limit: Option<usize>,
    pub order: SortOrder,
}

impl Query {
    pub fn all(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            selector: Selector::All,
            limit: None,
            order: SortOrder::Ascending,
        }
    }

    pub fn equals(index: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            selector: Selector::Equals(value.into()),
            ..Self::all(index)
        }
    }

    pub fn range(index: impl Into<String>, start: Option<String>, end: Option<String>) -> Self {
        Self {
            selector: Selector::Range { start, end },
            ..Self::all(index)
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }
}

/// One index hit: the document key and the indexed value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRow {
    pub id: String,
    pub key: String,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Writes `value` under `key` if `revision` matches the stored one (empty
    /// for a new document) and returns the new revision.
    async fn set(
        &self,
        key: &str,
        revision: &str,
        value: serde_json::Value,
    ) -> Result<String, AppError>;

    async fn get(&self, key: &str) -> Result<Option<Document>, AppError>;

    /// Deletes `key` at `revision`. Returns `false` when the document is
    /// already gone, so of two concurrent deletes only one sees `true`.
    async fn delete(&self, key: &str, revision: &str) -> Result<bool, AppError>;

    async fn execute_query(&self, query: &Query) -> Result<Vec<ViewRow>, AppError>;

    async fn count_all(&self) -> Result<u64, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

pub type SharedStore = Arc<dyn DocumentStore>;

/// A decoded value together with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Revisioned<T> {
    pub revision: String,
    pub value: T,
}

fn decode<T: DeserializeOwned>(key: &str, document: Document) -> Result<Revisioned<T>, AppError> {
    let value = serde_json::from_value(document.value).map_err(|e| {
        AppError::InternalError(anyhow::anyhow!("Failed to decode document {}: {}", key, e))
    })?;
    Ok(Revisioned {
        revision: document.revision,
        value,
    })
}

fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value, AppError> {
    serde_json::to_value(value)
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("Failed to encode document: {}", e)))
}

/// Fetches every key concurrently and decodes the documents into `T`.
///
/// Keys that no longer exist are left out of the result. The first failure
/// cancels the fetches still in flight and is the error returned; the call
/// only completes once every fetch has settled or observed the cancellation.
pub async fn get_many<T: DeserializeOwned>(
    store: &dyn DocumentStore,
    keys: &[String],
) -> Result<HashMap<String, T>, AppError> {
    let cancel = CancellationToken::new();
    let first_error: Mutex<Option<AppError>> = Mutex::new(None);

    let fetches = keys.iter().map(|key| {
        let cancel = &cancel;
        let first_error = &first_error;
        async move {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                fetched = store.get(key) => fetched,
            };

            let decoded = fetched.and_then(|doc| doc.map(|d| decode::<T>(key, d)).transpose());
            match decoded {
                Ok(found) => found.map(|doc| (key.clone(), doc.value)),
                Err(err) => {
                    let mut slot = first_error.lock().unwrap_or_else(|p| p.into_inner());
                    if slot.is_none() {
                        *slot = Some(err.context(format!("failed to fetch {}", key)));
                    }
                    cancel.cancel();
                    None
                }
            }
        }
    });

    let results = join_all(fetches).await;

    if let Some(err) = first_error.into_inner().unwrap_or_else(|p| p.into_inner()) {
        return Err(err);
    }

    Ok(results.into_iter().flatten().collect())
}

/// Typed view over a [`DocumentStore`] bucket.
pub struct Collection<T> {
    name: &'static str,
    store: SharedStore,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            store: self.store.clone(),
            _marker: PhantomData,
        }
    }
}

/// Upper bound on rows returned by a listing.
pub const LIST_LIMIT: usize = 200;

/// Deadline applied to listings.
pub const LIST_TIMEOUT: Duration = Duration::from_secs(1);

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    pub fn new(name: &'static str, store: SharedStore) -> Self {
        Self {
            name,
            store,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub async fn get(&self, key: &str) -> Result<Option<Revisioned<T>>, AppError> {
        match self.store.get(key).await? {
            Some(document) => decode(key, document).map(Some),
            None => Ok(None),
        }
    }

    pub async fn insert(&self, key: &str, value: &T) -> Result<String, AppError> {
        self.store.set(key, "", encode(value)?).await
    }

    pub async fn replace(&self, key: &str, revision: &str, value: &T) -> Result<String, AppError> {
        self.store.set(key, revision, encode(value)?).await
    }

    /// Deletes the document at its current revision. Returns `true` only
    /// when this call removed it.
    pub async fn remove(&self, key: &str) -> Result<bool, AppError> {
        match self.store.get(key).await? {
            Some(document) => self.store.delete(key, &document.revision).await,
            None => Ok(false),
        }
    }

    /// Exact-match lookup through `index`, re-fetched by primary key.
    pub async fn find_one_by(
        &self,
        index: &str,
        value: &str,
    ) -> Result<Option<(String, Revisioned<T>)>, AppError> {
        let rows = self
            .store
            .execute_query(&Query::equals(index, value).limit(1))
            .await?;

        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };

        Ok(self.get(&row.id).await?.map(|doc| (row.id, doc)))
    }

    pub async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, T>, AppError> {
        get_many(self.store.as_ref(), keys).await
    }

    /// Lists up to [`LIST_LIMIT`] documents ordered by `index`, bounded by [`LIST_TIMEOUT`].
    pub async fn list(&self, index: &str) -> Result<HashMap<String, T>, AppError> {
        let listing = async {
            let rows = self
                .store
                .execute_query(&Query::all(index).limit(LIST_LIMIT))
                .await?;
            let keys: Vec<String> = rows.into_iter().map(|row| row.id).collect();
            self.get_many(&keys).await
        };

        tokio::time::timeout(LIST_TIMEOUT, listing)
            .await
            .map_err(|_| {
                AppError::InternalError(anyhow::anyhow!("Listing {} timed out", self.name))
            })?
    }

    pub async fn count(&self) -> Result<u64, AppError> {
        self.store.count_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        title: String,
    }

    /// Serves "a" and "c", fails "b" and never answers "slow".
    struct FlakyStore {
        settled: AtomicUsize,
    }

    #[async_trait]
    impl DocumentStore for FlakyStore {
        async fn set(&self, _: &str, _: &str, _: serde_json::Value) -> Result<String, AppError> {
            unimplemented!()
        }

        async fn get(&self, key: &str) -> Result<Option<Document>, AppError> {
            match key {
                "b" => {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Err(AppError::DatabaseError(anyhow::anyhow!("disk on fire")))
                }
                "slow" => std::future::pending().await,
                "missing" => Ok(None),
                other => {
                    self.settled.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(Document {
                        revision: "1-a".to_string(),
                        value: serde_json::json!({ "title": other }),
                    }))
                }
            }
        }

        async fn delete(&self, _: &str, _: &str) -> Result<bool, AppError> {
            unimplemented!()
        }

        async fn execute_query(&self, _: &Query) -> Result<Vec<ViewRow>, AppError> {
            Ok(Vec::new())
        }

        async fn count_all(&self) -> Result<u64, AppError> {
            Ok(0)
        }

        async fn health_check(&self) -> Result<(), AppError> {
            Ok(())
        }
    }

    fn keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    #[tokio::test]
    async fn get_many_skips_absent_keys() {
        let store = FlakyStore {
            settled: AtomicUsize::new(0),
        };
        let found: HashMap<String, Note> = get_many(&store, &keys(&["a", "missing", "c"]))
            .await
            .unwrap();

        assert_eq!(found.len(), 2);
        assert_eq!(found["a"].title, "a");
        assert_eq!(found["c"].title, "c");
    }

    #[tokio::test]
    async fn get_many_returns_first_error_and_cancels_pending_fetches() {
        let store = FlakyStore {
            settled: AtomicUsize::new(0),
        };

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            get_many::<Note>(&store, &keys(&["a", "b", "slow"])),
        )
        .await
        .expect("get_many must not hang on a cancelled fetch");

        let err = result.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InternalError);
        assert!(err.reasons().iter().any(|r| r.contains("disk on fire")));
    }

    #[test]
    fn range_selector_is_half_open() {
        let selector = Selector::Range {
            start: Some("b".to_string()),
            end: Some("d".to_string()),
        };
        assert!(!selector.matches("a"));
        assert!(selector.matches("b"));
        assert!(selector.matches("c"));
        assert!(!selector.matches("d"));
    }
}
