use std::{collections::BTreeMap, sync::RwLock};

use async_trait::async_trait;
use uuid::Uuid;

use super::{Document, DocumentStore, IndexDefinition, Query, SortOrder, ViewRow};
use crate::error::AppError;

/// In-process bucket used by tests and single-node development runs.
pub struct MemoryStore {
    indexes: Vec<IndexDefinition>,
    documents: RwLock<BTreeMap<String, Document>>,
}

fn next_revision(previous: Option<&str>) -> String {
    let generation = previous
        .and_then(|rev| rev.split('-').next())
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    format!("{}-{}", generation, Uuid::new_v4().simple())
}

fn index_key(value: &serde_json::Value, field: &str) -> Option<String> {
    match value.get(field)? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl MemoryStore {
    pub fn new(indexes: Vec<IndexDefinition>) -> Self {
        Self {
            indexes,
            documents: RwLock::new(BTreeMap::new()),
        }
    }

    fn index(&self, name: &str) -> Result<&IndexDefinition, AppError> {
        self.indexes
            .iter()
            .find(|index| index.name == name)
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Unknown index: {}", name)))
    }

    fn poisoned<E: std::fmt::Display>(e: E) -> AppError {
        AppError::InternalError(anyhow::anyhow!("Memory store lock poisoned: {}", e))
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn set(
        &self,
        key: &str,
        revision: &str,
        value: serde_json::Value,
    ) -> Result<String, AppError> {
        let mut documents = self.documents.write().map_err(Self::poisoned)?;

        let current = documents.get(key).map(|doc| doc.revision.as_str());
        match current {
            Some(current) if current != revision => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Revision mismatch for {}",
                    key
                )));
            }
            None if !revision.is_empty() => {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Document {} no longer exists",
                    key
                )));
            }
            _ => {}
        }

        for index in self.indexes.iter().filter(|index| index.unique) {
            let Some(new_key) = index_key(&value, &index.field) else {
                continue;
            };
            let taken = documents.iter().any(|(id, doc)| {
                id != key && index_key(&doc.value, &index.field).as_deref() == Some(&new_key)
            });
            if taken {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Duplicate value for unique index {}",
                    index.name
                )));
            }
        }

        let new_revision = next_revision(current);
        documents.insert(
            key.to_string(),
            Document {
                revision: new_revision.clone(),
                value,
            },
        );
        Ok(new_revision)
    }

    async fn get(&self, key: &str) -> Result<Option<Document>, AppError> {
        let documents = self.documents.read().map_err(Self::poisoned)?;
        Ok(documents.get(key).cloned())
    }

    async fn delete(&self, key: &str, revision: &str) -> Result<bool, AppError> {
        let mut documents = self.documents.write().map_err(Self::poisoned)?;
        match documents.get(key) {
            Some(doc) if doc.revision == revision => {
                documents.remove(key);
                Ok(true)
            }
            Some(_) => Err(AppError::Conflict(anyhow::anyhow!(
                "Revision mismatch for {}",
                key
            ))),
            None => Ok(false),
        }
    }

    async fn execute_query(&self, query: &Query) -> Result<Vec<ViewRow>, AppError> {
        let index = self.index(&query.index)?;
        let documents = self.documents.read().map_err(Self::poisoned)?;

        let mut rows: Vec<ViewRow> = documents
            .iter()
            .filter_map(|(id, doc)| {
                index_key(&doc.value, &index.field).map(|key| ViewRow {
                    id: id.clone(),
                    key,
                })
            })
            .filter(|row| query.selector.matches(&row.key))
            .collect();

        rows.sort_by(|a, b| (&a.key, &a.id).cmp(&(&b.key, &b.id)));
        if query.order == SortOrder::Descending {
            rows.reverse();
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        Ok(rows)
    }

    async fn count_all(&self) -> Result<u64, AppError> {
        let documents = self.documents.read().map_err(Self::poisoned)?;
        Ok(documents.len() as u64)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.documents.read().map_err(Self::poisoned)?;
        Ok(())
    }
}
