use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    Client as MongoClient, Collection, Database, IndexModel,
    bson::{self, Bson, Document as BsonDocument, doc},
    error::{ErrorKind as MongoErrorKind, WriteFailure},
    options::{FindOptions, IndexOptions},
};
use uuid::Uuid;

use super::{Document, DocumentStore, IndexDefinition, Query, Selector, SortOrder, ViewRow};
use crate::error::AppError;

const ID_FIELD: &str = "_id";
const REVISION_FIELD: &str = "_rev";
const DUPLICATE_KEY: i32 = 11000;

/// Opens a client and selects `database`.
pub async fn connect(uri: &str, database: &str) -> Result<Database, AppError> {
    tracing::info!("Connecting to MongoDB");
    let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
        tracing::error!("Failed to connect to MongoDB: {}", e);
        AppError::from(e)
    })?;
    tracing::info!(database = %database, "Successfully connected to MongoDB database");
    Ok(client.database(database))
}

/// One bucket backed by a MongoDB collection. Each document keeps its key in
/// `_id` and its revision in `_rev` next to the stored fields.
pub struct MongoStore {
    database: Database,
    collection: Collection<BsonDocument>,
    indexes: Vec<IndexDefinition>,
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        MongoErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY
    )
}

fn next_revision(previous: &str) -> String {
    let generation = previous
        .split('-')
        .next()
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or(0)
        + 1;
    format!("{}-{}", generation, Uuid::new_v4().simple())
}

fn bson_key(value: &Bson) -> Option<String> {
    match value {
        Bson::String(s) => Some(s.clone()),
        Bson::Int32(n) => Some(n.to_string()),
        Bson::Int64(n) => Some(n.to_string()),
        Bson::Boolean(b) => Some(b.to_string()),
        _ => None,
    }
}

impl MongoStore {
    pub fn new(database: &Database, collection: &str, indexes: Vec<IndexDefinition>) -> Self {
        Self {
            database: database.clone(),
            collection: database.collection(collection),
            indexes,
        }
    }

    /// Creates the secondary indexes declared for this bucket.
    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        for index in &self.indexes {
            let model = IndexModel::builder()
                .keys(doc! { index.field.as_str(): 1 })
                .options(
                    IndexOptions::builder()
                        .name(index.name.clone())
                        .unique(index.unique)
                        .sparse(true)
                        .build(),
                )
                .build();

            self.collection.create_index(model, None).await.map_err(|e| {
                tracing::error!(
                    index = %index.name,
                    collection = %self.collection.name(),
                    "Failed to create index: {}",
                    e
                );
                AppError::from(e)
            })?;
            tracing::info!(
                index = %index.name,
                collection = %self.collection.name(),
                "Created index"
            );
        }
        Ok(())
    }

    fn index(&self, name: &str) -> Result<&IndexDefinition, AppError> {
        self.indexes
            .iter()
            .find(|index| index.name == name)
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("Unknown index: {}", name)))
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn set(
        &self,
        key: &str,
        revision: &str,
        value: serde_json::Value,
    ) -> Result<String, AppError> {
        let mut document = bson::to_document(&value).map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Value for {} is not a document: {}", key, e))
        })?;
        let new_revision = next_revision(revision);
        document.insert(ID_FIELD, key);
        document.insert(REVISION_FIELD, new_revision.as_str());

        let conflict = |e: &mongodb::error::Error| {
            AppError::Conflict(anyhow::anyhow!("Duplicate key writing {}: {}", key, e))
        };

        if revision.is_empty() {
            self.collection
                .insert_one(document, None)
                .await
                .map_err(|e| if is_duplicate_key(&e) { conflict(&e) } else { e.into() })?;
        } else {
            let result = self
                .collection
                .replace_one(
                    doc! { ID_FIELD: key, REVISION_FIELD: revision },
                    document,
                    None,
                )
                .await
                .map_err(|e| if is_duplicate_key(&e) { conflict(&e) } else { e.into() })?;

            if result.matched_count == 0 {
                return Err(AppError::Conflict(anyhow::anyhow!(
                    "Revision mismatch for {}",
                    key
                )));
            }
        }

        Ok(new_revision)
    }

    async fn get(&self, key: &str) -> Result<Option<Document>, AppError> {
        let Some(mut document) = self.collection.find_one(doc! { ID_FIELD: key }, None).await?
        else {
            return Ok(None);
        };

        document.remove(ID_FIELD);
        let revision = match document.remove(REVISION_FIELD) {
            Some(Bson::String(rev)) => rev,
            _ => {
                return Err(AppError::DatabaseError(anyhow::anyhow!(
                    "Document {} has no revision",
                    key
                )));
            }
        };

        Ok(Some(Document {
            revision,
            value: Bson::Document(document).into_relaxed_extjson(),
        }))
    }

    async fn delete(&self, key: &str, revision: &str) -> Result<bool, AppError> {
        let result = self
            .collection
            .delete_one(doc! { ID_FIELD: key, REVISION_FIELD: revision }, None)
            .await?;
        if result.deleted_count > 0 {
            return Ok(true);
        }

        let still_there = self
            .collection
            .find_one(doc! { ID_FIELD: key }, None)
            .await?
            .is_some();
        if still_there {
            return Err(AppError::Conflict(anyhow::anyhow!(
                "Revision mismatch for {}",
                key
            )));
        }
        Ok(false)
    }

    async fn execute_query(&self, query: &Query) -> Result<Vec<ViewRow>, AppError> {
        let field = self.index(&query.index)?.field.as_str();

        let filter = match &query.selector {
            Selector::All => doc! { field: { "$exists": true } },
            Selector::Equals(value) => doc! { field: value.as_str() },
            Selector::Range { start, end } => {
                let mut bounds = BsonDocument::new();
                bounds.insert("$exists", true);
                if let Some(start) = start {
                    bounds.insert("$gte", start.as_str());
                }
                if let Some(end) = end {
                    bounds.insert("$lt", end.as_str());
                }
                doc! { field: bounds }
            }
        };

        let direction = match query.order {
            SortOrder::Ascending => 1,
            SortOrder::Descending => -1,
        };
        let options = FindOptions::builder()
            .sort(doc! { field: direction, ID_FIELD: direction })
            .projection(doc! { ID_FIELD: 1, field: 1 })
            .limit(query.limit.map(|l| l as i64))
            .build();

        let mut cursor = self.collection.find(filter, options).await?;
        let mut rows = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            let id = document.get_str(ID_FIELD).map_err(|e| {
                AppError::DatabaseError(anyhow::anyhow!("Malformed document key: {}", e))
            })?;
            if let Some(key) = document.get(field).and_then(bson_key) {
                rows.push(ViewRow {
                    id: id.to_string(),
                    key,
                });
            }
        }

        Ok(rows)
    }

    async fn count_all(&self) -> Result<u64, AppError> {
        Ok(self.collection.count_documents(None, None).await?)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.database
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| {
                tracing::error!("MongoDB health check failed: {}", e);
                AppError::from(e)
            })?;
        Ok(())
    }
}
