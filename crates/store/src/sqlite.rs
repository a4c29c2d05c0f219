use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::Row;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use maestro_core::store::{BatchOp, Document, DocumentStore, StoreError, WriteBatch};

use crate::connection::DbPool;
use crate::feed::{ChangeEvent, ChangeKind};
use crate::memory::merge_fields;

const FEED_CAPACITY: usize = 64;

/// SQLite-backed document store. Documents live in one `documents` table as
/// JSON text; batches run in a single transaction.
pub struct SqliteStore {
    pool: DbPool,
    feed: broadcast::Sender<ChangeEvent>,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self { pool, feed }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    fn emit(&self, events: Vec<ChangeEvent>) {
        for event in events {
            let _ = self.feed.send(event);
        }
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn parse_data(raw: &str) -> Result<Value, StoreError> {
    serde_json::from_str(raw).map_err(|err| StoreError::Encoding(err.to_string()))
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let row = sqlx::query(
            "SELECT revision, data FROM documents WHERE collection = ?1 AND id = ?2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => {
                let revision: i64 = row.try_get("revision").map_err(backend)?;
                let raw: String = row.try_get("data").map_err(backend)?;
                Ok(Some(Document {
                    id: id.to_owned(),
                    revision: revision as u64,
                    data: parse_data(&raw)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        // Small collections; fetch and filter on the decoded JSON rather
        // than relying on json1 binding quirks.
        let rows = sqlx::query(
            "SELECT id, revision, data FROM documents WHERE collection = ?1 ORDER BY id",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut matches = Vec::new();
        for row in rows {
            let raw: String = row.try_get("data").map_err(backend)?;
            let data = parse_data(&raw)?;
            if data.get(field) == Some(value) {
                let revision: i64 = row.try_get("revision").map_err(backend)?;
                matches.push(Document {
                    id: row.try_get("id").map_err(backend)?,
                    revision: revision as u64,
                    data,
                });
            }
        }
        Ok(matches)
    }

    async fn append(&self, collection: &str, data: Value) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO documents (collection, id, revision, data, updated_at)
             VALUES (?1, ?2, 1, ?3, ?4)",
        )
        .bind(collection)
        .bind(&id)
        .bind(data.to_string())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        self.emit(vec![ChangeEvent {
            collection: collection.to_owned(),
            id: id.clone(),
            kind: ChangeKind::Set,
        }]);
        Ok(id)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let ops = batch.into_ops();
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let mut events = Vec::with_capacity(ops.len());
        let now = Utc::now().to_rfc3339();

        for op in ops {
            match op {
                BatchOp::Set { collection, id, data } => {
                    sqlx::query(
                        "INSERT INTO documents (collection, id, revision, data, updated_at)
                         VALUES (?1, ?2, 1, ?3, ?4)
                         ON CONFLICT (collection, id) DO UPDATE
                         SET revision = documents.revision + 1,
                             data = excluded.data,
                             updated_at = excluded.updated_at",
                    )
                    .bind(&collection)
                    .bind(&id)
                    .bind(data.to_string())
                    .bind(&now)
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;
                    events.push(ChangeEvent { collection, id, kind: ChangeKind::Set });
                }
                BatchOp::Update { collection, id, data, expected_revision } => {
                    let row = sqlx::query(
                        "SELECT revision, data FROM documents WHERE collection = ?1 AND id = ?2",
                    )
                    .bind(&collection)
                    .bind(&id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(backend)?
                    .ok_or_else(|| StoreError::MissingDocument {
                        collection: collection.clone(),
                        id: id.clone(),
                    })?;
                    let revision: i64 = row.try_get("revision").map_err(backend)?;
                    check_revision(&collection, &id, revision as u64, expected_revision)?;

                    let raw: String = row.try_get("data").map_err(backend)?;
                    let mut current = parse_data(&raw)?;
                    merge_fields(&mut current, &data)?;

                    sqlx::query(
                        "UPDATE documents
                         SET revision = revision + 1, data = ?3, updated_at = ?4
                         WHERE collection = ?1 AND id = ?2",
                    )
                    .bind(&collection)
                    .bind(&id)
                    .bind(current.to_string())
                    .bind(&now)
                    .execute(&mut *tx)
                    .await
                    .map_err(backend)?;
                    events.push(ChangeEvent { collection, id, kind: ChangeKind::Updated });
                }
                BatchOp::Delete { collection, id, expected_revision } => {
                    let revision: Option<i64> = sqlx::query_scalar(
                        "SELECT revision FROM documents WHERE collection = ?1 AND id = ?2",
                    )
                    .bind(&collection)
                    .bind(&id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(backend)?;
                    let revision = revision.ok_or_else(|| StoreError::MissingDocument {
                        collection: collection.clone(),
                        id: id.clone(),
                    })?;
                    check_revision(&collection, &id, revision as u64, expected_revision)?;

                    sqlx::query("DELETE FROM documents WHERE collection = ?1 AND id = ?2")
                        .bind(&collection)
                        .bind(&id)
                        .execute(&mut *tx)
                        .await
                        .map_err(backend)?;
                    events.push(ChangeEvent { collection, id, kind: ChangeKind::Deleted });
                }
            }
        }

        tx.commit().await.map_err(backend)?;
        debug!(writes = events.len(), "sqlite store batch committed");
        self.emit(events);
        Ok(())
    }
}

fn check_revision(
    collection: &str,
    id: &str,
    actual: u64,
    expected: Option<u64>,
) -> Result<(), StoreError> {
    match expected {
        Some(expected) if expected != actual => Err(StoreError::RevisionConflict {
            collection: collection.to_owned(),
            id: id.to_owned(),
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}
