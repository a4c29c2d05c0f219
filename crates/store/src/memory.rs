use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

use maestro_core::store::{BatchOp, Document, DocumentStore, StoreError, WriteBatch};

use crate::feed::{ChangeEvent, ChangeKind};

const FEED_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
struct Stored {
    revision: u64,
    data: Value,
}

type Collections = HashMap<String, HashMap<String, Stored>>;

/// In-memory document store. The primary backend for tests and the demo;
/// batches apply against a copy and swap in only when every operation
/// validates, so a failed commit leaves nothing behind.
pub struct MemoryStore {
    collections: RwLock<Collections>,
    feed: broadcast::Sender<ChangeEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self { collections: RwLock::new(HashMap::new()), feed }
    }

    /// Receiver of committed write notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    fn emit(&self, events: Vec<ChangeEvent>) {
        for event in events {
            // Nobody listening is fine.
            let _ = self.feed.send(event);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|docs| {
            docs.get(id).map(|stored| Document {
                id: id.to_owned(),
                revision: stored.revision,
                data: stored.data.clone(),
            })
        }))
    }

    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        let collections = self.collections.read().await;
        let mut matches: Vec<Document> = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, stored)| stored.data.get(field) == Some(value))
                    .map(|(id, stored)| Document {
                        id: id.clone(),
                        revision: stored.revision,
                        data: stored.data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        matches.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(matches)
    }

    async fn append(&self, collection: &str, data: Value) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_owned())
            .or_default()
            .insert(id.clone(), Stored { revision: 1, data });
        drop(collections);
        self.emit(vec![ChangeEvent {
            collection: collection.to_owned(),
            id: id.clone(),
            kind: ChangeKind::Set,
        }]);
        Ok(id)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let ops = batch.into_ops();
        let mut collections = self.collections.write().await;
        let mut next = collections.clone();
        let mut events = Vec::with_capacity(ops.len());

        for op in ops {
            events.push(apply(&mut next, op)?);
        }

        debug!(writes = events.len(), "memory store batch committed");
        *collections = next;
        drop(collections);
        self.emit(events);
        Ok(())
    }
}

fn apply(collections: &mut Collections, op: BatchOp) -> Result<ChangeEvent, StoreError> {
    match op {
        BatchOp::Set { collection, id, data } => {
            let docs = collections.entry(collection.clone()).or_default();
            let revision = docs.get(&id).map(|stored| stored.revision + 1).unwrap_or(1);
            docs.insert(id.clone(), Stored { revision, data });
            Ok(ChangeEvent { collection, id, kind: ChangeKind::Set })
        }
        BatchOp::Update { collection, id, data, expected_revision } => {
            let stored = collections
                .get_mut(&collection)
                .and_then(|docs| docs.get_mut(&id))
                .ok_or_else(|| StoreError::MissingDocument {
                    collection: collection.clone(),
                    id: id.clone(),
                })?;
            check_revision(&collection, &id, stored.revision, expected_revision)?;
            merge_fields(&mut stored.data, &data)?;
            stored.revision += 1;
            Ok(ChangeEvent { collection, id, kind: ChangeKind::Updated })
        }
        BatchOp::Delete { collection, id, expected_revision } => {
            let docs =
                collections.get_mut(&collection).ok_or_else(|| StoreError::MissingDocument {
                    collection: collection.clone(),
                    id: id.clone(),
                })?;
            let stored = docs.get(&id).ok_or_else(|| StoreError::MissingDocument {
                collection: collection.clone(),
                id: id.clone(),
            })?;
            check_revision(&collection, &id, stored.revision, expected_revision)?;
            docs.remove(&id);
            Ok(ChangeEvent { collection, id, kind: ChangeKind::Deleted })
        }
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

/// Merges the top-level fields of `patch` into `target`.
pub(crate) fn merge_fields(target: &mut Value, patch: &Value) -> Result<(), StoreError> {
    let (Value::Object(target_map), Value::Object(patch_map)) = (target, patch) else {
        return Err(StoreError::Encoding(
            "document updates require object payloads".to_owned(),
        ));
    };
    for (key, value) in patch_map {
        target_map.insert(key.clone(), value.clone());
    }
    Ok(())
}
