use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Collection names, matching the stored document shapes.
pub mod collections {
    pub const USERS: &str = "users";
    pub const SERVICE_REQUESTS: &str = "serviceRequests";
    pub const QUOTES: &str = "quotes";
    pub const AUDIT_LOGS: &str = "auditLogs";
    pub const MAIL: &str = "mail";
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document {collection}/{id} does not exist")]
    MissingDocument { collection: String, id: String },
    #[error("revision conflict on {collection}/{id}: expected {expected}, found {actual}")]
    RevisionConflict {
        collection: String,
        id: String,
        expected: u64,
        actual: u64,
    },
    #[error("document encoding failed: {0}")]
    Encoding(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encoding(err.to_string())
    }
}

/// A stored document. `revision` starts at 1 and increments on every write;
/// checked writes use it to reject concurrent mutations.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub id: String,
    pub revision: u64,
    pub data: Value,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(value)?)
}

#[derive(Clone, Debug, PartialEq)]
pub enum BatchOp {
    /// Create or replace the whole document.
    Set {
        collection: String,
        id: String,
        data: Value,
    },
    /// Merge top-level fields into an existing document. Fails if the
    /// document is missing, or if `expected_revision` no longer matches.
    Update {
        collection: String,
        id: String,
        data: Value,
        expected_revision: Option<u64>,
    },
    Delete {
        collection: String,
        id: String,
        expected_revision: Option<u64>,
    },
}

/// An atomic group of writes. Either every operation applies or none does.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, collection: &str, id: &str, data: Value) -> Self {
        self.ops.push(BatchOp::Set {
            collection: collection.to_owned(),
            id: id.to_owned(),
            data,
        });
        self
    }

    pub fn update(mut self, collection: &str, id: &str, data: Value) -> Self {
        self.ops.push(BatchOp::Update {
            collection: collection.to_owned(),
            id: id.to_owned(),
            data,
            expected_revision: None,
        });
        self
    }

    pub fn update_checked(mut self, collection: &str, id: &str, data: Value, revision: u64) -> Self {
        self.ops.push(BatchOp::Update {
            collection: collection.to_owned(),
            id: id.to_owned(),
            data,
            expected_revision: Some(revision),
        });
        self
    }

    pub fn delete(mut self, collection: &str, id: &str) -> Self {
        self.ops.push(BatchOp::Delete {
            collection: collection.to_owned(),
            id: id.to_owned(),
            expected_revision: None,
        });
        self
    }

    pub fn delete_checked(mut self, collection: &str, id: &str, revision: u64) -> Self {
        self.ops.push(BatchOp::Delete {
            collection: collection.to_owned(),
            id: id.to_owned(),
            expected_revision: Some(revision),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Abstract document store the workflow engine runs against.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// All documents in `collection` whose top-level `field` equals `value`.
    async fn query_eq(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError>;

    /// Inserts with a store-assigned id and returns it.
    async fn append(&self, collection: &str, data: Value) -> Result<String, StoreError>;

    /// Applies the batch atomically.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;
}
