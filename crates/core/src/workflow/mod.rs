pub mod quote;
pub mod roles;
pub mod service;

use rust_decimal::Decimal;
use serde::de::DeserializeOwned;

use crate::errors::WorkflowError;
use crate::store::{DocumentStore, StoreError};

/// Commercial policy knobs applied by the operations. Defaults match the
/// business rules the dashboard bakes in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkflowPolicy {
    pub warranty_days: u32,
    pub default_vat_percentage: u32,
    pub quote_validity_days: u32,
}

impl Default for WorkflowPolicy {
    fn default() -> Self {
        Self {
            warranty_days: 30,
            default_vat_percentage: 15,
            quote_validity_days: 15,
        }
    }
}

impl WorkflowPolicy {
    pub fn default_vat(&self) -> Decimal {
        Decimal::from(self.default_vat_percentage)
    }
}

/// Loads and decodes a document, returning the revision alongside so the
/// caller can submit checked writes.
pub(crate) async fn load<S, T>(
    store: &S,
    collection: &str,
    id: &str,
) -> Result<(T, u64), WorkflowError>
where
    S: DocumentStore + ?Sized,
    T: DeserializeOwned,
{
    let doc = store
        .get(collection, id)
        .await?
        .ok_or_else(|| StoreError::MissingDocument {
            collection: collection.to_owned(),
            id: id.to_owned(),
        })?;
    let entity = doc.decode()?;
    Ok((entity, doc.revision))
}
