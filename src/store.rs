//! Scenario persistence: the store seam and an in-memory implementation.
//!
//! The in-memory store serves when `MONGO_URL` is absent (local development)
//! and backs the service tests. It mirrors Mongo's `update_one` semantics:
//! only the first match is touched and `modified` is 0 when nothing changed.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::domain::{ScenarioDocument, ScenarioUpdate, StoredScenario};

/// Database + collection pair a route writes to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CollectionRef {
  pub database: String,
  pub collection: String,
}

#[derive(Debug, Error)]
pub enum StoreError {
  #[error(transparent)]
  Mongo(#[from] mongodb::error::Error),
  #[error("invalid document: {0}")]
  InvalidDocument(String),
}

#[async_trait]
pub trait ScenarioStore: Send + Sync {
  /// Insert and return the new record's id in string form.
  async fn insert(&self, target: &CollectionRef, doc: &ScenarioDocument) -> Result<String, StoreError>;

  async fn find_by_api_key(
    &self,
    target: &CollectionRef,
    api_key: &str,
  ) -> Result<Option<StoredScenario>, StoreError>;

  /// Apply a partial update to the first record with `api_key`. Returns the modified count.
  async fn update_by_api_key(
    &self,
    target: &CollectionRef,
    api_key: &str,
    update: &ScenarioUpdate,
  ) -> Result<u64, StoreError>;

  fn backend(&self) -> &'static str;
}

#[derive(Default)]
pub struct MemoryStore {
  collections: RwLock<HashMap<CollectionRef, Vec<StoredScenario>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Snapshot of one collection, in insertion order.
  #[cfg(test)]
  pub async fn records(&self, target: &CollectionRef) -> Vec<StoredScenario> {
    self.collections.read().await.get(target).cloned().unwrap_or_default()
  }
}

#[async_trait]
impl ScenarioStore for MemoryStore {
  #[instrument(level = "debug", skip(self, doc), fields(collection = %target.collection))]
  async fn insert(&self, target: &CollectionRef, doc: &ScenarioDocument) -> Result<String, StoreError> {
    let id = Uuid::new_v4().simple().to_string();
    let mut collections = self.collections.write().await;
    collections
      .entry(target.clone())
      .or_default()
      .push(StoredScenario { id: id.clone(), doc: doc.clone() });
    debug!(%id, "Inserted scenario (memory)");
    Ok(id)
  }

  async fn find_by_api_key(
    &self,
    target: &CollectionRef,
    api_key: &str,
  ) -> Result<Option<StoredScenario>, StoreError> {
    let collections = self.collections.read().await;
    Ok(collections
      .get(target)
      .and_then(|records| records.iter().find(|r| r.doc.api_key == api_key))
      .cloned())
  }

  async fn update_by_api_key(
    &self,
    target: &CollectionRef,
    api_key: &str,
    update: &ScenarioUpdate,
  ) -> Result<u64, StoreError> {
    let mut collections = self.collections.write().await;
    let found = collections
      .get_mut(target)
      .and_then(|records| records.iter_mut().find(|r| r.doc.api_key == api_key));
    let Some(record) = found else { return Ok(0) };
    Ok(if update.apply_to(&mut record.doc) { 1 } else { 0 })
  }

  fn backend(&self) -> &'static str {
    "memory"
  }
}
