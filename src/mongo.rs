//! MongoDB-backed scenario store.
//!
//! The client is created once at startup; `mongodb::Client` pools connections
//! internally and is cheap to share. Connection happens lazily on first use.

use async_trait::async_trait;
use mongodb::bson::{self, doc, Bson, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use tracing::{debug, info, instrument};

use crate::domain::{ScenarioDocument, ScenarioUpdate, StoredScenario};
use crate::store::{CollectionRef, ScenarioStore, StoreError};

#[derive(Clone)]
pub struct MongoStore {
  client: Client,
}

impl MongoStore {
  pub async fn connect(url: &str) -> Result<Self, StoreError> {
    let mut options = ClientOptions::parse(url).await?;
    options.app_name = Some("scenario-forge".into());
    let client = Client::with_options(options)?;
    info!(target: "scenario_forge", "MongoDB client configured");
    Ok(Self { client })
  }

  fn collection(&self, target: &CollectionRef) -> Collection<Document> {
    self.client.database(&target.database).collection(&target.collection)
  }
}

#[async_trait]
impl ScenarioStore for MongoStore {
  #[instrument(level = "debug", skip(self, scenario), fields(db = %target.database, collection = %target.collection))]
  async fn insert(&self, target: &CollectionRef, scenario: &ScenarioDocument) -> Result<String, StoreError> {
    let document = bson::to_document(scenario).map_err(|e| StoreError::InvalidDocument(e.to_string()))?;
    let result = self.collection(target).insert_one(document, None).await?;
    let id = id_to_string(&result.inserted_id);
    debug!(%id, "Inserted scenario");
    Ok(id)
  }

  #[instrument(level = "debug", skip(self, api_key), fields(db = %target.database, collection = %target.collection))]
  async fn find_by_api_key(
    &self,
    target: &CollectionRef,
    api_key: &str,
  ) -> Result<Option<StoredScenario>, StoreError> {
    let found = self.collection(target).find_one(doc! { "api_key": api_key }, None).await?;
    Ok(found.map(|document| stored_scenario(&document)))
  }

  #[instrument(level = "debug", skip(self, api_key, update), fields(db = %target.database, collection = %target.collection))]
  async fn update_by_api_key(
    &self,
    target: &CollectionRef,
    api_key: &str,
    update: &ScenarioUpdate,
  ) -> Result<u64, StoreError> {
    let set = set_document(update);
    if set.is_empty() {
      return Ok(0);
    }
    let result = self
      .collection(target)
      .update_one(doc! { "api_key": api_key }, doc! { "$set": set }, None)
      .await?;
    Ok(result.modified_count)
  }

  fn backend(&self) -> &'static str {
    "mongodb"
  }
}

/// `$set` body holding only the fields present in the update.
fn set_document(update: &ScenarioUpdate) -> Document {
  let mut set = Document::new();
  if let Some(v) = &update.scenario_name {
    set.insert("scenario_name", v.clone());
  }
  if let Some(v) = &update.scenario_prompt {
    set.insert("scenario_prompt", v.clone());
  }
  if let Some(v) = &update.questions_for_feedback {
    set.insert("questions_for_feedback", v.clone());
  }
  if let Some(v) = &update.difficulty_status {
    set.insert("difficulty_status", v.clone());
  }
  set
}

/// Records written by other clients may hold nulls or non-string values; read
/// them leniently instead of failing the lookup.
fn stored_scenario(document: &Document) -> StoredScenario {
  let text = |key: &str| match document.get(key) {
    None | Some(Bson::Null) => String::new(),
    Some(Bson::String(s)) => s.clone(),
    Some(other) => other.to_string(),
  };
  let questions = match document.get("questions_for_feedback") {
    Some(Bson::Array(items)) => items
      .iter()
      .filter(|b| !matches!(b, Bson::Null))
      .map(|b| match b {
        Bson::String(s) => s.clone(),
        other => other.to_string(),
      })
      .collect(),
    _ => Vec::new(),
  };
  StoredScenario {
    id: document.get("_id").map(id_to_string).unwrap_or_default(),
    doc: ScenarioDocument {
      scenario_name: text("scenario_name"),
      scenario_prompt: text("scenario_prompt"),
      questions_for_feedback: questions,
      difficulty_status: text("difficulty_status"),
      api_key: text("api_key"),
    },
  }
}

fn id_to_string(id: &Bson) -> String {
  match id {
    Bson::ObjectId(oid) => oid.to_hex(),
    Bson::String(s) => s.clone(),
    other => other.to_string(),
  }
}
