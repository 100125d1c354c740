//! Scenario orchestration shared by the HTTP handlers.
//!
//! Create: prompt -> generation -> key resolution -> insert.
//! Edit:   (flow lookups) -> prompt -> generation -> (flow push) -> find -> partial update.
//!
//! Store and workflow failures are reported in-band through `status`/`message`
//! on the returned mapping; only a missing prompt or flow template is an `Err`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::RouteSettings;
use crate::domain::{ScenarioDocument, ScenarioUpdate};
use crate::generation::{build_request, run_structured, TextGenerator};
use crate::store::ScenarioStore;
use crate::workflow::{compose_flow, WorkflowClient};

#[derive(Debug, Error)]
pub enum ServiceError {
  #[error("failed to read prompt file {path}: {source}")]
  Prompt {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("failed to load flow template {path}: {reason}")]
  FlowTemplate { path: PathBuf, reason: String },
}

#[derive(Clone)]
pub struct ScenarioService {
  generator: Arc<dyn TextGenerator>,
  store: Arc<dyn ScenarioStore>,
  workflow: Option<WorkflowClient>,
}

impl ScenarioService {
  pub fn new(
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn ScenarioStore>,
    workflow: Option<WorkflowClient>,
  ) -> Self {
    Self { generator, store, workflow }
  }

  pub fn store_backend(&self) -> &'static str {
    self.store.backend()
  }

  pub fn workflow_enabled(&self) -> bool {
    self.workflow.is_some()
  }

  /// Prompt file -> request -> structured run. Always yields a mapping.
  async fn generate(&self, query: &str, route: &RouteSettings) -> Result<Map<String, Value>, ServiceError> {
    let system_prompt = read_prompt(&route.prompt_path).await?;
    let (turns, settings) = build_request(&system_prompt, query);
    let output = run_structured(self.generator.as_ref(), &turns, &settings, &route.model).await;
    info!(target: "generation", origin = output.origin(), model = %route.model, "Scenario generation finished");
    Ok(output.into_fields())
  }

  #[instrument(level = "info", skip(self, query, route), fields(query_len = query.len(), collection = %route.collection_name))]
  pub async fn add_scenario(&self, query: &str, route: &RouteSettings) -> Result<Map<String, Value>, ServiceError> {
    let mut response = self.generate(query, route).await?;

    let api_key = match &self.workflow {
      None => route.placeholder_api_key.clone(),
      Some(workflow) => {
        let template = load_flow_template(route.workflow_path.as_deref()).await?;
        let flow = compose_flow(template, &response, None);
        match workflow.add_flow(&flow).await {
          Ok(key) => key,
          Err(e) => {
            error!(target: "scenario_forge", error = %e, "Workflow add-flow failed; nothing stored");
            return Ok(error_only("Failed to create flow in workflow service"));
          }
        }
      }
    };

    let doc = ScenarioDocument::from_output(&response, &api_key);
    match self.store.insert(&route.collection_ref(), &doc).await {
      Ok(id) => {
        info!(target: "scenario_forge", %id, "Scenario added");
        response.insert("_id".into(), Value::String(id));
        response.insert("api_key".into(), Value::String(api_key));
        set_status(&mut response, "success", "Scenario added successfully".into());
      }
      Err(e) => {
        error!(target: "scenario_forge", error = %e, "Error adding scenario to database");
        set_status(&mut response, "error", format!("Failed to add scenario: {e}"));
      }
    }
    Ok(response)
  }

  #[instrument(level = "info", skip(self, query, api_key, route), fields(query_len = query.len(), collection = %route.collection_name))]
  pub async fn edit_scenario(
    &self,
    query: &str,
    api_key: &str,
    route: &RouteSettings,
  ) -> Result<Map<String, Value>, ServiceError> {
    let mut current_flow = None;
    if let Some(workflow) = &self.workflow {
      match workflow.get_flow(api_key).await {
        Ok(flow) => current_flow = Some(flow),
        Err(e) => {
          error!(target: "scenario_forge", error = %e, "Workflow flow lookup failed");
          return Ok(error_only("Failed to fetch flow from workflow service"));
        }
      }
      if let Err(e) = workflow.get_agent(api_key).await {
        error!(target: "scenario_forge", error = %e, "Workflow agent lookup failed");
        return Ok(error_only("Failed to fetch agent from workflow service"));
      }
    }

    let mut response = self.generate(query, route).await?;

    if let Some(workflow) = &self.workflow {
      let template = match current_flow {
        Some(flow @ Value::Object(_)) => flow,
        _ => load_flow_template(route.workflow_path.as_deref()).await?,
      };
      let flow = compose_flow(template, &response, Some(api_key));
      // The push result does not gate the database update.
      match workflow.edit_flow(&flow).await {
        Ok(status) if status.is_success() => info!(target: "scenario_forge", %status, "Workflow flow updated"),
        Ok(status) => warn!(target: "scenario_forge", %status, "Workflow edit-flow rejected; continuing"),
        Err(e) => warn!(target: "scenario_forge", error = %e, "Workflow edit-flow failed; continuing"),
      }
    }

    let target = route.collection_ref();
    let existing = match self.store.find_by_api_key(&target, api_key).await {
      Ok(Some(found)) => found,
      Ok(None) => {
        warn!(target: "scenario_forge", "No scenario found for api_key");
        set_status(&mut response, "error", format!("No scenario found with api_key: {api_key}"));
        return Ok(response);
      }
      Err(e) => {
        error!(target: "scenario_forge", error = %e, "Error looking up scenario");
        set_status(&mut response, "error", format!("Failed to update scenario: {e}"));
        return Ok(response);
      }
    };

    let update = ScenarioUpdate::from_output(&response);
    let modified = if update.is_empty() {
      Ok(0)
    } else {
      self.store.update_by_api_key(&target, api_key, &update).await
    };
    match modified {
      Ok(0) => {
        set_status(&mut response, "success", "No changes made (data was identical)".into());
        response.insert("modified_count".into(), Value::from(0u64));
      }
      Ok(n) => {
        info!(target: "scenario_forge", id = %existing.id, modified = n, "Scenario updated");
        set_status(&mut response, "success", "Scenario updated successfully".into());
        response.insert("modified_count".into(), Value::from(n));
      }
      Err(e) => {
        error!(target: "scenario_forge", error = %e, "Error updating scenario in database");
        set_status(&mut response, "error", format!("Failed to update scenario: {e}"));
        return Ok(response);
      }
    }
    response.insert("_id".into(), Value::String(existing.id));
    response.insert("api_key".into(), Value::String(api_key.to_string()));
    Ok(response)
  }
}

async fn read_prompt(path: &Path) -> Result<String, ServiceError> {
  tokio::fs::read_to_string(path)
    .await
    .map_err(|source| ServiceError::Prompt { path: path.to_path_buf(), source })
}

/// Flow template from `workflow-path`; no path means an empty object.
async fn load_flow_template(path: Option<&Path>) -> Result<Value, ServiceError> {
  let Some(path) = path else {
    return Ok(Value::Object(Map::new()));
  };
  let fail = |reason: String| ServiceError::FlowTemplate { path: path.to_path_buf(), reason };
  let raw = tokio::fs::read_to_string(path).await.map_err(|e| fail(e.to_string()))?;
  serde_json::from_str(&raw).map_err(|e| fail(e.to_string()))
}

fn set_status(response: &mut Map<String, Value>, status: &str, message: String) {
  response.insert("status".into(), Value::String(status.into()));
  response.insert("message".into(), Value::String(message));
}

fn error_only(message: &str) -> Map<String, Value> {
  let mut response = Map::new();
  set_status(&mut response, "error", message.into());
  response
}
