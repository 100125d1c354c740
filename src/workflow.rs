//! Client for the external workflow-management API (flows and their agents).
//!
//! Enabled only when `VOXIO_API_KEY` is present. Every call authenticates with the
//! `x-api-key` header. Endpoints used:
//!   POST /add-flow   -> `{ "api_key": "..." }` assigned to the new flow
//!   GET  /flow       ?api_key=...
//!   GET  /agent      ?api_key=...
//!   PUT  /edit-flow

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::util::env_secret;

pub const DEFAULT_BASE_URL: &str = "https://api.voxio.ai";
const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug, Error)]
pub enum WorkflowError {
  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),
  #[error("workflow API HTTP {status}: {body}")]
  Status { status: StatusCode, body: String },
}

#[derive(Clone)]
pub struct WorkflowClient {
  client: reqwest::Client,
  api_key: String,
  pub base_url: String,
}

#[derive(Deserialize)]
struct AddFlowOut {
  api_key: String,
}

impl WorkflowClient {
  /// Construct the client if we find VOXIO_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = env_secret("VOXIO_API_KEY")?;
    let base_url = std::env::var("VOXIO_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
    Self::new(api_key, base_url).ok()
  }

  pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()?;
    let base_url = base_url.into().trim_end_matches('/').to_string();
    Ok(Self { client, api_key: api_key.into(), base_url })
  }

  fn request(&self, method: reqwest::Method, endpoint: &str) -> reqwest::RequestBuilder {
    self.client
      .request(method, format!("{}{}", self.base_url, endpoint))
      .header(USER_AGENT, "scenario-forge/0.1")
      .header(API_KEY_HEADER, &self.api_key)
  }

  /// Create a flow and return the key the service assigned to it.
  #[instrument(level = "info", skip(self, flow))]
  pub async fn add_flow(&self, flow: &Value) -> Result<String, WorkflowError> {
    let res = self.request(reqwest::Method::POST, "/add-flow")
      .header(CONTENT_TYPE, "application/json")
      .json(flow).send().await?;
    let res = ensure_success(res).await?;
    let out: AddFlowOut = res.json().await?;
    debug!("Flow created");
    Ok(out.api_key)
  }

  #[instrument(level = "info", skip(self, api_key))]
  pub async fn get_flow(&self, api_key: &str) -> Result<Value, WorkflowError> {
    self.get_by_key("/flow", api_key).await
  }

  #[instrument(level = "info", skip(self, api_key))]
  pub async fn get_agent(&self, api_key: &str) -> Result<Value, WorkflowError> {
    self.get_by_key("/agent", api_key).await
  }

  /// Push updated flow content. The status is returned as-is; callers decide what to gate.
  #[instrument(level = "info", skip(self, flow))]
  pub async fn edit_flow(&self, flow: &Value) -> Result<StatusCode, WorkflowError> {
    let res = self.request(reqwest::Method::PUT, "/edit-flow")
      .header(CONTENT_TYPE, "application/json")
      .json(flow).send().await?;
    let status = res.status();
    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      debug!(%status, body_len = body.len(), "edit-flow rejected");
    }
    Ok(status)
  }

  async fn get_by_key(&self, endpoint: &str, api_key: &str) -> Result<Value, WorkflowError> {
    let res = self.request(reqwest::Method::GET, endpoint)
      .query(&[("api_key", api_key)])
      .send().await?;
    let res = ensure_success(res).await?;
    Ok(res.json().await?)
  }
}

async fn ensure_success(res: reqwest::Response) -> Result<reqwest::Response, WorkflowError> {
  let status = res.status();
  if status.is_success() {
    return Ok(res);
  }
  let body = res.text().await.unwrap_or_default();
  Err(WorkflowError::Status { status, body })
}

/// Flow body: the template object with generated fields merged over it, and the
/// flow's key when editing.
pub fn compose_flow(template: Value, fields: &Map<String, Value>, api_key: Option<&str>) -> Value {
  let mut flow = match template {
    Value::Object(map) => map,
    _ => Map::new(),
  };
  for (k, v) in fields {
    flow.insert(k.clone(), v.clone());
  }
  if let Some(key) = api_key {
    flow.insert("api_key".into(), Value::String(key.into()));
  }
  Value::Object(flow)
}
