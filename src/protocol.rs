//! Public HTTP request/response structs (serde ready).
//!
//! Scenario bodies are parsed leniently (see `routes::http`), so only the
//! response side and the query/form inputs are typed here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Envelope for both scenario routes.
#[derive(Debug, Serialize)]
pub struct ScenarioOut {
    pub response: Map<String, Value>,
}

/// Error body: `{ "detail": "..." }`.
#[derive(Debug, Serialize)]
pub struct ErrorOut {
    pub detail: String,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct TtsIn {
    pub text: Option<String>,
}
