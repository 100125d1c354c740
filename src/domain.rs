//! Domain models: chat turns, generation settings, and the stored scenario record.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const SCENARIO_NAME: &str = "scenario_name";
pub const SCENARIO_PROMPT: &str = "scenario_prompt";
pub const QUESTIONS_FOR_FEEDBACK: &str = "questions_for_feedback";
pub const DIFFICULTY_STATUS: &str = "difficulty_status";

/// MIME type requested from the generator. Output is free text we parse ourselves.
pub const PLAIN_TEXT_MIME: &str = "text/plain";

/// Who authored a chat turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  User,
  Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
  pub role: Role,
  pub content: String,
}

impl ChatTurn {
  pub fn user(content: impl Into<String>) -> Self {
    Self { role: Role::User, content: content.into() }
  }
}

/// Per-request generation settings derived from the route's prompt file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GenerationSettings {
  pub response_mime_type: String,
  pub system_instruction: String,
}

impl GenerationSettings {
  pub fn plain_text(system_instruction: &str) -> Self {
    Self {
      response_mime_type: PLAIN_TEXT_MIME.to_string(),
      system_instruction: system_instruction.to_string(),
    }
  }
}

/// Scenario document as persisted in the store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioDocument {
  #[serde(default)] pub scenario_name: String,
  #[serde(default)] pub scenario_prompt: String,
  #[serde(default)] pub questions_for_feedback: Vec<String>,
  #[serde(default)] pub difficulty_status: String,
  #[serde(default)] pub api_key: String,
}

impl ScenarioDocument {
  /// Insert document from a generation output. Missing fields default to empty.
  pub fn from_output(output: &Map<String, Value>, api_key: &str) -> Self {
    Self {
      scenario_name: output.get(SCENARIO_NAME).map(text_of).unwrap_or_default(),
      scenario_prompt: output.get(SCENARIO_PROMPT).map(text_of).unwrap_or_default(),
      questions_for_feedback: output.get(QUESTIONS_FOR_FEEDBACK).map(list_of).unwrap_or_default(),
      difficulty_status: output.get(DIFFICULTY_STATUS).map(text_of).unwrap_or_default(),
      api_key: api_key.to_string(),
    }
  }
}

/// A stored scenario together with its database id (string form).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredScenario {
  pub id: String,
  pub doc: ScenarioDocument,
}

/// Partial update: only fields present in the generation output are set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScenarioUpdate {
  pub scenario_name: Option<String>,
  pub scenario_prompt: Option<String>,
  pub questions_for_feedback: Option<Vec<String>>,
  pub difficulty_status: Option<String>,
}

impl ScenarioUpdate {
  pub fn from_output(output: &Map<String, Value>) -> Self {
    Self {
      scenario_name: output.get(SCENARIO_NAME).map(text_of),
      scenario_prompt: output.get(SCENARIO_PROMPT).map(text_of),
      questions_for_feedback: output.get(QUESTIONS_FOR_FEEDBACK).map(list_of),
      difficulty_status: output.get(DIFFICULTY_STATUS).map(text_of),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.scenario_name.is_none()
      && self.scenario_prompt.is_none()
      && self.questions_for_feedback.is_none()
      && self.difficulty_status.is_none()
  }

  /// Apply to a document in place. Returns true if any field actually changed.
  pub fn apply_to(&self, doc: &mut ScenarioDocument) -> bool {
    let mut changed = false;
    changed |= set_if_some(&mut doc.scenario_name, &self.scenario_name);
    changed |= set_if_some(&mut doc.scenario_prompt, &self.scenario_prompt);
    changed |= set_if_some(&mut doc.questions_for_feedback, &self.questions_for_feedback);
    changed |= set_if_some(&mut doc.difficulty_status, &self.difficulty_status);
    changed
  }
}

fn set_if_some<T: Clone + PartialEq>(slot: &mut T, value: &Option<T>) -> bool {
  match value {
    Some(v) if slot != v => {
      *slot = v.clone();
      true
    }
    _ => false,
  }
}

// Models occasionally emit numbers or nested values where we expect text.
fn text_of(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}

fn list_of(value: &Value) -> Vec<String> {
  match value {
    Value::Array(items) => items.iter().map(text_of).collect(),
    Value::Null => Vec::new(),
    other => vec![text_of(other)],
  }
}
