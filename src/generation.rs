//! Structured generation: request building, the text-generator seam, and the
//! two-attempt run-and-parse routine.
//!
//! Contract of [`run_structured`]:
//!   1. stream the generator output and concatenate non-empty chunks
//!   2. strip `json` markers and backticks, trim
//!   3. decode into a mapping (strict JSON, then literal grammar)
//!   4. on decode failure, run the same request exactly once more
//!   5. second decode failure -> fixed "server" mapping
//!   6. any generator error -> fixed "AI" mapping, without retrying

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
  ChatTurn, GenerationSettings, DIFFICULTY_STATUS, QUESTIONS_FOR_FEEDBACK, SCENARIO_NAME,
  SCENARIO_PROMPT,
};
use crate::literal::parse_mapping;
use crate::util::trunc_for_log;

pub const SERVER_ERROR_NAME: &str = "Error from Server";
pub const SERVER_ERROR_PROMPT: &str =
  "Sorry we were having some issues with the server. Please try again later.";
pub const AI_ERROR_NAME: &str = "Error from AI";
pub const AI_ERROR_PROMPT: &str =
  "Sorry we were having some issues with the AI. Please try again later.";
const FALLBACK_DIFFICULTY: &str = "easy";

/// Text chunks in arrival order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, GenerationError>> + Send>>;

#[derive(Debug, Error)]
pub enum GenerationError {
  #[error("generator unavailable: {0}")]
  Unavailable(String),
  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),
  #[error("{provider} HTTP {status}: {message}")]
  Api {
    provider: &'static str,
    status: reqwest::StatusCode,
    message: String,
  },
  #[error("stream error: {0}")]
  Stream(String),
}

/// Anything that can stream text for a chat-turn list.
#[async_trait]
pub trait TextGenerator: Send + Sync {
  async fn generate_stream(
    &self,
    model: &str,
    turns: &[ChatTurn],
    settings: &GenerationSettings,
  ) -> Result<TextStream, GenerationError>;
}

/// Stand-in used when no generator credentials are configured. Every call fails,
/// which the runner turns into the AI fallback.
pub struct UnavailableGenerator {
  reason: String,
}

impl UnavailableGenerator {
  pub fn new(reason: impl Into<String>) -> Self {
    Self { reason: reason.into() }
  }
}

#[async_trait]
impl TextGenerator for UnavailableGenerator {
  async fn generate_stream(
    &self,
    _model: &str,
    _turns: &[ChatTurn],
    _settings: &GenerationSettings,
  ) -> Result<TextStream, GenerationError> {
    Err(GenerationError::Unavailable(self.reason.clone()))
  }
}

/// One user turn carrying `query`, plus plain-text settings carrying `system_prompt` verbatim.
pub fn build_request(system_prompt: &str, query: &str) -> (Vec<ChatTurn>, GenerationSettings) {
  (vec![ChatTurn::user(query)], GenerationSettings::plain_text(system_prompt))
}

/// Remove every `json` substring and every backtick, then trim.
pub fn clean_output(raw: &str) -> String {
  raw.replace("json", "").replace('`', "").trim().to_string()
}

/// Which path the runner took.
#[derive(Clone, Debug, PartialEq)]
pub enum StructuredOutput {
  Parsed(Map<String, Value>),
  ServerFallback,
  AiFallback,
}

impl StructuredOutput {
  pub fn origin(&self) -> &'static str {
    match self {
      StructuredOutput::Parsed(_) => "parsed",
      StructuredOutput::ServerFallback => "server_fallback",
      StructuredOutput::AiFallback => "ai_fallback",
    }
  }

  pub fn into_fields(self) -> Map<String, Value> {
    match self {
      StructuredOutput::Parsed(map) => map,
      StructuredOutput::ServerFallback => fallback_fields(SERVER_ERROR_NAME, SERVER_ERROR_PROMPT),
      StructuredOutput::AiFallback => fallback_fields(AI_ERROR_NAME, AI_ERROR_PROMPT),
    }
  }
}

fn fallback_fields(name: &str, prompt: &str) -> Map<String, Value> {
  let mut map = Map::new();
  map.insert(SCENARIO_NAME.into(), Value::String(name.into()));
  map.insert(SCENARIO_PROMPT.into(), Value::String(prompt.into()));
  map.insert(QUESTIONS_FOR_FEEDBACK.into(), Value::Array(Vec::new()));
  map.insert(DIFFICULTY_STATUS.into(), Value::String(FALLBACK_DIFFICULTY.into()));
  map
}

async fn collect_text(
  generator: &dyn TextGenerator,
  model: &str,
  turns: &[ChatTurn],
  settings: &GenerationSettings,
) -> Result<String, GenerationError> {
  let mut stream = generator.generate_stream(model, turns, settings).await?;
  let mut out = String::new();
  while let Some(chunk) = stream.next().await {
    let chunk = chunk?;
    if !chunk.is_empty() {
      out.push_str(&chunk);
    }
  }
  Ok(out)
}

#[instrument(level = "info", skip(generator, turns, settings), fields(%model, turns = turns.len()))]
pub async fn run_structured(
  generator: &dyn TextGenerator,
  turns: &[ChatTurn],
  settings: &GenerationSettings,
  model: &str,
) -> StructuredOutput {
  let first = match collect_text(generator, model, turns, settings).await {
    Ok(text) => text,
    Err(e) => {
      error!(target: "generation", error = %e, "Generator call failed; returning AI fallback");
      return StructuredOutput::AiFallback;
    }
  };

  match parse_mapping(&clean_output(&first)) {
    Ok(map) => {
      info!(target: "generation", fields = map.len(), output_len = first.len(), "Model output parsed");
      return StructuredOutput::Parsed(map);
    }
    Err(e) => {
      warn!(target: "generation", error = %e, output = %trunc_for_log(&first, 300), "Model output did not parse; retrying once");
    }
  }

  let second = match collect_text(generator, model, turns, settings).await {
    Ok(text) => text,
    Err(e) => {
      error!(target: "generation", error = %e, "Generator retry failed; returning AI fallback");
      return StructuredOutput::AiFallback;
    }
  };
  info!(target: "generation", output_len = second.len(), "Retry output received");
  debug!(target: "generation", output = %second, "Retry output");

  match parse_mapping(&clean_output(&second)) {
    Ok(map) => StructuredOutput::Parsed(map),
    Err(e) => {
      error!(target: "generation", error = %e, "Retry output did not parse; returning server fallback");
      StructuredOutput::ServerFallback
    }
  }
}
