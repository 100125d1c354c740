//! Minimal Gemini client for streamed text generation.
//!
//! We call `models/{model}:streamGenerateContent?alt=sse` and yield the text parts of
//! each SSE event as they arrive. Calls are instrumented with model names and status
//! codes only.
//!
//! NOTE: the API key travels in the `x-goog-api-key` header, never in the URL, so it
//! cannot leak through request logs.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::domain::{ChatTurn, GenerationSettings, Role};
use crate::generation::{GenerationError, TextGenerator, TextStream};
use crate::util::env_secret;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone)]
pub struct Gemini {
  pub client: reqwest::Client,
  api_key: String,
  pub base_url: String,
}

impl Gemini {
  /// Construct the client if we find GEMINI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = env_secret("GEMINI_API_KEY")?;
    let base_url = std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
    Self::new(api_key, base_url).ok()
  }

  pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(60))
      .build()?;
    let base_url = base_url.into().trim_end_matches('/').to_string();
    Ok(Self { client, api_key: api_key.into(), base_url })
  }
}

#[async_trait]
impl TextGenerator for Gemini {
  #[instrument(level = "info", skip(self, turns, settings), fields(%model, turns = turns.len()))]
  async fn generate_stream(
    &self,
    model: &str,
    turns: &[ChatTurn],
    settings: &GenerationSettings,
  ) -> Result<TextStream, GenerationError> {
    let url = format!("{}/models/{}:streamGenerateContent", self.base_url, model);
    let req = GenerateContentRequest::new(turns, settings);

    let res = self.client.post(&url)
      .query(&[("alt", "sse")])
      .header(USER_AGENT, "scenario-forge/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header("x-goog-api-key", &self.api_key)
      .json(&req).send().await?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let message = extract_gemini_error(&body).unwrap_or(body);
      return Err(GenerationError::Api { provider: "Gemini", status, message });
    }
    debug!(status = %res.status(), "Gemini stream opened");

    let stream = res.bytes_stream().eventsource().filter_map(|event| async move {
      match event {
        Ok(event) => parse_sse_data(&event.data).transpose(),
        Err(e) => Some(Err(GenerationError::Stream(e.to_string()))),
      }
    });
    Ok(Box::pin(stream))
  }
}

/// Text carried by one SSE `data:` payload, if any.
pub fn parse_sse_data(data: &str) -> Result<Option<String>, GenerationError> {
  let data = data.trim();
  if data.is_empty() || data == "[DONE]" {
    return Ok(None);
  }
  let chunk: StreamChunk = serde_json::from_str(data)
    .map_err(|e| GenerationError::Stream(format!("invalid Gemini event: {e}")))?;
  if let Some(err) = chunk.error {
    return Err(GenerationError::Stream(err.message));
  }
  let text: String = chunk
    .candidates
    .into_iter()
    .next()
    .and_then(|c| c.content)
    .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
    .unwrap_or_default();
  Ok(if text.is_empty() { None } else { Some(text) })
}

// --- Wire DTOs ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
  contents: Vec<Content<'a>>,
  system_instruction: Content<'a>,
  generation_config: GenerationConfig<'a>,
}

impl<'a> GenerateContentRequest<'a> {
  fn new(turns: &'a [ChatTurn], settings: &'a GenerationSettings) -> Self {
    let contents = turns
      .iter()
      .map(|t| Content {
        role: Some(match t.role {
          Role::User => "user",
          Role::Assistant => "model",
        }),
        parts: vec![Part { text: &t.content }],
      })
      .collect();
    Self {
      contents,
      system_instruction: Content { role: None, parts: vec![Part { text: &settings.system_instruction }] },
      generation_config: GenerationConfig { response_mime_type: &settings.response_mime_type },
    }
  }
}

#[derive(Serialize)]
struct Content<'a> {
  #[serde(skip_serializing_if = "Option::is_none")]
  role: Option<&'static str>,
  parts: Vec<Part<'a>>,
}
#[derive(Serialize)]
struct Part<'a> { text: &'a str }
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> { response_mime_type: &'a str }

#[derive(Deserialize)]
struct StreamChunk {
  #[serde(default)] candidates: Vec<Candidate>,
  #[serde(default)] error: Option<ErrorObj>,
}
#[derive(Deserialize)]
struct Candidate { #[serde(default)] content: Option<CandidateContent> }
#[derive(Deserialize)]
struct CandidateContent { #[serde(default)] parts: Vec<CandidatePart> }
#[derive(Deserialize)]
struct CandidatePart { #[serde(default)] text: Option<String> }
#[derive(Deserialize)]
struct ErrorObj { message: String }

/// Try to extract a clean error message from a Gemini error body.
fn extract_gemini_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: ErrorObj }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::generation::{build_request, run_structured, StructuredOutput};
  use serde_json::json;
  use wiremock::matchers::{body_partial_json, header, method, path, query_param};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn sse(events: &[serde_json::Value]) -> String {
    events.iter().map(|e| format!("data: {e}\n\n")).collect()
  }

  fn text_event(text: &str) -> serde_json::Value {
    json!({ "candidates": [{ "content": { "role": "model", "parts": [{ "text": text }] } }] })
  }

  #[test]
  fn parse_sse_data_extracts_text_and_skips_empty_events() {
    let data = text_event("Hello").to_string();
    assert_eq!(parse_sse_data(&data).unwrap().as_deref(), Some("Hello"));
    assert_eq!(parse_sse_data("").unwrap(), None);
    assert_eq!(parse_sse_data(r#"{"candidates": []}"#).unwrap(), None);
    assert!(parse_sse_data(r#"{"error": {"message": "quota"}}"#).is_err());
    assert!(parse_sse_data("not json").is_err());
  }

  #[test]
  fn request_maps_roles_and_system_instruction() {
    let (turns, settings) = build_request("SYS", "hello");
    let body = serde_json::to_value(GenerateContentRequest::new(&turns, &settings)).unwrap();
    assert_eq!(
      body,
      json!({
        "contents": [{ "role": "user", "parts": [{ "text": "hello" }] }],
        "systemInstruction": { "parts": [{ "text": "SYS" }] },
        "generationConfig": { "responseMimeType": "text/plain" }
      })
    );
  }

  #[tokio::test]
  async fn streamed_chunks_feed_the_runner() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/models/test-model:streamGenerateContent"))
      .and(query_param("alt", "sse"))
      .and(header("x-goog-api-key", "secret"))
      .and(body_partial_json(json!({ "contents": [{ "role": "user", "parts": [{ "text": "a job interview" }] }] })))
      .respond_with(
        ResponseTemplate::new(200)
          .insert_header("content-type", "text/event-stream")
          .set_body_string(sse(&[
            text_event("```json\n{\"scenario_name\": \"Mock Interview\", "),
            text_event("\"difficulty_status\": \"medium\"}\n```"),
          ])),
      )
      .expect(1)
      .mount(&server)
      .await;

    let gemini = Gemini::new("secret", server.uri()).unwrap();
    let (turns, settings) = build_request("Return JSON.", "a job interview");
    let out = run_structured(&gemini, &turns, &settings, "test-model").await;

    match out {
      StructuredOutput::Parsed(map) => {
        assert_eq!(map["scenario_name"], json!("Mock Interview"));
        assert_eq!(map["difficulty_status"], json!("medium"));
      }
      other => panic!("expected parsed output, got {other:?}"),
    }
  }

  #[tokio::test]
  async fn http_error_is_reported_with_provider_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "error": { "message": "API key not valid" } })))
      .mount(&server)
      .await;

    let gemini = Gemini::new("bad", server.uri()).unwrap();
    let (turns, settings) = build_request("sys", "q");
    let err = match gemini.generate_stream("m", &turns, &settings).await {
      Ok(_) => panic!("expected an error"),
      Err(e) => e,
    };
    match err {
      GenerationError::Api { status, message, .. } => {
        assert_eq!(status.as_u16(), 403);
        assert_eq!(message, "API key not valid");
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }
}
