//! HTTP endpoint handlers. These are thin wrappers that forward to the scenario
//! service or the speech client; each handler is instrumented.

use std::borrow::Cow;
use std::sync::Arc;

use axum::{
  body::Bytes,
  extract::{Form, Multipart, Query, State},
  http::{header, StatusCode},
  response::{IntoResponse, Response},
  Json,
};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::config::ApiKeySource;
use crate::protocol::*;
use crate::routes::error::ApiError;
use crate::speech::write_artifact;
use crate::state::AppState;

const MISSING_PROMPT: &str = "Missing 'scenario_prompt' in request body.";
const MISSING_EDIT_FIELDS: &str = "Missing 'api_key' or 'scenario_prompt' in request body.";

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

/// Parse a body as a JSON object; anything else is treated as an empty one.
fn json_object(body: &[u8]) -> Map<String, Value> {
  match serde_json::from_slice::<Value>(body) {
    Ok(Value::Object(map)) => map,
    _ => Map::new(),
  }
}

/// Presence is all that is checked. Strings pass through as-is (even empty);
/// other JSON values are used in their JSON text form.
fn field_text<'a>(body: &'a Map<String, Value>, key: &str) -> Option<Cow<'a, str>> {
  body.get(key).map(|v| match v {
    Value::String(s) => Cow::Borrowed(s.as_str()),
    other => Cow::Owned(other.to_string()),
  })
}

#[instrument(level = "info", skip(state, body), fields(body_len = body.len()))]
pub async fn http_add_scenario(
  State(state): State<Arc<AppState>>,
  body: Bytes,
) -> Result<Json<ScenarioOut>, ApiError> {
  let body = json_object(&body);
  let query = field_text(&body, "scenario_prompt").ok_or_else(|| ApiError::BadRequest(MISSING_PROMPT.into()))?;

  let response = state.service.add_scenario(&query, &state.settings.add_scenario).await?;
  info!(target: "scenario_forge", status = ?response.get("status"), "HTTP add-scenario served");
  Ok(Json(ScenarioOut { response }))
}

#[instrument(level = "info", skip(state, body), fields(body_len = body.len()))]
pub async fn http_edit_scenario(
  State(state): State<Arc<AppState>>,
  body: Bytes,
) -> Result<Json<ScenarioOut>, ApiError> {
  let body = json_object(&body);
  let route = &state.settings.edit_scenario;
  let api_key = match route.api_key_source {
    ApiKeySource::Request => field_text(&body, "api_key"),
    ApiKeySource::Environment => state.legacy_edit_key.as_deref().filter(|s| !s.is_empty()).map(Cow::Borrowed),
  };
  let (Some(api_key), Some(query)) = (api_key, field_text(&body, "scenario_prompt")) else {
    return Err(ApiError::BadRequest(MISSING_EDIT_FIELDS.into()));
  };

  let response = state.service.edit_scenario(&query, &api_key, route).await?;
  info!(target: "scenario_forge", status = ?response.get("status"), "HTTP edit-scenario served");
  Ok(Json(ScenarioOut { response }))
}

/// Multipart upload with a `file` part -> transcript as a JSON string.
#[instrument(level = "info", skip(state, multipart))]
pub async fn http_post_stt(
  State(state): State<Arc<AppState>>,
  mut multipart: Multipart,
) -> Result<Json<String>, ApiError> {
  let speech = state.speech.as_ref().ok_or(ApiError::SpeechDisabled)?;

  let mut upload = None;
  while let Some(field) = multipart.next_field().await.map_err(|e| ApiError::BadRequest(e.body_text()))? {
    if field.name() == Some("file") {
      let mime = field.content_type().map(str::to_owned);
      let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.body_text()))?;
      upload = Some((bytes, mime));
      break;
    }
  }
  let (audio, mime) = upload.ok_or_else(|| ApiError::BadRequest("Missing 'file' in multipart body.".into()))?;

  let transcript = speech.transcribe(audio.to_vec(), mime.as_deref(), &state.settings.speech.stt_model).await?;
  Ok(Json(transcript))
}

/// `text` from the query string, or from a urlencoded form body.
#[instrument(level = "info", skip_all)]
pub async fn http_post_tts(
  State(state): State<Arc<AppState>>,
  Query(q): Query<TtsIn>,
  form: Option<Form<TtsIn>>,
) -> Result<Response, ApiError> {
  let text = q
    .text
    .or_else(|| form.and_then(|Form(f)| f.text))
    .filter(|t| !t.is_empty())
    .ok_or_else(|| ApiError::BadRequest("Missing 'text' parameter.".into()))?;
  let speech = state.speech.as_ref().ok_or(ApiError::SpeechDisabled)?;
  let settings = &state.settings.speech;

  let audio = speech.synthesize(&text, &settings.tts_model).await?;
  let (file_name, path) = write_artifact(&settings.output_dir, &audio).await?;
  let body = tokio::fs::read(&path).await.map_err(crate::speech::SpeechError::from)?;
  if !settings.keep_audio {
    if let Err(e) = tokio::fs::remove_file(&path).await {
      warn!(target: "scenario_forge", path = %path.display(), error = %e, "Failed to remove audio artifact");
    }
  }
  info!(target: "scenario_forge", %file_name, audio_len = body.len(), "HTTP tts served");

  Ok((
    StatusCode::OK,
    [
      (header::CONTENT_TYPE, "audio/mpeg".to_string()),
      (header::CONTENT_DISPOSITION, format!("attachment; filename=\"{file_name}\"")),
    ],
    body,
  )
    .into_response())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{CorsSettings, Settings};
  use crate::generation::testing::{Reply, ScriptedGenerator};
  use crate::routes::build_router;
  use crate::service::ScenarioService;
  use crate::speech::Deepgram;
  use crate::store::MemoryStore;
  use axum::{body::Body, http::Request, Router};
  use serde_json::json;
  use std::io::Write;
  use tower::ServiceExt;
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  const FENCED: &str = "```json\n{\"scenario_name\": \"Mock Interview\", \"scenario_prompt\": \"You are interviewing...\", \
    \"questions_for_feedback\": [\"How did it go?\"], \"difficulty_status\": \"medium\"}\n```";

  struct Harness {
    _prompt: tempfile::NamedTempFile,
    audio_dir: tempfile::TempDir,
    settings: Settings,
  }

  impl Harness {
    fn new() -> Self {
      let mut prompt = tempfile::NamedTempFile::new().unwrap();
      write!(prompt, "Return a scenario as JSON.").unwrap();
      let audio_dir = tempfile::tempdir().unwrap();
      let mut settings = Settings::default();
      settings.add_scenario.prompt_path = prompt.path().to_path_buf();
      settings.edit_scenario.prompt_path = prompt.path().to_path_buf();
      settings.speech.output_dir = audio_dir.path().to_path_buf();
      Self { _prompt: prompt, audio_dir, settings }
    }

    fn app(&self, generator: ScriptedGenerator, speech: Option<Deepgram>, legacy_key: Option<&str>) -> Router {
      let service = ScenarioService::new(Arc::new(generator), Arc::new(MemoryStore::new()), None);
      let state = AppState::new(self.settings.clone(), service, speech, legacy_key.map(str::to_string));
      let cors = CorsSettings {
        allowed_origins: vec!["*".into()],
        allow_credentials: true,
        allowed_methods: vec!["*".into()],
        allowed_headers: vec!["*".into()],
      };
      build_router(Arc::new(state), &cors)
    }
  }

  fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
      .method("POST")
      .uri(uri)
      .header("content-type", "application/json")
      .body(Body::from(body.to_string()))
      .unwrap()
  }

  async fn read_json(res: Response) -> Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
  }

  #[tokio::test]
  async fn health_reports_ok() {
    let h = Harness::new();
    let res = h
      .app(ScriptedGenerator::new(vec![]), None, None)
      .oneshot(Request::get("/health").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(read_json(res).await, json!({ "ok": true }));
  }

  #[tokio::test]
  async fn add_scenario_requires_prompt() {
    let h = Harness::new();
    for body in [r#"{}"#, r#"{"prompt": "x"}"#, "not json", r#"["scenario_prompt"]"#] {
      let generator = ScriptedGenerator::new(vec![]);
      let res = h.app(generator, None, None).oneshot(post_json("/add-scenario", body)).await.unwrap();
      assert_eq!(res.status(), StatusCode::BAD_REQUEST, "body: {body}");
      assert_eq!(read_json(res).await, json!({ "detail": MISSING_PROMPT }));
    }
  }

  #[tokio::test]
  async fn add_scenario_accepts_empty_and_non_string_prompts() {
    let h = Harness::new();
    for body in [r#"{"scenario_prompt": ""}"#, r#"{"scenario_prompt": 42}"#] {
      let res = h
        .app(ScriptedGenerator::always(FENCED, 1), None, None)
        .oneshot(post_json("/add-scenario", body))
        .await
        .unwrap();
      assert_eq!(res.status(), StatusCode::OK, "body: {body}");
      assert_eq!(read_json(res).await["response"]["status"], json!("success"));
    }
  }

  #[test]
  fn field_text_keeps_strings_and_stringifies_other_values() {
    let body = json!({ "a": "", "b": 42, "c": null, "d": ["x"] });
    let body = body.as_object().unwrap();
    assert_eq!(field_text(body, "a").as_deref(), Some(""));
    assert_eq!(field_text(body, "b").as_deref(), Some("42"));
    assert_eq!(field_text(body, "c").as_deref(), Some("null"));
    assert_eq!(field_text(body, "d").as_deref(), Some(r#"["x"]"#));
    assert_eq!(field_text(body, "missing"), None);
  }

  #[tokio::test]
  async fn add_scenario_returns_generated_fields_from_fenced_output() {
    let h = Harness::new();
    let res = h
      .app(ScriptedGenerator::always(FENCED, 1), None, None)
      .oneshot(post_json("/add-scenario", r#"{"scenario_prompt": "a job interview"}"#))
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body = read_json(res).await;
    let response = &body["response"];
    assert_eq!(response["scenario_name"], json!("Mock Interview"));
    assert_eq!(response["scenario_prompt"], json!("You are interviewing..."));
    assert_eq!(response["questions_for_feedback"], json!(["How did it go?"]));
    assert_eq!(response["difficulty_status"], json!("medium"));
    assert_eq!(response["api_key"], json!("rew"));
    assert_eq!(response["status"], json!("success"));
    assert!(!response["_id"].as_str().unwrap().is_empty());
  }

  #[tokio::test]
  async fn add_scenario_with_unreadable_prompt_is_500() {
    let mut h = Harness::new();
    h.settings.add_scenario.prompt_path = "/missing/prompt.txt".into();
    let res = h
      .app(ScriptedGenerator::new(vec![]), None, None)
      .oneshot(post_json("/add-scenario", r#"{"scenario_prompt": "x"}"#))
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(read_json(res).await["detail"].as_str().unwrap().contains("/missing/prompt.txt"));
  }

  #[tokio::test]
  async fn edit_scenario_requires_key_and_prompt() {
    let h = Harness::new();
    let res = h
      .app(ScriptedGenerator::new(vec![]), None, None)
      .oneshot(post_json("/edit-scenario", r#"{"scenario_prompt": "harder"}"#))
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(res).await, json!({ "detail": MISSING_EDIT_FIELDS }));
  }

  #[tokio::test]
  async fn edit_scenario_with_unknown_key_reports_in_band() {
    let h = Harness::new();
    let res = h
      .app(ScriptedGenerator::new(vec![Reply::Fail]), None, None)
      .oneshot(post_json("/edit-scenario", r#"{"api_key": "nope", "scenario_prompt": "harder"}"#))
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = read_json(res).await;
    assert_eq!(body["response"]["status"], json!("error"));
    assert_eq!(body["response"]["message"], json!("No scenario found with api_key: nope"));
  }

  #[tokio::test]
  async fn edit_scenario_can_read_key_from_environment() {
    let mut h = Harness::new();
    h.settings.edit_scenario.api_key_source = ApiKeySource::Environment;
    let res = h
      .app(ScriptedGenerator::new(vec![Reply::Fail]), None, Some("legacy-key"))
      .oneshot(post_json("/edit-scenario", r#"{"api_key": "ignored", "scenario_prompt": "harder"}"#))
      .await
      .unwrap();
    let body = read_json(res).await;
    assert_eq!(body["response"]["message"], json!("No scenario found with api_key: legacy-key"));
  }

  fn multipart_request(field: &str, payload: &[u8]) -> Request<Body> {
    let boundary = "XBOUNDARYX";
    let mut body = Vec::new();
    body.extend_from_slice(
      format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"clip.wav\"\r\nContent-Type: audio/wav\r\n\r\n"
      )
      .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    Request::builder()
      .method("POST")
      .uri("/stt")
      .header("content-type", format!("multipart/form-data; boundary={boundary}"))
      .body(Body::from(body))
      .unwrap()
  }

  #[tokio::test]
  async fn stt_without_speech_client_is_503() {
    let h = Harness::new();
    let res = h
      .app(ScriptedGenerator::new(vec![]), None, None)
      .oneshot(multipart_request("file", b"RIFF"))
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
  }

  #[tokio::test]
  async fn stt_transcribes_file_part_and_rejects_missing_file() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/listen"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "results": { "channels": [{ "alternatives": [{ "transcript": "good morning" }] }] }
      })))
      .mount(&server)
      .await;
    let h = Harness::new();
    let speech = || Some(Deepgram::new("dg", server.uri()).unwrap());

    let res = h.app(ScriptedGenerator::new(vec![]), speech(), None).oneshot(multipart_request("file", b"RIFF")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(read_json(res).await, json!("good morning"));

    let res = h.app(ScriptedGenerator::new(vec![]), speech(), None).oneshot(multipart_request("other", b"RIFF")).await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn tts_requires_text() {
    let h = Harness::new();
    let res = h
      .app(ScriptedGenerator::new(vec![]), None, None)
      .oneshot(Request::post("/tts").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
  }

  #[tokio::test]
  async fn tts_returns_mp3_attachment_and_removes_artifact() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/speak"))
      .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xFB, 0x90, 0x00]))
      .mount(&server)
      .await;
    let h = Harness::new();
    let speech = Some(Deepgram::new("dg", server.uri()).unwrap());

    let res = h
      .app(ScriptedGenerator::new(vec![]), speech, None)
      .oneshot(Request::post("/tts?text=hello%20there").body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()[header::CONTENT_TYPE], "audio/mpeg");
    let disposition = res.headers()[header::CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.starts_with("attachment; filename=\"") && disposition.ends_with(".mp3\""));

    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    assert_eq!(bytes.as_ref(), &[0xFF, 0xFB, 0x90, 0x00]);
    assert_eq!(std::fs::read_dir(h.audio_dir.path()).unwrap().count(), 0);
  }
}
