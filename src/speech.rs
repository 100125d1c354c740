//! Deepgram speech client: pre-recorded transcription and text-to-speech.
//!
//! NOTE: we never log the API key; audio payloads are logged by size only.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::util::env_secret;

pub const DEFAULT_BASE_URL: &str = "https://api.deepgram.com/v1";

#[derive(Debug, Error)]
pub enum SpeechError {
  #[error("HTTP error: {0}")]
  Http(#[from] reqwest::Error),
  #[error("Deepgram HTTP {status}: {message}")]
  Api { status: reqwest::StatusCode, message: String },
  #[error("Deepgram response carried no transcript")]
  NoTranscript,
  #[error("failed to write audio artifact: {0}")]
  Artifact(#[from] std::io::Error),
}

#[derive(Clone)]
pub struct Deepgram {
  client: reqwest::Client,
  api_key: String,
  pub base_url: String,
}

impl Deepgram {
  /// Construct the client if we find DEEPGRAM_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = env_secret("DEEPGRAM_API_KEY")?;
    let base_url = std::env::var("DEEPGRAM_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());
    Self::new(api_key, base_url).ok()
  }

  pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, reqwest::Error> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(30))
      .build()?;
    let base_url = base_url.into().trim_end_matches('/').to_string();
    Ok(Self { client, api_key: api_key.into(), base_url })
  }

  /// Transcribe an uploaded audio file; returns the first alternative's transcript.
  #[instrument(level = "info", skip(self, audio), fields(%model, audio_len = audio.len()))]
  pub async fn transcribe(&self, audio: Vec<u8>, mime: Option<&str>, model: &str) -> Result<String, SpeechError> {
    let res = self.client.post(format!("{}/listen", self.base_url))
      .query(&[("model", model)])
      .header(USER_AGENT, "scenario-forge/0.1")
      .header(AUTHORIZATION, format!("Token {}", self.api_key))
      .header(CONTENT_TYPE, mime.unwrap_or("application/octet-stream"))
      .body(audio)
      .send().await?;
    let res = ensure_success(res).await?;

    let body: ListenResponse = res.json().await?;
    let transcript = body
      .results
      .channels
      .into_iter()
      .next()
      .and_then(|c| c.alternatives.into_iter().next())
      .map(|a| a.transcript)
      .ok_or(SpeechError::NoTranscript)?;
    info!(transcript_len = transcript.len(), "Transcription received");
    Ok(transcript)
  }

  /// Synthesize `text` to MP3 bytes.
  #[instrument(level = "info", skip(self, text), fields(%model, text_len = text.len()))]
  pub async fn synthesize(&self, text: &str, model: &str) -> Result<Vec<u8>, SpeechError> {
    let res = self.client.post(format!("{}/speak", self.base_url))
      .query(&[("model", model)])
      .header(USER_AGENT, "scenario-forge/0.1")
      .header(AUTHORIZATION, format!("Token {}", self.api_key))
      .json(&SpeakIn { text })
      .send().await?;
    let res = ensure_success(res).await?;
    let audio = res.bytes().await?.to_vec();
    info!(audio_len = audio.len(), "Synthesis received");
    Ok(audio)
  }
}

async fn ensure_success(res: reqwest::Response) -> Result<reqwest::Response, SpeechError> {
  let status = res.status();
  if status.is_success() {
    return Ok(res);
  }
  let body = res.text().await.unwrap_or_default();
  let message = extract_deepgram_error(&body).unwrap_or(body);
  Err(SpeechError::Api { status, message })
}

/// Write synthesized audio under a per-request name. Returns (file name, path).
pub async fn write_artifact(dir: &Path, audio: &[u8]) -> Result<(String, PathBuf), SpeechError> {
  tokio::fs::create_dir_all(dir).await?;
  let file_name = format!("{}.mp3", Uuid::new_v4());
  let path = dir.join(&file_name);
  tokio::fs::write(&path, audio).await?;
  Ok((file_name, path))
}

// --- Deepgram DTOs ---

#[derive(Serialize)]
struct SpeakIn<'a> { text: &'a str }

#[derive(Deserialize)]
struct ListenResponse { results: ListenResults }
#[derive(Deserialize)]
struct ListenResults { #[serde(default)] channels: Vec<Channel> }
#[derive(Deserialize)]
struct Channel { #[serde(default)] alternatives: Vec<Alternative> }
#[derive(Deserialize)]
struct Alternative { #[serde(default)] transcript: String }

fn extract_deepgram_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EObj {
    #[serde(default)] err_msg: Option<String>,
    #[serde(default)] reason: Option<String>,
  }
  let e = serde_json::from_str::<EObj>(body).ok()?;
  e.err_msg.or(e.reason)
}
