//! Settings: TOML file (per-route generation/storage settings, speech, logger)
//! plus CORS policy from the environment.
//!
//! See `Settings` for the expected schema. Keys are kebab-case:
//!
//! ```toml
//! [logger]
//! format = "pretty"
//!
//! [add-scenario]
//! model = "gemini-2.0-flash"
//! prompt-path = "prompts/add_scenario.txt"
//! database-name = "scenarios"
//! collection-name = "scenarios"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{error, info};

use crate::store::CollectionRef;
use crate::util::{env_bool, env_list};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_DATABASE: &str = "scenarios";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
  #[serde(default)]
  pub logger: LoggerSettings,
  #[serde(default = "RouteSettings::add_scenario")]
  pub add_scenario: RouteSettings,
  #[serde(default = "RouteSettings::edit_scenario")]
  pub edit_scenario: RouteSettings,
  #[serde(default)]
  pub speech: SpeechSettings,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      logger: LoggerSettings::default(),
      add_scenario: RouteSettings::add_scenario(),
      edit_scenario: RouteSettings::edit_scenario(),
      speech: SpeechSettings::default(),
    }
  }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
  #[default]
  Pretty,
  Json,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoggerSettings {
  #[serde(default)]
  pub format: LogFormat,
  #[serde(default = "default_true")]
  pub ansi: bool,
  /// EnvFilter directives; LOG_LEVEL wins when set.
  #[serde(default)]
  pub level: Option<String>,
}

impl Default for LoggerSettings {
  fn default() -> Self {
    Self { format: LogFormat::Pretty, ansi: true, level: None }
  }
}

/// Where `/edit-scenario` takes the lookup key from.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeySource {
  /// The request body's `api_key`.
  #[default]
  Request,
  /// The `api_key` environment variable (legacy deployments).
  Environment,
}

/// Per-route generation and storage settings.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RouteSettings {
  #[serde(default = "default_model")]
  pub model: String,
  pub prompt_path: PathBuf,
  #[serde(default = "default_database")]
  pub database_name: String,
  #[serde(default = "default_database")]
  pub collection_name: String,
  /// JSON template for the workflow flow body (workflow variant only).
  #[serde(default)]
  pub workflow_path: Option<PathBuf>,
  /// Key assigned to new records when no workflow API is configured.
  #[serde(default = "default_placeholder_key")]
  pub placeholder_api_key: String,
  #[serde(default)]
  pub api_key_source: ApiKeySource,
}

impl RouteSettings {
  fn with_prompt(prompt_path: &str) -> Self {
    Self {
      model: default_model(),
      prompt_path: PathBuf::from(prompt_path),
      database_name: default_database(),
      collection_name: default_database(),
      workflow_path: None,
      placeholder_api_key: default_placeholder_key(),
      api_key_source: ApiKeySource::default(),
    }
  }

  pub fn add_scenario() -> Self {
    Self::with_prompt("prompts/add_scenario.txt")
  }

  pub fn edit_scenario() -> Self {
    Self::with_prompt("prompts/edit_scenario.txt")
  }

  pub fn collection_ref(&self) -> CollectionRef {
    CollectionRef {
      database: self.database_name.clone(),
      collection: self.collection_name.clone(),
    }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SpeechSettings {
  #[serde(default = "default_stt_model")]
  pub stt_model: String,
  #[serde(default = "default_tts_model")]
  pub tts_model: String,
  #[serde(default = "default_output_dir")]
  pub output_dir: PathBuf,
  /// Keep synthesized files on disk after responding.
  #[serde(default)]
  pub keep_audio: bool,
}

impl Default for SpeechSettings {
  fn default() -> Self {
    Self {
      stt_model: default_stt_model(),
      tts_model: default_tts_model(),
      output_dir: default_output_dir(),
      keep_audio: false,
    }
  }
}

fn default_true() -> bool { true }
fn default_model() -> String { DEFAULT_MODEL.into() }
fn default_database() -> String { DEFAULT_DATABASE.into() }
fn default_placeholder_key() -> String { "rew".into() }
fn default_stt_model() -> String { "nova-3".into() }
fn default_tts_model() -> String { "aura-2-asteria-en".into() }
fn default_output_dir() -> PathBuf { PathBuf::from("audio-out") }

/// How the settings were obtained; logged once tracing is up.
#[derive(Debug)]
pub enum SettingsOrigin {
  File(PathBuf),
  Missing(PathBuf),
  Invalid { path: PathBuf, reason: String },
}

impl SettingsOrigin {
  pub fn log(&self) {
    match self {
      SettingsOrigin::File(path) => {
        info!(target: "scenario_forge", path = %path.display(), "Loaded settings (TOML)")
      }
      SettingsOrigin::Missing(path) => {
        info!(target: "scenario_forge", path = %path.display(), "No settings file; using defaults")
      }
      SettingsOrigin::Invalid { path, reason } => {
        error!(target: "scenario_forge", path = %path.display(), error = %reason, "Failed to load settings; using defaults")
      }
    }
  }
}

/// Load settings from SCENARIO_CONFIG_PATH (default `config.toml`). Any IO or parse
/// error yields defaults; the origin says which happened.
pub fn load_settings_from_env() -> (Settings, SettingsOrigin) {
  let path = std::env::var("SCENARIO_CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
  load_settings(Path::new(&path))
}

pub fn load_settings(path: &Path) -> (Settings, SettingsOrigin) {
  let path_buf = path.to_path_buf();
  match std::fs::read_to_string(path) {
    Ok(s) => match toml::from_str::<Settings>(&s) {
      Ok(settings) => (settings, SettingsOrigin::File(path_buf)),
      Err(e) => (Settings::default(), SettingsOrigin::Invalid { path: path_buf, reason: e.to_string() }),
    },
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Settings::default(), SettingsOrigin::Missing(path_buf)),
    Err(e) => (Settings::default(), SettingsOrigin::Invalid { path: path_buf, reason: e.to_string() }),
  }
}

/// CORS policy from ALLOWED_ORIGINS / ALLOWED_CREDENTIALS / ALLOWED_METHODS / ALLOWED_HEADERS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorsSettings {
  pub allowed_origins: Vec<String>,
  pub allow_credentials: bool,
  pub allowed_methods: Vec<String>,
  pub allowed_headers: Vec<String>,
}

impl CorsSettings {
  pub fn from_env() -> Self {
    Self {
      allowed_origins: env_list("ALLOWED_ORIGINS", "*"),
      allow_credentials: env_bool("ALLOWED_CREDENTIALS", true),
      allowed_methods: env_list("ALLOWED_METHODS", "*"),
      allowed_headers: env_list("ALLOWED_HEADERS", "*"),
    }
  }
}
