//! Application state: settings, the scenario service and its clients.
//!
//! Every long-lived handle is built once here and shared through `Arc<AppState>`:
//!   - text generator (Gemini, or an unavailable stand-in without GEMINI_API_KEY)
//!   - scenario store (MongoDB when MONGO_URL is set, in-memory otherwise)
//!   - optional workflow API client (VOXIO_API_KEY)
//!   - optional Deepgram client (DEEPGRAM_API_KEY)

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::config::{ApiKeySource, Settings};
use crate::gemini::Gemini;
use crate::generation::{TextGenerator, UnavailableGenerator};
use crate::mongo::MongoStore;
use crate::service::ScenarioService;
use crate::speech::Deepgram;
use crate::store::{MemoryStore, ScenarioStore, StoreError};
use crate::workflow::WorkflowClient;

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub service: ScenarioService,
    pub speech: Option<Deepgram>,
    /// `api_key` from the environment, used when edits are configured to read it there.
    pub legacy_edit_key: Option<String>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        service: ScenarioService,
        speech: Option<Deepgram>,
        legacy_edit_key: Option<String>,
    ) -> Self {
        Self { settings, service, speech, legacy_edit_key }
    }

    /// Build state from env. Only a failing MongoDB connection is fatal.
    #[instrument(level = "info", skip_all)]
    pub async fn from_env(settings: Settings) -> Result<Self, StoreError> {
        let generator: Arc<dyn TextGenerator> = match Gemini::from_env() {
            Some(gemini) => {
                info!(target: "scenario_forge", base_url = %gemini.base_url, "Gemini enabled.");
                Arc::new(gemini)
            }
            None => {
                warn!(target: "scenario_forge", "Gemini disabled (no GEMINI_API_KEY). Generation will return the AI fallback.");
                Arc::new(UnavailableGenerator::new("GEMINI_API_KEY not set"))
            }
        };

        let store: Arc<dyn ScenarioStore> = match std::env::var("MONGO_URL") {
            Ok(url) => {
                let mongo = MongoStore::connect(&url).await?;
                info!(target: "scenario_forge", "MongoDB store enabled.");
                Arc::new(mongo)
            }
            Err(_) => {
                warn!(target: "scenario_forge", "MONGO_URL not set. Using in-memory store; data is lost on restart.");
                Arc::new(MemoryStore::new())
            }
        };

        let workflow = WorkflowClient::from_env();
        if let Some(wf) = &workflow {
            info!(target: "scenario_forge", base_url = %wf.base_url, "Workflow API enabled.");
        } else {
            info!(
                target: "scenario_forge",
                placeholder = %settings.add_scenario.placeholder_api_key,
                "Workflow API disabled (no VOXIO_API_KEY). New scenarios get the placeholder key."
            );
        }

        let speech = Deepgram::from_env();
        if let Some(dg) = &speech {
            info!(target: "scenario_forge", base_url = %dg.base_url, stt_model = %settings.speech.stt_model, tts_model = %settings.speech.tts_model, "Deepgram enabled.");
        } else {
            info!(target: "scenario_forge", "Deepgram disabled (no DEEPGRAM_API_KEY). /stt and /tts answer 503.");
        }

        let legacy_edit_key = std::env::var("api_key").ok();
        if settings.edit_scenario.api_key_source == ApiKeySource::Environment && legacy_edit_key.is_none() {
            warn!(target: "scenario_forge", "Edits read the key from the environment but `api_key` is not set.");
        }

        let service = ScenarioService::new(generator, store, workflow);
        Ok(Self::new(settings, service, speech, legacy_edit_key))
    }
}
