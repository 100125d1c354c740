//! HTTP error mapping. Everything that leaves a handler as an error becomes
//! `{ "detail": "..." }` with the matching status.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use thiserror::Error;
use tracing::error;

use crate::protocol::ErrorOut;
use crate::service::ServiceError;
use crate::speech::SpeechError;

#[derive(Debug, Error)]
pub enum ApiError {
  #[error("{0}")]
  BadRequest(String),
  #[error("Speech service is not configured.")]
  SpeechDisabled,
  #[error(transparent)]
  Speech(#[from] SpeechError),
  #[error(transparent)]
  Service(#[from] ServiceError),
}

impl ApiError {
  fn status(&self) -> StatusCode {
    match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::SpeechDisabled => StatusCode::SERVICE_UNAVAILABLE,
      ApiError::Speech(SpeechError::Artifact(_)) => StatusCode::INTERNAL_SERVER_ERROR,
      ApiError::Speech(_) => StatusCode::BAD_GATEWAY,
      ApiError::Service(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!(target: "scenario_forge", %status, error = %self, "Request failed");
    }
    (status, Json(ErrorOut { detail: self.to_string() })).into_response()
  }
}
