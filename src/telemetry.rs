//! Telemetry initialization (tracing/tracing-subscriber).
//!
//! Behavior:
//! - LOG_LEVEL controls the filter (e.g. "debug" or detailed directives like
//!   "info,generation=debug,scenario_forge=debug,tower_http=info"). Falls back to
//!   `[logger].level` from the settings file, then to a built-in default.
//! - LOG_FORMAT selects "pretty" or "json"; falls back to `[logger].format`.
//! - `[logger].ansi = false` disables colors (useful when logs go to files).

use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, LoggerSettings};

const DEFAULT_FILTER: &str = "info,generation=debug,scenario_forge=debug,tower_http=info,axum=info";

pub fn init_tracing(logger: &LoggerSettings) {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| {
        let directives = logger.level.as_deref().unwrap_or(DEFAULT_FILTER);
        EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(logger.ansi)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    let format = match std::env::var("LOG_FORMAT").as_deref() {
        Ok("json") => LogFormat::Json,
        Ok("pretty") => LogFormat::Pretty,
        _ => logger.format,
    };

    // Choose JSON vs pretty; don't try to store different layer types.
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
