//! Router assembly: HTTP endpoints, CORS from the environment, and HTTP tracing.

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{warn, Level};

use crate::config::CorsSettings;
use crate::state::AppState;

pub mod error;
pub mod http;

/// Uploaded audio for `/stt` may be larger than axum's 2 MB default.
const STT_BODY_LIMIT: usize = 25 * 1024 * 1024;

/// Build the application router with:
/// - scenario endpoints `/add-scenario`, `/edit-scenario`
/// - speech endpoints `/stt`, `/tts`
/// - `/health`
/// - CORS from ALLOWED_* settings
/// - HTTP trace layer (per-request spans w/ method, path, status, latency)
pub fn build_router(state: Arc<AppState>, cors: &CorsSettings) -> Router {
    Router::new()
        .route("/health", get(http::http_health))
        .route("/add-scenario", post(http::http_add_scenario))
        .route("/edit-scenario", post(http::http_edit_scenario))
        .route(
            "/stt",
            post(http::http_post_stt).layer(DefaultBodyLimit::max(STT_BODY_LIMIT)),
        )
        .route("/tts", post(http::http_post_tts))
        // State + CORS + HTTP tracing
        .with_state(state)
        .layer(cors_layer(cors))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
}

fn is_wildcard(values: &[String]) -> bool {
    values.iter().any(|v| v == "*")
}

/// Translate the CORS settings into a layer. A `*` together with credentials is
/// answered by mirroring the request, since browsers reject a literal `*` there.
pub fn cors_layer(cors: &CorsSettings) -> CorsLayer {
    let credentials = cors.allow_credentials;

    let origins = if is_wildcard(&cors.allowed_origins) {
        if credentials { AllowOrigin::mirror_request() } else { AllowOrigin::any() }
    } else {
        AllowOrigin::list(parse_all(&cors.allowed_origins, "origin", |s| HeaderValue::from_str(s).ok()))
    };

    let methods = if is_wildcard(&cors.allowed_methods) {
        if credentials { AllowMethods::mirror_request() } else { AllowMethods::any() }
    } else {
        AllowMethods::list(parse_all(&cors.allowed_methods, "method", |s| {
            Method::from_bytes(s.to_ascii_uppercase().as_bytes()).ok()
        }))
    };

    let headers = if is_wildcard(&cors.allowed_headers) {
        if credentials { AllowHeaders::mirror_request() } else { AllowHeaders::any() }
    } else {
        AllowHeaders::list(parse_all(&cors.allowed_headers, "header", |s| HeaderName::from_bytes(s.as_bytes()).ok()))
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(credentials)
}

fn parse_all<T>(values: &[String], what: &str, parse: impl Fn(&str) -> Option<T>) -> Vec<T> {
    values
        .iter()
        .filter_map(|v| {
            let parsed = parse(v);
            if parsed.is_none() {
                warn!(target: "scenario_forge", value = %v, kind = what, "Ignoring invalid CORS entry");
            }
            parsed
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get};
    use tower::ServiceExt;

    fn preflight(origin: &str) -> Request<Body> {
        Request::builder()
            .method("OPTIONS")
            .uri("/")
            .header("origin", origin)
            .header("access-control-request-method", "POST")
            .header("access-control-request-headers", "content-type")
            .body(Body::empty())
            .unwrap()
    }

    fn app(cors: &CorsSettings) -> Router {
        Router::new().route("/", get(|| async { "ok" })).layer(cors_layer(cors))
    }

    fn settings(origins: &[&str], credentials: bool) -> CorsSettings {
        CorsSettings {
            allowed_origins: origins.iter().map(|s| s.to_string()).collect(),
            allow_credentials: credentials,
            allowed_methods: vec!["*".into()],
            allowed_headers: vec!["*".into()],
        }
    }

    #[tokio::test]
    async fn wildcard_with_credentials_mirrors_origin() {
        let res = app(&settings(&["*"], true)).oneshot(preflight("https://app.example")).await.unwrap();
        let headers = res.headers();
        assert_eq!(headers["access-control-allow-origin"], "https://app.example");
        assert_eq!(headers["access-control-allow-credentials"], "true");
    }

    #[tokio::test]
    async fn wildcard_without_credentials_answers_star() {
        let res = app(&settings(&["*"], false)).oneshot(preflight("https://app.example")).await.unwrap();
        assert_eq!(res.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn explicit_list_only_allows_listed_origins() {
        let cors = settings(&["https://a.example", "https://b.example"], true);
        let allowed = app(&cors).oneshot(preflight("https://b.example")).await.unwrap();
        assert_eq!(allowed.headers()["access-control-allow-origin"], "https://b.example");

        let denied = app(&cors).oneshot(preflight("https://evil.example")).await.unwrap();
        assert!(denied.headers().get("access-control-allow-origin").is_none());
    }
}
