use axum::http::{header, HeaderName, HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

use super::Config;
use crate::handlers::ORGANIZER_HEADER;

const PREFLIGHT_MAX_AGE_SECS: u64 = 86400;

pub fn create_cors_layer(config: &Config) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static(ORGANIZER_HEADER),
        ])
        .expose_headers([header::CONTENT_LENGTH, header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(PREFLIGHT_MAX_AGE_SECS));

    match parse_origins(&config.allowed_origins) {
        Some(origins) => {
            tracing::info!("CORS: Configured with {} allowed origin(s)", origins.len());
            layer
                .allow_origin(AllowOrigin::list(origins))
                .allow_credentials(true)
        }
        // Credentials cannot be combined with a wildcard origin.
        None => {
            tracing::warn!("CORS: No valid origins configured, allowing any origin without credentials");
            layer.allow_origin(AllowOrigin::any())
        }
    }
}

fn parse_origins(origins: &[String]) -> Option<Vec<HeaderValue>> {
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("CORS: Invalid origin '{}': {}", origin, e);
                None
            }
        })
        .collect();

    (!parsed.is_empty()).then_some(parsed)
}
