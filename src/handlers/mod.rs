use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::response::Response;
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::store::SharedStore;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub mod events;
pub mod orders;
pub mod payments;
pub mod tickets;

/// Header carrying the authenticated organizer's id, set by the gateway in
/// front of the check-in endpoints.
pub const ORGANIZER_HEADER: &str = "x-organizer-id";

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub config: Arc<Config>,
}

#[derive(Serialize)]
struct HealthPayload {
    status: &'static str,
    service: &'static str,
}

pub async fn health_check() -> Response {
    let payload = HealthPayload {
        status: "ok",
        service: "ticketing-api",
    };

    success(payload, "Health check successful")
}

/// The organizer a request acts for.
#[derive(Debug, Clone, Copy)]
pub struct OrganizerId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for OrganizerId
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(ORGANIZER_HEADER)
            .ok_or_else(|| AppError::AuthError(format!("missing {} header", ORGANIZER_HEADER)))?;

        raw.to_str()
            .ok()
            .and_then(|value| Uuid::parse_str(value.trim()).ok())
            .map(OrganizerId)
            .ok_or_else(|| AppError::AuthError(format!("malformed {} header", ORGANIZER_HEADER)))
    }
}
