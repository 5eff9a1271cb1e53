use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::response::Response;
use uuid::Uuid;

use super::AppState;
use crate::services::catalog;
use crate::utils::error::AppError;
use crate::utils::response::success;

pub async fn event_availability(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(event_id) = path?;
    let availability = catalog::event_availability(state.store.as_ref(), event_id).await?;
    Ok(success(availability, "Availability retrieved"))
}
