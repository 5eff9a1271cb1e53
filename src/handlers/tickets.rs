use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Response;
use uuid::Uuid;

use super::{AppState, OrganizerId};
use crate::services::redemption::{self, Redemption};
use crate::utils::error::AppError;
use crate::utils::response::{success, with_status};

pub async fn verify_ticket(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(ticket_id) = path?;
    let verification = redemption::verify_ticket(state.store.as_ref(), ticket_id).await?;
    Ok(success(verification, "Ticket verified"))
}

pub async fn check_in(
    State(state): State<AppState>,
    OrganizerId(organizer_id): OrganizerId,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(ticket_id) = path?;
    let outcome = redemption::redeem_ticket(state.store.as_ref(), ticket_id, organizer_id).await?;
    let status = match outcome {
        Redemption::Redeemed { .. }
        | Redemption::AlreadyRedeemed { .. }
        | Redemption::PaymentIncomplete { .. } => StatusCode::OK,
        Redemption::NotFound { .. } => StatusCode::NOT_FOUND,
        Redemption::Cancelled { .. } => StatusCode::CONFLICT,
    };
    let message = outcome.message();
    Ok(with_status(status, outcome, message))
}
