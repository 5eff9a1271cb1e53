use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use uuid::Uuid;

use super::AppState;
use crate::models::PaymentUpdate;
use crate::services::ledger::{self, RecordPayment};
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

pub async fn record_payment(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<RecordPayment>, JsonRejection>,
) -> Result<Response, AppError> {
    let Path(order_id) = path?;
    let Json(request) = payload?;
    let payment = ledger::record_payment(state.store.as_ref(), order_id, request).await?;
    Ok(created(payment, "Payment recorded"))
}

/// Provider callback reporting a payment's new status.
pub async fn update_payment_status(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<PaymentUpdate>, JsonRejection>,
) -> Result<Response, AppError> {
    let Path(payment_id) = path?;
    let Json(update) = payload?;
    let payment = ledger::apply_payment_update(state.store.as_ref(), payment_id, update).await?;
    Ok(success(payment, "Payment status updated"))
}
