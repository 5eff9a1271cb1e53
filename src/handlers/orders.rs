use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::models::RegistrationForm;
use crate::services::checkout::{self, PlaceOrder};
use crate::services::{fulfillment, scenario};
use crate::utils::error::AppError;
use crate::utils::response::{created, success};

pub async fn place_order(
    State(state): State<AppState>,
    payload: Result<Json<PlaceOrder>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload?;
    let placed = checkout::place_order(state.store.as_ref(), request, state.config.bill_due).await?;
    Ok(created(placed, "Order placed"))
}

pub async fn get_order(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(order_id) = path?;
    let view = scenario::order_view(state.store.as_ref(), order_id).await?;
    Ok(success(view, "Order retrieved"))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(order_id) = path?;
    let order = checkout::cancel_order(state.store.as_ref(), order_id).await?;
    Ok(success(order, "Order cancelled"))
}

pub async fn confirm_order(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(order_id) = path?;
    let confirmation = fulfillment::confirm_order(state.store.as_ref(), order_id).await?;
    let message = match (
        confirmation.summary.newly_confirmed,
        confirmation.summary.tickets_generated,
    ) {
        (true, _) => "Order confirmed",
        (false, 0) => "Order already confirmed",
        (false, _) => "Remaining tickets issued",
    };
    Ok(success(confirmation, message))
}

pub async fn confirmation_status(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(order_id) = path?;
    let status = fulfillment::confirmation_status(state.store.as_ref(), order_id).await?;
    Ok(success(status, "Confirmation status retrieved"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRegistration {
    pub expected_version: i32,
    pub registration: RegistrationForm,
}

pub async fn update_registration(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateRegistration>, JsonRejection>,
) -> Result<Response, AppError> {
    let Path(item_id) = path?;
    let Json(request) = payload?;
    let item = checkout::update_registration(
        state.store.as_ref(),
        item_id,
        request.expected_version,
        request.registration,
    )
    .await?;
    Ok(success(item, "Registration updated"))
}
