//! Order placement, cancellation and registration edits.

use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use super::catalog::require_event;
use super::FulfillmentError;
use crate::models::{
    Bill, Order, OrderItem, OrderItemStatus, OrderStatus, RegistrationForm,
};
use crate::store::{Conditional, FulfillmentStore, OrderDraft, PlacedOrder, StoreError};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrder {
    pub event_id: Uuid,
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub selections: Vec<TicketSelection>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketSelection {
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    /// One record per unit, in unit order; may be shorter than `quantity`.
    #[serde(default)]
    pub registrations: Vec<RegistrationForm>,
}

/// Creates the order, one item per ticket unit, and its bill, reserving
/// availability in the same write.
pub async fn place_order(
    store: &dyn FulfillmentStore,
    request: PlaceOrder,
    bill_due: Duration,
) -> Result<PlacedOrder, FulfillmentError> {
    if request.selections.is_empty() {
        return Err(FulfillmentError::Validation(
            "at least one ticket selection is required".to_string(),
        ));
    }

    let event = require_event(store, request.event_id).await?;
    let session = store
        .session(request.session_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("session", request.session_id))?;
    if session.event_id != event.id {
        return Err(FulfillmentError::Validation(format!(
            "session {} does not belong to event {}",
            session.id, event.id
        )));
    }

    let ticket_types: HashMap<Uuid, _> = store
        .ticket_types_for_event(event.id)
        .await?
        .into_iter()
        .map(|t| (t.id, t))
        .collect();

    let now = Utc::now();
    let order = Order::new(event.id, session.id, request.user_id, now);
    let mut items = Vec::new();
    let mut reservations: BTreeMap<Uuid, i32> = BTreeMap::new();

    for selection in request.selections {
        let ticket_type = ticket_types.get(&selection.ticket_type_id).ok_or_else(|| {
            FulfillmentError::Validation(format!(
                "ticket type {} is not sold for event {}",
                selection.ticket_type_id, event.id
            ))
        })?;
        if selection.quantity < 1 {
            return Err(FulfillmentError::Validation(format!(
                "quantity for ticket type {} must be at least 1",
                ticket_type.id
            )));
        }
        if selection.registrations.len() > selection.quantity as usize {
            return Err(FulfillmentError::Validation(format!(
                "{} registrations supplied for {} ticket(s)",
                selection.registrations.len(),
                selection.quantity
            )));
        }
        for form in &selection.registrations {
            form.validate_for(ticket_type.form_template)
                .map_err(FulfillmentError::Validation)?;
        }

        // Bounded by what the catalog showed; the store's guarded decrement
        // still decides the race.
        let reserved = reservations.entry(ticket_type.id).or_default();
        *reserved = reserved
            .checked_add(selection.quantity)
            .filter(|total| *total <= ticket_type.available_quantity)
            .ok_or(StoreError::SoldOut {
                ticket_type_id: ticket_type.id,
                requested: selection.quantity,
            })?;

        let mut registrations = selection.registrations.into_iter();
        for _ in 0..selection.quantity {
            items.push(OrderItem {
                id: Uuid::new_v4(),
                order_id: order.id,
                ticket_type_id: ticket_type.id,
                quantity: 1,
                unit_price: ticket_type.price,
                status: OrderItemStatus::Pending,
                ticket_id: None,
                registration: registrations.next(),
                version: 0,
                created_at: now,
                updated_at: now,
            });
        }
    }

    let amount: Decimal = items.iter().map(OrderItem::line_total).sum();
    let bill = Bill::new(order.id, amount, now + bill_due, now);

    let placed = store
        .place_order(OrderDraft {
            order,
            items,
            bill,
            reservations: reservations.into_iter().collect(),
        })
        .await?;

    info!(
        order_id = %placed.order.id,
        event_id = %placed.order.event_id,
        items = placed.items.len(),
        amount = %placed.bill.amount,
        "Order placed"
    );

    Ok(placed)
}

/// pending -> cancelled. Cancelling twice returns the cancelled order.
pub async fn cancel_order(
    store: &dyn FulfillmentStore,
    order_id: Uuid,
) -> Result<Order, FulfillmentError> {
    let order = store
        .order(order_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("order", order_id))?;

    match order.status {
        OrderStatus::Cancelled => return Ok(order),
        OrderStatus::Confirmed => {
            return Err(FulfillmentError::Conflict(format!(
                "order {} is confirmed and cannot be cancelled",
                order_id
            )))
        }
        OrderStatus::Pending => {}
    }

    match store.cancel_order(order_id, Utc::now()).await? {
        Conditional::Applied(cancelled) => {
            info!(order_id = %order_id, "Order cancelled");
            Ok(cancelled)
        }
        Conditional::Rejected(current) if current.status == OrderStatus::Cancelled => Ok(current),
        Conditional::Rejected(current) if current.status == OrderStatus::Pending => {
            Err(FulfillmentError::Conflict(format!(
                "order {} has completed payments; refund them before cancelling",
                order_id
            )))
        }
        Conditional::Rejected(current) => Err(FulfillmentError::Conflict(format!(
            "order {} became {:?} before it could be cancelled",
            order_id, current.status
        ))),
        Conditional::Missing => Err(FulfillmentError::not_found("order", order_id)),
    }
}

/// Replaces an item's registration record while the item is still pending.
pub async fn update_registration(
    store: &dyn FulfillmentStore,
    item_id: Uuid,
    expected_version: i32,
    form: RegistrationForm,
) -> Result<OrderItem, FulfillmentError> {
    let item = store
        .order_item(item_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("order item", item_id))?;
    let order = store
        .order(item.order_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("order", item.order_id))?;
    let ticket_type = store
        .ticket_types_for_event(order.event_id)
        .await?
        .into_iter()
        .find(|t| t.id == item.ticket_type_id)
        .ok_or_else(|| FulfillmentError::not_found("ticket type", item.ticket_type_id))?;

    form.validate_for(ticket_type.form_template)
        .map_err(FulfillmentError::Validation)?;

    match store
        .update_registration(item_id, expected_version, form, Utc::now())
        .await?
    {
        Conditional::Applied(updated) => Ok(updated),
        Conditional::Rejected(current) if current.status != OrderItemStatus::Pending => {
            Err(FulfillmentError::Conflict(format!(
                "registration for item {} is locked once the item is {:?}",
                item_id, current.status
            )))
        }
        Conditional::Rejected(current) => Err(FulfillmentError::Conflict(format!(
            "item {} is at version {}, not {}",
            item_id, current.version, expected_version
        ))),
        Conditional::Missing => Err(FulfillmentError::not_found("order item", item_id)),
    }
}
