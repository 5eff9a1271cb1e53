//! Order confirmation and idempotent ticket issuance.
//!
//! `confirm_order` may be called any number of times, concurrently or after a
//! partial failure. Each pending item is claimed through a guarded write that
//! only succeeds while the item has no ticket, so callers converge on one
//! ticket per item whatever the interleaving.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::ledger::{refresh_bill_statuses, LedgerSummary, UnpaidBill};
use super::FulfillmentError;
use crate::models::{Order, OrderItem, OrderItemStatus, OrderStatus, Ticket};
use crate::store::{Conditional, FulfillmentStore, StoreError};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationSummary {
    pub total_items: usize,
    pub tickets_generated: usize,
    pub already_issued: usize,
    pub total_required: Decimal,
    pub total_paid: Decimal,
    /// This call moved the order to confirmed.
    pub newly_confirmed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub order: Order,
    /// Tickets created by this call only.
    pub generated_tickets: Vec<Ticket>,
    pub updated_order_items: Vec<OrderItem>,
    pub summary: ConfirmationSummary,
}

pub async fn confirm_order(
    store: &dyn FulfillmentStore,
    order_id: Uuid,
) -> Result<Confirmation, FulfillmentError> {
    let order = store
        .order(order_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("order", order_id))?;
    if order.status == OrderStatus::Cancelled {
        return Err(FulfillmentError::OrderCancelled(order_id));
    }

    let bills = store.bills_for_order(order_id).await?;
    let payments = store.payments_for_order(order_id).await?;
    let ledger = LedgerSummary::reconcile(&bills, &payments);
    for bill_id in ledger.drifted_bills() {
        warn!(bill_id = %bill_id, order_id = %order_id, "Bill status disagrees with payment ledger");
    }
    if let Err(err) = ledger.ensure_paid() {
        info!(order_id = %order_id, reason = %err, "Order not confirmable yet");
        return Err(err);
    }

    let items = store.order_items(order_id).await?;
    let total_items = items.len();
    let now = Utc::now();
    let mut generated_tickets = Vec::new();
    let mut updated_order_items = Vec::new();
    let mut already_issued = 0;

    for item in items {
        if !item.is_issuable() {
            if item.status == OrderItemStatus::Issued {
                already_issued += 1;
            }
            continue;
        }

        let ticket = Ticket::for_item(&order, &item, now);
        match store.issue_ticket(ticket.clone(), now).await? {
            Conditional::Applied(issued) => {
                info!(
                    order_id = %order_id,
                    order_item_id = %issued.id,
                    ticket_id = %ticket.id,
                    "Ticket issued"
                );
                generated_tickets.push(ticket);
                updated_order_items.push(issued);
            }
            Conditional::Rejected(current) => {
                // Another confirmation claimed this item first.
                debug!(
                    order_id = %order_id,
                    order_item_id = %current.id,
                    status = ?current.status,
                    "Item already claimed by a concurrent confirmation"
                );
                if current.status == OrderItemStatus::Issued {
                    already_issued += 1;
                }
            }
            Conditional::Missing => {
                return Err(StoreError::Integrity(format!(
                    "order item {} vanished during confirmation of {}",
                    item.id, order_id
                ))
                .into());
            }
        }
    }

    let (order, newly_confirmed) = match store.confirm_order(order_id, now).await? {
        Conditional::Applied(order) => {
            info!(order_id = %order_id, tickets = generated_tickets.len(), "Order confirmed");
            (order, true)
        }
        Conditional::Rejected(order) if order.status == OrderStatus::Confirmed => (order, false),
        Conditional::Rejected(order) => {
            warn!(
                order_id = %order_id,
                status = ?order.status,
                "Order left pending state while tickets were being issued"
            );
            return Err(FulfillmentError::OrderCancelled(order_id));
        }
        Conditional::Missing => return Err(FulfillmentError::not_found("order", order_id)),
    };

    refresh_bill_statuses(store, order_id, now).await?;

    let summary = ConfirmationSummary {
        total_items,
        tickets_generated: generated_tickets.len(),
        already_issued,
        total_required: ledger.total_due,
        total_paid: ledger.total_paid,
        newly_confirmed,
    };

    Ok(Confirmation {
        order,
        generated_tickets,
        updated_order_items,
        summary,
    })
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProgress {
    pub total_required: Decimal,
    pub total_paid: Decimal,
    pub is_paid: bool,
    pub unpaid_bills: Vec<UnpaidBill>,
    /// Bills whose stored status disagrees with the ledger.
    pub ledger_drift: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketProgress {
    pub total_items: usize,
    pub pending_items: usize,
    pub issued_tickets: usize,
    pub can_generate_tickets: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationStatus {
    pub order_status: OrderStatus,
    pub payment_status: PaymentProgress,
    pub ticket_status: TicketProgress,
}

/// Read-only view of how far an order is from fulfillment.
pub async fn confirmation_status(
    store: &dyn FulfillmentStore,
    order_id: Uuid,
) -> Result<ConfirmationStatus, FulfillmentError> {
    let order = store
        .order(order_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("order", order_id))?;
    let bills = store.bills_for_order(order_id).await?;
    let payments = store.payments_for_order(order_id).await?;
    let items = store.order_items(order_id).await?;

    let ledger = LedgerSummary::reconcile(&bills, &payments);
    let pending_items = items.iter().filter(|i| i.is_issuable()).count();
    let issued_tickets = items
        .iter()
        .filter(|i| i.status == OrderItemStatus::Issued)
        .count();

    Ok(ConfirmationStatus {
        order_status: order.status,
        payment_status: PaymentProgress {
            total_required: ledger.total_due,
            total_paid: ledger.total_paid,
            is_paid: ledger.is_paid(),
            unpaid_bills: ledger.unpaid_bills(),
            ledger_drift: ledger.drifted_bills(),
        },
        ticket_status: TicketProgress {
            total_items: items.len(),
            pending_items,
            issued_tickets,
            can_generate_tickets: pending_items > 0 && ledger.is_paid(),
        },
    })
}
