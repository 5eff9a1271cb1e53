//! Check-in: verify a ticket and redeem it at most once.
//!
//! Checks run in a fixed order (existence, organizer, order payment, ticket
//! status) and the first failing check decides the reported outcome.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use super::FulfillmentError;
use crate::models::{Event, OrderStatus, Ticket, TicketStatus};
use crate::store::{Conditional, FulfillmentStore, StoreError};

/// Outcome of a check-in scan. Only an unknown organizer or a storage
/// failure is an error; everything else is a result the door staff act on.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "camelCase")]
pub enum Redemption {
    Redeemed {
        ticket: Ticket,
        event: Event,
    },
    #[serde(rename_all = "camelCase")]
    AlreadyRedeemed {
        ticket: Ticket,
        event: Event,
        used_at: Option<DateTime<Utc>>,
    },
    #[serde(rename_all = "camelCase")]
    PaymentIncomplete {
        ticket_id: Uuid,
        order_id: Uuid,
        order_status: OrderStatus,
    },
    Cancelled {
        ticket: Ticket,
    },
    #[serde(rename_all = "camelCase")]
    NotFound {
        ticket_id: Uuid,
    },
}

impl Redemption {
    pub fn message(&self) -> &'static str {
        match self {
            Redemption::Redeemed { .. } => "Ticket redeemed",
            Redemption::AlreadyRedeemed { .. } => "Ticket has already been redeemed",
            Redemption::PaymentIncomplete { .. } => "Order has not been paid",
            Redemption::Cancelled { .. } => "Ticket has been cancelled",
            Redemption::NotFound { .. } => "Ticket does not exist",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketVerification {
    pub ticket: Ticket,
    pub event: Event,
    pub order_status: OrderStatus,
}

async fn ticket_event(store: &dyn FulfillmentStore, ticket: &Ticket) -> Result<Event, FulfillmentError> {
    store.event(ticket.event_id).await?.ok_or_else(|| {
        StoreError::Integrity(format!(
            "ticket {} references missing event {}",
            ticket.id, ticket.event_id
        ))
        .into()
    })
}

async fn ticket_order_status(
    store: &dyn FulfillmentStore,
    ticket: &Ticket,
) -> Result<OrderStatus, FulfillmentError> {
    let order = store.order(ticket.order_id).await?.ok_or_else(|| {
        FulfillmentError::from(StoreError::Integrity(format!(
            "ticket {} references missing order {}",
            ticket.id, ticket.order_id
        )))
    })?;
    Ok(order.status)
}

/// Read-only lookup used by the verification page.
pub async fn verify_ticket(
    store: &dyn FulfillmentStore,
    ticket_id: Uuid,
) -> Result<TicketVerification, FulfillmentError> {
    let ticket = store
        .ticket(ticket_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("ticket", ticket_id))?;
    let event = ticket_event(store, &ticket).await?;
    let order_status = ticket_order_status(store, &ticket).await?;

    Ok(TicketVerification {
        ticket,
        event,
        order_status,
    })
}

pub async fn redeem_ticket(
    store: &dyn FulfillmentStore,
    ticket_id: Uuid,
    organizer_id: Uuid,
) -> Result<Redemption, FulfillmentError> {
    let Some(ticket) = store.ticket(ticket_id).await? else {
        return Ok(Redemption::NotFound { ticket_id });
    };

    let event = ticket_event(store, &ticket).await?;
    if event.organizer_id != organizer_id {
        return Err(FulfillmentError::Forbidden(format!(
            "organizer {} does not run event {}",
            organizer_id, event.id
        )));
    }

    let order_status = ticket_order_status(store, &ticket).await?;
    if order_status != OrderStatus::Confirmed {
        return Ok(Redemption::PaymentIncomplete {
            ticket_id,
            order_id: ticket.order_id,
            order_status,
        });
    }

    match ticket.status {
        TicketStatus::Used => {
            return Ok(Redemption::AlreadyRedeemed {
                used_at: ticket.used_at,
                ticket,
                event,
            })
        }
        TicketStatus::Cancelled => return Ok(Redemption::Cancelled { ticket }),
        TicketStatus::Issued => {}
    }

    match store.redeem_ticket(ticket_id, Utc::now()).await? {
        Conditional::Applied(ticket) => {
            info!(ticket_id = %ticket_id, event_id = %event.id, "Ticket redeemed");
            Ok(Redemption::Redeemed { ticket, event })
        }
        Conditional::Rejected(current) => {
            debug!(ticket_id = %ticket_id, status = ?current.status, "Lost redemption race");
            match current.status {
                TicketStatus::Used => Ok(Redemption::AlreadyRedeemed {
                    used_at: current.used_at,
                    ticket: current,
                    event,
                }),
                TicketStatus::Cancelled => Ok(Redemption::Cancelled { ticket: current }),
                TicketStatus::Issued => Err(StoreError::Integrity(format!(
                    "redeem of ticket {} rejected while still issued",
                    ticket_id
                ))
                .into()),
            }
        }
        Conditional::Missing => Ok(Redemption::NotFound { ticket_id }),
    }
}
