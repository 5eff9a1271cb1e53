use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::order::{Order, OrderItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Issued,
    Used,
    Cancelled,
}

/// An issued, redeemable credential. Only the fulfillment engine creates these.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: Uuid,
    pub order_id: Uuid,
    pub order_item_id: Uuid,
    pub event_id: Uuid,
    pub session_id: Uuid,
    pub ticket_type_id: Uuid,
    pub status: TicketStatus,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub(crate) fn for_item(order: &Order, item: &OrderItem, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id: order.id,
            order_item_id: item.id,
            event_id: order.event_id,
            session_id: order.session_id,
            ticket_type_id: item.ticket_type_id,
            status: TicketStatus::Issued,
            used_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}
