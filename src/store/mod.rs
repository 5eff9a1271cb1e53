//! Persistence seam for the fulfillment core.
//!
//! Every method that changes a `status` or `ticket_id` is a compare-and-set:
//! the write only lands when the stored row still satisfies the guard, and the
//! caller learns which way it went through [`Conditional`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Bill, BillStatus, Event, EventSession, Order, OrderItem, Payment, PaymentStatus,
    RegistrationForm, Ticket, TicketType,
};

pub mod memory;
pub mod postgres;

#[cfg(test)]
pub(crate) mod fixtures;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

pub type SharedStore = Arc<dyn FulfillmentStore>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error")]
    Database(#[from] sqlx::Error),

    #[error("ticket type {ticket_type_id} cannot supply {requested} more ticket(s)")]
    SoldOut { ticket_type_id: Uuid, requested: i32 },

    #[error("integrity violation: {0}")]
    Integrity(String),
}

/// Outcome of a guarded write.
#[derive(Debug, Clone)]
pub enum Conditional<T> {
    /// The guard held and the write landed; carries the new row.
    Applied(T),
    /// The guard no longer held; carries the row as another writer left it.
    Rejected(T),
    /// No row with that id.
    Missing,
}

/// Everything a checkout writes in one unit: the order, its items, its bill,
/// and the availability it reserves per ticket type.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub bill: Bill,
    pub reservations: Vec<(Uuid, i32)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub bill: Bill,
}

#[async_trait]
pub trait FulfillmentStore: Send + Sync {
    // Catalog
    async fn event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError>;
    async fn session(&self, session_id: Uuid) -> Result<Option<EventSession>, StoreError>;
    async fn ticket_types_for_event(&self, event_id: Uuid) -> Result<Vec<TicketType>, StoreError>;

    // Order aggregate
    async fn place_order(&self, draft: OrderDraft) -> Result<PlacedOrder, StoreError>;
    async fn order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError>;
    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError>;
    async fn order_item(&self, item_id: Uuid) -> Result<Option<OrderItem>, StoreError>;

    /// pending -> confirmed, stamping `confirmed_at`.
    async fn confirm_order(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Conditional<Order>, StoreError>;

    /// pending -> cancelled, cancelling the bill and pending items and
    /// releasing their reserved availability. Rejected while the order is
    /// not pending or any of its payments is completed.
    async fn cancel_order(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Conditional<Order>, StoreError>;

    /// Guarded by `status = pending AND version = expected_version`.
    async fn update_registration(
        &self,
        item_id: Uuid,
        expected_version: i32,
        form: RegistrationForm,
        at: DateTime<Utc>,
    ) -> Result<Conditional<OrderItem>, StoreError>;

    // Bill
    async fn bills_for_order(&self, order_id: Uuid) -> Result<Vec<Bill>, StoreError>;

    /// Opportunistic display update; never touches a cancelled bill.
    async fn set_bill_status(
        &self,
        bill_id: Uuid,
        status: BillStatus,
        paid_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<Conditional<Bill>, StoreError>;

    // Payment ledger
    async fn payments_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>, StoreError>;
    async fn payment(&self, payment_id: Uuid) -> Result<Option<Payment>, StoreError>;
    async fn append_payment(&self, payment: Payment) -> Result<Payment, StoreError>;

    /// Moves a payment from `from` to `to`; rejected if it has moved since,
    /// or, when `to` counts toward paid, if its order is cancelled.
    async fn transition_payment(
        &self,
        payment_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        transaction_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Conditional<Payment>, StoreError>;

    // Tickets
    /// Persists `ticket` and links it to its item, only if the item is still
    /// pending with no ticket. On rejection nothing is written.
    async fn issue_ticket(
        &self,
        ticket: Ticket,
        at: DateTime<Utc>,
    ) -> Result<Conditional<OrderItem>, StoreError>;

    async fn ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError>;
    async fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<Ticket>, StoreError>;

    /// issued -> used.
    async fn redeem_ticket(
        &self,
        ticket_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Conditional<Ticket>, StoreError>;
}
