use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{Conditional, FulfillmentStore, OrderDraft, PlacedOrder, StoreError};
use crate::models::{
    Bill, BillStatus, Event, EventSession, Order, OrderItem, OrderItemStatus, OrderStatus,
    Payment, PaymentStatus, RegistrationForm, Ticket, TicketStatus, TicketType,
};

#[derive(Default)]
pub(super) struct MemoryState {
    pub(super) events: HashMap<Uuid, Event>,
    pub(super) sessions: HashMap<Uuid, EventSession>,
    pub(super) ticket_types: HashMap<Uuid, TicketType>,
    pub(super) orders: HashMap<Uuid, Order>,
    pub(super) items: HashMap<Uuid, OrderItem>,
    pub(super) bills: HashMap<Uuid, Bill>,
    pub(super) payments: HashMap<Uuid, Payment>,
    pub(super) tickets: HashMap<Uuid, Ticket>,
}

/// Store backed by process memory. Each guarded write checks and mutates
/// under one write lock, which gives the same compare-and-set semantics as
/// the WHERE-guarded updates of [`super::PgStore`].
#[derive(Default)]
pub struct InMemoryStore {
    pub(super) state: RwLock<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_event(&self, event: Event) {
        self.state.write().await.events.insert(event.id, event);
    }

    pub async fn insert_session(&self, session: EventSession) {
        self.state.write().await.sessions.insert(session.id, session);
    }

    pub async fn insert_ticket_type(&self, ticket_type: TicketType) {
        self.state
            .write()
            .await
            .ticket_types
            .insert(ticket_type.id, ticket_type);
    }
}

fn sorted_by_creation<T>(
    rows: impl Iterator<Item = T>,
    key: impl Fn(&T) -> (DateTime<Utc>, Uuid),
) -> Vec<T> {
    let mut rows: Vec<T> = rows.collect();
    rows.sort_by_key(key);
    rows
}

#[async_trait]
impl FulfillmentStore for InMemoryStore {
    async fn event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.state.read().await.events.get(&event_id).cloned())
    }

    async fn session(&self, session_id: Uuid) -> Result<Option<EventSession>, StoreError> {
        Ok(self.state.read().await.sessions.get(&session_id).cloned())
    }

    async fn ticket_types_for_event(&self, event_id: Uuid) -> Result<Vec<TicketType>, StoreError> {
        let state = self.state.read().await;
        let rows = state
            .ticket_types
            .values()
            .filter(|t| t.event_id == event_id)
            .cloned();
        Ok(sorted_by_creation(rows, |t| (t.created_at, t.id)))
    }

    async fn place_order(&self, draft: OrderDraft) -> Result<PlacedOrder, StoreError> {
        let mut state = self.state.write().await;

        // Check every reservation before applying any of them.
        for (ticket_type_id, requested) in &draft.reservations {
            let available = state
                .ticket_types
                .get(ticket_type_id)
                .filter(|t| t.event_id == draft.order.event_id)
                .map(|t| t.available_quantity)
                .unwrap_or(0);
            if available < *requested {
                return Err(StoreError::SoldOut {
                    ticket_type_id: *ticket_type_id,
                    requested: *requested,
                });
            }
        }
        for (ticket_type_id, requested) in &draft.reservations {
            if let Some(ticket_type) = state.ticket_types.get_mut(ticket_type_id) {
                ticket_type.available_quantity -= requested;
                ticket_type.updated_at = draft.order.created_at;
            }
        }

        state.orders.insert(draft.order.id, draft.order.clone());
        for item in &draft.items {
            state.items.insert(item.id, item.clone());
        }
        state.bills.insert(draft.bill.id, draft.bill.clone());

        Ok(PlacedOrder {
            order: draft.order,
            items: draft.items,
            bill: draft.bill,
        })
    }

    async fn order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.state.read().await.orders.get(&order_id).cloned())
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
        let state = self.state.read().await;
        let rows = state
            .items
            .values()
            .filter(|i| i.order_id == order_id)
            .cloned();
        Ok(sorted_by_creation(rows, |i| (i.created_at, i.id)))
    }

    async fn order_item(&self, item_id: Uuid) -> Result<Option<OrderItem>, StoreError> {
        Ok(self.state.read().await.items.get(&item_id).cloned())
    }

    async fn confirm_order(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Conditional<Order>, StoreError> {
        let mut state = self.state.write().await;
        let Some(order) = state.orders.get_mut(&order_id) else {
            return Ok(Conditional::Missing);
        };
        if order.status != OrderStatus::Pending {
            return Ok(Conditional::Rejected(order.clone()));
        }

        order.status = OrderStatus::Confirmed;
        order.confirmed_at = Some(at);
        order.updated_at = at;
        Ok(Conditional::Applied(order.clone()))
    }

    async fn cancel_order(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Conditional<Order>, StoreError> {
        let mut state = self.state.write().await;
        let collected = state
            .payments
            .values()
            .any(|p| p.order_id == order_id && p.status.counts_toward_paid());
        let Some(order) = state.orders.get_mut(&order_id) else {
            return Ok(Conditional::Missing);
        };
        if order.status != OrderStatus::Pending || collected {
            return Ok(Conditional::Rejected(order.clone()));
        }
        order.status = OrderStatus::Cancelled;
        order.updated_at = at;
        let cancelled = order.clone();

        let mut released: HashMap<Uuid, i32> = HashMap::new();
        for item in state.items.values_mut().filter(|i| i.order_id == order_id) {
            if item.status == OrderItemStatus::Pending {
                item.status = OrderItemStatus::Cancelled;
                item.version += 1;
                item.updated_at = at;
                *released.entry(item.ticket_type_id).or_default() += item.quantity;
            }
        }
        for (ticket_type_id, quantity) in released {
            if let Some(ticket_type) = state.ticket_types.get_mut(&ticket_type_id) {
                ticket_type.available_quantity += quantity;
                ticket_type.updated_at = at;
            }
        }
        for bill in state.bills.values_mut().filter(|b| b.order_id == order_id) {
            bill.status = BillStatus::Cancelled;
            bill.updated_at = at;
        }

        Ok(Conditional::Applied(cancelled))
    }

    async fn update_registration(
        &self,
        item_id: Uuid,
        expected_version: i32,
        form: RegistrationForm,
        at: DateTime<Utc>,
    ) -> Result<Conditional<OrderItem>, StoreError> {
        let mut state = self.state.write().await;
        let Some(item) = state.items.get_mut(&item_id) else {
            return Ok(Conditional::Missing);
        };
        if item.status != OrderItemStatus::Pending || item.version != expected_version {
            return Ok(Conditional::Rejected(item.clone()));
        }

        item.registration = Some(form);
        item.version += 1;
        item.updated_at = at;
        Ok(Conditional::Applied(item.clone()))
    }

    async fn bills_for_order(&self, order_id: Uuid) -> Result<Vec<Bill>, StoreError> {
        let state = self.state.read().await;
        let rows = state
            .bills
            .values()
            .filter(|b| b.order_id == order_id)
            .cloned();
        Ok(sorted_by_creation(rows, |b| (b.created_at, b.id)))
    }

    async fn set_bill_status(
        &self,
        bill_id: Uuid,
        status: BillStatus,
        paid_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<Conditional<Bill>, StoreError> {
        let mut state = self.state.write().await;
        let Some(bill) = state.bills.get_mut(&bill_id) else {
            return Ok(Conditional::Missing);
        };
        if bill.status == BillStatus::Cancelled {
            return Ok(Conditional::Rejected(bill.clone()));
        }

        bill.status = status;
        bill.paid_at = paid_at;
        bill.updated_at = at;
        Ok(Conditional::Applied(bill.clone()))
    }

    async fn payments_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let state = self.state.read().await;
        let rows = state
            .payments
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned();
        Ok(sorted_by_creation(rows, |p| (p.created_at, p.id)))
    }

    async fn payment(&self, payment_id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.state.read().await.payments.get(&payment_id).cloned())
    }

    async fn append_payment(&self, payment: Payment) -> Result<Payment, StoreError> {
        let mut state = self.state.write().await;
        if !state.bills.contains_key(&payment.bill_id) {
            return Err(StoreError::Integrity(format!(
                "payment {} references unknown bill {}",
                payment.id, payment.bill_id
            )));
        }
        if state.payments.contains_key(&payment.id) {
            return Err(StoreError::Integrity(format!(
                "payment {} already recorded",
                payment.id
            )));
        }
        state.payments.insert(payment.id, payment.clone());
        Ok(payment)
    }

    async fn transition_payment(
        &self,
        payment_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        transaction_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Conditional<Payment>, StoreError> {
        let mut state = self.state.write().await;
        let order_cancelled = state
            .payments
            .get(&payment_id)
            .and_then(|p| state.orders.get(&p.order_id))
            .is_some_and(|o| o.status == OrderStatus::Cancelled);
        let Some(payment) = state.payments.get_mut(&payment_id) else {
            return Ok(Conditional::Missing);
        };
        if payment.status != from || (to.counts_toward_paid() && order_cancelled) {
            return Ok(Conditional::Rejected(payment.clone()));
        }

        payment.status = to;
        if transaction_id.is_some() {
            payment.transaction_id = transaction_id;
        }
        match to {
            PaymentStatus::Completed => payment.processed_at = Some(at),
            PaymentStatus::Failed | PaymentStatus::Cancelled => payment.failed_at = Some(at),
            _ => {}
        }
        payment.updated_at = at;
        Ok(Conditional::Applied(payment.clone()))
    }

    async fn issue_ticket(
        &self,
        ticket: Ticket,
        at: DateTime<Utc>,
    ) -> Result<Conditional<OrderItem>, StoreError> {
        let mut state = self.state.write().await;
        let Some(item) = state.items.get_mut(&ticket.order_item_id) else {
            return Ok(Conditional::Missing);
        };
        if !item.is_issuable() {
            return Ok(Conditional::Rejected(item.clone()));
        }

        item.status = OrderItemStatus::Issued;
        item.ticket_id = Some(ticket.id);
        item.version += 1;
        item.updated_at = at;
        let issued = item.clone();
        state.tickets.insert(ticket.id, ticket);
        Ok(Conditional::Applied(issued))
    }

    async fn ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError> {
        Ok(self.state.read().await.tickets.get(&ticket_id).cloned())
    }

    async fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        let state = self.state.read().await;
        let rows = state
            .tickets
            .values()
            .filter(|t| t.order_id == order_id)
            .cloned();
        Ok(sorted_by_creation(rows, |t| (t.created_at, t.id)))
    }

    async fn redeem_ticket(
        &self,
        ticket_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Conditional<Ticket>, StoreError> {
        let mut state = self.state.write().await;
        let Some(ticket) = state.tickets.get_mut(&ticket_id) else {
            return Ok(Conditional::Missing);
        };
        if ticket.status != TicketStatus::Issued {
            return Ok(Conditional::Rejected(ticket.clone()));
        }

        ticket.status = TicketStatus::Used;
        ticket.used_at = Some(at);
        ticket.updated_at = at;
        Ok(Conditional::Applied(ticket.clone()))
    }
}
