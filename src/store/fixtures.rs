use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{InMemoryStore, SharedStore};
use crate::models::{
    Bill, Event, EventSession, FormTemplate, Order, OrderItem, OrderItemStatus, OrderStatus,
    Payment, PaymentMethod, PaymentStatus, Ticket, TicketStatus, TicketType,
};

/// A seeded in-memory catalog plus helpers that write rows directly, so tests
/// can start from any persisted state.
pub(crate) struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub organizer_id: Uuid,
    pub event: Event,
    pub session: EventSession,
    pub ticket_type: TicketType,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_template(FormTemplate::None).await
    }

    pub async fn with_template(form_template: FormTemplate) -> Self {
        let now = Utc::now();
        let organizer_id = Uuid::new_v4();
        let event = Event {
            id: Uuid::new_v4(),
            organizer_id,
            title: "Rust Taipei Conf".to_string(),
            description: None,
            location: "Taipei".to_string(),
            start_time: now + Duration::days(30),
            end_time: None,
            created_at: now,
            updated_at: now,
        };
        let session = EventSession {
            id: Uuid::new_v4(),
            event_id: event.id,
            name: "Day 1".to_string(),
            starts_at: event.start_time,
            ends_at: None,
        };
        let ticket_type = TicketType {
            id: Uuid::new_v4(),
            event_id: event.id,
            name: "General".to_string(),
            description: None,
            price: Decimal::from(1000),
            total_quantity: 100,
            available_quantity: 100,
            form_template,
            created_at: now,
            updated_at: now,
        };

        let store = Arc::new(InMemoryStore::new());
        store.insert_event(event.clone()).await;
        store.insert_session(session.clone()).await;
        store.insert_ticket_type(ticket_type.clone()).await;

        Self {
            store,
            organizer_id,
            event,
            session,
            ticket_type,
        }
    }

    pub fn shared(&self) -> SharedStore {
        self.store.clone()
    }

    /// Writes a pending order with one item per entry in `quantities` and a
    /// bill for `bill_amount`.
    pub async fn order(&self, quantities: &[i32], bill_amount: i64) -> (Order, Vec<OrderItem>, Bill) {
        let now = Utc::now();
        let order = Order::new(self.event.id, self.session.id, Uuid::new_v4(), now);
        let items: Vec<OrderItem> = quantities
            .iter()
            .map(|quantity| OrderItem {
                id: Uuid::new_v4(),
                order_id: order.id,
                ticket_type_id: self.ticket_type.id,
                quantity: *quantity,
                unit_price: self.ticket_type.price,
                status: OrderItemStatus::Pending,
                ticket_id: None,
                registration: None,
                version: 0,
                created_at: now,
                updated_at: now,
            })
            .collect();
        let bill = Bill::new(order.id, Decimal::from(bill_amount), now + Duration::hours(48), now);

        let mut state = self.store.state.write().await;
        state.orders.insert(order.id, order.clone());
        for item in &items {
            state.items.insert(item.id, item.clone());
        }
        state.bills.insert(bill.id, bill.clone());

        (order, items, bill)
    }

    pub async fn payment(&self, bill: &Bill, amount: i64, status: PaymentStatus) -> Payment {
        let mut payment = Payment::new(
            bill.id,
            bill.order_id,
            Decimal::from(amount),
            PaymentMethod::CreditCard,
            Some(format!("txn_{}", Uuid::new_v4())),
            Utc::now(),
        );
        payment.status = status;
        if status == PaymentStatus::Completed {
            payment.processed_at = Some(payment.created_at);
        }
        self.store
            .state
            .write()
            .await
            .payments
            .insert(payment.id, payment.clone());
        payment
    }

    pub async fn paid_order(&self, quantities: &[i32]) -> (Order, Vec<OrderItem>, Bill) {
        let total: i64 = quantities.iter().map(|q| i64::from(*q) * 1000).sum();
        let (order, items, bill) = self.order(quantities, total).await;
        self.payment(&bill, total, PaymentStatus::Completed).await;
        (order, items, bill)
    }

    pub async fn force_order_status(&self, order_id: Uuid, status: OrderStatus) {
        let mut state = self.store.state.write().await;
        if let Some(order) = state.orders.get_mut(&order_id) {
            order.status = status;
            order.confirmed_at = (status == OrderStatus::Confirmed).then(Utc::now);
        }
    }

    pub async fn force_bill_status(&self, bill_id: Uuid, status: crate::models::BillStatus) {
        let mut state = self.store.state.write().await;
        if let Some(bill) = state.bills.get_mut(&bill_id) {
            bill.status = status;
        }
    }

    pub async fn force_ticket_status(&self, ticket_id: Uuid, status: TicketStatus) {
        let mut state = self.store.state.write().await;
        if let Some(ticket) = state.tickets.get_mut(&ticket_id) {
            ticket.status = status;
        }
    }

    /// Inserts a ticket without going through issuance.
    pub async fn raw_ticket(&self, order: &Order, item: &OrderItem) -> Ticket {
        let ticket = Ticket::for_item(order, item, Utc::now());
        self.store
            .state
            .write()
            .await
            .tickets
            .insert(ticket.id, ticket.clone());
        ticket
    }
}
