use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Conditional, FulfillmentStore, OrderDraft, PlacedOrder, StoreError};
use crate::models::{
    Bill, BillStatus, Event, EventSession, Order, OrderItem, OrderStatus, Payment, PaymentStatus,
    RegistrationForm, Ticket, TicketType,
};

/// Postgres-backed store. Guarded writes are `UPDATE ... WHERE <guard>
/// RETURNING *` statements, so the database row lock decides every race.
/// Cancellation and payment completion also lock the order row first.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn rejected_or_missing<T>(current: Option<T>) -> Conditional<T> {
    match current {
        Some(row) => Conditional::Rejected(row),
        None => Conditional::Missing,
    }
}

#[async_trait]
impl FulfillmentStore for PgStore {
    async fn event(&self, event_id: Uuid) -> Result<Option<Event>, StoreError> {
        let event = sqlx::query_as::<_, Event>("SELECT * FROM events WHERE id = $1")
            .bind(event_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(event)
    }

    async fn session(&self, session_id: Uuid) -> Result<Option<EventSession>, StoreError> {
        let session = sqlx::query_as::<_, EventSession>("SELECT * FROM event_sessions WHERE id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(session)
    }

    async fn ticket_types_for_event(&self, event_id: Uuid) -> Result<Vec<TicketType>, StoreError> {
        let rows = sqlx::query_as::<_, TicketType>(
            "SELECT * FROM ticket_types WHERE event_id = $1 ORDER BY created_at, id",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn place_order(&self, draft: OrderDraft) -> Result<PlacedOrder, StoreError> {
        let mut tx = self.pool.begin().await?;

        for (ticket_type_id, requested) in &draft.reservations {
            let reserved = sqlx::query(
                r#"
                    UPDATE ticket_types
                    SET available_quantity = available_quantity - $1, updated_at = $2
                    WHERE id = $3 AND event_id = $4 AND available_quantity >= $1
                "#,
            )
            .bind(requested)
            .bind(draft.order.created_at)
            .bind(ticket_type_id)
            .bind(draft.order.event_id)
            .execute(&mut *tx)
            .await?;

            if reserved.rows_affected() == 0 {
                // Dropping the transaction rolls back earlier reservations.
                return Err(StoreError::SoldOut {
                    ticket_type_id: *ticket_type_id,
                    requested: *requested,
                });
            }
        }

        let order = sqlx::query_as::<_, Order>(
            r#"
                INSERT INTO orders (id, event_id, user_id, session_id, status, confirmed_at, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING *
            "#,
        )
        .bind(draft.order.id)
        .bind(draft.order.event_id)
        .bind(draft.order.user_id)
        .bind(draft.order.session_id)
        .bind(draft.order.status)
        .bind(draft.order.confirmed_at)
        .bind(draft.order.created_at)
        .bind(draft.order.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        let mut items = Vec::with_capacity(draft.items.len());
        for item in &draft.items {
            let inserted = sqlx::query_as::<_, OrderItem>(
                r#"
                    INSERT INTO order_items
                        (id, order_id, ticket_type_id, quantity, unit_price, status, ticket_id, registration, version, created_at, updated_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    RETURNING *
                "#,
            )
            .bind(item.id)
            .bind(item.order_id)
            .bind(item.ticket_type_id)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.status)
            .bind(item.ticket_id)
            .bind(Json(&item.registration))
            .bind(item.version)
            .bind(item.created_at)
            .bind(item.updated_at)
            .fetch_one(&mut *tx)
            .await?;
            items.push(inserted);
        }

        let bill = sqlx::query_as::<_, Bill>(
            r#"
                INSERT INTO bills (id, order_id, amount, due_date, status, paid_at, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                RETURNING *
            "#,
        )
        .bind(draft.bill.id)
        .bind(draft.bill.order_id)
        .bind(draft.bill.amount)
        .bind(draft.bill.due_date)
        .bind(draft.bill.status)
        .bind(draft.bill.paid_at)
        .bind(draft.bill.created_at)
        .bind(draft.bill.updated_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(PlacedOrder { order, items, bill })
    }

    async fn order(&self, order_id: Uuid) -> Result<Option<Order>, StoreError> {
        let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1")
            .bind(order_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    async fn order_items(&self, order_id: Uuid) -> Result<Vec<OrderItem>, StoreError> {
        let rows = sqlx::query_as::<_, OrderItem>(
            "SELECT * FROM order_items WHERE order_id = $1 ORDER BY created_at, id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn order_item(&self, item_id: Uuid) -> Result<Option<OrderItem>, StoreError> {
        let item = sqlx::query_as::<_, OrderItem>("SELECT * FROM order_items WHERE id = $1")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    async fn confirm_order(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Conditional<Order>, StoreError> {
        let confirmed = sqlx::query_as::<_, Order>(
            r#"
                UPDATE orders
                SET status = 'confirmed', confirmed_at = $1, updated_at = $1
                WHERE id = $2 AND status = 'pending'
                RETURNING *
            "#,
        )
        .bind(at)
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        match confirmed {
            Some(order) => Ok(Conditional::Applied(order)),
            None => Ok(rejected_or_missing(self.order(order_id).await?)),
        }
    }

    async fn cancel_order(
        &self,
        order_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Conditional<Order>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Payment completion holds a share lock on the order row, so once this
        // lock is granted the payment check below sees every completion.
        let locked = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(current) = locked else {
            tx.rollback().await?;
            return Ok(Conditional::Missing);
        };

        let collected: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM payments WHERE order_id = $1 AND status = 'completed')",
        )
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;
        if current.status != OrderStatus::Pending || collected {
            tx.rollback().await?;
            return Ok(Conditional::Rejected(current));
        }

        let order = sqlx::query_as::<_, Order>(
            r#"
                UPDATE orders
                SET status = 'cancelled', updated_at = $1
                WHERE id = $2 AND status = 'pending'
                RETURNING *
            "#,
        )
        .bind(at)
        .bind(order_id)
        .fetch_one(&mut *tx)
        .await?;

        let released: Vec<(Uuid, i32)> = sqlx::query_as(
            r#"
                UPDATE order_items
                SET status = 'cancelled', version = version + 1, updated_at = $1
                WHERE order_id = $2 AND status = 'pending'
                RETURNING ticket_type_id, quantity
            "#,
        )
        .bind(at)
        .bind(order_id)
        .fetch_all(&mut *tx)
        .await?;

        let mut per_type: HashMap<Uuid, i32> = HashMap::new();
        for (ticket_type_id, quantity) in released {
            *per_type.entry(ticket_type_id).or_default() += quantity;
        }
        for (ticket_type_id, quantity) in per_type {
            sqlx::query(
                r#"
                    UPDATE ticket_types
                    SET available_quantity = available_quantity + $1, updated_at = $2
                    WHERE id = $3
                "#,
            )
            .bind(quantity)
            .bind(at)
            .bind(ticket_type_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE bills SET status = 'cancelled', updated_at = $1 WHERE order_id = $2")
            .bind(at)
            .bind(order_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Conditional::Applied(order))
    }

    async fn update_registration(
        &self,
        item_id: Uuid,
        expected_version: i32,
        form: RegistrationForm,
        at: DateTime<Utc>,
    ) -> Result<Conditional<OrderItem>, StoreError> {
        let updated = sqlx::query_as::<_, OrderItem>(
            r#"
                UPDATE order_items
                SET registration = $1, version = version + 1, updated_at = $2
                WHERE id = $3 AND status = 'pending' AND version = $4
                RETURNING *
            "#,
        )
        .bind(Json(Some(form)))
        .bind(at)
        .bind(item_id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(item) => Ok(Conditional::Applied(item)),
            None => Ok(rejected_or_missing(self.order_item(item_id).await?)),
        }
    }

    async fn bills_for_order(&self, order_id: Uuid) -> Result<Vec<Bill>, StoreError> {
        let rows = sqlx::query_as::<_, Bill>(
            "SELECT * FROM bills WHERE order_id = $1 ORDER BY created_at, id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_bill_status(
        &self,
        bill_id: Uuid,
        status: BillStatus,
        paid_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) -> Result<Conditional<Bill>, StoreError> {
        let updated = sqlx::query_as::<_, Bill>(
            r#"
                UPDATE bills
                SET status = $1, paid_at = $2, updated_at = $3
                WHERE id = $4 AND status <> 'cancelled'
                RETURNING *
            "#,
        )
        .bind(status)
        .bind(paid_at)
        .bind(at)
        .bind(bill_id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(bill) => Ok(Conditional::Applied(bill)),
            None => {
                let current = sqlx::query_as::<_, Bill>("SELECT * FROM bills WHERE id = $1")
                    .bind(bill_id)
                    .fetch_optional(&self.pool)
                    .await?;
                Ok(rejected_or_missing(current))
            }
        }
    }

    async fn payments_for_order(&self, order_id: Uuid) -> Result<Vec<Payment>, StoreError> {
        let rows = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE order_id = $1 ORDER BY created_at, id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn payment(&self, payment_id: Uuid) -> Result<Option<Payment>, StoreError> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE id = $1")
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    async fn append_payment(&self, payment: Payment) -> Result<Payment, StoreError> {
        let inserted = sqlx::query_as::<_, Payment>(
            r#"
                INSERT INTO payments
                    (id, bill_id, order_id, amount, status, payment_method, transaction_id, processed_at, failed_at, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                RETURNING *
            "#,
        )
        .bind(payment.id)
        .bind(payment.bill_id)
        .bind(payment.order_id)
        .bind(payment.amount)
        .bind(payment.status)
        .bind(payment.payment_method)
        .bind(&payment.transaction_id)
        .bind(payment.processed_at)
        .bind(payment.failed_at)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted)
    }

    async fn transition_payment(
        &self,
        payment_id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        transaction_id: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Conditional<Payment>, StoreError> {
        let processed_at = (to == PaymentStatus::Completed).then_some(at);
        let failed_at =
            matches!(to, PaymentStatus::Failed | PaymentStatus::Cancelled).then_some(at);

        let mut tx = self.pool.begin().await?;

        // Share-lock the owning order so a concurrent cancel waits for us, or
        // we see its result.
        let order_status: Option<OrderStatus> = sqlx::query_scalar(
            r#"
                SELECT o.status
                FROM orders o
                JOIN payments p ON p.order_id = o.id
                WHERE p.id = $1
                FOR SHARE OF o
            "#,
        )
        .bind(payment_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(order_status) = order_status else {
            tx.rollback().await?;
            return Ok(Conditional::Missing);
        };
        if to.counts_toward_paid() && order_status == OrderStatus::Cancelled {
            tx.rollback().await?;
            return Ok(rejected_or_missing(self.payment(payment_id).await?));
        }

        let updated = sqlx::query_as::<_, Payment>(
            r#"
                UPDATE payments
                SET status = $1,
                    transaction_id = COALESCE($2, transaction_id),
                    processed_at = COALESCE($3, processed_at),
                    failed_at = COALESCE($4, failed_at),
                    updated_at = $5
                WHERE id = $6 AND status = $7
                RETURNING *
            "#,
        )
        .bind(to)
        .bind(transaction_id)
        .bind(processed_at)
        .bind(failed_at)
        .bind(at)
        .bind(payment_id)
        .bind(from)
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;

        match updated {
            Some(payment) => Ok(Conditional::Applied(payment)),
            None => Ok(rejected_or_missing(self.payment(payment_id).await?)),
        }
    }

    async fn issue_ticket(
        &self,
        ticket: Ticket,
        at: DateTime<Utc>,
    ) -> Result<Conditional<OrderItem>, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Claim the item first: a concurrent claimer blocks on the row lock and
        // then sees the guard fail. The ticket FK is deferred to commit.
        let claimed = sqlx::query_as::<_, OrderItem>(
            r#"
                UPDATE order_items
                SET status = 'issued', ticket_id = $1, version = version + 1, updated_at = $2
                WHERE id = $3 AND status = 'pending' AND ticket_id IS NULL
                RETURNING *
            "#,
        )
        .bind(ticket.id)
        .bind(at)
        .bind(ticket.order_item_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(item) = claimed else {
            tx.rollback().await?;
            return Ok(rejected_or_missing(self.order_item(ticket.order_item_id).await?));
        };

        sqlx::query(
            r#"
                INSERT INTO tickets
                    (id, order_id, order_item_id, event_id, session_id, ticket_type_id, status, used_at, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(ticket.id)
        .bind(ticket.order_id)
        .bind(ticket.order_item_id)
        .bind(ticket.event_id)
        .bind(ticket.session_id)
        .bind(ticket.ticket_type_id)
        .bind(ticket.status)
        .bind(ticket.used_at)
        .bind(ticket.created_at)
        .bind(ticket.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Conditional::Applied(item))
    }

    async fn ticket(&self, ticket_id: Uuid) -> Result<Option<Ticket>, StoreError> {
        let ticket = sqlx::query_as::<_, Ticket>("SELECT * FROM tickets WHERE id = $1")
            .bind(ticket_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ticket)
    }

    async fn tickets_for_order(&self, order_id: Uuid) -> Result<Vec<Ticket>, StoreError> {
        let rows = sqlx::query_as::<_, Ticket>(
            "SELECT * FROM tickets WHERE order_id = $1 ORDER BY created_at, id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn redeem_ticket(
        &self,
        ticket_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<Conditional<Ticket>, StoreError> {
        let redeemed = sqlx::query_as::<_, Ticket>(
            r#"
                UPDATE tickets
                SET status = 'used', used_at = $1, updated_at = $1
                WHERE id = $2 AND status = 'issued'
                RETURNING *
            "#,
        )
        .bind(at)
        .bind(ticket_id)
        .fetch_optional(&self.pool)
        .await?;

        match redeemed {
            Some(ticket) => Ok(Conditional::Applied(ticket)),
            None => Ok(rejected_or_missing(self.ticket(ticket_id).await?)),
        }
    }
}

// Run against a scratch database:
//   DATABASE_URL=postgres://... cargo test store::postgres -- --ignored
#[cfg(test)]
mod tests {
    use chrono::Duration;
    use rust_decimal::Decimal;

    use super::*;
    use crate::models::{OrderItemStatus, PaymentMethod, PaymentUpdate, TicketStatus};
    use crate::services::checkout::{self, PlaceOrder, TicketSelection};
    use crate::services::ledger::{self, RecordPayment};
    use crate::services::{fulfillment, FulfillmentError};

    struct Catalog {
        event_id: Uuid,
        session_id: Uuid,
        general: Uuid,
        vip: Uuid,
    }

    async fn seed(pool: &PgPool) -> Catalog {
        let catalog = Catalog {
            event_id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            general: Uuid::new_v4(),
            vip: Uuid::new_v4(),
        };
        let start = Utc::now() + Duration::days(30);

        sqlx::query(
            "INSERT INTO events (id, organizer_id, title, location, start_time) VALUES ($1, $2, 'Rust Taipei Conf', 'Taipei', $3)",
        )
        .bind(catalog.event_id)
        .bind(Uuid::new_v4())
        .bind(start)
        .execute(pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO event_sessions (id, event_id, name, starts_at) VALUES ($1, $2, 'Day 1', $3)",
        )
        .bind(catalog.session_id)
        .bind(catalog.event_id)
        .bind(start)
        .execute(pool)
        .await
        .unwrap();
        for (id, name, available) in [(catalog.general, "General", 5), (catalog.vip, "VIP", 1)] {
            sqlx::query(
                r#"
                    INSERT INTO ticket_types (id, event_id, name, price, total_quantity, available_quantity)
                    VALUES ($1, $2, $3, 1000, $4, $4)
                "#,
            )
            .bind(id)
            .bind(catalog.event_id)
            .bind(name)
            .bind(available)
            .execute(pool)
            .await
            .unwrap();
        }

        catalog
    }

    fn request(catalog: &Catalog, selections: &[(Uuid, i32)]) -> PlaceOrder {
        PlaceOrder {
            event_id: catalog.event_id,
            session_id: catalog.session_id,
            user_id: Uuid::new_v4(),
            selections: selections
                .iter()
                .map(|&(ticket_type_id, quantity)| TicketSelection {
                    ticket_type_id,
                    quantity,
                    registrations: vec![],
                })
                .collect(),
        }
    }

    async fn available(pool: &PgPool, ticket_type_id: Uuid) -> i32 {
        sqlx::query_scalar("SELECT available_quantity FROM ticket_types WHERE id = $1")
            .bind(ticket_type_id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    async fn pay(store: &PgStore, order_id: Uuid, amount: i64, status: PaymentStatus) -> Payment {
        let payment = ledger::record_payment(
            store,
            order_id,
            RecordPayment {
                amount: Decimal::from(amount),
                payment_method: PaymentMethod::CreditCard,
                transaction_id: None,
            },
        )
        .await
        .unwrap();
        if status == PaymentStatus::Pending {
            return payment;
        }
        ledger::apply_payment_update(
            store,
            payment.id,
            PaymentUpdate {
                status,
                transaction_id: None,
            },
        )
        .await
        .unwrap()
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_issue_ticket_twice_keeps_first(pool: PgPool) {
        let catalog = seed(&pool).await;
        let store = PgStore::new(pool);
        let placed = checkout::place_order(&store, request(&catalog, &[(catalog.general, 1)]), Duration::hours(48))
            .await
            .unwrap();
        let item = &placed.items[0];
        let now = Utc::now();

        let first = Ticket::for_item(&placed.order, item, now);
        let first_id = first.id;
        match store.issue_ticket(first, now).await.unwrap() {
            Conditional::Applied(item) => {
                assert_eq!(item.status, OrderItemStatus::Issued);
                assert_eq!(item.ticket_id, Some(first_id));
            }
            other => panic!("expected first issuance to land, got {:?}", other),
        }

        let second = Ticket::for_item(&placed.order, item, now);
        match store.issue_ticket(second, now).await.unwrap() {
            Conditional::Rejected(item) => assert_eq!(item.ticket_id, Some(first_id)),
            other => panic!("expected second issuance to be rejected, got {:?}", other),
        }

        let tickets = store.tickets_for_order(placed.order.id).await.unwrap();
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].id, first_id);
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_concurrent_redemption_has_one_winner(pool: PgPool) {
        let catalog = seed(&pool).await;
        let store = PgStore::new(pool);
        let placed = checkout::place_order(&store, request(&catalog, &[(catalog.general, 1)]), Duration::hours(48))
            .await
            .unwrap();
        pay(&store, placed.order.id, 1000, PaymentStatus::Completed).await;
        let confirmation = fulfillment::confirm_order(&store, placed.order.id).await.unwrap();
        let ticket_id = confirmation.generated_tickets[0].id;

        let attempts: Vec<_> = (0..10)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.redeem_ticket(ticket_id, Utc::now()).await })
            })
            .collect();

        let mut applied = 0;
        for attempt in attempts {
            match attempt.await.unwrap().unwrap() {
                Conditional::Applied(_) => applied += 1,
                Conditional::Rejected(ticket) => assert_eq!(ticket.status, TicketStatus::Used),
                Conditional::Missing => panic!("ticket vanished"),
            }
        }
        assert_eq!(applied, 1);

        let ticket = store.ticket(ticket_id).await.unwrap().unwrap();
        assert_eq!(ticket.status, TicketStatus::Used);
        assert!(ticket.used_at.is_some());
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_sold_out_rolls_back_whole_order(pool: PgPool) {
        let catalog = seed(&pool).await;
        let store = PgStore::new(pool.clone());
        let placed = checkout::place_order(
            &store,
            request(&catalog, &[(catalog.general, 2), (catalog.vip, 1)]),
            Duration::hours(48),
        )
        .await
        .unwrap();
        assert_eq!(available(&pool, catalog.general).await, 3);
        assert_eq!(available(&pool, catalog.vip).await, 0);

        // Same shape again: general still has room, vip does not.
        let mut order = placed.order.clone();
        order.id = Uuid::new_v4();
        let items = placed
            .items
            .iter()
            .map(|item| OrderItem {
                id: Uuid::new_v4(),
                order_id: order.id,
                ..item.clone()
            })
            .collect();
        let bill = Bill {
            id: Uuid::new_v4(),
            order_id: order.id,
            ..placed.bill.clone()
        };
        let draft = OrderDraft {
            order: order.clone(),
            items,
            bill,
            reservations: vec![(catalog.general, 2), (catalog.vip, 1)],
        };

        let err = store.place_order(draft).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::SoldOut { ticket_type_id, requested: 1 } if ticket_type_id == catalog.vip
        ));
        assert_eq!(available(&pool, catalog.general).await, 3);
        assert!(store.order(order.id).await.unwrap().is_none());
        assert!(store.order_items(order.id).await.unwrap().is_empty());
    }

    #[sqlx::test]
    #[ignore = "requires DATABASE_URL"]
    async fn test_cancel_and_payment_completion_exclude_each_other(pool: PgPool) {
        let catalog = seed(&pool).await;
        let store = PgStore::new(pool.clone());

        let paid = checkout::place_order(&store, request(&catalog, &[(catalog.general, 1)]), Duration::hours(48))
            .await
            .unwrap();
        pay(&store, paid.order.id, 1000, PaymentStatus::Completed).await;
        let err = checkout::cancel_order(&store, paid.order.id).await.unwrap_err();
        assert!(matches!(err, FulfillmentError::Conflict(_)));
        let order = store.order(paid.order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(available(&pool, catalog.general).await, 4);

        let unpaid = checkout::place_order(&store, request(&catalog, &[(catalog.general, 1)]), Duration::hours(48))
            .await
            .unwrap();
        let payment = pay(&store, unpaid.order.id, 1000, PaymentStatus::Pending).await;
        checkout::cancel_order(&store, unpaid.order.id).await.unwrap();
        assert_eq!(available(&pool, catalog.general).await, 4);

        let late = store
            .transition_payment(payment.id, PaymentStatus::Pending, PaymentStatus::Completed, None, Utc::now())
            .await
            .unwrap();
        match late {
            Conditional::Rejected(current) => assert_eq!(current.status, PaymentStatus::Pending),
            other => panic!("expected completion to be refused, got {:?}", other),
        }

        let failed = store
            .transition_payment(payment.id, PaymentStatus::Pending, PaymentStatus::Failed, None, Utc::now())
            .await
            .unwrap();
        assert!(matches!(failed, Conditional::Applied(p) if p.status == PaymentStatus::Failed));
    }
}
