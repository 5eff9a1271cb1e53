use serde::Serialize;
use uuid::Uuid;

use super::FulfillmentError;
use crate::models::{
    Bill, BillStatus, Order, OrderItem, OrderItemStatus, OrderStatus, Payment, Ticket,
};
use crate::store::FulfillmentStore;

/// Which stage an order is in, as shown to the attendee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderScenario {
    AwaitingPayment,
    UnderVerification,
    PaymentFailed,
    PaidAwaitingFulfillment,
    Fulfilled,
    Cancelled,
}

/// Derives the scenario from persisted rows alone.
pub fn classify(order: &Order, bill: Option<&Bill>, items: &[OrderItem]) -> OrderScenario {
    if order.status == OrderStatus::Cancelled {
        return OrderScenario::Cancelled;
    }

    let live_items = items
        .iter()
        .filter(|i| i.status != OrderItemStatus::Cancelled);
    let all_issued = live_items
        .clone()
        .all(|i| i.status == OrderItemStatus::Issued);
    let any_live = live_items.count() > 0;

    if order.status == OrderStatus::Confirmed && any_live && all_issued {
        return OrderScenario::Fulfilled;
    }
    if order.status == OrderStatus::Confirmed {
        return OrderScenario::PaidAwaitingFulfillment;
    }

    match bill.map(|b| b.status) {
        Some(BillStatus::Paid) => OrderScenario::PaidAwaitingFulfillment,
        Some(BillStatus::Verifying) => OrderScenario::UnderVerification,
        Some(BillStatus::Failed) => OrderScenario::PaymentFailed,
        Some(BillStatus::Cancelled) => OrderScenario::Cancelled,
        Some(BillStatus::Pending) | None => OrderScenario::AwaitingPayment,
    }
}

/// Everything an attendee sees for one order, scenario included.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub bill: Option<Bill>,
    pub payments: Vec<Payment>,
    pub tickets: Vec<Ticket>,
    pub scenario: OrderScenario,
}

pub async fn order_view(
    store: &dyn FulfillmentStore,
    order_id: Uuid,
) -> Result<OrderView, FulfillmentError> {
    let order = store
        .order(order_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("order", order_id))?;
    let items = store.order_items(order_id).await?;
    let bill = store.bills_for_order(order_id).await?.into_iter().next();
    let payments = store.payments_for_order(order_id).await?;
    let tickets = store.tickets_for_order(order_id).await?;
    let scenario = classify(&order, bill.as_ref(), &items);

    Ok(OrderView {
        order,
        items,
        bill,
        payments,
        tickets,
        scenario,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::*;

    fn order(status: OrderStatus) -> Order {
        let mut order = Order::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        order.status = status;
        order.confirmed_at = (status == OrderStatus::Confirmed).then(Utc::now);
        order
    }

    fn bill(order: &Order, status: BillStatus) -> Bill {
        let mut bill = Bill::new(order.id, Decimal::from(1000), Utc::now(), Utc::now());
        bill.status = status;
        bill
    }

    fn item(order: &Order, status: OrderItemStatus) -> OrderItem {
        let now = Utc::now();
        OrderItem {
            id: Uuid::new_v4(),
            order_id: order.id,
            ticket_type_id: Uuid::new_v4(),
            quantity: 1,
            unit_price: Decimal::from(1000),
            status,
            ticket_id: (status == OrderItemStatus::Issued).then(Uuid::new_v4),
            registration: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_pending_order_follows_bill_status() {
        let o = order(OrderStatus::Pending);
        let items = [item(&o, OrderItemStatus::Pending)];

        let cases = [
            (BillStatus::Pending, OrderScenario::AwaitingPayment),
            (BillStatus::Verifying, OrderScenario::UnderVerification),
            (BillStatus::Failed, OrderScenario::PaymentFailed),
            (BillStatus::Paid, OrderScenario::PaidAwaitingFulfillment),
        ];
        for (status, expected) in cases {
            assert_eq!(classify(&o, Some(&bill(&o, status)), &items), expected);
        }
        assert_eq!(classify(&o, None, &items), OrderScenario::AwaitingPayment);
    }

    #[test]
    fn test_confirmed_order_scenarios() {
        let o = order(OrderStatus::Confirmed);
        let b = bill(&o, BillStatus::Paid);

        let done = [
            item(&o, OrderItemStatus::Issued),
            item(&o, OrderItemStatus::Cancelled),
        ];
        assert_eq!(classify(&o, Some(&b), &done), OrderScenario::Fulfilled);

        let partial = [
            item(&o, OrderItemStatus::Issued),
            item(&o, OrderItemStatus::Pending),
        ];
        assert_eq!(
            classify(&o, Some(&b), &partial),
            OrderScenario::PaidAwaitingFulfillment
        );
    }

    #[tokio::test]
    async fn test_order_view_tracks_fulfillment() {
        let fx = crate::store::fixtures::Fixture::new().await;
        let (paid, _, _) = fx.paid_order(&[1, 1]).await;

        let view = order_view(fx.store.as_ref(), paid.id).await.unwrap();
        assert_eq!(view.items.len(), 2);
        assert_eq!(view.payments.len(), 1);
        assert!(view.tickets.is_empty());
        assert_eq!(view.scenario, OrderScenario::AwaitingPayment);

        crate::services::fulfillment::confirm_order(fx.store.as_ref(), paid.id)
            .await
            .unwrap();
        let view = order_view(fx.store.as_ref(), paid.id).await.unwrap();
        assert_eq!(view.tickets.len(), 2);
        assert_eq!(view.scenario, OrderScenario::Fulfilled);

        assert!(matches!(
            order_view(fx.store.as_ref(), Uuid::new_v4()).await,
            Err(FulfillmentError::NotFound { entity: "order", .. })
        ));
    }

    #[test]
    fn test_scenario_serializes_camel_case() {
        assert_eq!(
            serde_json::to_value(OrderScenario::PaidAwaitingFulfillment).unwrap(),
            "paidAwaitingFulfillment"
        );
        assert_eq!(
            serde_json::to_value(OrderScenario::AwaitingPayment).unwrap(),
            "awaitingPayment"
        );
    }

    #[test]
    fn test_cancelled_wins_and_classification_is_stable() {
        let o = order(OrderStatus::Cancelled);
        let b = bill(&o, BillStatus::Paid);
        let items = [item(&o, OrderItemStatus::Cancelled)];

        let first = classify(&o, Some(&b), &items);
        for _ in 0..10 {
            assert_eq!(classify(&o, Some(&b), &items), first);
        }
        assert_eq!(first, OrderScenario::Cancelled);
    }
}
