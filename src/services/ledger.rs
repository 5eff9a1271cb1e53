//! Payment ledger reconciliation.
//!
//! Whether a bill is paid is decided from the sum of its `completed` payments.
//! `Bill.status` is only refreshed from that sum for display and is never read
//! back as a gate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::FulfillmentError;
use crate::models::{
    Bill, BillStatus, OrderStatus, Payment, PaymentMethod, PaymentStatus, PaymentUpdate,
};
use crate::store::{Conditional, FulfillmentStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStanding {
    /// Completed payments cover the amount.
    Settled,
    /// Some, but not enough, has been paid.
    Partial,
    /// Nothing has been paid.
    Unsettled,
    /// The bill was cancelled with its order.
    Void,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnpaidBill {
    pub bill_id: Uuid,
    pub amount: Decimal,
    pub paid: Decimal,
    pub status: BillStatus,
    pub standing: BillStanding,
}

#[derive(Debug, Clone)]
pub struct BillReconciliation {
    pub bill: Bill,
    pub paid: Decimal,
    pub standing: BillStanding,
}

impl BillReconciliation {
    /// `Bill.status` and the ledger disagree about whether the bill is paid.
    pub fn has_drift(&self) -> bool {
        match self.bill.status {
            BillStatus::Cancelled => false,
            BillStatus::Paid => self.standing != BillStanding::Settled,
            _ => self.standing == BillStanding::Settled,
        }
    }

    fn as_unpaid(&self) -> UnpaidBill {
        UnpaidBill {
            bill_id: self.bill.id,
            amount: self.bill.amount,
            paid: self.paid,
            status: self.bill.status,
            standing: self.standing,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LedgerSummary {
    pub total_due: Decimal,
    pub total_paid: Decimal,
    pub bills: Vec<BillReconciliation>,
}

impl LedgerSummary {
    pub fn reconcile(bills: &[Bill], payments: &[Payment]) -> Self {
        let total_due = bills.iter().map(|b| b.amount).sum();
        let total_paid = completed_sum(payments.iter());

        let bills = bills
            .iter()
            .map(|bill| {
                let paid = completed_sum(payments.iter().filter(|p| p.bill_id == bill.id));
                let standing = if bill.status == BillStatus::Cancelled {
                    BillStanding::Void
                } else if paid >= bill.amount {
                    BillStanding::Settled
                } else if paid > Decimal::ZERO {
                    BillStanding::Partial
                } else {
                    BillStanding::Unsettled
                };
                BillReconciliation {
                    bill: bill.clone(),
                    paid,
                    standing,
                }
            })
            .collect();

        Self {
            total_due,
            total_paid,
            bills,
        }
    }

    pub fn is_paid(&self) -> bool {
        self.total_paid >= self.total_due
    }

    pub fn remaining(&self) -> Decimal {
        (self.total_due - self.total_paid).max(Decimal::ZERO)
    }

    /// Every bill the ledger does not fully cover.
    pub fn unpaid_bills(&self) -> Vec<UnpaidBill> {
        self.bills
            .iter()
            .filter(|b| b.standing != BillStanding::Settled)
            .map(BillReconciliation::as_unpaid)
            .collect()
    }

    /// Bills with nothing settled against them at all, or voided.
    pub fn blocking_bills(&self) -> Vec<UnpaidBill> {
        self.bills
            .iter()
            .filter(|b| matches!(b.standing, BillStanding::Unsettled | BillStanding::Void))
            .map(BillReconciliation::as_unpaid)
            .collect()
    }

    pub fn drifted_bills(&self) -> Vec<Uuid> {
        self.bills
            .iter()
            .filter(|b| b.has_drift())
            .map(|b| b.bill.id)
            .collect()
    }

    /// The fulfillment payment gate: no blocking bills, then enough paid overall.
    /// Overpayment passes.
    pub fn ensure_paid(&self) -> Result<(), FulfillmentError> {
        let blocking = self.blocking_bills();
        if !blocking.is_empty() {
            return Err(FulfillmentError::PaymentIncomplete {
                unpaid_bills: blocking,
            });
        }
        if !self.is_paid() {
            return Err(FulfillmentError::InsufficientPayment {
                required: self.total_due,
                paid: self.total_paid,
                remaining: self.remaining(),
            });
        }
        Ok(())
    }
}

fn completed_sum<'a>(payments: impl Iterator<Item = &'a Payment>) -> Decimal {
    payments
        .filter(|p| p.status.counts_toward_paid())
        .map(|p| p.amount)
        .sum()
}

/// The status a bill should display given its ledger entries.
pub fn display_status(bill: &Bill, payments: &[Payment]) -> BillStatus {
    if bill.status == BillStatus::Cancelled {
        return BillStatus::Cancelled;
    }

    let own: Vec<&Payment> = payments.iter().filter(|p| p.bill_id == bill.id).collect();
    if completed_sum(own.iter().copied()) >= bill.amount {
        return BillStatus::Paid;
    }
    if own.iter().any(|p| p.status == PaymentStatus::Processing) {
        return BillStatus::Verifying;
    }

    let latest = own.iter().max_by_key(|p| (p.created_at, p.id));
    match latest.map(|p| p.status) {
        Some(PaymentStatus::Failed | PaymentStatus::Cancelled) => BillStatus::Failed,
        _ => BillStatus::Pending,
    }
}

/// Rewrites each bill's display status from the ledger where it differs.
pub async fn refresh_bill_statuses(
    store: &dyn FulfillmentStore,
    order_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Vec<Bill>, StoreError> {
    let bills = store.bills_for_order(order_id).await?;
    let payments = store.payments_for_order(order_id).await?;

    let mut refreshed = Vec::with_capacity(bills.len());
    for bill in bills {
        let status = display_status(&bill, &payments);
        if status == bill.status {
            refreshed.push(bill);
            continue;
        }

        let paid_at = (status == BillStatus::Paid).then(|| bill.paid_at.unwrap_or(now));
        match store.set_bill_status(bill.id, status, paid_at, now).await? {
            Conditional::Applied(updated) => {
                debug!(bill_id = %updated.id, from = ?bill.status, to = ?updated.status, "Bill status refreshed from ledger");
                refreshed.push(updated);
            }
            Conditional::Rejected(current) => refreshed.push(current),
            Conditional::Missing => {}
        }
    }
    Ok(refreshed)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPayment {
    pub amount: Decimal,
    pub payment_method: PaymentMethod,
    pub transaction_id: Option<String>,
}

/// Appends a pending payment attempt against the order's bill.
pub async fn record_payment(
    store: &dyn FulfillmentStore,
    order_id: Uuid,
    request: RecordPayment,
) -> Result<Payment, FulfillmentError> {
    if request.amount <= Decimal::ZERO {
        return Err(FulfillmentError::Validation(
            "payment amount must be positive".to_string(),
        ));
    }

    let order = store
        .order(order_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("order", order_id))?;
    if order.status == OrderStatus::Cancelled {
        return Err(FulfillmentError::OrderCancelled(order_id));
    }

    let bill = store
        .bills_for_order(order_id)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| FulfillmentError::not_found("bill for order", order_id))?;
    if bill.status == BillStatus::Cancelled {
        return Err(FulfillmentError::Conflict(format!(
            "bill {} is cancelled",
            bill.id
        )));
    }

    let now = Utc::now();
    let payment = store
        .append_payment(Payment::new(
            bill.id,
            order_id,
            request.amount,
            request.payment_method,
            request.transaction_id,
            now,
        ))
        .await?;

    info!(
        payment_id = %payment.id,
        order_id = %order_id,
        amount = %payment.amount,
        method = ?payment.payment_method,
        "Payment attempt recorded"
    );

    refresh_bill_statuses(store, order_id, now).await?;
    Ok(payment)
}

/// Money may only be collected while the order and its bill are live.
async fn ensure_collectable(
    store: &dyn FulfillmentStore,
    payment: &Payment,
) -> Result<(), FulfillmentError> {
    let order = store
        .order(payment.order_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("order", payment.order_id))?;
    let bill_cancelled = store
        .bills_for_order(payment.order_id)
        .await?
        .iter()
        .any(|b| b.id == payment.bill_id && b.status == BillStatus::Cancelled);

    if order.status == OrderStatus::Cancelled || bill_cancelled {
        warn!(
            payment_id = %payment.id,
            order_id = %payment.order_id,
            "Refusing to complete a payment on a cancelled order"
        );
        return Err(FulfillmentError::OrderCancelled(payment.order_id));
    }
    Ok(())
}

/// Applies a status report from the payment provider. Replaying a report
/// that already landed is a no-op.
pub async fn apply_payment_update(
    store: &dyn FulfillmentStore,
    payment_id: Uuid,
    update: PaymentUpdate,
) -> Result<Payment, FulfillmentError> {
    let payment = store
        .payment(payment_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("payment", payment_id))?;

    if payment.status == update.status {
        debug!(payment_id = %payment_id, status = ?update.status, "Payment update already applied");
        return Ok(payment);
    }
    if !payment.status.can_transition_to(update.status) {
        return Err(FulfillmentError::Conflict(format!(
            "payment {} cannot move from {:?} to {:?}",
            payment_id, payment.status, update.status
        )));
    }

    if update.status.counts_toward_paid() {
        ensure_collectable(store, &payment).await?;
    }

    let now = Utc::now();
    let updated = match store
        .transition_payment(payment_id, payment.status, update.status, update.transaction_id, now)
        .await?
    {
        Conditional::Applied(updated) => {
            info!(
                payment_id = %payment_id,
                order_id = %updated.order_id,
                from = ?payment.status,
                to = ?updated.status,
                "Payment status updated"
            );
            updated
        }
        Conditional::Rejected(current) if current.status == update.status => current,
        // Unchanged row: the store refused to collect on a cancelled order.
        Conditional::Rejected(current) if current.status == payment.status => {
            return Err(FulfillmentError::OrderCancelled(current.order_id));
        }
        Conditional::Rejected(current) => {
            return Err(FulfillmentError::Conflict(format!(
                "payment {} moved to {:?} concurrently",
                payment_id, current.status
            )));
        }
        Conditional::Missing => return Err(FulfillmentError::not_found("payment", payment_id)),
    };

    let bills = refresh_bill_statuses(store, updated.order_id, now).await?;
    let payments = store.payments_for_order(updated.order_id).await?;
    let summary = LedgerSummary::reconcile(&bills, &payments);
    for bill_id in summary.drifted_bills() {
        warn!(bill_id = %bill_id, order_id = %updated.order_id, "Bill status disagrees with payment ledger");
    }

    Ok(updated)
}
