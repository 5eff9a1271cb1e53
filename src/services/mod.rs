//! The order fulfillment core. Every operation is a free function over a
//! [`FulfillmentStore`](crate::store::FulfillmentStore); nothing here holds
//! state between calls.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::store::StoreError;

pub mod catalog;
pub mod checkout;
pub mod fulfillment;
pub mod ledger;
pub mod redemption;
pub mod scenario;

pub use ledger::UnpaidBill;

#[derive(Debug, Error)]
pub enum FulfillmentError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("{} bill(s) have not been paid", .unpaid_bills.len())]
    PaymentIncomplete { unpaid_bills: Vec<UnpaidBill> },

    #[error("insufficient payment: required {required}, paid {paid}, remaining {remaining}")]
    InsufficientPayment {
        required: Decimal,
        paid: Decimal,
        remaining: Decimal,
    },

    #[error("order {0} is cancelled")]
    OrderCancelled(Uuid),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FulfillmentError {
    pub(crate) fn not_found(entity: &'static str, id: Uuid) -> Self {
        FulfillmentError::NotFound { entity, id }
    }
}
