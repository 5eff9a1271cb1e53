use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

use crate::services::{FulfillmentError, UnpaidBill};
use crate::store::StoreError;
use crate::utils::response::error as error_response;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication error: {0}")]
    AuthError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment incomplete")]
    PaymentIncomplete { unpaid_bills: Vec<UnpaidBill> },

    #[error("Insufficient payment")]
    InsufficientPayment {
        required: Decimal,
        paid: Decimal,
        remaining: Decimal,
    },

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::AuthError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PaymentIncomplete { .. } => StatusCode::BAD_REQUEST,
            AppError::InsufficientPayment { .. } => StatusCode::BAD_REQUEST,
            AppError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::AuthError(_) => "AUTH_ERROR",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::PaymentIncomplete { .. } => "PAYMENT_INCOMPLETE",
            AppError::InsufficientPayment { .. } => "INSUFFICIENT_PAYMENT",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
        }
    }

    /// Diagnostic payload callers branch on; `None` for opaque errors.
    pub fn details(&self) -> Option<Value> {
        match self {
            AppError::PaymentIncomplete { unpaid_bills } => {
                Some(json!({ "unpaidBills": unpaid_bills }))
            }
            AppError::InsufficientPayment {
                required,
                paid,
                remaining,
            } => Some(json!({
                "totalRequired": required,
                "totalPaid": paid,
                "remaining": remaining,
            })),
            _ => None,
        }
    }

    fn log(&self) {
        match self {
            AppError::DatabaseError(e) => {
                error!(error = ?e, "Database error");
            }
            AppError::InternalServerError(msg) => {
                error!(message = %msg, "Internal error");
            }
            // Client-side outcomes are expected traffic.
            _ => {
                warn!(code = self.code(), message = %self, "Request rejected");
            }
        }
    }

    fn public_message(&self) -> String {
        match self {
            AppError::ValidationError(msg)
            | AppError::AuthError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg) => msg.clone(),
            AppError::PaymentIncomplete { unpaid_bills } => {
                format!("{} bill(s) have not been paid", unpaid_bills.len())
            }
            AppError::InsufficientPayment { remaining, .. } => {
                format!("Payment is short by {}", remaining)
            }
            AppError::DatabaseError(_) => "A database error occurred".to_string(),
            AppError::InternalServerError(_) => "An internal error occurred".to_string(),
        }
    }
}

impl From<FulfillmentError> for AppError {
    fn from(err: FulfillmentError) -> Self {
        match err {
            FulfillmentError::NotFound { .. } => AppError::NotFound(err.to_string()),
            FulfillmentError::PaymentIncomplete { unpaid_bills } => {
                AppError::PaymentIncomplete { unpaid_bills }
            }
            FulfillmentError::InsufficientPayment {
                required,
                paid,
                remaining,
            } => AppError::InsufficientPayment {
                required,
                paid,
                remaining,
            },
            FulfillmentError::OrderCancelled(_) | FulfillmentError::Conflict(_) => {
                AppError::Conflict(err.to_string())
            }
            FulfillmentError::Forbidden(msg) => AppError::Forbidden(msg),
            FulfillmentError::Validation(msg) => AppError::ValidationError(msg),
            FulfillmentError::Store(StoreError::SoldOut { .. }) => {
                AppError::Conflict(err.to_string())
            }
            FulfillmentError::Store(StoreError::Database(e)) => AppError::DatabaseError(e),
            FulfillmentError::Store(StoreError::Integrity(msg)) => {
                AppError::InternalServerError(msg)
            }
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::ValidationError(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::ValidationError(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        self.log();

        error_response(code, self.public_message(), self.details(), status)
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::models::BillStatus;
    use crate::services::ledger::BillStanding;

    #[test]
    fn test_payment_errors_carry_details() {
        let err = AppError::from(FulfillmentError::InsufficientPayment {
            required: Decimal::from(1000),
            paid: Decimal::from(999),
            remaining: Decimal::from(1),
        });

        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "INSUFFICIENT_PAYMENT");
        let details = err.details().unwrap();
        assert_eq!(details["totalRequired"], json!(Decimal::from(1000)));
        assert_eq!(details["remaining"], json!(Decimal::from(1)));

        let err = AppError::from(FulfillmentError::PaymentIncomplete {
            unpaid_bills: vec![UnpaidBill {
                bill_id: Uuid::nil(),
                amount: Decimal::from(1000),
                paid: Decimal::ZERO,
                status: BillStatus::Pending,
                standing: BillStanding::Unsettled,
            }],
        });
        assert_eq!(err.code(), "PAYMENT_INCOMPLETE");
        let details = err.details().unwrap();
        assert_eq!(details["unpaidBills"][0]["billId"], Uuid::nil().to_string());
    }

    #[test]
    fn test_store_errors_map_to_status() {
        let sold_out = AppError::from(FulfillmentError::Store(StoreError::SoldOut {
            ticket_type_id: Uuid::nil(),
            requested: 3,
        }));
        assert_eq!(sold_out.status_code(), StatusCode::CONFLICT);

        let integrity = AppError::from(FulfillmentError::Store(StoreError::Integrity(
            "dangling ticket".to_string(),
        )));
        assert_eq!(integrity.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(integrity.public_message(), "An internal error occurred");
        assert!(integrity.details().is_none());
    }

    #[test]
    fn test_not_found_and_cancelled() {
        let missing = AppError::from(FulfillmentError::NotFound {
            entity: "order",
            id: Uuid::nil(),
        });
        assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);

        let cancelled = AppError::from(FulfillmentError::OrderCancelled(Uuid::nil()));
        assert_eq!(cancelled.status_code(), StatusCode::CONFLICT);
    }
}
