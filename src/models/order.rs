use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use super::event::FormTemplate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Cancelled,
}

/// One checkout transaction. `confirmed_at` is set iff the order is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub session_id: Uuid,
    pub status: OrderStatus,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(event_id: Uuid, session_id: Uuid, user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_id,
            user_id,
            session_id,
            status: OrderStatus::Pending,
            confirmed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_consistent(&self) -> bool {
        (self.status == OrderStatus::Confirmed) == self.confirmed_at.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_item_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderItemStatus {
    Pending,
    Issued,
    Cancelled,
}

/// One issuance unit of an order. `ticket_id` is set iff the item is issued.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub ticket_type_id: Uuid,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub status: OrderItemStatus,
    pub ticket_id: Option<Uuid>,
    #[sqlx(json)]
    pub registration: Option<RegistrationForm>,
    /// Bumped on every write; guards registration edits.
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OrderItem {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    /// Still waiting for a ticket.
    pub fn is_issuable(&self) -> bool {
        self.status == OrderItemStatus::Pending && self.ticket_id.is_none()
    }

    pub fn is_consistent(&self) -> bool {
        (self.status == OrderItemStatus::Issued) == self.ticket_id.is_some()
    }
}

/// Attendee-supplied registration record, one shape per [`FormTemplate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "template", rename_all = "snake_case")]
pub enum RegistrationForm {
    #[serde(rename_all = "camelCase")]
    Basic { full_name: String, email: String },
    #[serde(rename_all = "camelCase")]
    Student {
        full_name: String,
        email: String,
        school: String,
        student_id: String,
    },
    #[serde(rename_all = "camelCase")]
    Corporate {
        full_name: String,
        email: String,
        company: String,
        job_title: String,
    },
}

impl RegistrationForm {
    pub fn template(&self) -> FormTemplate {
        match self {
            RegistrationForm::Basic { .. } => FormTemplate::Basic,
            RegistrationForm::Student { .. } => FormTemplate::Student,
            RegistrationForm::Corporate { .. } => FormTemplate::Corporate,
        }
    }

    /// Checks the record against the template the ticket type demands.
    pub fn validate_for(&self, expected: FormTemplate) -> Result<(), String> {
        if self.template() != expected {
            return Err(format!(
                "registration template {:?} does not match required {:?}",
                self.template(),
                expected
            ));
        }

        let (full_name, email) = match self {
            RegistrationForm::Basic { full_name, email }
            | RegistrationForm::Student {
                full_name, email, ..
            }
            | RegistrationForm::Corporate {
                full_name, email, ..
            } => (full_name, email),
        };

        if full_name.trim().is_empty() {
            return Err("fullName must not be empty".to_string());
        }
        if !is_plausible_email(email) {
            return Err(format!("'{}' is not a valid email address", email));
        }

        match self {
            RegistrationForm::Basic { .. } => Ok(()),
            RegistrationForm::Student {
                school, student_id, ..
            } => {
                if school.trim().is_empty() || student_id.trim().is_empty() {
                    Err("school and studentId are required".to_string())
                } else {
                    Ok(())
                }
            }
            RegistrationForm::Corporate {
                company, job_title, ..
            } => {
                if company.trim().is_empty() || job_title.trim().is_empty() {
                    Err("company and jobTitle are required".to_string())
                } else {
                    Ok(())
                }
            }
        }
    }
}

fn is_plausible_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student() -> RegistrationForm {
        RegistrationForm::Student {
            full_name: "Lin Mei".to_string(),
            email: "mei@example.edu".to_string(),
            school: "NTU".to_string(),
            student_id: "B1234".to_string(),
        }
    }

    #[test]
    fn test_registration_form_is_tagged_by_template() {
        let json = serde_json::to_value(student()).unwrap();
        assert_eq!(json["template"], "student");
        assert_eq!(json["studentId"], "B1234");

        let parsed: RegistrationForm = serde_json::from_value(serde_json::json!({
            "template": "basic",
            "fullName": "Ana",
            "email": "ana@example.com"
        }))
        .unwrap();
        assert_eq!(parsed.template(), FormTemplate::Basic);
    }

    #[test]
    fn test_registration_rejects_wrong_template() {
        let err = student().validate_for(FormTemplate::Corporate).unwrap_err();
        assert!(err.contains("does not match"));
    }

    #[test]
    fn test_registration_rejects_missing_fields() {
        let form = RegistrationForm::Corporate {
            full_name: "Ana".to_string(),
            email: "ana@example.com".to_string(),
            company: " ".to_string(),
            job_title: "CTO".to_string(),
        };
        assert!(form.validate_for(FormTemplate::Corporate).is_err());

        let bad_email = RegistrationForm::Basic {
            full_name: "Ana".to_string(),
            email: "ana.example.com".to_string(),
        };
        assert!(bad_email.validate_for(FormTemplate::Basic).is_err());
        assert!(student().validate_for(FormTemplate::Student).is_ok());
    }

    #[test]
    fn test_order_confirmed_at_invariant() {
        let mut order = Order::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        assert!(order.is_consistent());

        order.status = OrderStatus::Confirmed;
        assert!(!order.is_consistent());

        order.confirmed_at = Some(Utc::now());
        assert!(order.is_consistent());
    }
}
