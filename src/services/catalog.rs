use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::FulfillmentError;
use crate::models::{Event, FormTemplate, TicketType};
use crate::store::FulfillmentStore;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketAvailability {
    pub ticket_type_id: Uuid,
    pub name: String,
    pub price: Decimal,
    pub total_quantity: i32,
    pub available_quantity: i32,
    pub sold_out: bool,
    pub form_template: FormTemplate,
}

impl From<&TicketType> for TicketAvailability {
    fn from(ticket_type: &TicketType) -> Self {
        Self {
            ticket_type_id: ticket_type.id,
            name: ticket_type.name.clone(),
            price: ticket_type.price,
            total_quantity: ticket_type.total_quantity,
            available_quantity: ticket_type.available_quantity.max(0),
            sold_out: ticket_type.is_sold_out(),
            form_template: ticket_type.form_template,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAvailability {
    pub event: Event,
    pub ticket_types: Vec<TicketAvailability>,
}

pub async fn require_event(
    store: &dyn FulfillmentStore,
    event_id: Uuid,
) -> Result<Event, FulfillmentError> {
    store
        .event(event_id)
        .await?
        .ok_or_else(|| FulfillmentError::not_found("event", event_id))
}

pub async fn event_availability(
    store: &dyn FulfillmentStore,
    event_id: Uuid,
) -> Result<EventAvailability, FulfillmentError> {
    let event = require_event(store, event_id).await?;
    let ticket_types = store
        .ticket_types_for_event(event_id)
        .await?
        .iter()
        .map(TicketAvailability::from)
        .collect();

    Ok(EventAvailability {
        event,
        ticket_types,
    })
}
