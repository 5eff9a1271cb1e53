use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::config::{create_cors_layer, create_security_headers_layer};
use crate::handlers::{events, health_check, orders, payments, tickets, AppState};

pub fn create_routes(state: AppState) -> Router {
    let cors = create_cors_layer(&state.config);
    let security_headers = create_security_headers_layer(&state.config);

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/events/:event_id/availability",
            get(events::event_availability),
        )
        .route("/orders", post(orders::place_order))
        .route("/orders/:order_id", get(orders::get_order))
        .route("/orders/:order_id/cancel", post(orders::cancel_order))
        .route("/orders/:order_id/payments", post(payments::record_payment))
        .route(
            "/orders/:order_id/confirm",
            post(orders::confirm_order).get(orders::confirmation_status),
        )
        .route(
            "/order-items/:item_id/registration",
            put(orders::update_registration),
        )
        .route(
            "/payments/:payment_id/status",
            post(payments::update_payment_status),
        )
        .route("/tickets/verify/:ticket_id", get(tickets::verify_ticket))
        .route("/tickets/:ticket_id/check-in", post(tickets::check_in))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(security_headers)
        .layer(cors)
}
