//! Router configuration.

use crate::handlers::{health_check, reservations};
use crate::middleware::{correlation_id_layer, no_store_layer};
use crate::state::AppState;
use axum::{
    Router,
    routing::{delete, get, post, put},
};
use courtside_core::ReservationStore;
use tower_http::trace::TraceLayer;

/// Build the reservation router.
///
/// Every response carries `Cache-Control: no-store` and `X-Correlation-ID`.
/// The server merges extra routes (metrics) before serving.
pub fn build_router<S: ReservationStore + 'static>(state: AppState<S>) -> Router {
    let events = Router::new()
        .route("/events/:id/join", post(reservations::join::<S>))
        .route("/events/:id/holds", post(reservations::create_hold::<S>))
        .route(
            "/events/:id/holds/:hold_id/confirm",
            post(reservations::confirm_hold::<S>),
        )
        .route(
            "/events/:id/holds/:hold_id",
            delete(reservations::release_hold::<S>),
        )
        .route(
            "/events/:id/holds/:hold_id/payment",
            put(reservations::attach_payment::<S>),
        )
        .route("/events/:id/leave", post(reservations::leave::<S>))
        .route("/events/:id/waitlist", delete(reservations::leave_waitlist::<S>))
        .route("/events/:id/status", get(reservations::status::<S>))
        .with_state(state);

    Router::new()
        .route("/health", get(health_check))
        .merge(events)
        .layer(no_store_layer())
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
}
