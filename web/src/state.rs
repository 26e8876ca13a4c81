//! Application state for Axum handlers.

use courtside_core::ReservationStore;
use courtside_runtime::ReservationEngine;
use std::sync::Arc;

/// State shared across all HTTP handlers.
///
/// Generic over the store so tests can serve the in-memory store and the
/// server the Postgres one.
pub struct AppState<S> {
    /// The reservation engine
    pub engine: Arc<ReservationEngine<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<S: ReservationStore> AppState<S> {
    /// Create application state around an engine.
    #[must_use]
    pub const fn new(engine: Arc<ReservationEngine<S>>) -> Self {
        Self { engine }
    }
}
