//! Axum HTTP surface for the Courtside reservation engine.
//!
//! Handlers are thin: extract the subject and idempotency key, call one
//! [`ReservationEngine`](courtside_runtime::ReservationEngine) operation, and
//! map its outcome onto a status code.
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at Axum handler
//! 2. **Extract** event id (path), subject (`X-Subject-Id`), `Idempotency-Key`
//! 3. **Call** the engine, which locks the event and decides
//! 4. **Map** the outcome: success body, or [`AppError`] for rejections
//!
//! # Example
//!
//! ```ignore
//! use courtside_web::{AppState, build_router};
//!
//! let app = build_router(AppState::new(engine));
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{IDEMPOTENCY_KEY_HEADER, IdempotencyKey, SUBJECT_ID_HEADER, Subject};
pub use middleware::{
    CORRELATION_ID_HEADER, CorrelationId, ErrorCode, correlation_id_layer, no_store_layer,
};
pub use router::build_router;
pub use state::AppState;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
