//! HTTP request handlers.

pub mod health;
pub mod reservations;

// Re-export common handler utilities
pub use health::health_check;
