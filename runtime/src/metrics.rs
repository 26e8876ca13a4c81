//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the reservation engine:
//! - Joins, waitlist entries and rejections
//! - Hold lifecycle (created, confirmed, expired, errors)
//! - Idempotency cache hits
//! - Notifier failures and lock contention
//! - Reconciler sweeps
//!
//! # Example
//!
//! ```rust,no_run
//! use courtside_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Serve `server.render()` from an HTTP route for Prometheus to scrape.
//! # Ok(())
//! # }
//! ```

use courtside_core::Reason;
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics recorder and renderer.
///
/// Installs the global recorder; the HTTP exposition is served by the caller.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address the exposition endpoint is served on (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Address the exposition endpoint is served on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if metrics exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs a
    /// warning and succeeds without a handle.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(addr = %self.addr, "Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the recorder hasn't been installed by this server.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Join metrics
    describe_counter!(
        "reservations_joined_total",
        "Reservations committed by direct join, confirmation or promotion"
    );
    describe_counter!(
        "reservations_waitlisted_total",
        "Subjects added to a waitlist"
    );
    describe_counter!(
        "reservations_rejected_total",
        "Join requests that created nothing, by reason"
    );
    describe_counter!(
        "waitlist_promotions_total",
        "Waitlisted subjects promoted into a reservation"
    );

    // Hold metrics
    describe_counter!("holds_created_total", "Holds created or renewed");
    describe_counter!("holds_confirmed_total", "Holds converted into reservations");
    describe_counter!(
        "holds_expired_total",
        "Holds deleted after their expiry"
    );
    describe_counter!(
        "holds_errors_total",
        "Hold operations that did not succeed, by action and reason"
    );

    // Cross-cutting
    describe_counter!(
        "idempotency_hits_total",
        "Requests answered from the idempotency cache"
    );
    describe_counter!(
        "notifier_failures_total",
        "Notifications the notifier failed to deliver"
    );
    describe_counter!(
        "lock_timeouts_total",
        "Event row locks not acquired within the lock timeout"
    );
    describe_histogram!(
        "event_lock_wait_seconds",
        "Time spent waiting for an event row lock"
    );
    describe_histogram!(
        "reconciler_sweep_duration_seconds",
        "Time taken by one hold expiry sweep"
    );

    // Retry Metrics
    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!(
        "retry_successes_total",
        "Total number of successful retries"
    );
    describe_counter!(
        "retry_exhausted_total",
        "Total number of retry attempts that exhausted max retries"
    );
}

/// Join and waitlist metrics recorder.
pub struct ReservationMetrics;

impl ReservationMetrics {
    /// Record committed reservations.
    pub fn record_joined(count: usize) {
        counter!("reservations_joined_total").increment(count as u64);
    }

    /// Record a subject added to a waitlist.
    pub fn record_waitlisted() {
        counter!("reservations_waitlisted_total").increment(1);
    }

    /// Record a join that created nothing.
    pub fn record_rejected(reason: Reason) {
        counter!("reservations_rejected_total", "reason" => reason.as_str()).increment(1);
    }

    /// Record subjects promoted from a waitlist.
    pub fn record_promoted(count: usize) {
        if count > 0 {
            counter!("waitlist_promotions_total").increment(count as u64);
            Self::record_joined(count);
        }
    }
}

/// Hold lifecycle metrics recorder.
pub struct HoldMetrics;

impl HoldMetrics {
    /// Record a created or renewed hold.
    pub fn record_created() {
        counter!("holds_created_total").increment(1);
    }

    /// Record a confirmed hold.
    pub fn record_confirmed() {
        counter!("holds_confirmed_total").increment(1);
        ReservationMetrics::record_joined(1);
    }

    /// Record holds deleted after expiry.
    pub fn record_expired(count: usize) {
        counter!("holds_expired_total").increment(count as u64);
    }

    /// Record a failed hold operation.
    pub fn record_error(action: &'static str, reason: Reason) {
        counter!("holds_errors_total", "action" => action, "reason" => reason.as_str()).increment(1);
    }
}

/// Cross-cutting engine metrics recorder.
pub struct EngineMetrics;

impl EngineMetrics {
    /// Record a request answered from the idempotency cache.
    pub fn record_idempotency_hit() {
        counter!("idempotency_hits_total").increment(1);
    }

    /// Record a failed notification.
    pub fn record_notifier_failure() {
        counter!("notifier_failures_total").increment(1);
    }

    /// Record a lock timeout.
    pub fn record_lock_timeout() {
        counter!("lock_timeouts_total").increment(1);
    }
}

/// Reconciler metrics recorder.
pub struct ReconcilerMetrics;

impl ReconcilerMetrics {
    /// Record one sweep.
    pub fn record_sweep(duration: Duration) {
        histogram!("reconciler_sweep_duration_seconds").record(duration.as_secs_f64());
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        ReservationMetrics::record_rejected(Reason::Full);
        HoldMetrics::record_created();
        HoldMetrics::record_error("confirm", Reason::Expired);

        // If another test installed the recorder first, handle is None and
        // metrics still go to that recorder.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("reservations_rejected_total"));
            assert!(rendered.contains("holds_created_total"));
            assert!(rendered.contains("reason=\"expired\""));
        }
    }
}
