//! sqlx error classification.

use courtside_core::error::ReservationError;
use courtside_core::types::EventId;

/// `lock_not_available`, raised when `lock_timeout` elapses.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Map a sqlx error, keeping transient connection failures retryable.
pub(crate) fn db_error(error: sqlx::Error, context: &str) -> ReservationError {
    match error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            ReservationError::ConnectionError(format!("{context}: {error}"))
        }
        other => ReservationError::DatabaseError(format!("{context}: {other}")),
    }
}

/// Map an error raised inside a locked-event transaction.
///
/// Any statement can hit `lock_timeout` on a row another transaction holds
/// (the event row itself, or a hold row the reconciler is deleting); all of
/// them surface as a retryable [`ReservationError::LockTimeout`].
pub(crate) fn event_error(
    error: sqlx::Error,
    event_id: EventId,
    context: &str,
) -> ReservationError {
    if is_lock_not_available(&error) {
        tracing::warn!(%event_id, context, "Event lock timeout");
        return ReservationError::LockTimeout(event_id);
    }
    db_error(error, context)
}

fn is_lock_not_available(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE))
}

/// `COUNT(*)` and `ROW_NUMBER()` come back as `BIGINT`.
pub(crate) fn to_count(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_timeouts_are_retryable() {
        assert!(db_error(sqlx::Error::PoolTimedOut, "x").is_retryable());
        assert!(!db_error(sqlx::Error::RowNotFound, "x").is_retryable());
    }

    #[test]
    fn event_errors_keep_non_lock_classification() {
        let event_id = EventId::new(4);
        assert!(event_error(sqlx::Error::PoolTimedOut, event_id, "x").is_retryable());
        assert!(matches!(
            event_error(sqlx::Error::RowNotFound, event_id, "x"),
            ReservationError::DatabaseError(_)
        ));
    }

    #[test]
    fn counts_saturate() {
        assert_eq!(to_count(-1), 0);
        assert_eq!(to_count(7), 7);
        assert_eq!(to_count(i64::MAX), u32::MAX);
    }
}
