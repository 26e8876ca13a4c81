//! HTTP form of engine rejections and store failures.

use crate::middleware::ErrorCode;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use courtside_core::{Reason, ReservationError};
use serde::Serialize;
use std::fmt;

/// Error returned by handlers; rendered as `{"code", "message"}`.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    /// Logged, never sent
    source: Option<anyhow::Error>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            source: None,
        }
    }

    fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// The HTTP status.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// The machine-readable code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// 400, for malformed headers and bodies.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    /// 401, when no subject is named.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    /// 404 with the `not_found` reason code.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            Reason::NotFound.as_str(),
            format!("{resource} {id} not found"),
        )
    }

    /// Map a business rejection to its HTTP form.
    ///
    /// `not_found` and `invalid_hold` become 404, `expired` 410, everything
    /// else 409. The code is the reason's wire code.
    #[must_use]
    pub fn from_reason(reason: Reason) -> Self {
        let code = reason.as_str();
        match reason {
            Reason::NotFound => Self::new(StatusCode::NOT_FOUND, code, "Event not found"),
            Reason::InvalidHold => {
                Self::new(StatusCode::NOT_FOUND, code, "No such hold for this subject")
            }
            Reason::Expired => Self::new(StatusCode::GONE, code, "Hold has expired"),
            Reason::Cutoff => Self::new(StatusCode::CONFLICT, code, "Event cutoff has passed"),
            Reason::Full => Self::new(StatusCode::CONFLICT, code, "Event is full"),
            Reason::AlreadyParticipant => {
                Self::new(StatusCode::CONFLICT, code, "Subject already joined")
            }
            Reason::HoldPending => {
                Self::new(StatusCode::CONFLICT, code, "Subject has a pending hold")
            }
            Reason::WaitlistExists => {
                Self::new(StatusCode::CONFLICT, code, "Subject is already waitlisted")
            }
            Reason::Ok => internal().with_source(anyhow::anyhow!("ok outcome mapped to an error")),
        }
    }
}

fn internal() -> AppError {
    AppError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        "internal",
        "An internal error occurred",
    )
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(source) = &self.source {
            tracing::error!(status = %self.status, code = self.code, error = %source, "Store failure");
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        let mut response = (self.status, Json(body)).into_response();
        response
            .extensions_mut()
            .insert(ErrorCode(self.code.to_string()));
        response
    }
}

/// Retryable store failures become 503, the rest 500.
impl From<ReservationError> for AppError {
    fn from(err: ReservationError) -> Self {
        let base = match &err {
            ReservationError::LockTimeout(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "busy",
                "Event is busy, retry shortly",
            ),
            ReservationError::ConnectionError(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "unavailable",
                "Database temporarily unavailable",
            ),
            ReservationError::DatabaseError(_)
            | ReservationError::Corrupted { .. }
            | ReservationError::SerializationError(_) => internal(),
        };
        base.with_source(anyhow::Error::new(err))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        internal().with_source(err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use courtside_core::EventId;

    #[test]
    fn display_carries_code() {
        let err = AppError::not_found("Event", 123);
        assert_eq!(err.to_string(), "[not_found] Event 123 not found");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn reasons_map_to_statuses() {
        assert_eq!(AppError::from_reason(Reason::Full).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::from_reason(Reason::Cutoff).code(), "cutoff");
        assert_eq!(AppError::from_reason(Reason::Expired).status(), StatusCode::GONE);
        assert_eq!(
            AppError::from_reason(Reason::InvalidHold).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from_reason(Reason::Ok).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn lock_timeout_is_unavailable() {
        let err = AppError::from(ReservationError::LockTimeout(EventId::new(3)));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "busy");
        assert!(std::error::Error::source(&err).is_some());

        let err = AppError::from(ReservationError::DatabaseError("boom".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn response_is_tagged_with_code() {
        let response = AppError::from_reason(Reason::HoldPending).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.extensions().get::<ErrorCode>(),
            Some(&ErrorCode("hold_pending".to_string()))
        );
    }
}
