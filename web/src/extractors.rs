//! Custom Axum extractors.
//!
//! - `Subject`: the authenticated subject, from `X-Subject-Id`
//! - `IdempotencyKey`: optional client retry key, from `Idempotency-Key`
//!
//! Authentication happens upstream; the gateway forwards the subject id in a
//! header it controls.
//!
//! # Examples
//!
//! ```ignore
//! async fn handler(
//!     State(state): State<AppState<S>>,
//!     Subject(subject_id): Subject,
//!     IdempotencyKey(key): IdempotencyKey,
//! ) -> Result<Json<JoinOutcome>, AppError> {
//!     Ok(Json(state.engine.join(event_id, subject_id, key.as_deref()).await?))
//! }
//! ```

use crate::error::AppError;
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use courtside_core::SubjectId;

/// Header carrying the authenticated subject id.
pub const SUBJECT_ID_HEADER: &str = "X-Subject-Id";

/// Header carrying the client's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Longest accepted idempotency key.
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// The subject making the request.
///
/// Missing header → 401, malformed → 400.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subject(pub SubjectId);

#[async_trait]
impl<S> FromRequestParts<S> for Subject
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(SUBJECT_ID_HEADER)
            .ok_or_else(|| AppError::unauthorized("Missing X-Subject-Id header"))?;

        let id = raw
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .ok_or_else(|| AppError::bad_request("X-Subject-Id must be a positive integer"))?;

        Ok(Self(SubjectId::new(id)))
    }
}

/// Optional idempotency key.
///
/// Empty or oversized keys are rejected with 400.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdempotencyKey(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for IdempotencyKey
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(raw) = parts.headers.get(IDEMPOTENCY_KEY_HEADER) else {
            return Ok(Self(None));
        };

        let key = raw
            .to_str()
            .map_err(|_| AppError::bad_request("Idempotency-Key must be visible ASCII"))?
            .trim();
        if key.is_empty() || key.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(AppError::bad_request(format!(
                "Idempotency-Key must be 1 to {MAX_IDEMPOTENCY_KEY_LEN} characters"
            )));
        }

        Ok(Self(Some(key.to_string())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    fn parts(headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder();
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).expect("Valid request").into_parts().0
    }

    #[tokio::test]
    async fn test_subject_from_header() {
        let mut parts = parts(&[(SUBJECT_ID_HEADER, "42")]);
        let subject = Subject::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");
        assert_eq!(subject.0, SubjectId::new(42));
    }

    #[tokio::test]
    async fn test_subject_missing_is_unauthorized() {
        let mut parts = parts(&[]);
        let err = Subject::from_request_parts(&mut parts, &()).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_subject_malformed_is_bad_request() {
        for value in ["abc", "-1", "0"] {
            let mut parts = parts(&[(SUBJECT_ID_HEADER, value)]);
            let err = Subject::from_request_parts(&mut parts, &()).await.unwrap_err();
            assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_idempotency_key_optional() {
        let mut parts = parts(&[]);
        let key = IdempotencyKey::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");
        assert_eq!(key.0, None);

        let mut parts = parts_with_key("abc-123");
        let key = IdempotencyKey::from_request_parts(&mut parts, &())
            .await
            .expect("Should extract");
        assert_eq!(key.0.as_deref(), Some("abc-123"));
    }

    #[tokio::test]
    async fn test_idempotency_key_too_long() {
        let long = "k".repeat(MAX_IDEMPOTENCY_KEY_LEN + 1);
        let mut parts = parts_with_key(&long);
        let err = IdempotencyKey::from_request_parts(&mut parts, &())
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    fn parts_with_key(key: &str) -> Parts {
        parts(&[(IDEMPOTENCY_KEY_HEADER, key)])
    }
}
