//! Reservation endpoints.
//!
//! - `POST /events/:id/join` - join, or queue when full
//! - `POST /events/:id/holds?ttl=` - take or renew a hold
//! - `POST /events/:id/holds/:hold_id/confirm` - convert a hold into a reservation
//! - `DELETE /events/:id/holds/:hold_id` - release a hold
//! - `PUT /events/:id/holds/:hold_id/payment` - attach a payment reference
//! - `POST /events/:id/leave` - leave in whatever state the subject is in
//! - `DELETE /events/:id/waitlist` - withdraw from the waitlist
//! - `GET /events/:id/status` - the subject's view of the event
//!
//! Every endpoint acts for the subject named by `X-Subject-Id`.

use crate::error::AppError;
use crate::extractors::{IdempotencyKey, Subject};
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use courtside_core::{
    EventId, EventStatus, HoldId, JoinOutcome, LeaveOutcome, Reason, ReservationStore,
};
use serde::{Deserialize, Serialize};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query string of a hold request.
#[derive(Debug, Default, Deserialize)]
pub struct HoldParams {
    /// Requested TTL in seconds (clamped by the engine)
    pub ttl: Option<i64>,
}

/// Body of a created hold.
#[derive(Debug, Serialize, Deserialize)]
pub struct HoldCreatedResponse {
    /// Hold identifier, needed to confirm
    pub hold_id: HoldId,
    /// When the hold lapses
    pub expires_at: DateTime<Utc>,
}

/// Body of a confirmed hold.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmResponse {
    /// Always true; failures are error responses
    pub joined: bool,
}

/// Body of a payment reference update.
#[derive(Debug, Deserialize)]
pub struct PaymentRefRequest {
    /// External payment identifier
    pub payment_ref: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// Join an event directly, or its waitlist when full.
///
/// Rejections other than `not_found` are reported in the body with 200;
/// the client decides what `full` or `cutoff` means to its user.
///
/// # Errors
///
/// 404 for an unknown event, 503 when the event lock is contended.
pub async fn join<S: ReservationStore + 'static>(
    State(state): State<AppState<S>>,
    Path(event_id): Path<EventId>,
    Subject(subject_id): Subject,
    IdempotencyKey(key): IdempotencyKey,
) -> Result<Json<JoinOutcome>, AppError> {
    let outcome = state
        .engine
        .join(event_id, subject_id, key.as_deref())
        .await?;
    if outcome.reason == Reason::NotFound {
        return Err(AppError::not_found("Event", event_id));
    }
    Ok(Json(outcome))
}

/// Take or renew a hold.
///
/// # Errors
///
/// 404 for an unknown event; 409 with `cutoff`, `full` or
/// `already_participant`; 503 when the event lock is contended.
pub async fn create_hold<S: ReservationStore + 'static>(
    State(state): State<AppState<S>>,
    Path(event_id): Path<EventId>,
    Query(params): Query<HoldParams>,
    Subject(subject_id): Subject,
    IdempotencyKey(key): IdempotencyKey,
) -> Result<(StatusCode, Json<HoldCreatedResponse>), AppError> {
    let outcome = state
        .engine
        .hold(event_id, subject_id, params.ttl, key.as_deref())
        .await?;
    match (outcome.hold_id, outcome.expires_at) {
        (Some(hold_id), Some(expires_at)) if outcome.created => Ok((
            StatusCode::CREATED,
            Json(HoldCreatedResponse {
                hold_id,
                expires_at,
            }),
        )),
        _ => Err(AppError::from_reason(outcome.reason)),
    }
}

/// Confirm a hold into a reservation.
///
/// # Errors
///
/// 404 `invalid_hold` or `not_found`, 410 `expired`, 409 `full`, 503 when
/// the event lock is contended.
pub async fn confirm_hold<S: ReservationStore + 'static>(
    State(state): State<AppState<S>>,
    Path((event_id, hold_id)): Path<(EventId, HoldId)>,
    Subject(subject_id): Subject,
    IdempotencyKey(key): IdempotencyKey,
) -> Result<Json<ConfirmResponse>, AppError> {
    let outcome = state
        .engine
        .confirm(event_id, hold_id, subject_id, key.as_deref())
        .await?;
    if outcome.joined {
        Ok(Json(ConfirmResponse { joined: true }))
    } else {
        Err(AppError::from_reason(outcome.reason))
    }
}

/// Release a live hold.
///
/// # Errors
///
/// 404 when the subject has no live hold with that id.
pub async fn release_hold<S: ReservationStore + 'static>(
    State(state): State<AppState<S>>,
    Path((event_id, hold_id)): Path<(EventId, HoldId)>,
    Subject(subject_id): Subject,
) -> Result<StatusCode, AppError> {
    let outcome = state
        .engine
        .release_hold(event_id, hold_id, subject_id)
        .await?;
    if outcome.removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("Hold", hold_id))
    }
}

/// Attach a payment reference to a live hold.
///
/// # Errors
///
/// 400 for an empty reference, 404 when the subject has no live hold with
/// that id.
pub async fn attach_payment<S: ReservationStore + 'static>(
    State(state): State<AppState<S>>,
    Path((event_id, hold_id)): Path<(EventId, HoldId)>,
    Subject(subject_id): Subject,
    Json(request): Json<PaymentRefRequest>,
) -> Result<StatusCode, AppError> {
    let payment_ref = request.payment_ref.trim();
    if payment_ref.is_empty() {
        return Err(AppError::bad_request("payment_ref must not be empty"));
    }
    let attached = state
        .engine
        .attach_payment_ref(event_id, hold_id, subject_id, payment_ref)
        .await?;
    if attached {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("Hold", hold_id))
    }
}

/// Leave an event.
///
/// # Errors
///
/// 503 when the event lock is contended.
pub async fn leave<S: ReservationStore + 'static>(
    State(state): State<AppState<S>>,
    Path(event_id): Path<EventId>,
    Subject(subject_id): Subject,
    IdempotencyKey(key): IdempotencyKey,
) -> Result<Json<LeaveOutcome>, AppError> {
    let outcome = state
        .engine
        .leave(event_id, subject_id, key.as_deref())
        .await?;
    Ok(Json(outcome))
}

/// Withdraw from the waitlist.
///
/// # Errors
///
/// 404 when the subject is not queued.
pub async fn leave_waitlist<S: ReservationStore + 'static>(
    State(state): State<AppState<S>>,
    Path(event_id): Path<EventId>,
    Subject(subject_id): Subject,
) -> Result<StatusCode, AppError> {
    if state.engine.leave_waitlist(event_id, subject_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("Waitlist entry for event", event_id))
    }
}

/// The subject's view of an event.
///
/// # Errors
///
/// 404 for an unknown event.
pub async fn status<S: ReservationStore + 'static>(
    State(state): State<AppState<S>>,
    Path(event_id): Path<EventId>,
    Subject(subject_id): Subject,
) -> Result<Json<EventStatus>, AppError> {
    state
        .engine
        .status(event_id, subject_id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Event", event_id))
}
