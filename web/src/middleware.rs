//! Request correlation and response headers.
//!
//! Every request runs inside an `http_request` span carrying its correlation
//! id. The id comes from `X-Correlation-ID` when the caller sends a valid UUID
//! and is generated otherwise; it is echoed back on the response and stored
//! in request extensions as [`CorrelationId`] for handlers that want it
//! (`Extension<CorrelationId>`).
//!
//! Error responses built from [`AppError`](crate::AppError) carry their wire
//! code in an [`ErrorCode`] response extension, which this layer logs next to
//! the correlation id so a client's report can be matched to the server's
//! record of the rejection.

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderValue, header::CACHE_CONTROL},
    response::Response,
};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::{Instrument, field};
use uuid::Uuid;

/// Header carrying the correlation id in both directions.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Correlation id of the request being served.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    /// Reuse the caller's id if it is a UUID, else mint one.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let supplied = headers
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| Uuid::parse_str(s.trim()).ok());
        Self(supplied.unwrap_or_else(Uuid::new_v4))
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Wire code of an error response, set by `AppError::into_response`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorCode(pub String);

/// Tag requests with a correlation id and log rejections under it.
#[must_use]
pub fn correlation_id_layer() -> CorrelationIdLayer {
    CorrelationIdLayer
}

/// See [`correlation_id_layer`].
#[derive(Clone, Debug)]
pub struct CorrelationIdLayer;

impl<S> Layer<S> for CorrelationIdLayer {
    type Service = CorrelationIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationIdMiddleware { inner }
    }
}

/// Service produced by [`CorrelationIdLayer`].
#[derive(Clone, Debug)]
pub struct CorrelationIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for CorrelationIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let correlation_id = CorrelationId::from_headers(req.headers());
        req.extensions_mut().insert(correlation_id);

        let span = tracing::info_span!(
            "http_request",
            %correlation_id,
            method = %req.method(),
            path = %req.uri().path(),
            status = field::Empty,
        );

        let fut = self.inner.call(req).instrument(span.clone());

        Box::pin(async move {
            let mut response = fut.await?;
            let status = response.status();
            span.record("status", status.as_u16());

            if let Some(ErrorCode(code)) = response.extensions().get::<ErrorCode>() {
                if status.is_server_error() {
                    tracing::warn!(parent: &span, %correlation_id, %status, code = %code, "Request failed");
                } else {
                    tracing::debug!(parent: &span, %correlation_id, %status, code = %code, "Request rejected");
                }
            }

            if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
                response.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
            Ok(response)
        })
    }
}

/// Mark every response as uncacheable.
///
/// Reservation state changes with every request; intermediaries must not
/// serve stale answers.
#[must_use]
pub fn no_store_layer() -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(CACHE_CONTROL, HeaderValue::from_static("no-store"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use crate::error::AppError;
    use axum::{
        Extension, Router,
        body::Body,
        http::{Request, StatusCode},
        routing::get,
    };
    use courtside_core::Reason;
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/ok", get(|| async { "ok" }))
            .route(
                "/id",
                get(|Extension(id): Extension<CorrelationId>| async move { id.to_string() }),
            )
            .route(
                "/full",
                get(|| async { Err::<(), _>(AppError::from_reason(Reason::Full)) }),
            )
            .layer(correlation_id_layer())
    }

    fn response_id(response: &Response) -> Uuid {
        let raw = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .expect("correlation header on every response")
            .to_str()
            .unwrap();
        Uuid::parse_str(raw).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn generates_id_when_missing() {
        let request = Request::builder().uri("/ok").body(Body::empty()).unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert_ne!(response_id(&response), Uuid::nil());
    }

    #[tokio::test]
    async fn echoes_supplied_id() {
        let supplied = Uuid::new_v4();
        let request = Request::builder()
            .uri("/ok")
            .header(CORRELATION_ID_HEADER, supplied.to_string())
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response_id(&response), supplied);
    }

    #[tokio::test]
    async fn replaces_malformed_id() {
        let request = Request::builder()
            .uri("/ok")
            .header(CORRELATION_ID_HEADER, "not-a-uuid")
            .body(Body::empty())
            .unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        response_id(&response);
    }

    #[tokio::test]
    async fn handlers_see_the_echoed_id() {
        let request = Request::builder().uri("/id").body(Body::empty()).unwrap();
        let response = app().oneshot(request).await.unwrap();

        let echoed = response_id(&response);
        assert_eq!(body_text(response).await, echoed.to_string());
    }

    #[tokio::test]
    async fn rejections_keep_their_code_and_id() {
        let request = Request::builder().uri("/full").body(Body::empty()).unwrap();
        let response = app().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            response.extensions().get::<ErrorCode>(),
            Some(&ErrorCode("full".to_string()))
        );
        response_id(&response);
    }

    #[tokio::test]
    async fn no_store_is_set() {
        let app = Router::new()
            .route("/ok", get(|| async { "ok" }))
            .layer(no_store_layer());
        let request = Request::builder().uri("/ok").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.headers().get(CACHE_CONTROL).unwrap(), "no-store");
    }
}
