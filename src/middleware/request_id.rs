//! Request ID middleware for request tracing

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderName},
    middleware::Next,
    response::Response,
};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

/// Header name for request ID
pub const X_REQUEST_ID: &str = "x-request-id";

/// Sets a UUID request id when the caller sent none
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuid)
}

/// Copies the request id onto the response
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

tokio::task_local! {
    static CURRENT_REQUEST_ID: Option<String>;
}

/// Makes the request id visible to [`current_request_id`] while the request is handled
///
/// Must run inside [`set_request_id_layer`] so the header is already present.
pub async fn scope_request_id(request: Request, next: Next) -> Response {
    let id = request.headers().request_id().map(str::to_owned);
    CURRENT_REQUEST_ID.scope(id, next.run(request)).await
}

/// Request id of the request being handled, if any
pub fn current_request_id() -> Option<String> {
    CURRENT_REQUEST_ID.try_with(Clone::clone).ok().flatten()
}

/// Extension trait for extracting request ID from headers
pub trait RequestIdExt {
    fn request_id(&self) -> Option<&str>;
}

impl RequestIdExt for HeaderMap {
    fn request_id(&self) -> Option<&str> {
        self.get(X_REQUEST_ID)?.to_str().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiError;
    use axum::{body::Body, http::HeaderValue, routing::get, Router};
    use tower::ServiceExt;

    #[test]
    fn reads_request_id_header() {
        let mut headers = HeaderMap::new();
        assert_eq!(headers.request_id(), None);

        headers.insert(X_REQUEST_ID, HeaderValue::from_static("abc-123"));
        assert_eq!(headers.request_id(), Some("abc-123"));
    }

    #[test]
    fn no_request_id_outside_a_request() {
        assert_eq!(current_request_id(), None);
    }

    #[tokio::test]
    async fn error_body_carries_request_id() {
        let app = Router::new()
            .route("/missing", get(|| async { Err::<(), _>(ApiError::not_found("Tender not found")) }))
            .layer(axum::middleware::from_fn(scope_request_id))
            .layer(set_request_id_layer());

        let request = axum::http::Request::builder()
            .uri("/missing")
            .header(X_REQUEST_ID, "abc-123")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["request_id"], "abc-123");
        assert_eq!(body["message"], "Tender not found");
    }
}
