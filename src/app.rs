use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Request},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::auth::JwtKeys;
use crate::config::Settings;
use crate::middleware::request_id::{
    propagate_request_id_layer, scope_request_id, set_request_id_layer, RequestIdExt, X_REQUEST_ID,
};
use crate::routes;
use crate::services::CpvTreeCache;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub settings: Settings,
    pub tokens: JwtKeys,
    /// CPV tree cache; also owns the optional Redis connection
    pub cpv_cache: CpvTreeCache,
}

impl AppState {
    pub fn new(db: PgPool, settings: Settings, cpv_cache: CpvTreeCache) -> Arc<Self> {
        let tokens = JwtKeys::from_settings(&settings);
        Arc::new(Self {
            db,
            settings,
            tokens,
            cpv_cache,
        })
    }
}

/// Build the complete application with all middleware
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.settings);

    // Spans at DEBUG keep INFO output to the handlers' own events
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<Body>| {
            tracing::debug_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = request.headers().request_id().unwrap_or("-"),
            )
        })
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    let body_limit = DefaultBodyLimit::max(state.settings.max_upload_bytes);

    Router::new()
        .merge(routes::api_router())
        // Middleware stack (applied bottom-up)
        .layer(body_limit)
        .layer(axum::middleware::from_fn(scope_request_id))
        .layer(propagate_request_id_layer())
        .layer(trace_layer)
        .layer(set_request_id_layer())
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_allow_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    // Longer preflight cache in development
    let max_age = if settings.env.is_dev() {
        std::time::Duration::from_secs(86400)
    } else {
        std::time::Duration::from_secs(3600)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::list([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::HeaderName::from_static(X_REQUEST_ID),
        ]))
        .allow_credentials(true)
        .max_age(max_age)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_settings;
    use axum::http::StatusCode;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let settings = test_settings();
        let db = PgPoolOptions::new()
            .connect_lazy(&settings.database_url)
            .unwrap();
        create_app(AppState::new(db, settings, CpvTreeCache::new(None)))
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_token() {
        for uri in ["/auth/me", "/memberships", "/procurement-tenders", "/sales-tenders", "/notifications"] {
            let response = test_app()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
            assert!(response.headers().contains_key(X_REQUEST_ID));
        }
    }

    #[tokio::test]
    async fn malformed_bearer_is_rejected() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/auth/me")
                    .header("authorization", "Bearer not-a-jwt")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let response = test_app()
            .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
