use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::app::AppState;
use crate::db;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub services: ServiceHealth,
}

#[derive(Serialize)]
pub struct ServiceHealth {
    pub database: String,
    /// `disabled` when no Redis URL is configured
    pub cache: String,
}

/// Health check endpoint - public
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let redis = state.cpv_cache.redis();

    let (db_ok, cache_status) = tokio::join!(db::health_check(&state.db), async {
        match redis {
            Some(cache) => match cache.health_check().await {
                Ok(()) => "ok",
                Err(_) => "error",
            },
            None => "disabled",
        }
    });

    let status = match (db_ok, cache_status) {
        (false, _) => "unhealthy",
        (true, "error") => "degraded",
        _ => "healthy",
    };

    // Only the database is critical
    let status_code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            services: ServiceHealth {
                database: if db_ok { "ok" } else { "error" }.to_string(),
                cache: cache_status.to_string(),
            },
        }),
    )
}
