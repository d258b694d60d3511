use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::api::AppState;
use crate::database::{self, PoolStats};

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub environment: String,
    pub database: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolStats>,
    /// Enabled payment methods with a configured gateway
    pub gateways: Vec<String>,
    pub webhook_sources: Vec<String>,
}

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, StatusCode> {
    let version = env!("CARGO_PKG_VERSION").to_string();

    let database = match &state.db {
        Some(pool) => match database::health_check(pool).await {
            Ok(()) => "ok",
            Err(e) => {
                tracing::error!("Database health check failed: {}", e);
                return Err(StatusCode::SERVICE_UNAVAILABLE);
            }
        },
        None => "in_memory",
    };

    let response = HealthResponse {
        status: "healthy".to_string(),
        version,
        environment: state.environment.clone(),
        database: database.to_string(),
        pool: state.db.as_ref().map(database::get_pool_stats),
        gateways: state
            .checkout
            .available_methods()
            .iter()
            .map(ToString::to_string)
            .collect(),
        webhook_sources: state
            .reconciler
            .providers()
            .iter()
            .map(ToString::to_string)
            .collect(),
    };

    Ok(Json(response))
}
