use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;

use crate::api::AppState;
use crate::error::AppError;
use crate::webhooks::WebhookRequest;

/// POST /webhooks/:provider
///
/// Answers 200 for every authenticated delivery, including events that were
/// ignored or could not be matched to an order, so providers stop retrying.
pub async fn handle_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, AppError> {
    let headers = headers.iter().filter_map(|(name, value)| {
        value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
    });
    let request = WebhookRequest::new(provider, headers, body.to_vec());

    let outcome = state.reconciler.process(&request).await?;
    Ok(Json(json!({
        "received": true,
        "result": outcome.as_str(),
    })))
}
