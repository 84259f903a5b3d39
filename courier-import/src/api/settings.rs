//! Settings API endpoint
//!
//! POST /settings/geocoder_api_key

use crate::{ApiError, ApiResult, AppState};
use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct SetApiKeyRequest {
    pub api_key: String,
}

#[derive(Debug, Serialize)]
pub struct SetApiKeyResponse {
    pub success: bool,
    pub message: String,
}

/// POST /settings/geocoder_api_key
///
/// **Request:** `{"api_key": "..."}`
///
/// 1. Validate key (non-empty, non-whitespace)
/// 2. Write to database (authoritative)
/// 3. Hand the key to the live geocoder client
/// 4. Sync to TOML (best-effort)
pub async fn set_geocoder_api_key(
    State(state): State<AppState>,
    Json(payload): Json<SetApiKeyRequest>,
) -> ApiResult<Json<SetApiKeyResponse>> {
    if !crate::config::is_valid_key(&payload.api_key) {
        return Err(ApiError::bad_request(
            "API key cannot be empty or whitespace-only",
        ));
    }
    let key = payload.api_key.trim().to_string();

    crate::db::settings::set_geocoder_api_key(&state.db, &key)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to save API key to database: {}", e)))?;

    if let Some(client) = &state.geocoder_client {
        client.set_api_key(Some(key.clone())).await;
    }
    info!("Geocoder API key configured via settings endpoint");

    if let Some(path) = &state.toml_path {
        crate::config::sync_api_key_to_toml(&key, path);
    }

    Ok(Json(SetApiKeyResponse {
        success: true,
        message: "Geocoder API key configured successfully".to_string(),
    }))
}

/// Build settings routes
pub fn settings_routes() -> Router<AppState> {
    Router::new().route("/settings/geocoder_api_key", post(set_geocoder_api_key))
}
