//! Import workflow API handlers
//!
//! One session at a time; every handler delegates to the
//! [`ImportController`](crate::services::ImportController).

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    models::{CanonicalKey, CoordinateField, FieldMapping, GeocodeRow, ImportStep, PickerRequest},
    services::{PickerView, ReviewData, SessionView, SubmissionOutcome},
    AppState,
};

/// POST /import/upload query
#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    pub file_name: Option<String>,
}

/// PUT /import/mapping request
#[derive(Debug, Deserialize)]
pub struct UpdateMappingRequest {
    pub key: String,
    /// Empty clears an optional key
    #[serde(default)]
    pub header: String,
}

/// Mapping plus its completeness
#[derive(Debug, Serialize)]
pub struct MappingResponse {
    pub mapping: FieldMapping,
    pub mapping_complete: bool,
    pub missing_required: Vec<CanonicalKey>,
}

impl From<FieldMapping> for MappingResponse {
    fn from(mapping: FieldMapping) -> Self {
        Self {
            mapping_complete: mapping.is_complete(),
            missing_required: mapping.missing_required(),
            mapping,
        }
    }
}

/// POST /import/step request
#[derive(Debug, Deserialize)]
pub struct SetStepRequest {
    pub step: ImportStep,
}

/// PUT /import/rows/:row_id/coordinate request
#[derive(Debug, Deserialize)]
pub struct SetCoordinateRequest {
    pub field: CoordinateField,
    /// Null clears the value
    pub value: Option<f64>,
}

/// POST /import/picker/save request
#[derive(Debug, Deserialize)]
pub struct SavePickerRequest {
    pub lat: f64,
    pub lng: f64,
}

/// POST /import/upload?file_name=
///
/// Body is the raw CSV text. Replaces any existing session.
pub async fn upload_csv(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<Json<SessionView>> {
    let view = state.controller.upload(query.file_name, &body).await?;
    tracing::info!(
        session_id = %view.session_id,
        rows = view.row_count,
        "Upload accepted"
    );
    Ok(Json(view))
}

/// GET /import/session
pub async fn get_session(State(state): State<AppState>) -> Json<SessionView> {
    Json(state.controller.view().await)
}

/// PUT /import/mapping
pub async fn update_mapping(
    State(state): State<AppState>,
    Json(request): Json<UpdateMappingRequest>,
) -> ApiResult<Json<MappingResponse>> {
    let mapping = state
        .controller
        .update_mapping(&request.key, &request.header)
        .await?;
    Ok(Json(mapping.into()))
}

/// POST /import/mapping/reset
pub async fn reset_mapping(State(state): State<AppState>) -> ApiResult<Json<MappingResponse>> {
    let mapping = state.controller.reset_mapping().await?;
    Ok(Json(mapping.into()))
}

/// POST /import/continue
///
/// Freezes the mapping and starts geocoding.
pub async fn continue_to_geocoding(State(state): State<AppState>) -> ApiResult<Json<SessionView>> {
    Ok(Json(state.controller.continue_to_geocoding().await?))
}

/// POST /import/step
pub async fn set_step(
    State(state): State<AppState>,
    Json(request): Json<SetStepRequest>,
) -> ApiResult<Json<SessionView>> {
    Ok(Json(state.controller.set_step(request.step).await?))
}

/// PUT /import/rows/:row_id/coordinate
pub async fn set_row_coordinate(
    State(state): State<AppState>,
    Path(row_id): Path<usize>,
    Json(request): Json<SetCoordinateRequest>,
) -> ApiResult<Json<GeocodeRow>> {
    let row = state
        .controller
        .set_row_coordinate(row_id, request.field, request.value)
        .await?;
    Ok(Json(row))
}

/// POST /import/picker/:row_id/open
pub async fn open_picker(
    State(state): State<AppState>,
    Path(row_id): Path<usize>,
) -> ApiResult<Json<PickerView>> {
    Ok(Json(state.controller.open_picker(row_id).await?))
}

/// POST /import/picker/save
pub async fn save_picker(
    State(state): State<AppState>,
    Json(request): Json<SavePickerRequest>,
) -> ApiResult<Json<GeocodeRow>> {
    let row = state
        .controller
        .save_picker(request.lat, request.lng)
        .await?;
    Ok(Json(row))
}

/// POST /import/picker/close
pub async fn close_picker(State(state): State<AppState>) -> Json<PickerRequest> {
    Json(state.controller.close_picker().await)
}

/// GET /import/review
pub async fn get_review(State(state): State<AppState>) -> Json<ReviewData> {
    Json(state.controller.review().await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// POST /import/submit
///
/// Forwards the caller's bearer token to the order service when present.
pub async fn submit(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<SubmissionOutcome>> {
    match state.controller.submit(bearer_token(&headers)).await {
        Ok(outcome) => Ok(Json(outcome)),
        Err(e) => {
            let err = ApiError::from(e);
            if matches!(err, ApiError::BadGateway(_)) {
                state.record_error(err.to_string()).await;
            }
            Err(err)
        }
    }
}

/// POST /import/reset
pub async fn reset(State(state): State<AppState>) -> Json<SessionView> {
    Json(state.controller.reset().await)
}

/// Build import workflow routes
pub fn import_routes() -> Router<AppState> {
    Router::new()
        .route("/import/upload", post(upload_csv))
        .route("/import/session", get(get_session))
        .route("/import/mapping", put(update_mapping))
        .route("/import/mapping/reset", post(reset_mapping))
        .route("/import/continue", post(continue_to_geocoding))
        .route("/import/step", post(set_step))
        .route("/import/rows/:row_id/coordinate", put(set_row_coordinate))
        .route("/import/picker/:row_id/open", post(open_picker))
        .route("/import/picker/save", post(save_picker))
        .route("/import/picker/close", post(close_picker))
        .route("/import/review", get(get_review))
        .route("/import/submit", post(submit))
        .route("/import/reset", post(reset))
        .route("/import/events", get(super::import_event_stream))
}
