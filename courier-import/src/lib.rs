//! courier-import library interface
//!
//! Exposes the bulk import pipeline and its router for integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use courier_common::events::EventBus;
use services::{BaatoClient, ImportController};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

/// Slack over the upload ceiling so oversize files reach the handler
/// and get the JSON 413 instead of the extractor's plain one
const BODY_LIMIT_SLACK: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Settings database
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// The import session and its workflow
    pub controller: ImportController,
    /// Receives geocoder key updates; None when a different geocoder is wired in
    pub geocoder_client: Option<Arc<BaatoClient>>,
    /// TOML file mirrored on settings writes
    pub toml_path: Option<PathBuf>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, controller: ImportController) -> Self {
        Self {
            db,
            event_bus,
            controller,
            geocoder_client: None,
            toml_path: None,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_geocoder_client(mut self, client: Arc<BaatoClient>) -> Self {
        self.geocoder_client = Some(client);
        self
    }

    pub fn with_toml_path(mut self, path: PathBuf) -> Self {
        self.toml_path = Some(path);
        self
    }

    pub async fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write().await = Some(message.into());
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state
        .controller
        .settings()
        .max_upload_bytes
        .saturating_add(BODY_LIMIT_SLACK);

    Router::new()
        .merge(api::import_routes())
        .merge(api::settings_routes())
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
