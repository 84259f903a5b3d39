//! Bulk import session controller
//!
//! Owns the one working session behind a single async mutex; every state
//! change goes through it. After each change the session is persisted and
//! an [`ImportEvent`] is emitted.
//!
//! Geocoding waves run on spawned tasks. A wave's results are applied only
//! if, when they arrive, the session that issued the wave is still current
//! and its cancellation token has not fired.

use crate::models::{
    CanonicalKey, CoordinateField, Coordinates, FieldMapping, GeocodeRow, GeocodeStats,
    ImportStep, MappingError, PersistedSession, PickerRequest, RawRow,
};
use crate::services::csv_parser::{self, CsvError};
use crate::services::geocoder::Geocoder;
use crate::services::reconciler::{CoordinateUpdate, LookupResult, ReconciliationEngine};
use crate::services::resume_store::ResumeStore;
use crate::services::review::{review_points, ReviewData};
use crate::services::submission::{
    build_submission_payload, submittable_rows, BulkUploadResponse, OrderCreator,
    SubmissionError, WeightPolicy,
};
use crate::services::wave_runner::{run_wave, WaveSettings};
use chrono::Utc;
use courier_common::config::TomlConfig;
use courier_common::events::{EventBus, ImportEvent};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Controller operation errors
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Csv(#[from] CsvError),

    #[error(transparent)]
    Mapping(#[from] MappingError),

    #[error(transparent)]
    Submission(#[from] SubmissionError),

    #[error("File is {size} bytes; the limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("Row {0} not found")]
    RowNotFound(usize),

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("Cannot move from {from} to {to}")]
    InvalidStep { from: ImportStep, to: ImportStep },

    #[error("No coordinate picker is open")]
    PickerClosed,

    #[error("Row {0} is resolved; its coordinates can be changed but not cleared")]
    CoordinateLocked(usize),

    #[error("A submission is already in progress")]
    SubmissionInProgress,
}

/// Limits and policies taken from configuration
#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub max_upload_bytes: usize,
    pub wave: WaveSettings,
    pub weights: WeightPolicy,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from(&TomlConfig::default())
    }
}

impl From<&TomlConfig> for ControllerSettings {
    fn from(config: &TomlConfig) -> Self {
        Self {
            max_upload_bytes: config.import.max_upload_bytes,
            wave: WaveSettings {
                max_concurrent: config.geocoder.max_concurrent_lookups,
                lookup_timeout: Duration::from_millis(config.geocoder.lookup_timeout_ms),
            },
            weights: WeightPolicy::from(&config.import),
        }
    }
}

/// The working session
struct ImportSession {
    session_id: Uuid,
    step: ImportStep,
    file_name: Option<String>,
    headers: Vec<String>,
    raw_rows: Vec<Arc<RawRow>>,
    mapping: FieldMapping,
    engine: ReconciliationEngine,
    cancel: CancellationToken,
}

impl ImportSession {
    fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            step: ImportStep::Upload,
            file_name: None,
            headers: Vec::new(),
            raw_rows: Vec::new(),
            mapping: FieldMapping::new(),
            engine: ReconciliationEngine::new(),
            cancel: CancellationToken::new(),
        }
    }

    fn to_persisted(&self) -> PersistedSession {
        PersistedSession {
            step: self.step,
            raw_rows: self.raw_rows.clone(),
            headers: self.headers.clone(),
            mapping: self.mapping.clone(),
            geocode_snapshot: self.engine.snapshot(),
        }
    }
}

/// Everything a client needs to render the current step
#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub session_id: Uuid,
    pub step: ImportStep,
    pub file_name: Option<String>,
    pub headers: Vec<String>,
    pub row_count: usize,
    pub mapping: FieldMapping,
    pub mapping_complete: bool,
    pub missing_required: Vec<CanonicalKey>,
    pub rows: Vec<GeocodeRow>,
    pub stats: GeocodeStats,
    pub picker: PickerRequest,
    pub geocode_started: bool,
    pub geocode_in_progress: bool,
}

/// Picker state plus the point it opens on
#[derive(Debug, Clone, Serialize)]
pub struct PickerView {
    #[serde(flatten)]
    pub picker: PickerRequest,
    pub seed: Option<Coordinates>,
}

/// An item the order service refused, traced back to its source row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedRow {
    pub row_id: usize,
    pub original: Arc<RawRow>,
    pub error: String,
}

/// Submission result counts plus the service's response
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionOutcome {
    pub created: usize,
    pub failed: usize,
    /// One entry per failed item whose index names a submitted row
    pub failed_rows: Vec<FailedRow>,
    pub response: BulkUploadResponse,
}

struct ControllerInner {
    session: Mutex<ImportSession>,
    geocoder: Arc<dyn Geocoder>,
    orders: Arc<dyn OrderCreator>,
    store: ResumeStore,
    events: EventBus,
    settings: ControllerSettings,
    submitting: AtomicBool,
}

/// Cheap to clone; clones share the session
#[derive(Clone)]
pub struct ImportController {
    inner: Arc<ControllerInner>,
}

fn validate_coordinate(field: CoordinateField, value: f64) -> Result<f64, ImportError> {
    let (name, limit) = match field {
        CoordinateField::Lat => ("latitude", 90.0),
        CoordinateField::Lng => ("longitude", 180.0),
    };
    if !value.is_finite() || value.abs() > limit {
        return Err(ImportError::InvalidCoordinate(format!(
            "{} must be between -{} and {}",
            name, limit, limit
        )));
    }
    Ok(value)
}

impl ImportController {
    pub fn new(
        geocoder: Arc<dyn Geocoder>,
        orders: Arc<dyn OrderCreator>,
        store: ResumeStore,
        events: EventBus,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                session: Mutex::new(ImportSession::new()),
                geocoder,
                orders,
                store,
                events,
                settings,
                submitting: AtomicBool::new(false),
            }),
        }
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.inner.settings
    }

    // ------------------------------------------------------------------
    // Internal helpers (callers hold the session lock)
    // ------------------------------------------------------------------

    fn emit(&self, event: ImportEvent) {
        self.inner.events.emit_lossy(event);
    }

    fn change_step(&self, session: &mut ImportSession, new_step: ImportStep) {
        if session.step == new_step {
            return;
        }
        let old_step = session.step;
        session.step = new_step;
        info!(session_id = %session.session_id, from = %old_step, to = %new_step, "Import step changed");
        self.emit(ImportEvent::StepChanged {
            session_id: session.session_id,
            old_step: old_step.to_string(),
            new_step: new_step.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Queue a save; the write itself happens off the lock
    fn persist(&self, session: &ImportSession) {
        self.inner.store.save(&session.to_persisted());
    }

    /// ERRORS → REVIEW once every row is resolved and no wave is running
    fn auto_advance(&self, session: &mut ImportSession) {
        if session.step == ImportStep::Errors
            && !session.engine.wave_in_flight()
            && session.engine.stats().all_success()
        {
            self.change_step(session, ImportStep::Review);
        }
    }

    /// Materialize (first time only) and issue a wave for pending rows
    fn start_geocoding(&self, session: &mut ImportSession) {
        if session.engine.start(&session.raw_rows, &session.mapping) {
            let stats = session.engine.stats();
            info!(
                session_id = %session.session_id,
                rows = stats.total,
                pre_resolved = stats.success,
                "Geocoding started"
            );
        }
        self.launch_wave(session);
    }

    fn launch_wave(&self, session: &mut ImportSession) {
        let Some(wave) = session.engine.issue_wave() else {
            return;
        };

        let session_id = session.session_id;
        info!(
            session_id = %session_id,
            wave_id = wave.wave_id,
            lookups = wave.lookups.len(),
            "Geocoding wave issued"
        );
        self.emit(ImportEvent::WaveStarted {
            session_id,
            wave_id: wave.wave_id,
            row_count: wave.lookups.len(),
            timestamp: Utc::now(),
        });

        let controller = self.clone();
        let cancel = session.cancel.clone();
        tokio::spawn(async move {
            let settings = controller.inner.settings.wave;
            let results = run_wave(controller.inner.geocoder.as_ref(), &wave, settings, &cancel).await;
            controller.finish_wave(session_id, wave.wave_id, results).await;
        });
    }

    async fn finish_wave(&self, session_id: Uuid, wave_id: u64, results: Option<Vec<LookupResult>>) {
        let mut guard = self.inner.session.lock().await;
        let session = &mut *guard;

        let discarded = |stats: GeocodeStats| ImportEvent::WaveCompleted {
            session_id,
            wave_id,
            success: stats.success,
            failed: stats.failed,
            pending: stats.pending,
            discarded: true,
            timestamp: Utc::now(),
        };

        if session.session_id != session_id {
            debug!(session_id = %session_id, wave_id, "Dropping results for a replaced session");
            self.emit(discarded(GeocodeStats::default()));
            return;
        }

        let applied = match results {
            Some(results) if !session.cancel.is_cancelled() => {
                session.engine.apply_wave(wave_id, results).ok()
            }
            _ => {
                session.engine.abandon_wave(wave_id);
                None
            }
        };

        match applied {
            Some(report) => {
                info!(
                    session_id = %session_id,
                    wave_id,
                    resolved = report.resolved,
                    failed = report.failed,
                    skipped = report.skipped,
                    "Geocoding wave applied"
                );
                self.emit(ImportEvent::WaveCompleted {
                    session_id,
                    wave_id,
                    success: report.stats.success,
                    failed: report.stats.failed,
                    pending: report.stats.pending,
                    discarded: false,
                    timestamp: Utc::now(),
                });
                self.auto_advance(session);
                self.persist(session);
            }
            None => {
                debug!(session_id = %session_id, wave_id, "Geocoding wave discarded");
                self.emit(discarded(session.engine.stats()));
            }
        }
    }

    fn view_of(session: &ImportSession) -> SessionView {
        SessionView {
            session_id: session.session_id,
            step: session.step,
            file_name: session.file_name.clone(),
            headers: session.headers.clone(),
            row_count: session.raw_rows.len(),
            mapping: session.mapping.clone(),
            mapping_complete: session.mapping.is_complete(),
            missing_required: session.mapping.missing_required(),
            rows: session.engine.rows().cloned().collect(),
            stats: session.engine.stats(),
            picker: session.engine.picker(),
            geocode_started: session.engine.started(),
            geocode_in_progress: session.engine.wave_in_flight(),
        }
    }

    /// Replace the session with a blank one, cancelling any running wave
    fn discard_session(&self, session: &mut ImportSession) {
        session.cancel.cancel();
        let old_step = session.step;
        *session = ImportSession::new();
        if old_step != ImportStep::Upload {
            self.emit(ImportEvent::StepChanged {
                session_id: session.session_id,
                old_step: old_step.to_string(),
                new_step: ImportStep::Upload.to_string(),
                timestamp: Utc::now(),
            });
        }
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    /// Restore the saved session, if any, and pick up where it stopped
    ///
    /// Must run once before anything is saved; until then saves are
    /// suppressed.
    pub async fn resume(&self) -> bool {
        let mut guard = self.inner.session.lock().await;
        let session = &mut *guard;

        let Some(saved) = self.inner.store.load().await else {
            return false;
        };

        let mut restored = ImportSession::new();
        restored.step = saved.step;
        restored.headers = saved.headers;
        restored.raw_rows = saved.raw_rows;
        restored.mapping = saved.mapping;
        if !saved.geocode_snapshot.rows.is_empty() {
            restored
                .engine
                .hydrate(saved.geocode_snapshot, &restored.raw_rows);
        }

        if restored.raw_rows.is_empty() {
            restored.step = ImportStep::Upload;
        } else if matches!(restored.step, ImportStep::Errors | ImportStep::Review)
            && restored.engine.is_empty()
            && !restored.mapping.is_complete()
        {
            restored.step = ImportStep::Map;
        }

        session.cancel.cancel();
        *session = restored;

        info!(
            session_id = %session.session_id,
            step = %session.step,
            rows = session.raw_rows.len(),
            geocode_started = session.engine.started(),
            "Resumed saved import session"
        );
        self.emit(ImportEvent::SessionLoaded {
            session_id: session.session_id,
            step: session.step.to_string(),
            row_count: session.raw_rows.len(),
            resumed: true,
            timestamp: Utc::now(),
        });

        if matches!(session.step, ImportStep::Errors | ImportStep::Review)
            && session.engine.is_empty()
        {
            if session.step == ImportStep::Review {
                self.change_step(session, ImportStep::Errors);
            }
            self.start_geocoding(session);
        } else {
            self.launch_wave(session);
        }

        self.auto_advance(session);
        self.persist(session);
        true
    }

    /// Parse an uploaded file into a fresh session at the MAP step
    pub async fn upload(&self, file_name: Option<String>, body: &[u8]) -> Result<SessionView, ImportError> {
        let limit = self.inner.settings.max_upload_bytes;
        if body.len() > limit {
            return Err(ImportError::TooLarge {
                size: body.len(),
                limit,
            });
        }

        let text = String::from_utf8_lossy(body);
        let parsed = csv_parser::parse(&text)?;

        let mut guard = self.inner.session.lock().await;
        let session = &mut *guard;
        self.discard_session(session);

        session.file_name = file_name;
        session.headers = parsed.headers;
        session.raw_rows = parsed.rows;
        info!(
            session_id = %session.session_id,
            rows = session.raw_rows.len(),
            columns = session.headers.len(),
            "CSV uploaded"
        );
        self.emit(ImportEvent::SessionLoaded {
            session_id: session.session_id,
            step: ImportStep::Upload.to_string(),
            row_count: session.raw_rows.len(),
            resumed: false,
            timestamp: Utc::now(),
        });
        self.change_step(session, ImportStep::Map);

        self.persist(session);
        Ok(Self::view_of(session))
    }

    /// Map `key` to `header`; an empty header clears an optional key
    pub async fn update_mapping(&self, key: &str, header: &str) -> Result<FieldMapping, ImportError> {
        let key: CanonicalKey = key.parse()?;

        let mut guard = self.inner.session.lock().await;
        let session = &mut *guard;

        if session.step != ImportStep::Map {
            return Err(MappingError::Frozen.into());
        }
        if !header.is_empty() && !session.headers.iter().any(|h| h == header) {
            return Err(MappingError::UnknownHeader(header.to_string()).into());
        }

        session.mapping.update(key, header)?;
        debug!(session_id = %session.session_id, key = %key, header, "Mapping updated");

        self.persist(session);
        Ok(session.mapping.clone())
    }

    pub async fn reset_mapping(&self) -> Result<FieldMapping, ImportError> {
        let mut guard = self.inner.session.lock().await;
        let session = &mut *guard;

        if session.step != ImportStep::Map {
            return Err(MappingError::Frozen.into());
        }
        session.mapping.reset();

        self.persist(session);
        Ok(session.mapping.clone())
    }

    /// Freeze the mapping, move to ERRORS and start geocoding
    pub async fn continue_to_geocoding(&self) -> Result<SessionView, ImportError> {
        let mut guard = self.inner.session.lock().await;
        let session = &mut *guard;

        if session.step != ImportStep::Map {
            return Err(ImportError::InvalidStep {
                from: session.step,
                to: ImportStep::Errors,
            });
        }
        if !session.mapping.is_complete() {
            let missing: Vec<&str> = session
                .mapping
                .missing_required()
                .into_iter()
                .map(CanonicalKey::as_str)
                .collect();
            return Err(MappingError::Incomplete(missing.join(", ")).into());
        }

        self.change_step(session, ImportStep::Errors);
        self.start_geocoding(session);
        self.auto_advance(session);

        self.persist(session);
        Ok(Self::view_of(session))
    }

    /// Explicit navigation between steps
    pub async fn set_step(&self, target: ImportStep) -> Result<SessionView, ImportError> {
        let mut guard = self.inner.session.lock().await;
        let session = &mut *guard;

        let allowed = match (session.step, target) {
            (from, to) if from == to => true,
            (ImportStep::Review, ImportStep::Errors) => true,
            (ImportStep::Errors, ImportStep::Review) => session.engine.stats().success > 0,
            (ImportStep::Map, ImportStep::Upload) => true,
            (ImportStep::Upload, ImportStep::Map) => !session.headers.is_empty(),
            _ => false,
        };
        if !allowed {
            return Err(ImportError::InvalidStep {
                from: session.step,
                to: target,
            });
        }

        self.change_step(session, target);
        self.persist(session);
        Ok(Self::view_of(session))
    }

    /// Manual entry of one coordinate
    pub async fn set_row_coordinate(
        &self,
        row_id: usize,
        field: CoordinateField,
        value: Option<f64>,
    ) -> Result<GeocodeRow, ImportError> {
        let value = value.map(|v| validate_coordinate(field, v)).transpose()?;

        let mut guard = self.inner.session.lock().await;
        let session = &mut *guard;

        let status = match session.engine.set_row_lat_lng(row_id, field, value) {
            CoordinateUpdate::NoSuchRow => return Err(ImportError::RowNotFound(row_id)),
            CoordinateUpdate::Rejected => return Err(ImportError::CoordinateLocked(row_id)),
            CoordinateUpdate::Updated { status } => status,
        };

        self.emit(ImportEvent::RowUpdated {
            session_id: session.session_id,
            row_id,
            status: status.as_str().to_string(),
            timestamp: Utc::now(),
        });
        self.auto_advance(session);
        self.persist(session);

        session
            .engine
            .row(row_id)
            .cloned()
            .ok_or(ImportError::RowNotFound(row_id))
    }

    pub async fn open_picker(&self, row_id: usize) -> Result<PickerView, ImportError> {
        let mut guard = self.inner.session.lock().await;
        let seed = guard
            .engine
            .open_picker_for_row(row_id)
            .ok_or(ImportError::RowNotFound(row_id))?;
        Ok(PickerView {
            picker: guard.engine.picker(),
            seed,
        })
    }

    /// Apply the picked point to the picker's row, both halves at once
    pub async fn save_picker(&self, lat: f64, lng: f64) -> Result<GeocodeRow, ImportError> {
        let point = Coordinates {
            lat: validate_coordinate(CoordinateField::Lat, lat)?,
            lng: validate_coordinate(CoordinateField::Lng, lng)?,
        };

        let mut guard = self.inner.session.lock().await;
        let session = &mut *guard;

        let row_id = session
            .engine
            .save_picked_point(point)
            .ok_or(ImportError::PickerClosed)?;

        self.emit(ImportEvent::RowUpdated {
            session_id: session.session_id,
            row_id,
            status: "success".to_string(),
            timestamp: Utc::now(),
        });
        self.auto_advance(session);
        self.persist(session);

        session
            .engine
            .row(row_id)
            .cloned()
            .ok_or(ImportError::RowNotFound(row_id))
    }

    pub async fn close_picker(&self) -> PickerRequest {
        let mut guard = self.inner.session.lock().await;
        guard.engine.close_picker();
        guard.engine.picker()
    }

    pub async fn view(&self) -> SessionView {
        let guard = self.inner.session.lock().await;
        Self::view_of(&guard)
    }

    pub async fn review(&self) -> ReviewData {
        let guard = self.inner.session.lock().await;
        review_points(guard.engine.rows())
    }

    /// Send every resolved row to the order service in one batch
    ///
    /// On any response the session is discarded, even when some items
    /// failed. On error nothing changes.
    pub async fn submit(&self, bearer_token: Option<&str>) -> Result<SubmissionOutcome, ImportError> {
        if self.inner.submitting.swap(true, Ordering::SeqCst) {
            return Err(ImportError::SubmissionInProgress);
        }
        let result = self.submit_batch(bearer_token).await;
        self.inner.submitting.store(false, Ordering::SeqCst);
        result
    }

    async fn submit_batch(&self, bearer_token: Option<&str>) -> Result<SubmissionOutcome, ImportError> {
        let (session_id, items, sources) = {
            let guard = self.inner.session.lock().await;
            let items = build_submission_payload(guard.engine.rows(), &self.inner.settings.weights)?;
            let sources: Vec<(usize, Arc<RawRow>)> = submittable_rows(guard.engine.rows())
                .map(|row| (row.id, row.original.clone()))
                .collect();
            (guard.session_id, items, sources)
        };

        info!(session_id = %session_id, items = items.len(), "Submitting orders");
        let response = match self.inner.orders.create_orders(&items, bearer_token).await {
            Ok(response) => response,
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Order submission failed");
                return Err(e.into());
            }
        };

        let failed_rows = response
            .failed
            .iter()
            .filter_map(|item| match sources.get(item.index) {
                Some((row_id, original)) => Some(FailedRow {
                    row_id: *row_id,
                    original: original.clone(),
                    error: item.error.clone(),
                }),
                None => {
                    warn!(index = item.index, "Order service reported a failure for an unknown item");
                    None
                }
            })
            .collect();
        let outcome = SubmissionOutcome {
            created: response.created.len(),
            failed: response.failed.len(),
            failed_rows,
            response,
        };
        info!(
            session_id = %session_id,
            created = outcome.created,
            failed = outcome.failed,
            "Order submission complete"
        );
        self.emit(ImportEvent::SubmissionCompleted {
            session_id,
            created: outcome.created,
            failed: outcome.failed,
            timestamp: Utc::now(),
        });

        let mut guard = self.inner.session.lock().await;
        if guard.session_id == session_id {
            self.discard_session(&mut guard);
            self.inner.store.clear();
        }

        Ok(outcome)
    }

    /// Discard the session and its saved copy
    pub async fn reset(&self) -> SessionView {
        let mut guard = self.inner.session.lock().await;
        info!(session_id = %guard.session_id, "Import session reset");
        self.discard_session(&mut guard);
        self.inner.store.clear();
        Self::view_of(&guard)
    }

    /// Wait until the saved copy reflects every change made so far
    pub async fn flush(&self) {
        self.inner.store.flush().await;
    }

    /// Cancel any running wave and finish pending writes; used at shutdown
    pub async fn shutdown(&self) {
        self.inner.session.lock().await.cancel.cancel();
        self.inner.store.flush().await;
    }
}
