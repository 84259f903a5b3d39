//! Event types and broadcast bus
//!
//! Bulk-import progress is pushed to connected browsers over SSE. Producers
//! emit onto the [`EventBus`]; the SSE handler subscribes and forwards.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Bulk import events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ImportEvent {
    /// A session was restored from durable storage or created by upload
    SessionLoaded {
        session_id: Uuid,
        step: String,
        row_count: usize,
        resumed: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Workflow step changed (upload, map, errors, review)
    StepChanged {
        session_id: Uuid,
        old_step: String,
        new_step: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A geocoding wave was issued
    WaveStarted {
        session_id: Uuid,
        wave_id: u64,
        row_count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A geocoding wave finished (or its results were discarded)
    WaveCompleted {
        session_id: Uuid,
        wave_id: u64,
        success: usize,
        failed: usize,
        pending: usize,
        /// Results arrived after the session moved on and were dropped
        discarded: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A single row changed through manual remediation
    RowUpdated {
        session_id: Uuid,
        row_id: usize,
        status: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Batch order creation returned
    SubmissionCompleted {
        session_id: Uuid,
        created: usize,
        failed: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl ImportEvent {
    /// Name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            ImportEvent::SessionLoaded { .. } => "SessionLoaded",
            ImportEvent::StepChanged { .. } => "StepChanged",
            ImportEvent::WaveStarted { .. } => "WaveStarted",
            ImportEvent::WaveCompleted { .. } => "WaveCompleted",
            ImportEvent::RowUpdated { .. } => "RowUpdated",
            ImportEvent::SubmissionCompleted { .. } => "SubmissionCompleted",
        }
    }

    pub fn session_id(&self) -> Uuid {
        match self {
            ImportEvent::SessionLoaded { session_id, .. }
            | ImportEvent::StepChanged { session_id, .. }
            | ImportEvent::WaveStarted { session_id, .. }
            | ImportEvent::WaveCompleted { session_id, .. }
            | ImportEvent::RowUpdated { session_id, .. }
            | ImportEvent::SubmissionCompleted { session_id, .. } => *session_id,
        }
    }
}

/// Broadcast bus for [`ImportEvent`]
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ImportEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a bus buffering up to `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Receive all events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ImportEvent> {
        self.tx.subscribe()
    }

    /// Emit, reporting how many subscribers received it
    ///
    /// Fails only when nobody is subscribed.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ImportEvent,
    ) -> Result<usize, broadcast::error::SendError<ImportEvent>> {
        self.tx.send(event)
    }

    /// Emit, ignoring the no-subscriber case
    pub fn emit_lossy(&self, event: ImportEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
