//! Persistence / resume store
//!
//! Saves the working session under one storage key so a long import
//! survives a restart. Two guards:
//! - no write happens before the first load attempt finishes, so the
//!   pre-load default state can never overwrite a saved session
//! - a session with no rows is removed instead of written
//!
//! Writes are queued to a background writer that only ever applies the
//! latest request, so a slow or locked database never stalls the caller.
//! Storage failures are logged and swallowed; callers only see "no session".

use crate::db::SessionStorage;
use crate::models::{
    FieldMapping, GeocodeRow, GeocodeSnapshot, ImportStep, PersistedSession, RawRow,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Storage key for the recovery record
pub const RESUME_KEY: &str = "bulk-import-state-v1";

#[derive(Debug, Clone)]
enum Write {
    Save(String),
    Clear,
}

/// Latest queued write; `seq` counts every request
#[derive(Debug, Clone, Default)]
struct Pending {
    seq: u64,
    write: Option<Write>,
}

pub struct ResumeStore {
    storage: Arc<dyn SessionStorage>,
    key: String,
    hydrated: AtomicBool,
    writer_started: AtomicBool,
    pending: watch::Sender<Pending>,
    /// `seq` of the last request the writer finished
    written: Arc<watch::Sender<u64>>,
}

impl ResumeStore {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self::with_key(storage, RESUME_KEY)
    }

    pub fn with_key(storage: Arc<dyn SessionStorage>, key: &str) -> Self {
        let (pending, _) = watch::channel(Pending::default());
        let (written, _) = watch::channel(0);
        Self {
            storage,
            key: key.to_string(),
            hydrated: AtomicBool::new(false),
            writer_started: AtomicBool::new(false),
            pending,
            written: Arc::new(written),
        }
    }

    pub fn is_hydrated(&self) -> bool {
        self.hydrated.load(Ordering::SeqCst)
    }

    /// Read and validate the saved session
    ///
    /// Marks the store hydrated whatever the outcome and starts the writer.
    pub async fn load(&self) -> Option<PersistedSession> {
        let result = match self.storage.get(&self.key).await {
            Ok(Some(text)) => {
                let session = decode(&text);
                if session.is_none() {
                    tracing::warn!(key = %self.key, "Discarding unreadable saved session");
                }
                session
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "Saved session unavailable");
                None
            }
        };
        self.start_writer();
        self.hydrated.store(true, Ordering::SeqCst);
        result
    }

    /// Queue a write of the session, or its removal when it has no rows
    ///
    /// Skipped entirely until [`load`](Self::load) has run.
    pub fn save(&self, session: &PersistedSession) {
        if !self.is_hydrated() {
            tracing::debug!("Skipping save before hydration");
            return;
        }

        if session.raw_rows.is_empty() {
            self.clear();
            return;
        }

        match serde_json::to_string(session) {
            Ok(text) => self.enqueue(Write::Save(text)),
            Err(e) => tracing::warn!(error = %e, "Failed to serialize session"),
        }
    }

    /// Queue removal of the saved session
    pub fn clear(&self) {
        if !self.is_hydrated() {
            tracing::debug!("Skipping clear before hydration");
            return;
        }
        self.enqueue(Write::Clear);
    }

    /// Wait until every write queued so far has reached storage
    pub async fn flush(&self) {
        let target = self.pending.borrow().seq;
        if target == 0 {
            return;
        }
        let mut done = self.written.subscribe();
        if done.wait_for(|seq| *seq >= target).await.is_err() {
            tracing::warn!(key = %self.key, "Session writer stopped before flushing");
        }
    }

    fn enqueue(&self, write: Write) {
        self.pending.send_modify(|pending| {
            pending.seq += 1;
            pending.write = Some(write);
        });
    }

    fn start_writer(&self) {
        if self.writer_started.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(run_writer(
            self.storage.clone(),
            self.key.clone(),
            self.pending.subscribe(),
            self.written.clone(),
        ));
    }
}

/// Applies the newest queued write until the store is dropped
async fn run_writer(
    storage: Arc<dyn SessionStorage>,
    key: String,
    mut pending: watch::Receiver<Pending>,
    written: Arc<watch::Sender<u64>>,
) {
    while pending.changed().await.is_ok() {
        let Pending { seq, write } = pending.borrow_and_update().clone();
        match write {
            Some(Write::Save(text)) => {
                if let Err(e) = storage.set(&key, &text).await {
                    tracing::warn!(key = %key, error = %e, "Failed to save session");
                }
            }
            Some(Write::Clear) => {
                if let Err(e) = storage.remove(&key).await {
                    tracing::warn!(key = %key, error = %e, "Failed to clear saved session");
                }
            }
            None => {}
        }
        written.send_replace(seq);
    }
    tracing::debug!(key = %key, "Session writer finished");
}

/// Field-by-field validation; any shape problem yields None
fn decode(text: &str) -> Option<PersistedSession> {
    let value: Value = serde_json::from_str(text).ok()?;
    let obj = value.as_object()?;

    let step: ImportStep = obj.get("step")?.as_str()?.parse().ok()?;
    let raw_rows: Vec<Arc<RawRow>> = serde_json::from_value(array(obj.get("rawRows"))?).ok()?;
    let headers: Vec<String> = serde_json::from_value(array(obj.get("headers"))?).ok()?;

    let mapping = match obj.get("mapping") {
        Some(m @ Value::Object(_)) => serde_json::from_value::<FieldMapping>(m.clone()).ok()?,
        _ => FieldMapping::new(),
    };

    let geocode_snapshot = match obj.get("geocodeSnapshot") {
        Some(Value::Object(snap)) => {
            let rows: Vec<GeocodeRow> = match snap.get("rows") {
                Some(rows @ Value::Array(_)) => serde_json::from_value(rows.clone()).ok()?,
                _ => Vec::new(),
            };
            if !rows.is_empty() && !ids_cover(&rows, raw_rows.len()) {
                return None;
            }
            let started = snap.get("started").and_then(Value::as_bool).unwrap_or(false);
            GeocodeSnapshot { rows, started }
        }
        _ => GeocodeSnapshot::default(),
    };

    Some(PersistedSession {
        step,
        raw_rows,
        headers,
        mapping,
        geocode_snapshot,
    })
}

/// Row ids are exactly `0..count`, each once
fn ids_cover(rows: &[GeocodeRow], count: usize) -> bool {
    if rows.len() != count {
        return false;
    }
    let mut seen = vec![false; count];
    rows.iter().all(|row| match seen.get_mut(row.id) {
        Some(slot) if !*slot => {
            *slot = true;
            true
        }
        _ => false,
    })
}

fn array(value: Option<&Value>) -> Option<Value> {
    value.filter(|v| v.is_array()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemorySessionStorage;

    fn session(rows: usize) -> PersistedSession {
        PersistedSession {
            step: ImportStep::Map,
            raw_rows: (0..rows)
                .map(|i| Arc::new([("name", format!("n{}", i))].into_iter().collect()))
                .collect(),
            headers: vec!["name".to_string()],
            mapping: FieldMapping::new(),
            geocode_snapshot: GeocodeSnapshot::default(),
        }
    }

    fn store() -> (Arc<MemorySessionStorage>, ResumeStore) {
        let storage = Arc::new(MemorySessionStorage::new());
        let store = ResumeStore::new(storage.clone());
        (storage, store)
    }

    #[tokio::test]
    async fn test_save_before_hydration_is_suppressed() {
        let (storage, store) = store();
        storage.set(RESUME_KEY, "existing").await.unwrap();

        store.save(&session(1));
        store.clear();
        store.flush().await;
        assert_eq!(storage.get(RESUME_KEY).await.unwrap().as_deref(), Some("existing"));
    }

    #[tokio::test]
    async fn test_round_trip_after_hydration() {
        let (_, store) = store();
        assert!(store.load().await.is_none());
        assert!(store.is_hydrated());

        store.save(&session(2));
        store.flush().await;
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, session(2));
    }

    #[tokio::test]
    async fn test_empty_rows_clear_the_record() {
        let (storage, store) = store();
        store.load().await;
        store.save(&session(2));
        store.flush().await;
        assert!(storage.get(RESUME_KEY).await.unwrap().is_some());

        store.save(&session(0));
        store.flush().await;
        assert_eq!(storage.get(RESUME_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_corrupt_records_degrade_to_none() {
        for bad in [
            "not json",
            "[]",
            r#"{"step": "done", "rawRows": [], "headers": []}"#,
            r#"{"step": "map", "rawRows": {}, "headers": []}"#,
            r#"{"step": "map", "rawRows": [], "headers": "name"}"#,
            r#"{"step": "map", "rawRows": [{"a": 1}], "headers": []}"#,
        ] {
            let (storage, store) = store();
            storage.set(RESUME_KEY, bad).await.unwrap();
            assert!(store.load().await.is_none(), "accepted: {}", bad);
            assert!(store.is_hydrated());
        }
    }

    #[tokio::test]
    async fn test_snapshot_ids_must_match_raw_rows() {
        let mut saved = session(2);
        saved.geocode_snapshot = GeocodeSnapshot {
            rows: crate::services::materialize(&saved.raw_rows, &saved.mapping),
            started: true,
        };

        let (storage, store) = store();
        storage
            .set(RESUME_KEY, &serde_json::to_string(&saved).unwrap())
            .await
            .unwrap();
        assert_eq!(store.load().await, Some(saved.clone()));

        let duplicated = {
            let mut s = saved.clone();
            s.geocode_snapshot.rows[1].id = 0;
            s
        };
        let out_of_range = {
            let mut s = saved.clone();
            s.geocode_snapshot.rows[1].id = 5;
            s
        };
        let missing = {
            let mut s = saved.clone();
            s.geocode_snapshot.rows.pop();
            s
        };
        for bad in [duplicated, out_of_range, missing] {
            let (storage, store) = self::store();
            storage
                .set(RESUME_KEY, &serde_json::to_string(&bad).unwrap())
                .await
                .unwrap();
            assert!(store.load().await.is_none());
        }
    }

    #[tokio::test]
    async fn test_missing_optional_sections_default() {
        let (storage, store) = store();
        storage
            .set(RESUME_KEY, r#"{"step": "errors", "rawRows": [{"a": "1"}], "headers": ["a"]}"#)
            .await
            .unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.step, ImportStep::Errors);
        assert_eq!(loaded.mapping, FieldMapping::new());
        assert!(!loaded.geocode_snapshot.started);
        assert!(loaded.geocode_snapshot.rows.is_empty());
    }

    #[tokio::test]
    async fn test_storage_failures_are_swallowed() {
        let (storage, store) = store();
        storage.set_available(false);

        assert!(store.load().await.is_none());
        assert!(store.is_hydrated());
        store.save(&session(1));
        store.clear();
        store.flush().await;
    }

    /// Blocks every write until released
    struct StalledStorage {
        inner: MemorySessionStorage,
        gate: tokio::sync::Semaphore,
        writes: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl SessionStorage for StalledStorage {
        async fn get(&self, key: &str) -> Result<Option<String>, crate::db::StorageError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &str) -> Result<(), crate::db::StorageError> {
            let _permit = self.gate.acquire().await;
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), crate::db::StorageError> {
            let _permit = self.gate.acquire().await;
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.remove(key).await
        }
    }

    #[tokio::test]
    async fn test_stalled_storage_does_not_block_saves() {
        let storage = Arc::new(StalledStorage {
            inner: MemorySessionStorage::new(),
            gate: tokio::sync::Semaphore::new(0),
            writes: std::sync::atomic::AtomicUsize::new(0),
        });
        let store = ResumeStore::new(storage.clone());
        store.load().await;

        // Nothing can be written yet; queuing still returns
        store.save(&session(1));
        store.save(&session(2));
        store.save(&session(3));
        tokio::task::yield_now().await;
        assert_eq!(storage.writes.load(Ordering::SeqCst), 0);

        storage.gate.add_permits(100);
        store.flush().await;

        // The newest request always lands last; stale ones may be skipped
        assert!(storage.writes.load(Ordering::SeqCst) <= 2);
        let text = storage.inner.get(RESUME_KEY).await.unwrap().unwrap();
        assert_eq!(decode(&text), Some(session(3)));
    }
}
