//! Geocoding reconciliation engine
//!
//! Owns the row arena (keyed by row id) and every mutation of it. The engine
//! does no I/O: it hands out a [`WaveRequest`] describing the lookups to run
//! and later accepts all of their results in one [`apply_wave`] call.
//!
//! Ordering rules:
//! - at most one wave is in flight; its row set is fixed when issued
//! - results are applied together, keyed by row id, so arrival order is
//!   irrelevant
//! - a row that left PENDING while its lookup was in flight (manual entry or
//!   picker save) keeps its manual state
//! - results for a wave other than the one in flight are stale and dropped
//!
//! [`apply_wave`]: ReconciliationEngine::apply_wave

use crate::models::{
    CoordinateField, Coordinates, FieldMapping, GeocodeFailure, GeocodeRow, GeocodeSnapshot,
    GeocodeStats, GeocodeStatus, PickerRequest, RawRow,
};
use crate::services::materializer::materialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

/// One address lookup to perform
#[derive(Debug, Clone, PartialEq)]
pub struct LookupRequest {
    pub row_id: usize,
    pub address: String,
}

/// All lookups for rows pending at one instant
#[derive(Debug, Clone, PartialEq)]
pub struct WaveRequest {
    pub wave_id: u64,
    pub lookups: Vec<LookupRequest>,
}

/// Outcome of one lookup
#[derive(Debug, Clone, PartialEq)]
pub struct LookupResult {
    pub row_id: usize,
    pub outcome: Result<Coordinates, GeocodeFailure>,
}

/// What applying a wave changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaveReport {
    pub wave_id: u64,
    pub resolved: usize,
    pub failed: usize,
    /// Rows that were no longer pending when results arrived
    pub skipped: usize,
    pub stats: GeocodeStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Wave {wave_id} is not the wave in flight")]
pub struct StaleWave {
    pub wave_id: u64,
}

/// Result of a manual coordinate edit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinateUpdate {
    NoSuchRow,
    Updated { status: GeocodeStatus },
    /// Clearing a coordinate of a resolved row is not a supported transition
    Rejected,
}

#[derive(Debug, Clone)]
struct InFlightWave {
    wave_id: u64,
    row_ids: BTreeSet<usize>,
}

/// Per-session reconciliation state
#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine {
    rows: BTreeMap<usize, GeocodeRow>,
    started: bool,
    in_flight: Option<InFlightWave>,
    next_wave_id: u64,
    picker: PickerRequest,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize rows and mark reconciliation started
    ///
    /// Returns false without touching anything when already started.
    pub fn start(&mut self, raw_rows: &[Arc<RawRow>], mapping: &FieldMapping) -> bool {
        if self.started {
            return false;
        }
        self.rows = materialize(raw_rows, mapping)
            .into_iter()
            .map(|row| (row.id, row))
            .collect();
        self.started = true;
        true
    }

    /// Restore rows from a persisted snapshot instead of re-materializing
    ///
    /// A row claiming success without both coordinates is downgraded to
    /// pending. Rows whose original matches the session's raw row at the same
    /// position share that allocation again. Snapshot ids must be exactly
    /// `0..raw_rows.len()`; the resume store refuses records that are not.
    pub fn hydrate(&mut self, snapshot: GeocodeSnapshot, raw_rows: &[Arc<RawRow>]) {
        self.rows = snapshot
            .rows
            .into_iter()
            .map(|mut row| {
                if row.status == GeocodeStatus::Success && !row.has_coordinates() {
                    row.status = GeocodeStatus::Pending;
                    row.lat = None;
                    row.lng = None;
                }
                if let Some(raw) = raw_rows.get(row.id) {
                    if **raw == *row.original {
                        row.original = Arc::clone(raw);
                    }
                }
                (row.id, row)
            })
            .collect();
        self.started = snapshot.started;
        self.in_flight = None;
        self.picker = PickerRequest::closed();
    }

    pub fn reset(&mut self) {
        // Keep the wave counter so results of a wave issued before the reset
        // can never match a later one.
        let next_wave_id = self.next_wave_id;
        *self = Self::default();
        self.next_wave_id = next_wave_id;
    }

    /// Snapshot pending rows into a new wave
    ///
    /// None when not started, a wave is already in flight, or nothing is
    /// pending. Failed rows are never retried automatically.
    pub fn issue_wave(&mut self) -> Option<WaveRequest> {
        if !self.started || self.in_flight.is_some() {
            return None;
        }

        let lookups: Vec<LookupRequest> = self
            .rows
            .values()
            .filter(|row| row.status == GeocodeStatus::Pending)
            .map(|row| LookupRequest {
                row_id: row.id,
                address: row.delivery_address().to_string(),
            })
            .collect();

        if lookups.is_empty() {
            return None;
        }

        self.next_wave_id += 1;
        let wave_id = self.next_wave_id;
        self.in_flight = Some(InFlightWave {
            wave_id,
            row_ids: lookups.iter().map(|l| l.row_id).collect(),
        });

        Some(WaveRequest { wave_id, lookups })
    }

    /// Apply every result of the in-flight wave at once
    ///
    /// Snapshot rows with no result are marked failed so none stays pending
    /// without a lookup.
    pub fn apply_wave(
        &mut self,
        wave_id: u64,
        results: Vec<LookupResult>,
    ) -> Result<WaveReport, StaleWave> {
        let wave = match self.in_flight.take() {
            Some(wave) if wave.wave_id == wave_id => wave,
            other => {
                self.in_flight = other;
                return Err(StaleWave { wave_id });
            }
        };

        let mut outcomes: BTreeMap<usize, Result<Coordinates, GeocodeFailure>> = BTreeMap::new();
        for result in results {
            if wave.row_ids.contains(&result.row_id) {
                outcomes.entry(result.row_id).or_insert(result.outcome);
            }
        }

        let mut report = WaveReport {
            wave_id,
            resolved: 0,
            failed: 0,
            skipped: 0,
            stats: GeocodeStats::default(),
        };

        for row_id in &wave.row_ids {
            let Some(row) = self.rows.get_mut(row_id) else {
                continue;
            };
            if row.status != GeocodeStatus::Pending {
                report.skipped += 1;
                continue;
            }

            let outcome = outcomes.remove(row_id).unwrap_or_else(|| {
                Err(GeocodeFailure::Service {
                    message: "no lookup result".to_string(),
                })
            });
            match outcome {
                Ok(point) => {
                    row.resolve(point);
                    report.resolved += 1;
                }
                Err(failure) => {
                    tracing::debug!(row_id, reason = %failure, "Row failed to geocode");
                    row.fail(failure);
                    report.failed += 1;
                }
            }
        }

        report.stats = self.stats();
        Ok(report)
    }

    /// Forget the in-flight wave without applying anything
    ///
    /// Its rows stay pending.
    pub fn abandon_wave(&mut self, wave_id: u64) -> bool {
        match &self.in_flight {
            Some(wave) if wave.wave_id == wave_id => {
                self.in_flight = None;
                true
            }
            _ => false,
        }
    }

    /// Set one coordinate on one row
    ///
    /// The row becomes SUCCESS once both coordinates are present; a half pair
    /// leaves the status as it was.
    pub fn set_row_lat_lng(
        &mut self,
        row_id: usize,
        field: CoordinateField,
        value: Option<f64>,
    ) -> CoordinateUpdate {
        let Some(row) = self.rows.get_mut(&row_id) else {
            return CoordinateUpdate::NoSuchRow;
        };

        if value.is_none() && row.status == GeocodeStatus::Success {
            return CoordinateUpdate::Rejected;
        }

        match field {
            CoordinateField::Lat => row.lat = value,
            CoordinateField::Lng => row.lng = value,
        }

        if let Some(point) = row.coordinates() {
            row.resolve(point);
        }

        CoordinateUpdate::Updated { status: row.status }
    }

    /// Open the picker for a row, returning its current point as the seed
    ///
    /// None (picker untouched) when the row does not exist.
    pub fn open_picker_for_row(&mut self, row_id: usize) -> Option<Option<Coordinates>> {
        let seed = self.rows.get(&row_id)?.coordinates();
        self.picker = PickerRequest::for_row(row_id);
        Some(seed)
    }

    pub fn close_picker(&mut self) {
        self.picker = PickerRequest::closed();
    }

    /// Store a picked point on the picker's target row and close the picker
    ///
    /// Returns the updated row id; None when no picker was open or its row
    /// no longer exists.
    pub fn save_picked_point(&mut self, point: Coordinates) -> Option<usize> {
        let target = self.picker.target_row_id.filter(|_| self.picker.open);
        self.picker = PickerRequest::closed();

        let row = self.rows.get_mut(&target?)?;
        row.resolve(point);
        Some(row.id)
    }

    pub fn picker(&self) -> PickerRequest {
        self.picker
    }

    pub fn started(&self) -> bool {
        self.started
    }

    pub fn wave_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn row(&self, row_id: usize) -> Option<&GeocodeRow> {
        self.rows.get(&row_id)
    }

    /// Rows in id order
    pub fn rows(&self) -> impl Iterator<Item = &GeocodeRow> {
        self.rows.values()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn failed_rows(&self) -> impl Iterator<Item = &GeocodeRow> {
        self.rows().filter(|r| r.status == GeocodeStatus::Failed)
    }

    pub fn stats(&self) -> GeocodeStats {
        GeocodeStats::from_rows(self.rows.values())
    }

    pub fn snapshot(&self) -> GeocodeSnapshot {
        GeocodeSnapshot {
            rows: self.rows.values().cloned().collect(),
            started: self.started,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CanonicalKey;

    fn raw_rows(n: usize) -> Vec<Arc<RawRow>> {
        (0..n)
            .map(|i| {
                Arc::new(
                    [
                        ("Name", format!("Person {}", i)),
                        ("Address", format!("Street {}", i)),
                    ]
                    .into_iter()
                    .collect(),
                )
            })
            .collect()
    }

    fn mapping() -> FieldMapping {
        let mut m = FieldMapping::new();
        m.update(CanonicalKey::RecipientName, "Name").unwrap();
        m.update(CanonicalKey::DeliveryAddressText, "Address").unwrap();
        m
    }

    fn started_engine(n: usize) -> ReconciliationEngine {
        let mut engine = ReconciliationEngine::new();
        assert!(engine.start(&raw_rows(n), &mapping()));
        engine
    }

    fn point(i: usize) -> Coordinates {
        Coordinates {
            lat: 27.0 + i as f64 / 100.0,
            lng: 85.0 + i as f64 / 100.0,
        }
    }

    fn results_for(wave: &WaveRequest) -> Vec<LookupResult> {
        wave.lookups
            .iter()
            .map(|l| LookupResult {
                row_id: l.row_id,
                outcome: if l.row_id % 2 == 0 {
                    Ok(point(l.row_id))
                } else {
                    Err(GeocodeFailure::NoMatch)
                },
            })
            .collect()
    }

    #[test]
    fn test_wave_covers_pending_rows_with_addresses() {
        let mut engine = started_engine(3);
        let wave = engine.issue_wave().unwrap();
        assert_eq!(wave.lookups.len(), 3);
        assert_eq!(wave.lookups[2].address, "Street 2");
        assert!(engine.wave_in_flight());
    }

    #[test]
    fn test_batch_apply_is_order_independent() {
        let mut forward = started_engine(6);
        let mut backward = forward.clone();

        let wave = forward.issue_wave().unwrap();
        let wave_b = backward.issue_wave().unwrap();
        assert_eq!(wave.wave_id, wave_b.wave_id);

        let results = results_for(&wave);
        let mut reversed = results.clone();
        reversed.reverse();
        let mut shuffled = results.clone();
        shuffled.rotate_left(2);

        let mut rotated = forward.clone();
        forward.apply_wave(wave.wave_id, results).unwrap();
        backward.apply_wave(wave.wave_id, reversed).unwrap();
        rotated.apply_wave(wave.wave_id, shuffled).unwrap();

        let a: Vec<_> = forward.rows().cloned().collect();
        let b: Vec<_> = backward.rows().cloned().collect();
        let c: Vec<_> = rotated.rows().cloned().collect();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(forward.stats().success, 3);
        assert_eq!(forward.stats().failed, 3);
    }

    #[test]
    fn test_failed_rows_get_generic_message() {
        let mut engine = started_engine(2);
        let wave = engine.issue_wave().unwrap();
        engine.apply_wave(wave.wave_id, results_for(&wave)).unwrap();

        let failed: Vec<_> = engine.failed_rows().collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error.as_deref(), Some("Could not geocode"));
        assert_eq!(failed[0].failure, Some(GeocodeFailure::NoMatch));
    }

    #[test]
    fn test_manual_entry_wins_over_late_wave_result() {
        let mut engine = started_engine(5);
        let wave = engine.issue_wave().unwrap();

        engine.set_row_lat_lng(3, CoordinateField::Lat, Some(27.7));
        let update = engine.set_row_lat_lng(3, CoordinateField::Lng, Some(85.3));
        assert_eq!(
            update,
            CoordinateUpdate::Updated {
                status: GeocodeStatus::Success
            }
        );

        let results = wave
            .lookups
            .iter()
            .map(|l| LookupResult {
                row_id: l.row_id,
                outcome: Err(GeocodeFailure::NoMatch),
            })
            .collect();
        let report = engine.apply_wave(wave.wave_id, results).unwrap();

        let row = engine.row(3).unwrap();
        assert_eq!(row.status, GeocodeStatus::Success);
        assert_eq!((row.lat, row.lng), (Some(27.7), Some(85.3)));
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 4);
    }

    #[test]
    fn test_picker_save_wins_over_late_wave_result() {
        let mut engine = started_engine(2);
        let wave = engine.issue_wave().unwrap();

        assert_eq!(engine.open_picker_for_row(0), Some(None));
        assert_eq!(engine.save_picked_point(point(9)), Some(0));

        engine
            .apply_wave(
                wave.wave_id,
                vec![LookupResult {
                    row_id: 0,
                    outcome: Ok(point(1)),
                }],
            )
            .unwrap();
        assert_eq!(engine.row(0).unwrap().coordinates(), Some(point(9)));
    }

    #[test]
    fn test_start_and_issue_are_idempotent() {
        let mut engine = started_engine(2);
        assert!(!engine.start(&raw_rows(5), &mapping()));
        assert_eq!(engine.rows().count(), 2);

        let wave = engine.issue_wave().unwrap();
        assert!(engine.issue_wave().is_none());

        engine.apply_wave(wave.wave_id, results_for(&wave)).unwrap();
        // Failed rows are left for the user, so nothing is pending
        assert!(engine.issue_wave().is_none());
    }

    #[test]
    fn test_issue_wave_requires_start() {
        let mut engine = ReconciliationEngine::new();
        assert!(engine.issue_wave().is_none());
    }

    #[test]
    fn test_stale_wave_is_rejected() {
        let mut engine = started_engine(2);
        let wave = engine.issue_wave().unwrap();

        assert_eq!(
            engine.apply_wave(wave.wave_id + 1, vec![]),
            Err(StaleWave {
                wave_id: wave.wave_id + 1
            })
        );
        assert!(engine.wave_in_flight());

        engine.reset();
        assert!(engine.apply_wave(wave.wave_id, results_for(&wave)).is_err());
    }

    #[test]
    fn test_wave_ids_not_reused_after_reset() {
        let mut engine = started_engine(1);
        let first = engine.issue_wave().unwrap();
        engine.reset();
        engine.start(&raw_rows(1), &mapping());
        let second = engine.issue_wave().unwrap();
        assert!(second.wave_id > first.wave_id);
    }

    #[test]
    fn test_abandoned_wave_rows_stay_pending() {
        let mut engine = started_engine(2);
        let wave = engine.issue_wave().unwrap();
        assert!(engine.abandon_wave(wave.wave_id));
        assert_eq!(engine.stats().pending, 2);
        assert!(engine.issue_wave().is_some());
    }

    #[test]
    fn test_missing_result_marks_row_failed() {
        let mut engine = started_engine(2);
        let wave = engine.issue_wave().unwrap();
        let report = engine
            .apply_wave(
                wave.wave_id,
                vec![LookupResult {
                    row_id: 0,
                    outcome: Ok(point(0)),
                }],
            )
            .unwrap();
        assert_eq!(report.resolved, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(engine.stats().pending, 0);
    }

    #[test]
    fn test_half_pair_keeps_status() {
        let mut engine = started_engine(2);
        let wave = engine.issue_wave().unwrap();
        engine.apply_wave(wave.wave_id, results_for(&wave)).unwrap();

        let update = engine.set_row_lat_lng(1, CoordinateField::Lat, Some(27.1));
        assert_eq!(
            update,
            CoordinateUpdate::Updated {
                status: GeocodeStatus::Failed
            }
        );
        let row = engine.row(1).unwrap();
        assert_eq!(row.error.as_deref(), Some("Could not geocode"));

        engine.set_row_lat_lng(1, CoordinateField::Lng, Some(85.1));
        let row = engine.row(1).unwrap();
        assert_eq!(row.status, GeocodeStatus::Success);
        assert!(row.error.is_none());
    }

    #[test]
    fn test_success_can_be_overridden_but_not_cleared() {
        let mut engine = started_engine(1);
        engine.set_row_lat_lng(0, CoordinateField::Lat, Some(1.0));
        engine.set_row_lat_lng(0, CoordinateField::Lng, Some(2.0));

        engine.set_row_lat_lng(0, CoordinateField::Lat, Some(3.0));
        assert_eq!(engine.row(0).unwrap().lat, Some(3.0));

        assert_eq!(
            engine.set_row_lat_lng(0, CoordinateField::Lng, None),
            CoordinateUpdate::Rejected
        );
        assert_eq!(engine.row(0).unwrap().lng, Some(2.0));
    }

    #[test]
    fn test_unknown_row_is_noop() {
        let mut engine = started_engine(1);
        assert_eq!(
            engine.set_row_lat_lng(42, CoordinateField::Lat, Some(1.0)),
            CoordinateUpdate::NoSuchRow
        );
        assert_eq!(engine.open_picker_for_row(42), None);
        assert!(!engine.picker().open);
        assert_eq!(engine.save_picked_point(point(0)), None);
    }

    #[test]
    fn test_picker_seed_and_close() {
        let mut engine = started_engine(1);
        engine.set_row_lat_lng(0, CoordinateField::Lat, Some(27.5));
        engine.set_row_lat_lng(0, CoordinateField::Lng, Some(85.5));

        let seed = engine.open_picker_for_row(0).unwrap();
        assert_eq!(seed, Some(Coordinates { lat: 27.5, lng: 85.5 }));
        assert_eq!(engine.picker(), PickerRequest::for_row(0));

        engine.close_picker();
        assert_eq!(engine.save_picked_point(point(3)), None);
        assert_eq!(engine.row(0).unwrap().lat, Some(27.5));
    }

    #[test]
    fn test_hydrate_restores_rows_and_downgrades_bad_success() {
        let raw = raw_rows(5);
        let mut engine = ReconciliationEngine::new();
        engine.start(&raw, &mapping());
        let wave = engine.issue_wave().unwrap();
        let results = wave
            .lookups
            .iter()
            .take(2)
            .map(|l| LookupResult {
                row_id: l.row_id,
                outcome: Ok(point(l.row_id)),
            })
            .collect::<Vec<_>>();
        // Simulate a reload mid-wave: first two rows resolved, rest pending
        let mut snapshot = engine.snapshot();
        for (row, result) in snapshot.rows.iter_mut().zip(&results) {
            if let Ok(p) = &result.outcome {
                row.resolve(*p);
            }
        }
        snapshot.rows[4].status = GeocodeStatus::Success;

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: GeocodeSnapshot = serde_json::from_str(&json).unwrap();

        let mut resumed = ReconciliationEngine::new();
        resumed.hydrate(restored, &raw);

        assert!(resumed.started());
        assert_eq!(resumed.row(0).unwrap().coordinates(), Some(point(0)));
        assert_eq!(resumed.row(1).unwrap().coordinates(), Some(point(1)));
        assert_eq!(resumed.row(4).unwrap().status, GeocodeStatus::Pending);
        assert!(Arc::ptr_eq(&resumed.row(2).unwrap().original, &raw[2]));

        let wave = resumed.issue_wave().unwrap();
        let ids: Vec<usize> = wave.lookups.iter().map(|l| l.row_id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }
}
