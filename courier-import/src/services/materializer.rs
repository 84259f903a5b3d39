//! Row materializer
//!
//! Projects raw rows through the field mapping. Pure and deterministic: the
//! same rows and mapping always yield the same geocode rows.

use crate::models::{CanonicalKey, FieldMapping, GeocodeRow, GeocodeStatus, RawRow};
use crate::utils::parse_leading_number;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Build one geocode row per raw row; `id` is the row's position
pub fn materialize(raw_rows: &[Arc<RawRow>], mapping: &FieldMapping) -> Vec<GeocodeRow> {
    raw_rows
        .iter()
        .enumerate()
        .map(|(id, raw)| materialize_row(id, raw, mapping))
        .collect()
}

fn materialize_row(id: usize, raw: &Arc<RawRow>, mapping: &FieldMapping) -> GeocodeRow {
    let mapped: BTreeMap<CanonicalKey, String> = mapping
        .iter()
        .filter(|(_, header)| !header.is_empty())
        .filter_map(|(key, header)| raw.get(header).map(|v| (key, v.to_string())))
        .collect();

    let coord = |key: CanonicalKey| mapped.get(&key).and_then(|v| parse_leading_number(v));
    let (lat, lng, status) = match (coord(CanonicalKey::Lat), coord(CanonicalKey::Lng)) {
        (Some(lat), Some(lng)) => (Some(lat), Some(lng), GeocodeStatus::Success),
        _ => (None, None, GeocodeStatus::Pending),
    };

    GeocodeRow {
        id,
        original: Arc::clone(raw),
        mapped,
        lat,
        lng,
        status,
        error: None,
        failure: None,
    }
}
