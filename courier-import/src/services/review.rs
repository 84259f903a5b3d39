//! Review-step map data

use crate::models::{CanonicalKey, GeocodeRow, GeocodeStatus};
use serde::Serialize;

/// `[[min_lng, min_lat], [max_lng, max_lat]]`
pub type Bounds = [[f64; 2]; 2];

/// Kathmandu valley, shown when nothing is resolved yet
pub const FALLBACK_BOUNDS: Bounds = [[85.276729, 27.655014], [85.372076, 27.751516]];

/// One resolved row on the map
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewPoint {
    pub id: usize,
    pub lat: f64,
    pub lng: f64,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewData {
    pub points: Vec<ReviewPoint>,
    pub bounds: Bounds,
}

/// Reference id, then recipient name, then "Row <n>" (1-based)
fn label_for(row: &GeocodeRow) -> String {
    [CanonicalKey::ReferenceId, CanonicalKey::RecipientName]
        .into_iter()
        .find_map(|key| row.mapped_value(key).filter(|v| !v.is_empty()))
        .map(str::to_string)
        .unwrap_or_else(|| format!("Row {}", row.id + 1))
}

pub fn review_points<'a>(rows: impl IntoIterator<Item = &'a GeocodeRow>) -> ReviewData {
    let points: Vec<ReviewPoint> = rows
        .into_iter()
        .filter(|row| row.status == GeocodeStatus::Success)
        .filter_map(|row| {
            let point = row.coordinates()?;
            Some(ReviewPoint {
                id: row.id,
                lat: point.lat,
                lng: point.lng,
                label: label_for(row),
            })
        })
        .collect();

    let bounds = bounds_of(&points).unwrap_or(FALLBACK_BOUNDS);
    ReviewData { points, bounds }
}

fn bounds_of(points: &[ReviewPoint]) -> Option<Bounds> {
    let first = points.first()?;
    let init = [[first.lng, first.lat], [first.lng, first.lat]];
    Some(points.iter().fold(init, |[min, max], p| {
        [
            [min[0].min(p.lng), min[1].min(p.lat)],
            [max[0].max(p.lng), max[1].max(p.lat)],
        ]
    }))
}
