//! Imported rows and their geocoding state
//!
//! Per-row state machine:
//! - materialized with coordinates → SUCCESS
//! - materialized without → PENDING
//! - PENDING → SUCCESS (lookup resolved) or FAILED (lookup did not)
//! - FAILED → SUCCESS, SUCCESS → SUCCESS (manual override)

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::mapping::CanonicalKey;

/// Reason recorded on a row whose automated lookup did not resolve
pub const GEOCODE_FAILED_MESSAGE: &str = "Could not geocode";

/// One data line of the uploaded file: header → raw value, in column order
///
/// Immutable once parsed; later stages share it through `Arc`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    fields: Vec<(String, String)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite. A repeated header keeps its first position and
    /// takes the later value.
    pub fn insert(&mut self, header: impl Into<String>, value: impl Into<String>) {
        let header = header.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(h, _)| *h == header) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((header, value)),
        }
    }

    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(h, _)| h == header)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(h, v)| (h.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<H: Into<String>, V: Into<String>> FromIterator<(H, V)> for RawRow {
    fn from_iter<I: IntoIterator<Item = (H, V)>>(iter: I) -> Self {
        let mut row = RawRow::new();
        for (h, v) in iter {
            row.insert(h, v);
        }
        row
    }
}

impl Serialize for RawRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (h, v) in &self.fields {
            map.serialize_entry(h, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RawRow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RawRowVisitor;

        impl<'de> Visitor<'de> for RawRowVisitor {
            type Value = RawRow;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object of header name to string value")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<RawRow, A::Error> {
                let mut row = RawRow::new();
                while let Some((h, v)) = access.next_entry::<String, String>()? {
                    row.insert(h, v);
                }
                Ok(row)
            }
        }

        deserializer.deserialize_map(RawRowVisitor)
    }
}

/// Row geocoding status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeocodeStatus {
    Pending,
    Success,
    Failed,
}

impl GeocodeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            GeocodeStatus::Pending => "pending",
            GeocodeStatus::Success => "success",
            GeocodeStatus::Failed => "failed",
        }
    }
}

/// A resolved point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// Which half of a coordinate pair a manual edit targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinateField {
    Lat,
    Lng,
}

/// Why an automated lookup did not resolve
///
/// Row state does not distinguish these: every variant ends as FAILED with
/// [`GEOCODE_FAILED_MESSAGE`]. The variant is kept for diagnostics only.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeocodeFailure {
    #[error("delivery address is blank")]
    BlankAddress,

    #[error("no place matched the address")]
    NoMatch,

    #[error("place has no usable centroid")]
    NoCentroid,

    #[error("lookup timed out")]
    Timeout,

    #[error("geocoding service error: {message}")]
    Service { message: String },
}

/// A row moving through reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeocodeRow {
    /// 0-based position at materialization; never reassigned
    pub id: usize,
    pub original: Arc<RawRow>,
    /// Raw values projected through the mapping; unmapped keys absent
    pub mapped: BTreeMap<CanonicalKey, String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub status: GeocodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<GeocodeFailure>,
}

impl GeocodeRow {
    pub fn mapped_value(&self, key: CanonicalKey) -> Option<&str> {
        self.mapped.get(&key).map(String::as_str)
    }

    /// Text handed to the address search (may be blank)
    pub fn delivery_address(&self) -> &str {
        self.mapped_value(CanonicalKey::DeliveryAddressText).unwrap_or("")
    }

    pub fn coordinates(&self) -> Option<Coordinates> {
        match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => Some(Coordinates { lat, lng }),
            _ => None,
        }
    }

    pub fn has_coordinates(&self) -> bool {
        self.coordinates().is_some()
    }

    pub(crate) fn resolve(&mut self, point: Coordinates) {
        self.lat = Some(point.lat);
        self.lng = Some(point.lng);
        self.status = GeocodeStatus::Success;
        self.error = None;
        self.failure = None;
    }

    pub(crate) fn fail(&mut self, failure: GeocodeFailure) {
        self.status = GeocodeStatus::Failed;
        self.error = Some(GEOCODE_FAILED_MESSAGE.to_string());
        self.failure = Some(failure);
    }
}
