//! Column mapping registry
//!
//! Holds the correspondence between canonical order fields and the headers
//! of the uploaded file. Pure configuration: nothing here touches rows.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Target fields an import column can be mapped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalKey {
    RecipientName,
    RecipientPhone,
    DeliveryAddressText,
    ParcelWeight,
    ReferenceId,
    CodAmount,
    Municipality,
    Ward,
    Tole,
    Landmark,
    Lat,
    Lng,
    Dimensions,
}

impl CanonicalKey {
    /// Must be mapped before reconciliation can start
    pub const REQUIRED: [CanonicalKey; 6] = [
        CanonicalKey::RecipientName,
        CanonicalKey::RecipientPhone,
        CanonicalKey::DeliveryAddressText,
        CanonicalKey::ParcelWeight,
        CanonicalKey::ReferenceId,
        CanonicalKey::CodAmount,
    ];

    pub const OPTIONAL: [CanonicalKey; 7] = [
        CanonicalKey::Municipality,
        CanonicalKey::Ward,
        CanonicalKey::Tole,
        CanonicalKey::Landmark,
        CanonicalKey::Lat,
        CanonicalKey::Lng,
        CanonicalKey::Dimensions,
    ];

    /// Required keys first, then optional, in display order
    pub fn all() -> impl Iterator<Item = CanonicalKey> {
        Self::REQUIRED.into_iter().chain(Self::OPTIONAL)
    }

    pub fn is_required(self) -> bool {
        Self::REQUIRED.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CanonicalKey::RecipientName => "recipient_name",
            CanonicalKey::RecipientPhone => "recipient_phone",
            CanonicalKey::DeliveryAddressText => "delivery_address_text",
            CanonicalKey::ParcelWeight => "parcel_weight",
            CanonicalKey::ReferenceId => "reference_id",
            CanonicalKey::CodAmount => "cod_amount",
            CanonicalKey::Municipality => "municipality",
            CanonicalKey::Ward => "ward",
            CanonicalKey::Tole => "tole",
            CanonicalKey::Landmark => "landmark",
            CanonicalKey::Lat => "lat",
            CanonicalKey::Lng => "lng",
            CanonicalKey::Dimensions => "dimensions",
        }
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalKey {
    type Err = MappingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| MappingError::UnknownKey(s.to_string()))
    }
}

/// Mapping registry errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MappingError {
    #[error("Unknown field: {0}")]
    UnknownKey(String),

    #[error("Column '{0}' does not exist in the uploaded file")]
    UnknownHeader(String),

    #[error("Required field {0} cannot be left unmapped")]
    RequiredKeyCleared(CanonicalKey),

    #[error("Mapping is read-only once geocoding has started")]
    Frozen,

    #[error("Required fields are not mapped: {0}")]
    Incomplete(String),
}

/// Canonical key → header name; empty string means unmapped
///
/// Every canonical key is always present.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldMapping {
    entries: BTreeMap<CanonicalKey, String>,
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldMapping {
    pub fn new() -> Self {
        Self {
            entries: CanonicalKey::all().map(|k| (k, String::new())).collect(),
        }
    }

    /// Set `key` to `header`. An empty header clears the mapping, which is
    /// refused for required keys.
    pub fn update(&mut self, key: CanonicalKey, header: &str) -> Result<(), MappingError> {
        if header.is_empty() && key.is_required() {
            return Err(MappingError::RequiredKeyCleared(key));
        }
        self.entries.insert(key, header.to_string());
        Ok(())
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// True iff every required key names a header
    pub fn is_complete(&self) -> bool {
        self.missing_required().is_empty()
    }

    pub fn missing_required(&self) -> Vec<CanonicalKey> {
        CanonicalKey::REQUIRED
            .into_iter()
            .filter(|k| self.header_for(*k).is_none())
            .collect()
    }

    /// Mapped header, None when unmapped
    pub fn header_for(&self, key: CanonicalKey) -> Option<&str> {
        self.entries
            .get(&key)
            .map(String::as_str)
            .filter(|h| !h.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (CanonicalKey, &str)> {
        self.entries.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

// Lenient: unknown keys are dropped and missing keys stay unmapped, so a
// record written by an older build still loads.
impl<'de> Deserialize<'de> for FieldMapping {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
        let mut mapping = FieldMapping::new();
        for (key, header) in raw {
            if let Ok(key) = key.parse::<CanonicalKey>() {
                mapping.entries.insert(key, header);
            }
        }
        Ok(mapping)
    }
}
