//! Data models for the bulk import pipeline

pub mod geocode_row;
pub mod import_session;
pub mod mapping;

pub use geocode_row::{
    CoordinateField, Coordinates, GeocodeFailure, GeocodeRow, GeocodeStatus, RawRow,
    GEOCODE_FAILED_MESSAGE,
};
pub use import_session::{GeocodeSnapshot, GeocodeStats, ImportStep, PersistedSession, PickerRequest};
pub use mapping::{CanonicalKey, FieldMapping, MappingError};
