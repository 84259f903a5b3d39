//! Business logic services for the bulk import workflow

pub mod csv_parser;
pub mod geocoder;
pub mod materializer;
pub mod reconciler;
pub mod resume_store;
pub mod review;
pub mod session_controller;
pub mod submission;
pub mod wave_runner;

pub use csv_parser::{parse as parse_csv, CsvError, ParsedCsv};
pub use geocoder::{BaatoClient, Geocoder, GeocoderError, PlaceCandidate, PlaceDetail};
pub use materializer::materialize;
pub use reconciler::ReconciliationEngine;
pub use resume_store::{ResumeStore, RESUME_KEY};
pub use review::{review_points, ReviewData, ReviewPoint};
pub use session_controller::{
    ControllerSettings, FailedRow, ImportController, ImportError, PickerView, SessionView,
    SubmissionOutcome,
};
pub use submission::{
    build_submission_payload, submittable_rows, BulkUploadResponse, HttpOrderClient,
    OrderCreator, OrderItem, SubmissionError, WeightPolicy,
};
pub use wave_runner::{run_wave, WaveSettings};
