//! HTTP API handlers for courier-import
//!
//! REST for the import workflow, SSE for progress.

pub mod health;
pub mod import_workflow;
pub mod settings;
pub mod sse;

pub use health::health_routes;
pub use import_workflow::import_routes;
pub use settings::settings_routes;
pub use sse::import_event_stream;
