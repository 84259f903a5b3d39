//! Utility modules for courier-import

pub mod db_retry;
pub mod numbers;

pub use db_retry::retry_on_lock;
pub use numbers::{parse_leading_number, parse_number_loose};
