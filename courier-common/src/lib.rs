//! # Courier Common Library
//!
//! Shared code for the courier portal services:
//! - Error types
//! - Configuration loading (TOML, root folder resolution)
//! - Event types and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
