//! Configuration resolution for courier-import
//!
//! The geocoder API key is resolved Database → ENV → TOML. A missing key is
//! not fatal: the service starts and lookups fail until one is supplied.

use courier_common::config::{load_toml_config, write_toml_config, TomlConfig};
use courier_common::Result;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::{info, warn};

/// Environment variable holding the geocoder key
pub const GEOCODER_API_KEY_ENV: &str = "COURIER_GEOCODER_API_KEY";

/// Default listen address
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5740";

/// Non-empty, non-whitespace
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve the geocoder key, highest priority first
pub async fn resolve_geocoder_api_key(
    db: &Pool<Sqlite>,
    toml_config: &TomlConfig,
) -> Result<Option<String>> {
    let db_key = crate::db::settings::get_geocoder_api_key(db)
        .await?
        .filter(|k| is_valid_key(k));
    let env_key = std::env::var(GEOCODER_API_KEY_ENV)
        .ok()
        .filter(|k| is_valid_key(k));
    let toml_key = toml_config
        .geocoder
        .api_key
        .clone()
        .filter(|k| is_valid_key(k));

    let sources: Vec<&str> = [
        (db_key.is_some(), "database"),
        (env_key.is_some(), "environment"),
        (toml_key.is_some(), "TOML"),
    ]
    .into_iter()
    .filter(|(present, _)| *present)
    .map(|(_, name)| name)
    .collect();

    if sources.len() > 1 {
        warn!(
            "Geocoder API key found in multiple sources: {}. Using {}.",
            sources.join(", "),
            sources[0]
        );
    }

    match sources.first() {
        Some(source) => info!("Geocoder API key loaded from {}", source),
        None => warn!(
            "Geocoder API key not configured; set it via POST /settings/geocoder_api_key, \
             {} or [geocoder] api_key in the TOML file",
            GEOCODER_API_KEY_ENV
        ),
    }

    Ok(db_key.or(env_key).or(toml_key))
}

/// Mirror the key into the TOML file
///
/// Best-effort: the database is authoritative, so a failed write only warns.
pub fn sync_api_key_to_toml(key: &str, toml_path: &Path) {
    let mut config = load_toml_config(toml_path);
    config.geocoder.api_key = Some(key.to_string());

    match write_toml_config(&config, toml_path) {
        Ok(()) => info!("Settings synced to TOML: {}", toml_path.display()),
        Err(e) => warn!("TOML write failed (database write succeeded): {}", e),
    }
}
