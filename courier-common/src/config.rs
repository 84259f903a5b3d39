//! Configuration loading and root folder resolution
//!
//! Services read an optional TOML file. A missing or unreadable file is never
//! fatal: a warning is logged and compiled defaults apply.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "COURIER_ROOT_FOLDER";

/// Database file name inside the root folder
pub const DATABASE_FILE: &str = "courier.db";

/// Logging section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by RUST_LOG)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Address-search / place-detail provider section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeocoderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    /// Sustained request rate allowed against the provider
    pub requests_per_second: u32,
    /// Upper bound on lookups in flight within one wave
    pub max_concurrent_lookups: usize,
    /// Per-lookup deadline (search + detail together)
    pub lookup_timeout_ms: u64,
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.baato.io/api/v1".to_string(),
            api_key: None,
            requests_per_second: 10,
            max_concurrent_lookups: 8,
            lookup_timeout_ms: 5000,
        }
    }
}

/// Order backend section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrdersConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000".to_string(),
            api_key: None,
            request_timeout_ms: 30_000,
        }
    }
}

/// Bulk import limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub max_upload_bytes: usize,
    pub weight_floor_kg: f64,
    pub weight_ceiling_kg: f64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_upload_bytes: 2 * 1024 * 1024,
            weight_floor_kg: 0.01,
            weight_ceiling_kg: 1000.0,
        }
    }
}

/// Full TOML file layout
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub bind_address: Option<String>,
    pub logging: LoggingConfig,
    pub geocoder: GeocoderConfig,
    pub orders: OrdersConfig,
    pub import: ImportConfig,
}

/// Default TOML location for a module: `<config dir>/courier/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("courier").join(format!("{}.toml", module_name)))
}

/// Load a TOML config, degrading to defaults when absent or broken
pub fn load_toml_config(path: &Path) -> TomlConfig {
    if !path.exists() {
        warn!(path = %path.display(), "Config file not found, using defaults");
        return TomlConfig::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str::<TomlConfig>(&content) {
            Ok(config) => {
                info!(path = %path.display(), "Loaded config file");
                config
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Config file invalid, using defaults");
                TomlConfig::default()
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Config file unreadable, using defaults");
            TomlConfig::default()
        }
    }
}

/// Write config atomically: temp file in the same directory, then rename
///
/// On Unix the file is restricted to 0600 since it may hold API keys.
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))?;
    }

    if let Err(e) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(Error::Io(e));
    }

    Ok(())
}

/// Root folder resolution, highest priority first:
/// 1. Command-line argument
/// 2. `COURIER_ROOT_FOLDER`
/// 3. TOML `root_folder`
/// 4. OS data directory default
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: &str) -> Self {
        Self {
            module_name: module_name.to_string(),
            cli_arg: None,
            toml_root: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml(mut self, config: &TomlConfig) -> Self {
        self.toml_root = config.root_folder.clone();
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!(module = %self.module_name, "Root folder from command line");
            return path.clone();
        }

        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.trim().is_empty() {
                info!(module = %self.module_name, "Root folder from {}", ROOT_FOLDER_ENV);
                return PathBuf::from(path);
            }
        }

        if let Some(path) = &self.toml_root {
            info!(module = %self.module_name, "Root folder from TOML config");
            return path.clone();
        }

        default_root_folder()
    }
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("courier"))
        .unwrap_or_else(|| PathBuf::from("./courier_data"))
}

/// Creates the root folder and locates the database inside it
pub struct RootFolderInitializer {
    root: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Safe to call repeatedly
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root.join(DATABASE_FILE)
    }
}
