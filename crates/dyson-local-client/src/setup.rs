//! Config and device descriptor loading.

use std::path::{Path, PathBuf};

use dyson_local_types::DeviceDescriptor;
use tracing::info;

use crate::config::Config;
use crate::error::ClientError;

/// Load configuration from the given path, or the default location.
pub fn load_config(path: Option<&str>) -> Result<Config, ClientError> {
    let config_path = match path {
        Some(p) => PathBuf::from(p),
        None => default_config_path(),
    };

    if config_path.exists() {
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| ClientError::Config(format!("failed to read config: {e}")))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| ClientError::Config(format!("failed to parse config: {e}")))?;
        info!(path = %config_path.display(), "loaded config");
        Ok(config)
    } else if path.is_some() {
        Err(ClientError::Config(format!(
            "config file {} does not exist",
            config_path.display()
        )))
    } else {
        info!("no config file found, using defaults");
        Ok(Config::default())
    }
}

/// Load a device descriptor: a manifest entry as JSON (`.json`) or the same
/// fields as TOML (anything else).
pub fn load_descriptor(path: &Path) -> Result<DeviceDescriptor, ClientError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ClientError::Config(format!("failed to read device {}: {e}", path.display()))
    })?;

    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let device: DeviceDescriptor = if is_json {
        serde_json::from_str(&content)
            .map_err(|e| ClientError::Config(format!("failed to parse device: {e}")))?
    } else {
        toml::from_str(&content)
            .map_err(|e| ClientError::Config(format!("failed to parse device: {e}")))?
    };

    info!(serial = %device.serial, name = %device.name, "loaded device descriptor");
    Ok(device)
}

/// Get the default config directory path.
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("dyson-local")
}

/// Get the default config file path.
fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}
