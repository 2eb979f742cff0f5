//! Settings file read/write with atomic replace, and partial merges.

use crate::schema::AppSettings;
use anyhow::{Context, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

/// Settings file name within the config directory.
const CONFIG_FILE_NAME: &str = "app_config.json";

/// Config directory used when `FASTOCR_CONFIG_DIR` is unset.
const DEFAULT_CONFIG_DIR: &str = "config";

/// Errors surfaced to callers of a settings update.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("settings patch must be a JSON object")]
    InvalidPatch,

    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Resolve the FastOCR config directory.
/// Priority: `FASTOCR_CONFIG_DIR` env > `./config`
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("FASTOCR_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    PathBuf::from(DEFAULT_CONFIG_DIR)
}

/// Resolve the full path to the settings file.
pub fn config_file_path(config_dir: &Path) -> PathBuf {
    config_dir.join(CONFIG_FILE_NAME)
}

/// Read and parse the settings file.
///
/// Returns `Ok(None)` if the file doesn't exist (first run).
pub async fn read_settings(path: &Path) -> Result<Option<AppSettings>> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        debug!(path = %path.display(), "Settings file does not exist");
        return Ok(None);
    }

    let raw = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

    let settings: AppSettings = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse settings JSON at: {}", path.display()))?;

    debug!(path = %path.display(), "Read settings");
    Ok(Some(settings))
}

/// Write settings to disk atomically (write to temp file, rename).
pub async fn write_settings(settings: &AppSettings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
    }

    let json = serde_json::to_string_pretty(settings)
        .context("Failed to serialize settings to JSON")?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, json.as_bytes())
        .await
        .with_context(|| format!("Failed to write temp settings: {}", tmp_path.display()))?;

    fs::rename(&tmp_path, path).await.with_context(|| {
        format!("Failed to rename temp settings to: {}", path.display())
    })?;

    info!(path = %path.display(), "Wrote settings");
    Ok(())
}

/// Overwrite only the keys of `settings` that appear in `patch`.
///
/// Unknown keys and `null` values are ignored. A value that does not fit the
/// key's type is rejected and nothing is changed.
pub fn merge_known_keys(settings: &AppSettings, patch: &Value) -> Result<AppSettings, ConfigError> {
    let Value::Object(patch_map) = patch else {
        return Err(ConfigError::InvalidPatch);
    };

    let mut value = serde_json::to_value(settings)
        .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
    let Value::Object(target) = &mut value else {
        return Err(ConfigError::InvalidPatch);
    };

    for (key, patch_val) in patch_map {
        if patch_val.is_null() {
            continue;
        }
        if let Some(slot) = target.get_mut(key) {
            *slot = patch_val.clone();
        } else {
            debug!(key = %key, "Ignoring unknown settings key");
        }
    }

    serde_json::from_value(value).map_err(|e| ConfigError::InvalidValue(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_overwrites_present_keys_only() {
        let base = AppSettings::default();
        let merged = merge_known_keys(&base, &json!({ "api_key": "X", "model_name": null })).unwrap();
        assert_eq!(merged.api_key, "X");
        assert_eq!(merged.model_name, base.model_name);
        assert_eq!(merged.rabbitmq_port, base.rabbitmq_port);
    }

    #[test]
    fn merge_ignores_unknown_keys() {
        let base = AppSettings::default();
        let merged = merge_known_keys(&base, &json!({ "colour": "blue" })).unwrap();
        assert_eq!(merged, base);
    }

    #[test]
    fn merge_rejects_bad_values() {
        let base = AppSettings::default();
        assert!(matches!(
            merge_known_keys(&base, &json!({ "rabbitmq_port": "not-a-port" })),
            Err(ConfigError::InvalidValue(_))
        ));
        assert!(matches!(
            merge_known_keys(&base, &json!(["api_key"])),
            Err(ConfigError::InvalidPatch)
        ));
    }

    #[tokio::test]
    async fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file_path(&dir.path().join("nested"));
        let mut settings = AppSettings::default();
        settings.rabbitmq_host = "broker.internal".into();

        write_settings(&settings, &path).await.unwrap();
        let read = read_settings(&path).await.unwrap().unwrap();
        assert_eq!(read, settings);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_settings(&dir.path().join("absent.json")).await.unwrap().is_none());
    }
}
