//! In-memory settings snapshot backed by the settings file.
//!
//! Readers get an immutable `Arc<AppSettings>`; updates build a new snapshot
//! and swap it in, so a snapshot handed out earlier never changes under its
//! holder. The file itself has no locking: concurrent writers in different
//! processes race and the last writer wins.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{error, info, warn};

use crate::io::{merge_known_keys, read_settings, write_settings, ConfigError};
use crate::schema::AppSettings;
use crate::validation::validate;

pub struct ConfigStore {
    path: PathBuf,
    snapshot: RwLock<Arc<AppSettings>>,
}

impl ConfigStore {
    /// Open the store at `path`, creating the settings directory if needed,
    /// and load the initial snapshot.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    warn!(dir = %parent.display(), error = %e, "Failed to create config directory");
                }
            }
        }

        let store = Self {
            path,
            snapshot: RwLock::new(Arc::new(AppSettings::default())),
        };
        store.refresh().await;
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read settings from disk.
    ///
    /// A missing file is created with the builtin defaults. A file that
    /// cannot be read or parsed yields the defaults in memory only.
    pub async fn load(&self) -> AppSettings {
        let settings = match read_settings(&self.path).await {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                let defaults = AppSettings::default();
                self.save(&defaults).await;
                info!(path = %self.path.display(), "Created settings file with defaults");
                defaults
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to load settings; using defaults");
                return AppSettings::default();
            }
        };

        let report = validate(&settings);
        for warning in &report.warnings {
            warn!(key = %warning.key, message = %warning.message, "Settings warning");
        }
        for err in &report.errors {
            error!(key = %err.key, message = %err.message, "Settings error");
        }

        settings
    }

    /// Write the full settings to disk. Failures are logged, not raised.
    pub async fn save(&self, settings: &AppSettings) -> bool {
        match write_settings(settings, &self.path).await {
            Ok(()) => true,
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to save settings");
                false
            }
        }
    }

    /// Merge `partial` into the settings currently on disk, persist the
    /// result, and make it the current snapshot.
    pub async fn update(&self, partial: &Value) -> Result<Arc<AppSettings>, ConfigError> {
        let current = self.load().await;
        let merged = Arc::new(merge_known_keys(&current, partial)?);
        self.save(&merged).await;
        self.swap(Arc::clone(&merged));
        Ok(merged)
    }

    /// The last-loaded snapshot. Does not touch the disk.
    pub fn get(&self) -> Arc<AppSettings> {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Re-read the settings file and replace the snapshot.
    pub async fn refresh(&self) -> Arc<AppSettings> {
        let settings = Arc::new(self.load().await);
        self.swap(Arc::clone(&settings));
        settings
    }

    fn swap(&self, settings: Arc<AppSettings>) {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        *guard = settings;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config_file_path;
    use serde_json::json;

    #[tokio::test]
    async fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = config_file_path(&dir.path().join("config"));

        let store = ConfigStore::open(&path).await;
        assert_eq!(*store.get(), AppSettings::default());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn unparsable_file_falls_back_without_overwriting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_config.json");
        std::fs::write(&path, "{ not json").unwrap();

        let store = ConfigStore::open(&path).await;
        assert_eq!(*store.get(), AppSettings::default());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[tokio::test]
    async fn update_then_get_keeps_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_config.json");
        let store = ConfigStore::open(&path).await;
        store
            .update(&json!({ "rabbitmq_host": "mq.example", "worker_concurrency": 6 }))
            .await
            .unwrap();

        let before = store.get();
        store.update(&json!({ "api_key": "X" })).await.unwrap();
        let after = store.get();

        assert_eq!(after.api_key, "X");
        assert_eq!(after.rabbitmq_host, "mq.example");
        assert_eq!(after.worker_concurrency, 6);
        // An earlier snapshot is never mutated in place.
        assert_eq!(before.api_key, "");
    }

    #[tokio::test]
    async fn get_does_not_reread_until_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_config.json");
        let store = ConfigStore::open(&path).await;

        let mut edited = AppSettings::default();
        edited.model_name = "other-model".into();
        assert!(store.save(&edited).await);

        assert_eq!(store.get().model_name, AppSettings::default().model_name);
        assert_eq!(store.refresh().await.model_name, "other-model");
        assert_eq!(store.get().model_name, "other-model");
    }

    #[tokio::test]
    async fn update_with_bad_value_changes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app_config.json");
        let store = ConfigStore::open(&path).await;

        assert!(store.update(&json!({ "rabbitmq_port": "nope" })).await.is_err());
        assert_eq!(*store.get(), AppSettings::default());
    }
}
