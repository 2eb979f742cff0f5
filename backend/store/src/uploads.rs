use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::debug;

use crate::check_task_id;

/// Raw uploaded images, stored as `<task_id><original_extension>`.
/// Nothing in the pipeline deletes them.
#[derive(Debug, Clone)]
pub struct UploadStore {
    dir: PathBuf,
}

impl UploadStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File name an upload is stored under: the task id plus the original
    /// extension (with its dot), or the bare task id when there is none.
    pub fn stored_name(task_id: &str, original_filename: &str) -> String {
        match Path::new(original_filename).extension() {
            Some(ext) => format!("{task_id}.{}", ext.to_string_lossy()),
            None => task_id.to_string(),
        }
    }

    /// Persist the bytes of an upload and return the stored path.
    pub async fn save(&self, task_id: &str, original_filename: &str, bytes: &[u8]) -> Result<PathBuf> {
        check_task_id(task_id)?;
        let path = self.dir.join(Self::stored_name(task_id, original_filename));
        fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write upload: {}", path.display()))?;
        debug!(task_id = %task_id, path = %path.display(), bytes = bytes.len(), "Stored upload");
        Ok(path)
    }

    /// Name of the stored upload for `task_id`, if any.
    pub async fn find(&self, task_id: &str) -> Result<Option<String>> {
        check_task_id(task_id)?;
        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list uploads: {}", self.dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(task_id) {
                return Ok(Some(name));
            }
        }
        Ok(None)
    }
}
