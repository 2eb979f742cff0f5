use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{debug, warn};

use fastocr_core::ResultArtifact;

use crate::check_task_id;

/// Result artifacts, one `<task_id>.json` per attempted task.
///
/// Writes go through a temp file and a rename, so readers see either no
/// artifact or a complete one.
#[derive(Debug, Clone)]
pub struct ResultStore {
    dir: PathBuf,
}

impl ResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, task_id: &str) -> PathBuf {
        self.dir.join(format!("{task_id}.json"))
    }

    pub async fn write(&self, task_id: &str, artifact: &ResultArtifact) -> Result<PathBuf> {
        check_task_id(task_id)?;
        let path = self.path_for(task_id);
        let tmp_path = self.dir.join(format!("{task_id}.json.tmp"));

        let json = serde_json::to_vec(artifact).context("Failed to serialize result artifact")?;
        fs::write(&tmp_path, json)
            .await
            .with_context(|| format!("Failed to write temp artifact: {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &path)
            .await
            .with_context(|| format!("Failed to rename artifact into place: {}", path.display()))?;

        debug!(task_id = %task_id, path = %path.display(), "Wrote result artifact");
        Ok(path)
    }

    /// Load the artifact for `task_id`; `Ok(None)` when it doesn't exist yet.
    pub async fn read(&self, task_id: &str) -> Result<Option<ResultArtifact>> {
        check_task_id(task_id)?;
        let path = self.path_for(task_id);
        let raw = match fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read artifact: {}", path.display()))
            }
        };
        let artifact = serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse artifact: {}", path.display()))?;
        Ok(Some(artifact))
    }

    /// Every readable artifact as `(task_id, artifact)`. Unreadable files are
    /// skipped with a warning; only a failure to list the directory is an error.
    pub async fn list(&self) -> Result<Vec<(String, ResultArtifact)>> {
        let mut entries = fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("Failed to list results: {}", self.dir.display()))?;

        let mut artifacts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(task_id) = name.strip_suffix(".json") else {
                continue;
            };
            match self.read(task_id).await {
                Ok(Some(artifact)) => artifacts.push((task_id.to_string(), artifact)),
                Ok(None) => warn!(task_id = %task_id, "Result artifact vanished while listing"),
                Err(e) => warn!(task_id = %task_id, error = %e, "Skipping unreadable result artifact"),
            }
        }
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());

        assert!(store.read("t1").await.unwrap().is_none());

        store.write("t1", &ResultArtifact::success("hello")).await.unwrap();
        store.write("t2", &ResultArtifact::failure("boom")).await.unwrap();

        let t1 = store.read("t1").await.unwrap().unwrap();
        assert!(!t1.is_error());

        let mut listed = store.list().await.unwrap();
        listed.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].0, "t1");
        assert!(listed[1].1.is_error());
        assert!(!dir.path().join("t1.json.tmp").exists());
    }

    #[tokio::test]
    async fn list_skips_corrupt_and_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        store.write("good", &ResultArtifact::success("ok")).await.unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ truncated").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "good");
    }
}
