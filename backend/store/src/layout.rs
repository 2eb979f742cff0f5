use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::info;

/// Data directory used when `FASTOCR_DATA_DIR` is unset.
pub const DEFAULT_DATA_DIR: &str = "persistent_data";

const UPLOADS_DIR: &str = "uploads";
const RESULTS_DIR: &str = "results";
const LEDGER_FILE: &str = "tasks.db";

/// On-disk layout shared by the server and every worker:
///
/// ```text
/// <root>/uploads/<task_id><ext>
/// <root>/results/<task_id>.json
/// <root>/tasks.db
/// ```
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    /// Resolve the data root: explicit path > `FASTOCR_DATA_DIR` > `./persistent_data`.
    pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        std::env::var("FASTOCR_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR))
    }

    /// Create the directory tree under `root` and return the layout with an
    /// absolute root, so stored upload paths can be handed to other processes.
    pub async fn prepare(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        for sub in [UPLOADS_DIR, RESULTS_DIR] {
            let dir = root.join(sub);
            fs::create_dir_all(&dir)
                .await
                .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;
        }
        let root = fs::canonicalize(root)
            .await
            .with_context(|| format!("Failed to resolve data directory: {}", root.display()))?;
        info!(root = %root.display(), "Data directory ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn uploads_dir(&self) -> PathBuf {
        self.root.join(UPLOADS_DIR)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.root.join(RESULTS_DIR)
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.root.join(LEDGER_FILE)
    }
}
