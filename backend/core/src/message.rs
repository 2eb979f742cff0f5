use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FastOcrError;
use crate::types::epoch_seconds;

/// Status carried by a task record on the wire. Records are only ever
/// published in the `queued` state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Queued,
}

/// The OCR task published onto the work queue. Immutable once published.
///
/// Every field decodes with a default so that a message missing `api_key`
/// or `image_path` still parses and is rejected by [`TaskRecord::validate`]
/// instead of by the JSON decoder.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRecord {
    #[serde(default)]
    pub task_id: String,
    #[serde(default)]
    pub original_filename: String,
    #[serde(default)]
    pub image_path: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub timestamp: f64,
}

impl TaskRecord {
    pub fn new(
        task_id: Uuid,
        original_filename: impl Into<String>,
        image_path: &Path,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.to_string(),
            original_filename: original_filename.into(),
            image_path: image_path.to_string_lossy().into_owned(),
            api_key: api_key.into(),
            status: TaskStatus::Queued,
            timestamp: epoch_seconds(),
        }
    }

    /// Decode a queue message body.
    pub fn from_slice(body: &[u8]) -> Result<Self, FastOcrError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Encode as a queue message body.
    pub fn to_vec(&self) -> Result<Vec<u8>, FastOcrError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Check the fields a worker cannot proceed without.
    pub fn validate(&self) -> Result<(), FastOcrError> {
        if self.api_key.trim().is_empty() {
            return Err(FastOcrError::IncompleteTask {
                task_id: self.task_id.clone(),
                field: "api_key",
            });
        }
        if self.image_path.trim().is_empty() {
            return Err(FastOcrError::IncompleteTask {
                task_id: self.task_id.clone(),
                field: "image_path",
            });
        }
        if self.task_id.trim().is_empty() {
            return Err(FastOcrError::IncompleteTask {
                task_id: self.task_id.clone(),
                field: "task_id",
            });
        }
        Ok(())
    }

    pub fn image_path(&self) -> &Path {
        Path::new(&self.image_path)
    }
}

// The API key travels inside the record; keep it out of debug output.
impl fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("task_id", &self.task_id)
            .field("original_filename", &self.original_filename)
            .field("image_path", &self.image_path)
            .field("api_key", &"***")
            .field("status", &self.status)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
