//! Task submission and the read side of task state.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{error, info, warn};
use uuid::Uuid;

use fastocr_config::ConfigStore;
use fastocr_core::{epoch_seconds, TaskQueue, TaskRecord};
use fastocr_store::{ResultStore, TaskLedger, UploadStore};

use crate::error::ServerError;

const UNKNOWN_FILENAME: &str = "Unknown";

/// One file taken from an upload request.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.starts_with("image/"))
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SubmittedTask {
    pub task_id: String,
    pub filename: String,
    pub status: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubmitResponse {
    pub message: String,
    pub tasks: Vec<SubmittedTask>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HistoryEntry {
    pub task_id: String,
    pub filename: String,
    pub timestamp: f64,
    pub status: &'static str,
}

/// Accepts uploads, publishes tasks, and answers status queries from the
/// result artifacts and the task ledger.
pub struct Submitter {
    config: Arc<ConfigStore>,
    queue: Arc<dyn TaskQueue>,
    uploads: UploadStore,
    results: ResultStore,
    ledger: Arc<TaskLedger>,
}

impl Submitter {
    pub fn new(
        config: Arc<ConfigStore>,
        queue: Arc<dyn TaskQueue>,
        uploads: UploadStore,
        results: ResultStore,
        ledger: Arc<TaskLedger>,
    ) -> Self {
        Self {
            config,
            queue,
            uploads,
            results,
            ledger,
        }
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    /// Store each image, publish one task per image, and report what was queued.
    pub async fn submit(&self, files: Vec<UploadedFile>) -> Result<SubmitResponse, ServerError> {
        if files.is_empty() {
            return Err(ServerError::BadRequest("No files were uploaded.".into()));
        }
        let settings = self.config.get();
        if !settings.has_api_key() {
            return Err(ServerError::BadRequest("API Key not configured.".into()));
        }

        let mut tasks = Vec::new();
        let mut failures = Vec::new();

        for file in files {
            if !file.is_image() {
                info!(
                    filename = %file.filename,
                    content_type = file.content_type.as_deref().unwrap_or(""),
                    "Skipping non-image upload"
                );
                continue;
            }

            let task_id = Uuid::new_v4();
            let id = task_id.to_string();
            let path = match self.uploads.save(&id, &file.filename, &file.bytes).await {
                Ok(path) => path,
                Err(e) => {
                    error!(filename = %file.filename, error = %e, "Failed to store upload");
                    continue;
                }
            };

            let task = TaskRecord::new(task_id, file.filename.clone(), &path, settings.api_key.clone());
            if let Err(e) = self.ledger.record_queued(&task) {
                error!(
                    task_id = %id,
                    filename = %file.filename,
                    error = %format!("{e:#}"),
                    "Failed to record task; not publishing"
                );
                failures.push(file.filename);
                continue;
            }

            match self.queue.publish(&task).await {
                Ok(()) => {
                    info!(task_id = %id, filename = %file.filename, "Task queued");
                    tasks.push(SubmittedTask {
                        task_id: id,
                        filename: file.filename,
                        status: "queued",
                    });
                }
                Err(e) => {
                    error!(
                        filename = %file.filename,
                        queue = self.queue.name(),
                        error = %format!("{e:#}"),
                        "Failed to publish task"
                    );
                    if let Err(e) = self.ledger.forget(&id) {
                        warn!(task_id = %id, error = %e, "Failed to drop unpublished task from ledger");
                    }
                    failures.push(file.filename);
                }
            }
        }

        if tasks.is_empty() && !failures.is_empty() {
            return Err(ServerError::Internal(
                "Could not queue any tasks due to RabbitMQ connection issues.".into(),
            ));
        }
        if tasks.is_empty() {
            return Err(ServerError::BadRequest(
                "No valid image files were processed.".into(),
            ));
        }

        let mut message = format!(
            "Successfully queued {} images for OCR processing.",
            tasks.len()
        );
        if !failures.is_empty() {
            message.push_str(&format!(
                " Failed to queue {} files due to RabbitMQ issues.",
                failures.len()
            ));
        }

        Ok(SubmitResponse {
            message,
            tasks,
            failures,
        })
    }

    /// Current state of one task as the poll endpoint reports it.
    pub async fn status(&self, task_id: &str) -> Result<Value, ServerError> {
        let not_found = || ServerError::NotFound(format!("Task {task_id} not found."));
        if Uuid::parse_str(task_id).is_err() {
            return Err(not_found());
        }

        let artifact = self.results.read(task_id).await.map_err(|e| {
            ServerError::Internal(format!("Error retrieving task information: {e:#}"))
        })?;

        if let Some(artifact) = artifact {
            return Ok(json!({
                "task_id": task_id,
                "status": "completed",
                "filename": self.resolve_filename(task_id).await,
                "timestamp": artifact.completed_at(),
                "result": artifact,
            }));
        }

        let entry = self.ledger.get(task_id).map_err(|e| {
            ServerError::Internal(format!("Error retrieving task information: {e:#}"))
        })?;
        match entry {
            Some(entry) => Ok(json!({
                "task_id": task_id,
                "status": "processing",
                "filename": entry.original_filename,
                "timestamp": epoch_seconds(),
                "message": "OCR processing in progress",
            })),
            None => Err(not_found()),
        }
    }

    /// Every task with an artifact, newest first.
    pub async fn history(&self) -> Result<Vec<HistoryEntry>, ServerError> {
        let artifacts = self.results.list().await.map_err(|e| {
            error!(error = %format!("{e:#}"), "Failed to list results");
            ServerError::Internal("Failed to retrieve history".into())
        })?;

        let mut history = Vec::with_capacity(artifacts.len());
        for (task_id, artifact) in artifacts {
            let filename = self.resolve_filename(&task_id).await;
            history.push(HistoryEntry {
                task_id,
                filename,
                timestamp: artifact.completed_at(),
                status: "completed",
            });
        }
        history.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
        Ok(history)
    }

    /// Ledger original filename, else the stored upload's name, else "Unknown".
    async fn resolve_filename(&self, task_id: &str) -> String {
        match self.ledger.get(task_id) {
            Ok(Some(entry)) => return entry.original_filename,
            Ok(None) => {}
            Err(e) => warn!(task_id = %task_id, error = %e, "Ledger lookup failed"),
        }
        match self.uploads.find(task_id).await {
            Ok(Some(name)) => name,
            Ok(None) => UNKNOWN_FILENAME.to_string(),
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Upload lookup failed");
                UNKNOWN_FILENAME.to_string()
            }
        }
    }
}
