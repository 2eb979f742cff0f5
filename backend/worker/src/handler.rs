use std::fmt;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use fastocr_core::{
    OcrClientFactory, OcrEngine, ResultArtifact, TaskRecord, TaskState,
};
use fastocr_ocr::{run_with_retry, RetryPolicy};
use fastocr_store::{ResultStore, TaskLedger};

/// Stages a delivery moves through. Acknowledgement is owned by the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    ClientInitialized,
    Recognized,
    Persisted,
    Acknowledged,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Received => "received",
            Stage::ClientInitialized => "client_initialized",
            Stage::Recognized => "recognized",
            Stage::Persisted => "persisted",
            Stage::Acknowledged => "acknowledged",
        };
        f.write_str(s)
    }
}

/// What became of one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    /// Undecodable or incomplete message; nothing was written.
    Dropped { reason: String },
    /// Success artifact written.
    Completed { task_id: String },
    /// Error artifact written.
    Failed { task_id: String, message: String },
    /// The artifact could not be written.
    Unpersisted { task_id: String, message: String },
}

/// Turns one queue message into one result artifact.
pub struct TaskHandler {
    factory: Arc<dyn OcrClientFactory>,
    results: ResultStore,
    ledger: Option<Arc<TaskLedger>>,
    retry: RetryPolicy,
}

impl TaskHandler {
    pub fn new(factory: Arc<dyn OcrClientFactory>, results: ResultStore) -> Self {
        Self {
            factory,
            results,
            ledger: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<TaskLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn handle(&self, body: &[u8]) -> HandleOutcome {
        let task = match TaskRecord::from_slice(body) {
            Ok(task) => task,
            Err(e) => {
                warn!(error = %e, bytes = body.len(), "Dropping undecodable message");
                return HandleOutcome::Dropped {
                    reason: e.to_string(),
                };
            }
        };
        if let Err(e) = task.validate() {
            warn!(error = %e, "Dropping incomplete task");
            return HandleOutcome::Dropped {
                reason: e.to_string(),
            };
        }
        info!(task = ?task, stage = %Stage::Received, "Received task");
        self.advance_ledger(&task.task_id, TaskState::Processing);

        let artifact = match self.recognize(&task).await {
            Ok(text) => ResultArtifact::success(text),
            Err(message) => {
                error!(task_id = %task.task_id, error = %message, "OCR failed");
                ResultArtifact::failure(message)
            }
        };

        if let Err(e) = self.results.write(&task.task_id, &artifact).await {
            error!(task_id = %task.task_id, error = %e, "Failed to persist result artifact");
            return HandleOutcome::Unpersisted {
                task_id: task.task_id,
                message: e.to_string(),
            };
        }
        debug!(task_id = %task.task_id, stage = %Stage::Persisted, "Artifact written");
        self.advance_ledger(&task.task_id, artifact.terminal_state());

        match artifact {
            ResultArtifact::Success { .. } => {
                info!(task_id = %task.task_id, "Task completed");
                HandleOutcome::Completed {
                    task_id: task.task_id,
                }
            }
            ResultArtifact::Failure { message, .. } => HandleOutcome::Failed {
                task_id: task.task_id,
                message,
            },
        }
    }

    /// Build a client for the task's key and run recognition under the
    /// retry policy. Errors come back as the artifact message.
    async fn recognize(&self, task: &TaskRecord) -> Result<String, String> {
        let engine = self
            .factory
            .build(&task.api_key)
            .map_err(|e| e.to_string())?;
        debug!(task_id = %task.task_id, engine = engine.name(), stage = %Stage::ClientInitialized, "OCR client ready");

        let engine: &dyn OcrEngine = engine.as_ref();
        let path = task.image_path();
        let output = run_with_retry(&self.retry, move || engine.recognize(path))
            .await
            .map_err(|e| e.to_string())?;

        info!(
            task_id = %task.task_id,
            model = %output.model,
            latency_ms = output.latency_ms,
            chars = output.text.chars().count(),
            stage = %Stage::Recognized,
            "Recognized image"
        );
        Ok(output.text)
    }

    fn advance_ledger(&self, task_id: &str, state: TaskState) {
        let Some(ledger) = &self.ledger else {
            return;
        };
        if let Err(e) = ledger.set_state(task_id, state) {
            warn!(task_id = %task_id, state = %state, error = %e, "Failed to update task ledger");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use fastocr_core::{FastOcrError, OcrOutput};
    use uuid::Uuid;

    /// Returns the file contents as text; fails per the configured script.
    struct ScriptedEngine {
        failures: Arc<AtomicU32>,
        error_status: Option<u16>,
    }

    #[async_trait]
    impl OcrEngine for ScriptedEngine {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn recognize(&self, image_path: &Path) -> Result<OcrOutput, FastOcrError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(FastOcrError::Vendor {
                    status: self.error_status,
                    message: "vendor down".into(),
                });
            }
            let bytes = std::fs::read(image_path).map_err(|e| FastOcrError::ImageRead {
                path: image_path.display().to_string(),
                message: e.to_string(),
            })?;
            Ok(OcrOutput {
                text: String::from_utf8_lossy(&bytes).into_owned(),
                model: "scripted".into(),
                latency_ms: 1,
            })
        }
    }

    struct ScriptedFactory {
        failures: Arc<AtomicU32>,
        error_status: Option<u16>,
    }

    impl ScriptedFactory {
        fn ok() -> Self {
            Self::failing(0, None)
        }

        fn failing(times: u32, status: Option<u16>) -> Self {
            Self {
                failures: Arc::new(AtomicU32::new(times)),
                error_status: status,
            }
        }
    }

    impl OcrClientFactory for ScriptedFactory {
        fn build(&self, api_key: &str) -> Result<Box<dyn OcrEngine>, FastOcrError> {
            if api_key == "reject" {
                return Err(FastOcrError::ClientInit("bad key format".into()));
            }
            Ok(Box::new(ScriptedEngine {
                failures: Arc::clone(&self.failures),
                error_status: self.error_status,
            }))
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        image: std::path::PathBuf,
        results: ResultStore,
        ledger: Arc<TaskLedger>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let results_dir = dir.path().join("results");
        std::fs::create_dir_all(&results_dir).unwrap();
        let image = dir.path().join("scan.png");
        std::fs::write(&image, "HELLO WORLD").unwrap();
        Fixture {
            image,
            results: ResultStore::new(results_dir),
            ledger: Arc::new(TaskLedger::in_memory().unwrap()),
            _dir: dir,
        }
    }

    fn handler(fx: &Fixture, factory: ScriptedFactory) -> TaskHandler {
        TaskHandler::new(Arc::new(factory), fx.results.clone()).with_ledger(Arc::clone(&fx.ledger))
    }

    fn queued(fx: &Fixture, api_key: &str) -> TaskRecord {
        let task = TaskRecord::new(Uuid::new_v4(), "scan.png", &fx.image, api_key);
        fx.ledger.record_queued(&task).unwrap();
        task
    }

    #[tokio::test]
    async fn success_writes_text_artifact() {
        let fx = fixture();
        let task = queued(&fx, "sk");
        let outcome = handler(&fx, ScriptedFactory::ok()).handle(&task.to_vec().unwrap()).await;

        assert_eq!(outcome, HandleOutcome::Completed { task_id: task.task_id.clone() });
        match fx.results.read(&task.task_id).await.unwrap().unwrap() {
            ResultArtifact::Success { text, .. } => assert_eq!(text, "HELLO WORLD"),
            other => panic!("expected success, got {other:?}"),
        }
        assert_eq!(fx.ledger.get(&task.task_id).unwrap().unwrap().state, TaskState::Completed);
    }

    #[tokio::test]
    async fn vendor_failure_writes_error_artifact() {
        let fx = fixture();
        let task = queued(&fx, "sk");
        let outcome = handler(&fx, ScriptedFactory::failing(1, Some(401)))
            .handle(&task.to_vec().unwrap())
            .await;

        assert!(matches!(outcome, HandleOutcome::Failed { .. }));
        let artifact = fx.results.read(&task.task_id).await.unwrap().unwrap();
        assert!(artifact.is_error());
        assert_eq!(fx.ledger.get(&task.task_id).unwrap().unwrap().state, TaskState::Failed);
    }

    #[tokio::test]
    async fn client_init_failure_writes_error_artifact() {
        let fx = fixture();
        let task = queued(&fx, "reject");
        let outcome = handler(&fx, ScriptedFactory::ok()).handle(&task.to_vec().unwrap()).await;

        match outcome {
            HandleOutcome::Failed { message, .. } => assert!(message.contains("bad key format")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_image_writes_error_artifact() {
        let fx = fixture();
        let task = TaskRecord::new(Uuid::new_v4(), "gone.png", Path::new("/nonexistent/gone.png"), "sk");
        let outcome = handler(&fx, ScriptedFactory::ok()).handle(&task.to_vec().unwrap()).await;

        assert!(matches!(outcome, HandleOutcome::Failed { .. }));
        assert!(fx.results.read(&task.task_id).await.unwrap().unwrap().is_error());
    }

    #[tokio::test]
    async fn malformed_and_incomplete_messages_are_dropped() {
        let fx = fixture();
        let handler = handler(&fx, ScriptedFactory::ok());

        assert!(matches!(handler.handle(b"not json").await, HandleOutcome::Dropped { .. }));

        let no_key = format!(
            r#"{{"task_id": "{}", "image_path": "{}"}}"#,
            Uuid::new_v4(),
            fx.image.display()
        );
        assert!(matches!(handler.handle(no_key.as_bytes()).await, HandleOutcome::Dropped { .. }));

        assert!(fx.results.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn transient_failure_is_retried_when_enabled() {
        let fx = fixture();
        let task = queued(&fx, "sk");
        let retry = RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            jitter: false,
            ..Default::default()
        };
        let outcome = handler(&fx, ScriptedFactory::failing(2, Some(503)))
            .with_retry(retry)
            .handle(&task.to_vec().unwrap())
            .await;

        assert_eq!(outcome, HandleOutcome::Completed { task_id: task.task_id });
    }

    #[tokio::test]
    async fn transient_failure_is_final_by_default() {
        let fx = fixture();
        let task = queued(&fx, "sk");
        let outcome = handler(&fx, ScriptedFactory::failing(1, None))
            .handle(&task.to_vec().unwrap())
            .await;

        assert!(matches!(outcome, HandleOutcome::Failed { .. }));
    }
}
