use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Current wall-clock time as fractional epoch seconds.
pub fn epoch_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// The JSON document a worker writes to `results/<task_id>.json`.
///
/// Untagged on the wire: `{text, completed_at}` for a success and
/// `{error: true, message, completed_at}` for a failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ResultArtifact {
    Failure {
        error: bool,
        message: String,
        completed_at: f64,
    },
    Success {
        text: String,
        completed_at: f64,
    },
}

impl ResultArtifact {
    pub fn success(text: impl Into<String>) -> Self {
        ResultArtifact::Success {
            text: text.into(),
            completed_at: epoch_seconds(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        ResultArtifact::Failure {
            error: true,
            message: message.into(),
            completed_at: epoch_seconds(),
        }
    }

    pub fn completed_at(&self) -> f64 {
        match self {
            ResultArtifact::Failure { completed_at, .. } => *completed_at,
            ResultArtifact::Success { completed_at, .. } => *completed_at,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, ResultArtifact::Failure { .. })
    }

    /// The ledger state this artifact corresponds to.
    pub fn terminal_state(&self) -> TaskState {
        if self.is_error() {
            TaskState::Failed
        } else {
            TaskState::Completed
        }
    }
}

/// Explicit lifecycle state of a task, tracked in the task ledger.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Processing => "processing",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskState::Queued),
            "processing" => Ok(TaskState::Processing),
            "completed" => Ok(TaskState::Completed),
            "failed" => Ok(TaskState::Failed),
            other => Err(format!("unknown task state: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_artifact_shape() {
        let artifact = ResultArtifact::success("hello");
        let value = serde_json::to_value(&artifact).unwrap();
        assert_eq!(value["text"], "hello");
        assert!(value.get("error").is_none());
        assert!(value["completed_at"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn failure_artifact_shape() {
        let artifact = ResultArtifact::failure("vendor down");
        let value = serde_json::to_value(&artifact).unwrap();
        assert_eq!(value["error"], true);
        assert_eq!(value["message"], "vendor down");
        assert!(value.get("text").is_none());
    }

    #[test]
    fn parses_both_shapes() {
        let ok: ResultArtifact =
            serde_json::from_str(r#"{"text": "abc", "completed_at": 1700000000.5}"#).unwrap();
        assert_eq!(ok.completed_at(), 1700000000.5);
        assert_eq!(ok.terminal_state(), TaskState::Completed);

        let err: ResultArtifact = serde_json::from_str(
            r#"{"error": true, "message": "boom", "completed_at": 1700000001.0}"#,
        )
        .unwrap();
        assert!(err.is_error());
        assert_eq!(err.terminal_state(), TaskState::Failed);
    }

    #[test]
    fn task_state_round_trips_through_str() {
        for state in [
            TaskState::Queued,
            TaskState::Processing,
            TaskState::Completed,
            TaskState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
        assert!("bogus".parse::<TaskState>().is_err());
    }
}
