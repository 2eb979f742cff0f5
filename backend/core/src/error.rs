use thiserror::Error;

/// Top-level error type for the FastOCR pipeline.
#[derive(Debug, Error)]
pub enum FastOcrError {
    #[error("malformed task message: {0}")]
    MalformedTask(#[from] serde_json::Error),

    #[error("task {task_id} is missing {field}")]
    IncompleteTask { task_id: String, field: &'static str },

    #[error("OCR client initialization failed: {0}")]
    ClientInit(String),

    #[error("failed to read image {path}: {message}")]
    ImageRead { path: String, message: String },

    #[error("OCR vendor error{}: {message}", status_suffix(.status))]
    Vendor { status: Option<u16>, message: String },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|code| format!(" ({code})")).unwrap_or_default()
}

impl FastOcrError {
    /// Whether a second attempt at the same vendor call could plausibly succeed.
    ///
    /// Transport failures (no status), throttling and 5xx responses count as
    /// transient; everything else is a property of the task itself.
    pub fn is_transient(&self) -> bool {
        match self {
            FastOcrError::Vendor { status: None, .. } => true,
            FastOcrError::Vendor { status: Some(code), .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_display_includes_status() {
        let err = FastOcrError::Vendor {
            status: Some(401),
            message: "invalid api key".into(),
        };
        assert_eq!(err.to_string(), "OCR vendor error (401): invalid api key");

        let err = FastOcrError::Vendor {
            status: None,
            message: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "OCR vendor error: connection refused");
    }

    #[test]
    fn transient_classification() {
        let vendor = |status| FastOcrError::Vendor {
            status,
            message: String::new(),
        };
        assert!(vendor(None).is_transient());
        assert!(vendor(Some(503)).is_transient());
        assert!(vendor(Some(429)).is_transient());
        assert!(!vendor(Some(400)).is_transient());
        assert!(!FastOcrError::ClientInit("bad".into()).is_transient());
    }
}
