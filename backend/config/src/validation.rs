//! Settings validation: problems worth logging at load time.

use crate::schema::AppSettings;
use thiserror::Error;

/// A validation finding for one settings key.
#[derive(Debug, Error)]
#[error("Settings validation error at '{key}': {message}")]
pub struct ConfigValidationError {
    pub key: String,
    pub message: String,
}

/// A collection of findings from one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            key: key.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, key: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            key: key.into(),
            message: message.into(),
        });
    }
}

/// Validate settings and return every error and warning found.
pub fn validate(settings: &AppSettings) -> ValidationReport {
    let mut report = ValidationReport::default();

    if !settings.has_api_key() {
        report.warn("api_key", "No API key configured; uploads will be rejected");
    }

    let url = settings.api_url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        report.error("api_url", format!("Not an http(s) URL: '{url}'"));
    }

    if settings.model_name.trim().is_empty() {
        report.error("model_name", "Model name cannot be empty");
    }

    if settings.rabbitmq_host.trim().is_empty() {
        report.error("rabbitmq_host", "Broker host cannot be empty");
    }

    if settings.rabbitmq_port == 0 {
        report.error("rabbitmq_port", "Broker port cannot be 0");
    }

    if settings.rabbitmq_queue.trim().is_empty() {
        report.error("rabbitmq_queue", "Queue name cannot be empty");
    }

    if settings.worker_concurrency == 0 {
        report.error("worker_concurrency", "Must be at least 1");
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_only_warn_about_missing_key() {
        let report = validate(&AppSettings::default());
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
        assert_eq!(report.warnings[0].key, "api_key");
    }

    #[test]
    fn flags_bad_values() {
        let settings = AppSettings {
            api_key: "sk".into(),
            api_url: "ftp://vendor".into(),
            worker_concurrency: 0,
            ..Default::default()
        };
        let report = validate(&settings);
        let keys: Vec<&str> = report.errors.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["api_url", "worker_concurrency"]);
        assert!(report.warnings.is_empty());
    }
}
