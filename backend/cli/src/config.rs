use std::path::PathBuf;
use std::time::Duration;

use fastocr_server::DEFAULT_MAX_UPLOAD_BYTES;
use fastocr_store::DataLayout;

/// Process-level runtime configuration, read from the environment.
///
/// Distinct from the persisted [`fastocr_config::AppSettings`]: these values
/// belong to one process and are never written back.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// HTTP server bind address
    pub bind_address: String,
    /// HTTP server port
    pub port: u16,
    /// Root of uploads/, results/ and the task ledger
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Log level
    pub log_level: String,
    pub max_upload_bytes: usize,
    /// Per-request timeout for the OCR vendor
    pub vendor_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8000,
            data_dir: PathBuf::from(fastocr_store::layout::DEFAULT_DATA_DIR),
            log_dir: PathBuf::from("logs"),
            log_level: "info".to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            vendor_timeout: Duration::from_secs(120),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_address: std::env::var("FASTOCR_BIND").unwrap_or(defaults.bind_address),
            port: parse_env("FASTOCR_PORT").unwrap_or(defaults.port),
            data_dir: DataLayout::resolve_root(None),
            log_dir: std::env::var("FASTOCR_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            max_upload_bytes: parse_env::<usize>("FASTOCR_MAX_UPLOAD_MB")
                .map(|mb| mb.saturating_mul(1024 * 1024))
                .unwrap_or(defaults.max_upload_bytes),
            vendor_timeout: parse_env("FASTOCR_VENDOR_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.vendor_timeout),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RuntimeConfig::default();
        assert_eq!(config.port, 8000);
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.data_dir, PathBuf::from("persistent_data"));
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(config.vendor_timeout, Duration::from_secs(120));
    }

    #[test]
    fn unparsable_env_values_are_ignored() {
        std::env::set_var("FASTOCR_TEST_BAD_NUMBER", "eighty");
        assert_eq!(parse_env::<u16>("FASTOCR_TEST_BAD_NUMBER"), None);
        std::env::set_var("FASTOCR_TEST_GOOD_NUMBER", " 8080 ");
        assert_eq!(parse_env::<u16>("FASTOCR_TEST_GOOD_NUMBER"), Some(8080));
    }
}
