//! `fastocr-config`: FastOCR settings management.
//!
//! Provides:
//! - Typed settings schema with builtin defaults and key backfill
//! - JSON read/write with atomic replace
//! - Partial (merge) updates restricted to known keys
//! - An in-memory snapshot store (`ConfigStore`) handing out immutable `Arc`s
//! - Secret redaction for display
//! - Validation warnings logged at load time

pub mod defaults;
pub mod io;
pub mod redact;
pub mod schema;
pub mod store;
pub mod validation;

pub use defaults::*;
pub use io::{config_dir, config_file_path, merge_known_keys, read_settings, write_settings, ConfigError};
pub use redact::{mask_secret, redact};
pub use schema::AppSettings;
pub use store::ConfigStore;
pub use validation::{validate, ConfigValidationError, ValidationReport};
