//! Structured logging setup shared by every FastOCR process.
//!
//! Each process logs to the console and to its own NDJSON file, rotated daily.

pub mod logger;

pub use logger::{init_console_logger, init_logger};
