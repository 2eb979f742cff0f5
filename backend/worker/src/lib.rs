//! OCR worker.
//!
//! A worker takes one delivery at a time off a [`TaskConsumer`], runs it
//! through [`TaskHandler`], and settles it according to its [`AckPolicy`].
//!
//! [`TaskConsumer`]: fastocr_core::TaskConsumer

pub mod handler;
pub mod runner;

pub use handler::{HandleOutcome, Stage, TaskHandler};
pub use runner::{run, AckPolicy, WorkerStats};
