//! `fastocr-server`: the HTTP face of the pipeline.
//!
//! [`Submitter`] holds the upload/status/history logic; [`api`] maps it onto
//! axum routes.

pub mod api;
pub mod error;
pub mod submit;

pub use api::{build_router, AppState, DEFAULT_MAX_UPLOAD_BYTES};
pub use error::ServerError;
pub use submit::{HistoryEntry, SubmitResponse, SubmittedTask, Submitter, UploadedFile};
