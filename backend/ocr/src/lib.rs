pub mod client;
pub mod format;
pub mod retry;

pub use client::{normalize_api_url, VisionClientFactory, VisionOcrClient, OCR_PROMPT};
pub use format::{data_uri, image_format};
pub use retry::{run_with_retry, RetryPolicy};
