pub mod error;
pub mod message;
pub mod traits;
pub mod types;

pub use error::FastOcrError;
pub use message::{TaskRecord, TaskStatus};
pub use traits::{Acker, Delivery, OcrClientFactory, OcrEngine, OcrOutput, TaskConsumer, TaskQueue};
pub use types::{epoch_seconds, ResultArtifact, TaskState};
