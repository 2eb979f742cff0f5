use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::FastOcrError;
use crate::message::TaskRecord;

/// Producer side of the work queue, used by the task submitter.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Human-readable name of the backing transport (e.g., "amqp", "memory").
    fn name(&self) -> &str;

    /// Publish a task. Returns once the broker has accepted the message.
    async fn publish(&self, task: &TaskRecord) -> Result<()>;
}

/// Settles one delivery with the broker.
#[async_trait]
pub trait Acker: Send {
    async fn ack(self: Box<Self>) -> Result<()>;
}

/// A raw message handed to a worker, together with the handle that
/// acknowledges it.
pub struct Delivery {
    pub body: Vec<u8>,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(body: Vec<u8>, acker: impl Acker + 'static) -> Self {
        Self {
            body,
            acker: Box::new(acker),
        }
    }

    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }
}

/// Consumer side of the work queue, used by workers.
#[async_trait]
pub trait TaskConsumer: Send {
    /// Wait for the next delivery. `None` means the stream has ended.
    async fn next_delivery(&mut self) -> Option<Result<Delivery>>;
}

/// Text recognized from one image.
#[derive(Debug, Clone)]
pub struct OcrOutput {
    pub text: String,
    pub model: String,
    pub latency_ms: u64,
}

/// A vendor client able to transcribe an image.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Engine name (e.g., "openai-compatible").
    fn name(&self) -> &str;

    async fn recognize(&self, image_path: &Path) -> Result<OcrOutput, FastOcrError>;
}

/// Builds an [`OcrEngine`] bound to a single task's API key.
pub trait OcrClientFactory: Send + Sync {
    fn build(&self, api_key: &str) -> Result<Box<dyn OcrEngine>, FastOcrError>;
}
