use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use fastocr_core::{Acker, Delivery, TaskConsumer, TaskQueue, TaskRecord};

/// In-process work queue with the same publish/consume contract as the
/// broker, for tests and single-process embedding.
pub struct MemoryQueue {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    published: AtomicUsize,
    acked: Arc<AtomicUsize>,
    unavailable: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(Some(rx)),
            published: AtomicUsize::new(0),
            acked: Arc::new(AtomicUsize::new(0)),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Take the single consumer end. Returns `None` after the first call.
    pub fn take_consumer(&self) -> Option<MemoryConsumer> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()?;
        Some(MemoryConsumer {
            rx,
            acked: Arc::clone(&self.acked),
        })
    }

    /// Simulate a broker outage: while set, every publish fails.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Enqueue a raw body without going through [`TaskRecord`] encoding.
    pub fn push_raw(&self, body: impl Into<Vec<u8>>) -> Result<()> {
        if self.tx.send(body.into()).is_err() {
            bail!("Memory queue consumer has been dropped");
        }
        Ok(())
    }

    pub fn published(&self) -> usize {
        self.published.load(Ordering::SeqCst)
    }

    pub fn acked(&self) -> usize {
        self.acked.load(Ordering::SeqCst)
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    fn name(&self) -> &str {
        "memory"
    }

    async fn publish(&self, task: &TaskRecord) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("Queue unavailable");
        }
        self.push_raw(task.to_vec()?)?;
        self.published.fetch_add(1, Ordering::SeqCst);
        debug!(task_id = %task.task_id, "Queued task in memory");
        Ok(())
    }
}

struct CountingAcker(Arc<AtomicUsize>);

#[async_trait]
impl Acker for CountingAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Consumer end of a [`MemoryQueue`]. The stream ends once the queue is dropped
/// and drained.
pub struct MemoryConsumer {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    acked: Arc<AtomicUsize>,
}

impl MemoryConsumer {
    /// Deliveries acknowledged so far.
    pub fn acked(&self) -> usize {
        self.acked.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskConsumer for MemoryConsumer {
    async fn next_delivery(&mut self) -> Option<Result<Delivery>> {
        let body = self.rx.recv().await?;
        Some(Ok(Delivery::new(body, CountingAcker(Arc::clone(&self.acked)))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use uuid::Uuid;

    fn task() -> TaskRecord {
        TaskRecord::new(Uuid::new_v4(), "a.png", Path::new("/tmp/a.png"), "sk")
    }

    #[tokio::test]
    async fn publish_then_consume_and_ack() {
        let queue = MemoryQueue::new();
        let mut consumer = queue.take_consumer().unwrap();
        assert!(queue.take_consumer().is_none());

        let task = task();
        queue.publish(&task).await.unwrap();
        assert_eq!(queue.published(), 1);

        let delivery = consumer.next_delivery().await.unwrap().unwrap();
        let decoded = TaskRecord::from_slice(&delivery.body).unwrap();
        assert_eq!(decoded.task_id, task.task_id);

        delivery.ack().await.unwrap();
        assert_eq!(queue.acked(), 1);
    }

    #[tokio::test]
    async fn unavailable_queue_rejects_publish() {
        let queue = MemoryQueue::new();
        queue.set_unavailable(true);
        assert!(queue.publish(&task()).await.is_err());
        assert_eq!(queue.published(), 0);

        queue.set_unavailable(false);
        queue.publish(&task()).await.unwrap();
        assert_eq!(queue.published(), 1);
    }

    #[tokio::test]
    async fn stream_ends_when_queue_dropped() {
        let queue = MemoryQueue::new();
        let mut consumer = queue.take_consumer().unwrap();
        queue.push_raw(b"garbage".to_vec()).unwrap();
        drop(queue);

        let delivery = consumer.next_delivery().await.unwrap().unwrap();
        assert_eq!(delivery.body, b"garbage");
        delivery.ack().await.unwrap();
        assert_eq!(consumer.acked(), 1);
        assert!(consumer.next_delivery().await.is_none());
    }
}
