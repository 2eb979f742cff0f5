use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use fastocr_core::TaskConsumer;

use crate::handler::{HandleOutcome, Stage, TaskHandler};

/// When a delivery is acknowledged.
///
/// `Always` settles every delivery after handling, whether it produced a
/// success artifact, an error artifact, or was dropped as malformed. The
/// broker therefore makes at most one attempt per message; a worker that
/// dies mid-task leaves the message unacked and the broker redelivers it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckPolicy {
    #[default]
    Always,
}

/// Counters for one worker run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub received: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
    pub unpersisted: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &HandleOutcome) {
        self.received += 1;
        match outcome {
            HandleOutcome::Completed { .. } => self.completed += 1,
            HandleOutcome::Failed { .. } => self.failed += 1,
            HandleOutcome::Dropped { .. } => self.dropped += 1,
            HandleOutcome::Unpersisted { .. } => self.unpersisted += 1,
        }
    }
}

/// Consume until the stream ends. Deliveries are handled one at a time.
///
/// A consumer or acknowledgement error means the broker connection is gone
/// and ends the run with an error.
pub async fn run<C>(consumer: &mut C, handler: &TaskHandler, policy: AckPolicy) -> Result<WorkerStats>
where
    C: TaskConsumer + ?Sized,
{
    let mut stats = WorkerStats::default();
    info!(?policy, "Worker waiting for tasks");

    while let Some(next) = consumer.next_delivery().await {
        let delivery = next.context("Consumer stream failed")?;
        let outcome = handler.handle(&delivery.body).await;
        stats.record(&outcome);

        match policy {
            AckPolicy::Always => delivery.ack().await.context("Failed to acknowledge task")?,
        }
        debug!(stage = %Stage::Acknowledged, ?outcome, "Delivery settled");

        if let HandleOutcome::Unpersisted { task_id, .. } = &outcome {
            warn!(task_id = %task_id, "Task acknowledged without a result artifact");
        }
    }

    info!(?stats, "Consumer stream ended");
    Ok(stats)
}
