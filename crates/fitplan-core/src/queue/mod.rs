//! Job dispatch to workers.
//!
//! Delivery is at-least-once and fire-and-forget: a queued row in
//! `plan_generations` is the source of truth, and workers treat a delivery
//! for a job that is no longer queued as a no-op.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Receiving half handed to an in-process worker.
pub type JobReceiver = mpsc::Receiver<Uuid>;

/// Something that can announce a queued generation job to workers.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Announce that `generation_id` is queued.
    async fn enqueue(&self, generation_id: Uuid) -> Result<()>;
}

// Compile-time assertion: JobQueue must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn JobQueue) {}
};

/// In-process queue backed by a bounded tokio channel.
#[derive(Clone)]
pub struct ChannelQueue {
    tx: mpsc::Sender<Uuid>,
}

impl ChannelQueue {
    /// Create a queue and the receiver a worker consumes.
    pub fn new(capacity: usize) -> (Self, JobReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl JobQueue for ChannelQueue {
    fn name(&self) -> &str {
        "channel"
    }

    async fn enqueue(&self, generation_id: Uuid) -> Result<()> {
        self.tx
            .send(generation_id)
            .await
            .with_context(|| format!("worker channel closed, dropped job {generation_id}"))
    }
}

/// Queue for deployments where workers poll the table. Enqueue does
/// nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollingQueue;

#[async_trait]
impl JobQueue for PollingQueue {
    fn name(&self) -> &str {
        "polling"
    }

    async fn enqueue(&self, generation_id: Uuid) -> Result<()> {
        tracing::debug!(generation_id = %generation_id, "left for polling workers");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn channel_queue_delivers_in_order() {
        let (queue, mut rx) = ChannelQueue::new(4);
        let queue: Arc<dyn JobQueue> = Arc::new(queue);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        queue.enqueue(a).await.unwrap();
        queue.enqueue(b).await.unwrap();

        assert_eq!(rx.recv().await, Some(a));
        assert_eq!(rx.recv().await, Some(b));
    }

    #[tokio::test]
    async fn channel_queue_errors_when_worker_gone() {
        let (queue, rx) = ChannelQueue::new(1);
        drop(rx);
        let err = queue.enqueue(Uuid::nil()).await.unwrap_err();
        assert!(err.to_string().contains("worker channel closed"));
    }

    #[tokio::test]
    async fn polling_queue_accepts_everything() {
        let queue: Box<dyn JobQueue> = Box::new(PollingQueue);
        assert_eq!(queue.name(), "polling");
        queue.enqueue(Uuid::new_v4()).await.unwrap();
    }
}
