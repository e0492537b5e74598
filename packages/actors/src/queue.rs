//! Submission queue between request handlers and the worker.
//!
//! The queue only carries job ids; a job's authoritative state lives in the
//! [`JobStore`](crate::JobStore).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use render_core::{JobId, QueueError};
use tokio::sync::{Notify, mpsc};

#[derive(Debug, Default)]
struct Shared {
    depth: AtomicUsize,
    closed: AtomicBool,
    close_signal: Notify,
}

/// Producer side of the submission queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SubmissionQueue {
    tx: mpsc::UnboundedSender<JobId>,
    shared: Arc<Shared>,
}

/// Consumer side of the submission queue. There is exactly one.
#[derive(Debug)]
pub struct SubmissionReceiver {
    rx: mpsc::UnboundedReceiver<JobId>,
    shared: Arc<Shared>,
}

/// Create a new unbounded FIFO submission queue.
pub fn channel() -> (SubmissionQueue, SubmissionReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let shared = Arc::new(Shared::default());
    (
        SubmissionQueue {
            tx,
            shared: Arc::clone(&shared),
        },
        SubmissionReceiver { rx, shared },
    )
}

impl SubmissionQueue {
    /// Append a job id to the tail of the queue.
    pub fn enqueue(&self, job_id: JobId) -> Result<(), QueueError> {
        if self.is_closed() {
            return Err(QueueError::Closed);
        }
        // Count before sending so the consumer never decrements below zero.
        self.shared.depth.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(job_id).is_err() {
            self.shared.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(QueueError::Closed);
        }
        Ok(())
    }

    /// Number of ids waiting to be dequeued. Approximate under concurrency.
    pub fn size(&self) -> usize {
        self.shared.depth.load(Ordering::SeqCst)
    }

    /// Stop accepting new ids and wake the consumer.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.close_signal.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl SubmissionReceiver {
    /// Wait for the next job id. Returns `None` once the queue is closed.
    pub async fn dequeue(&mut self) -> Option<JobId> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.shared.close_signal.notified() => None,
            next = self.rx.recv() => {
                if next.is_some() {
                    self.shared.depth.fetch_sub(1, Ordering::SeqCst);
                }
                next
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn dequeues_in_fifo_order() {
        let (queue, mut receiver) = channel();
        let ids: Vec<JobId> = (0..5).map(|_| JobId::new()).collect();
        for id in &ids {
            queue.enqueue(*id).unwrap();
        }
        assert_eq!(queue.size(), 5);

        for id in &ids {
            assert_eq!(receiver.dequeue().await, Some(*id));
        }
        assert_eq!(queue.size(), 0);
    }

    #[tokio::test]
    async fn dequeue_waits_for_an_item() {
        let (queue, mut receiver) = channel();
        let id = JobId::new();

        let waiter = tokio::spawn(async move { receiver.dequeue().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        queue.enqueue(id).unwrap();
        assert_eq!(waiter.await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn close_wakes_consumer_and_rejects_producers() {
        let (queue, mut receiver) = channel();

        let waiter = tokio::spawn(async move { receiver.dequeue().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        assert_eq!(waiter.await.unwrap(), None);
        assert!(matches!(queue.enqueue(JobId::new()), Err(QueueError::Closed)));
    }
}
