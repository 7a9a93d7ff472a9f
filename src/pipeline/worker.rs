//! Queue-draining worker loop shared by the detail and persistence pools

use crate::pipeline::backoff::BackoffPolicy;
use crate::pipeline::queue::{Pull, WorkQueue};
use crate::pipeline::signal::CompletionSignal;
use std::future::Future;
use std::sync::Arc;

/// Why a worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Upstream finished and the queue was empty
    Drained,
    /// Too many consecutive pulls timed out
    Starved,
    /// The queue was closed underneath the worker
    Closed,
}

/// Pulls and handles items until the queue is drained or starved
///
/// Each pull waits at most `policy.wait_timeout`. A timed-out pull takes
/// nothing off the queue; the worker backs off and pulls again, giving up
/// after `policy.max_attempts` consecutive timeouts. Any received item resets
/// the count. Every received item is acknowledged after `handle` returns.
///
/// The worker stops with [`WorkerExit::Drained`] only once `upstream` is
/// raised *and* the queue is empty, so items still being produced are never
/// left behind.
///
/// # Arguments
///
/// * `stage` - Stage name for logs
/// * `id` - Worker index for logs
/// * `queue` - Queue to pull from
/// * `upstream` - Raised once nothing more will be put on `queue`
/// * `policy` - Pull timeout and backoff
/// * `handle` - Processes one item
pub async fn run_worker<T, F, Fut>(
    stage: &'static str,
    id: usize,
    queue: Arc<WorkQueue<T>>,
    upstream: CompletionSignal,
    policy: BackoffPolicy,
    mut handle: F,
) -> WorkerExit
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut stalls: u32 = 0;
    let mut handled: usize = 0;

    let exit = loop {
        if upstream.is_raised() && queue.is_empty() {
            break WorkerExit::Drained;
        }

        match queue.get_timeout(policy.wait_timeout).await {
            Pull::Item(item) => {
                stalls = 0;
                handle(item).await;
                handled += 1;
                if let Err(e) = queue.task_done() {
                    tracing::error!(stage, worker = id, "{}", e);
                }
            }
            Pull::Closed => break WorkerExit::Closed,
            Pull::TimedOut => {
                if upstream.is_raised() && queue.is_empty() {
                    break WorkerExit::Drained;
                }

                stalls += 1;
                if policy.exhausted(stalls) {
                    tracing::warn!(
                        stage,
                        worker = id,
                        attempts = stalls,
                        "Queue starved, worker giving up"
                    );
                    break WorkerExit::Starved;
                }

                let delay = policy.with_jitter(policy.delay_for(stalls));
                tracing::debug!(
                    stage,
                    worker = id,
                    attempt = stalls,
                    delay_ms = delay.as_millis() as u64,
                    "Queue pull timed out, backing off"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = upstream.wait() => {}
                }
            }
        }
    };

    tracing::debug!(stage, worker = id, handled, exit = ?exit, "Worker finished");
    exit
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn quick_policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            wait_timeout: Duration::from_millis(20),
            initial_delay: Duration::from_millis(5),
            multiplier: 1.0,
            max_attempts,
            max_jitter: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_drains_and_acknowledges() {
        let queue = Arc::new(WorkQueue::unbounded("test"));
        for i in 0..3 {
            queue.put(i).await.unwrap();
        }
        let upstream = CompletionSignal::new("test");
        upstream.raise();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let exit = run_worker("test", 0, Arc::clone(&queue), upstream, quick_policy(3), |i| {
            let sink = Arc::clone(&sink);
            async move { sink.lock().unwrap().push(i) }
        })
        .await;

        assert_eq!(exit, WorkerExit::Drained);
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(queue.unfinished(), 0);
    }

    #[tokio::test]
    async fn test_starves_after_max_attempts() {
        let queue: Arc<WorkQueue<u8>> = Arc::new(WorkQueue::unbounded("test"));
        let upstream = CompletionSignal::new("test");

        let exit = tokio::time::timeout(
            Duration::from_secs(2),
            run_worker("test", 0, queue, upstream, quick_policy(3), |_| async {}),
        )
        .await
        .unwrap();

        assert_eq!(exit, WorkerExit::Starved);
    }

    #[tokio::test]
    async fn test_timeout_keeps_late_item() {
        let queue = Arc::new(WorkQueue::unbounded("test"));
        let upstream = CompletionSignal::new("test");

        let producer = {
            let queue = Arc::clone(&queue);
            let upstream = upstream.clone();
            tokio::spawn(async move {
                // Arrives after at least one timed-out pull
                tokio::time::sleep(Duration::from_millis(60)).await;
                queue.put(42).await.unwrap();
                upstream.raise();
            })
        };

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let exit = run_worker("test", 0, Arc::clone(&queue), upstream, quick_policy(50), |i| {
            let sink = Arc::clone(&sink);
            async move { sink.lock().unwrap().push(i) }
        })
        .await;
        producer.await.unwrap();

        assert_eq!(exit, WorkerExit::Drained);
        assert_eq!(*seen.lock().unwrap(), vec![42]);
    }

    #[tokio::test]
    async fn test_closed_queue_stops_worker() {
        let queue: Arc<WorkQueue<u8>> = Arc::new(WorkQueue::unbounded("test"));
        queue.close();
        let exit = run_worker(
            "test",
            0,
            queue,
            CompletionSignal::new("test"),
            quick_policy(3),
            |_| async {},
        )
        .await;
        assert_eq!(exit, WorkerExit::Closed);
    }
}
