//! Recurring queue drain

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::queue::MutationQueue;

/// Handle of a background task draining the queue every `interval`
pub struct BackgroundDrain {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BackgroundDrain {
    /// Start draining in the background; each run is bounded by `drain_timeout`
    pub fn spawn(queue: MutationQueue, interval: Duration, drain_timeout: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!("Background drain every {}s", interval.as_secs());

            loop {
                tokio::select! {
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        match queue.drain(drain_timeout, |_| {}).await {
                            Ok(report) if report.transmitted > 0 => {
                                tracing::debug!("Background drain transmitted {}", report.transmitted);
                            }
                            Ok(_) => {}
                            Err(error) => tracing::warn!("Background drain failed: {error}"),
                        }
                    }
                }
            }
            tracing::info!("Background drain stopped");
        });
        Self { shutdown, handle }
    }

    /// Stop after the current run and wait for the task to finish
    pub async fn shutdown(self) {
        self.shutdown.send(true).ok();
        if let Err(error) = self.handle.await {
            tracing::warn!("Background drain task ended abnormally: {error}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::InMemoryBackend;
    use crate::models::QueueOperation;
    use crate::services::DatabaseService;
    use crate::sync::{BackoffPolicy, ConflictResolver};
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test(flavor = "multi_thread")]
    async fn drains_until_shut_down() {
        let db = DatabaseService::open_in_memory().await.unwrap();
        let backend = Arc::new(InMemoryBackend::new("T1"));
        let resolver =
            ConflictResolver::new(db.clone(), backend.clone(), "T1", Duration::from_secs(30));
        let queue = MutationQueue::new(db, backend.clone(), resolver, BackoffPolicy::default(), 10);
        queue
            .enqueue("orders", "o-1", QueueOperation::Insert, json!({}))
            .await
            .unwrap();

        let drain = BackgroundDrain::spawn(
            queue.clone(),
            Duration::from_millis(20),
            Duration::from_secs(5),
        );
        for _ in 0..100 {
            if queue.is_empty().await.unwrap() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drain.shutdown().await;

        assert!(queue.is_empty().await.unwrap());
        assert!(backend.record("orders", "o-1").is_some());
    }
}
