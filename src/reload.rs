//! The reload coalescer (§4.A): collapses a burst of change notifications
//! into at most one `apply` per rollup window.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use tracing::{debug, info};

/// A timestamped reason to rebuild a routing table.
#[derive(Debug, Clone)]
pub struct Reload {
    pub time: SystemTime,
    pub reason: &'static str,
}

impl Reload {
    pub fn new(reason: &'static str) -> Self {
        Reload {
            time: SystemTime::now(),
            reason,
        }
    }

    pub fn lag(&self) -> Duration {
        self.time.elapsed().unwrap_or_default()
    }
}

/// Multi-producer, single-consumer coalescing queue.
///
/// `trigger` never blocks on a reader: it only ever takes a short-lived
/// mutex around a `Vec` push. `poll` is the single consumer; running it
/// from more than one task would violate the "one concurrent apply" rule
/// the reconcile loops depend on.
pub struct Coalescer {
    queue: Mutex<Vec<Reload>>,
}

impl Coalescer {
    pub fn new() -> Self {
        Coalescer {
            queue: Mutex::new(Vec::new()),
        }
    }

    pub fn trigger(&self, reason: &'static str) {
        let mut queue = self.queue.lock().unwrap();
        queue.push(Reload::new(reason));
    }

    /// Runs `apply` forever, at most once per `rollup` window, passing the
    /// most recent `Reload` queued in that window. Never returns.
    pub async fn poll<F, Fut>(&self, rollup: Duration, mut apply: F)
    where
        F: FnMut(Reload) -> Fut,
        Fut: Future<Output = ()>,
    {
        loop {
            tokio::time::sleep(rollup).await;

            let last = {
                let mut queue = self.queue.lock().unwrap();
                if queue.is_empty() {
                    continue;
                }
                let last = queue.pop().unwrap();
                let discarded = queue.len();
                queue.clear();
                if discarded > 0 {
                    debug!(discarded, "reload events throttled");
                }
                last
            };

            info!(reason = last.reason, lag_ms = last.lag().as_millis() as u64, "applying reload");
            apply(last).await;
        }
    }
}

impl Default for Coalescer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn bursts_collapse_to_one_apply_per_window() {
        let coalescer = Arc::new(Coalescer::new());
        let applies = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            coalescer.trigger("x");
        }

        let c = coalescer.clone();
        let a = applies.clone();
        let handle = tokio::spawn(async move {
            c.poll(Duration::from_millis(100), |_| {
                let a = a.clone();
                async move {
                    a.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        handle.abort();

        assert_eq!(applies.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn applied_reload_is_the_most_recent_trigger() {
        let coalescer = Arc::new(Coalescer::new());
        coalescer.trigger("first");
        coalescer.trigger("second");
        coalescer.trigger("third");

        let seen = Arc::new(Mutex::new(None));
        let c = coalescer.clone();
        let s = seen.clone();
        let handle = tokio::spawn(async move {
            c.poll(Duration::from_millis(10), |reload| {
                let s = s.clone();
                async move {
                    *s.lock().unwrap() = Some(reload.reason);
                }
            })
            .await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();

        assert_eq!(*seen.lock().unwrap(), Some("third"));
    }
}
