//! Bounded worker pool for toolchain processes

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;

/// Caps the number of toolchain jobs running at once
///
/// Clones share the same capacity, so one pool can serve every profile.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    /// Create a pool running at most `size` jobs (at least one)
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    /// Pool capacity
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of jobs that could start right now
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Run `job` once a slot is free
    pub async fn run<F, T>(&self, label: &str, job: F) -> T
    where
        F: Future<Output = T>,
    {
        if self.permits.available_permits() == 0 {
            log::info!("Waiting for a free toolchain slot for {}", label);
        }
        // The semaphore is never closed
        let _permit = self.permits.acquire().await.ok();
        log::debug!("Running toolchain job: {}", label);
        job.await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_bounds_concurrency() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for i in 0..6 {
            let pool = pool.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                pool.run(&format!("job {}", i), async {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .await
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let peak = peak.load(Ordering::SeqCst);
        assert!(peak >= 1 && peak <= 2, "peak concurrency {}", peak);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_zero_size_is_clamped() {
        assert_eq!(WorkerPool::new(0).size(), 1);
    }
}
