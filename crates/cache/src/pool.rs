//! 后台工作池
//!
//! 混合模式的回填与双写都提交到这里。提交不会阻塞调用方，
//! 许可在任务内部获取，同时运行的任务数不超过 worker 数

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

#[derive(Debug)]
struct PoolInner {
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    workers: usize,
    closed: AtomicBool,
}

/// 有界工作池
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            inner: Arc::new(PoolInner {
                semaphore: Arc::new(Semaphore::new(workers)),
                tracker: TaskTracker::new(),
                workers,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn workers(&self) -> usize {
        self.inner.workers
    }

    /// 尚未结束的任务数（包括排队中的）
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// 提交任务；池已关闭时返回 None
    pub fn spawn<F, T>(&self, task: F) -> Option<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            debug!("Worker pool closed, task rejected");
            return None;
        }

        let semaphore = Arc::clone(&self.inner.semaphore);
        Some(self.inner.tracker.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            task.await
        }))
    }

    /// 停止接收新任务并等待已提交的任务完成，超时返回 false
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return true;
        }
        self.inner.tracker.close();

        let drained = tokio::time::timeout(timeout, self.inner.tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!(
                pending = self.inner.tracker.len(),
                "Worker pool shutdown timed out with tasks still running"
            );
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .filter_map(|_| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                pool.spawn(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_rejects() {
        let pool = WorkerPool::new(4);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = Arc::clone(&done);
            pool.spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert!(pool.shutdown(Duration::from_secs(1)).await);
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert!(pool.is_closed());
        assert!(pool.spawn(async {}).is_none());
        // 重复关闭
        assert!(pool.shutdown(Duration::from_millis(1)).await);
    }

    #[test]
    fn test_zero_workers_is_clamped() {
        assert_eq!(WorkerPool::new(0).workers(), 1);
    }
}
