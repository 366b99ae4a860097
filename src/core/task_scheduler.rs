//! 任务调度：有界并发的扇出执行
//!
//! 用 Semaphore 限制同时运行的任务数，全部完成后才按提交顺序返回结果（完整屏障）。
//! 调用方在拿到结果后再在协调线程上串行合并。

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// 有界并发调度器
pub struct TaskScheduler {
    semaphore: Arc<Semaphore>,
    max_concurrent: usize,
}

/// 单个任务的结果：task panic 时为 Err
pub type TaskOutcome<T> = std::result::Result<T, String>;

impl TaskScheduler {
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        }
    }

    /// 按任务数收缩并发上限：min(n, cap)
    pub fn for_jobs(job_count: usize, cap: usize) -> Self {
        Self::new(job_count.min(cap))
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// 并发运行全部任务，等待每一个完成后返回（顺序与输入一致）
    pub async fn run_all<F, T>(&self, jobs: Vec<F>) -> Vec<TaskOutcome<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let total = jobs.len();
        let mut set = JoinSet::new();
        for (index, job) in jobs.into_iter().enumerate() {
            let semaphore = self.semaphore.clone();
            set.spawn(async move {
                // 信号量从不关闭，acquire 失败时退化为无许可执行
                let _permit = semaphore.acquire_owned().await.ok();
                (index, job.await)
            });
        }

        let mut slots: Vec<Option<TaskOutcome<T>>> = (0..total).map(|_| None).collect();
        let mut panics = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, value)) => slots[index] = Some(Ok(value)),
                Err(e) => panics.push(e.to_string()),
            }
        }

        let mut panics = panics.into_iter();
        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(panics
                        .next()
                        .unwrap_or_else(|| "task did not complete".to_string()))
                })
            })
            .collect()
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_waits_for_slow_job_before_returning() {
        let scheduler = TaskScheduler::for_jobs(3, 5);
        let finished = Arc::new(AtomicUsize::new(0));
        let mut jobs = Vec::new();
        for delay in [5u64, 200, 10] {
            let finished = finished.clone();
            jobs.push(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                delay
            });
        }
        let results = scheduler.run_all(jobs).await;
        assert_eq!(finished.load(Ordering::SeqCst), 3);
        let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![5, 200, 10]);
    }

    #[tokio::test]
    async fn test_concurrency_is_capped() {
        let scheduler = TaskScheduler::for_jobs(8, 2);
        assert_eq!(scheduler.max_concurrent(), 2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let jobs: Vec<_> = (0..8)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                }
            })
            .collect();
        scheduler.run_all(jobs).await;
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[test]
    fn test_for_jobs_never_zero() {
        assert_eq!(TaskScheduler::for_jobs(0, 5).max_concurrent(), 1);
    }
}
