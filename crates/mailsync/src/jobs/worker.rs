//! Worker pool executing queued tasks on OS threads

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use super::queue::{JobQueue, QueuedTask};
use super::tasks::{Task, TaskError};

/// How long an idle worker waits before re-checking for shutdown
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Executes decoded tasks
pub trait TaskHandler: Send + Sync {
    /// Run `task`, finishing before `deadline` where possible
    fn handle(&self, task: &Task, deadline: Instant) -> Result<(), TaskError>;
}

/// Called with the task type and error for every failed attempt
pub type ErrorHook = Arc<dyn Fn(&str, &TaskError) + Send + Sync>;

pub struct PoolConfig {
    /// Worker threads
    pub concurrency: usize,
    pub on_error: Option<ErrorHook>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            on_error: None,
        }
    }
}

pub struct WorkerPool {
    queue: Arc<JobQueue>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.concurrency` workers pulling from `queue`
    pub fn start(
        queue: Arc<JobQueue>,
        handler: Arc<dyn TaskHandler>,
        config: PoolConfig,
    ) -> std::io::Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let concurrency = config.concurrency.max(1);
        let mut workers = Vec::with_capacity(concurrency);

        for n in 0..concurrency {
            let worker = Worker {
                queue: queue.clone(),
                handler: handler.clone(),
                on_error: config.on_error.clone(),
                shutdown: shutdown.clone(),
            };
            let handle = thread::Builder::new()
                .name(format!("sync-worker-{}", n))
                .spawn(move || worker.run())?;
            workers.push(handle);
        }

        info!("Worker pool started with {} workers", concurrency);
        Ok(Self {
            queue,
            shutdown,
            workers,
        })
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    /// Stop picking up tasks and wait for running ones to finish
    pub fn shutdown(self) {
        info!("Shutting down worker pool");
        self.shutdown.store(true, Ordering::SeqCst);
        self.queue.close();
        self.queue.notify(self.workers.len());

        for handle in self.workers {
            if handle.join().is_err() {
                error!("Worker thread panicked");
            }
        }
        info!("Worker pool stopped");
    }
}

struct Worker {
    queue: Arc<JobQueue>,
    handler: Arc<dyn TaskHandler>,
    on_error: Option<ErrorHook>,
    shutdown: Arc<AtomicBool>,
}

impl Worker {
    fn run(self) {
        while !self.shutdown.load(Ordering::SeqCst) {
            if let Some(queued) = self.queue.dequeue_timeout(IDLE_POLL) {
                self.execute(queued);
            }
        }
    }

    fn execute(&self, queued: QueuedTask) {
        let deadline = Instant::now() + queued.options.timeout;
        let outcome = queued
            .decode()
            .and_then(|task| self.handler.handle(&task, deadline));

        let err = match outcome {
            Ok(()) => {
                debug!("Task {} ({}) succeeded", queued.id, queued.type_name);
                self.queue.complete(&queued, true);
                return;
            }
            Err(err) => err,
        };

        if let Some(hook) = &self.on_error {
            hook(&queued.type_name, &err);
        }

        let retry = &queued.options.retry;
        if err.is_retryable() && retry.allows_retry(queued.retried) {
            let delay = retry.delay_for(queued.retried + 1);
            warn!(
                "Task {} ({}) failed (attempt {}/{}): {}. Retrying in {:?}",
                queued.id,
                queued.type_name,
                queued.retried + 1,
                retry.max_retries + 1,
                err,
                delay
            );
            self.queue.retry_later(queued, delay);
        } else {
            error!("Task {} ({}) failed: {}", queued.id, queued.type_name, err);
            self.queue.complete(&queued, false);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::retry::RetryConfig;
    use crate::sync::SyncMode;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    /// Fails the first `failures` calls with the given error, then succeeds
    struct FlakyHandler {
        calls: AtomicUsize,
        failures: usize,
        error: TaskError,
        seen: Mutex<Vec<Task>>,
    }

    impl FlakyHandler {
        fn new(failures: usize, error: TaskError) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures,
                error,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl TaskHandler for FlakyHandler {
        fn handle(&self, task: &Task, _deadline: Instant) -> Result<(), TaskError> {
            self.seen.lock().unwrap().push(task.clone());
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(self.error.clone())
            } else {
                Ok(())
            }
        }
    }

    fn fast_retry_task(queue: &JobQueue, max_retries: u32) {
        let task = Task::sync_account(1, SyncMode::Incremental);
        let mut options = task.options();
        options.retry = RetryConfig::new(
            max_retries,
            Duration::from_millis(5),
            Duration::from_millis(20),
        );
        queue.enqueue_with(&task, options).unwrap();
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let start = Instant::now();
        while !done() && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_runs_task() {
        let queue = Arc::new(JobQueue::new());
        let handler = Arc::new(FlakyHandler::new(0, TaskError::Retryable("x".into())));
        let pool = WorkerPool::start(queue.clone(), handler.clone(), PoolConfig::default()).unwrap();

        queue.enqueue(&Task::sync_all(5)).unwrap();
        wait_until(|| queue.stats().succeeded == 1);
        pool.shutdown();

        assert_eq!(queue.stats().succeeded, 1);
        assert_eq!(*handler.seen.lock().unwrap(), vec![Task::sync_all(5)]);
    }

    #[test]
    fn test_retryable_error_is_retried() {
        let queue = Arc::new(JobQueue::new());
        let handler = Arc::new(FlakyHandler::new(2, TaskError::Retryable("flaky".into())));
        let failures = Arc::new(AtomicUsize::new(0));
        let hook_failures = failures.clone();
        let config = PoolConfig {
            concurrency: 2,
            on_error: Some(Arc::new(move |_, _| {
                hook_failures.fetch_add(1, Ordering::SeqCst);
            })),
        };
        let pool = WorkerPool::start(queue.clone(), handler.clone(), config).unwrap();

        fast_retry_task(&queue, 3);
        wait_until(|| queue.stats().succeeded == 1);
        pool.shutdown();

        let stats = queue.stats();
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert_eq!(failures.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_retry_budget_exhausted() {
        let queue = Arc::new(JobQueue::new());
        let handler = Arc::new(FlakyHandler::new(usize::MAX, TaskError::Retryable("down".into())));
        let pool =
            WorkerPool::start(queue.clone(), handler.clone(), PoolConfig::default()).unwrap();

        fast_retry_task(&queue, 2);
        wait_until(|| queue.stats().failed == 1);
        pool.shutdown();

        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.retried, 2);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_terminal_error_not_retried() {
        let queue = Arc::new(JobQueue::new());
        let handler = Arc::new(FlakyHandler::new(1, TaskError::Terminal("gone".into())));
        let pool =
            WorkerPool::start(queue.clone(), handler.clone(), PoolConfig::default()).unwrap();

        fast_retry_task(&queue, 3);
        wait_until(|| queue.stats().failed == 1);
        pool.shutdown();

        assert_eq!(queue.stats().retried, 0);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }
}
