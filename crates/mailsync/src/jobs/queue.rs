//! In-process task queue with priority lanes and unique keys
//!
//! The client side ([`JobQueue::enqueue`]) and the worker side
//! ([`JobQueue::dequeue`]) share one queue. Tasks are stored in their encoded
//! form so a payload that cannot be decoded fails at pickup, not at enqueue.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use log::debug;
use thiserror::Error;

use super::tasks::{Lane, Task, TaskError, TaskOptions};

#[derive(Debug, Error)]
pub enum EnqueueError {
    /// A task with this unique key is already pending or running
    #[error("Task {0} is already queued")]
    Duplicate(String),

    #[error("Queue is closed")]
    Closed,

    #[error("Failed to encode task payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Queue lock poisoned")]
    Poisoned,
}

/// A task as stored in the queue
#[derive(Debug, Clone)]
pub struct QueuedTask {
    pub id: u64,
    pub type_name: String,
    pub payload: String,
    pub options: TaskOptions,
    /// Retries already spent
    pub retried: u32,
    ready_at: Instant,
}

impl QueuedTask {
    pub fn decode(&self) -> Result<Task, TaskError> {
        Task::decode(&self.type_name, &self.payload)
    }
}

/// Counters over the queue's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub retried: u64,
}

struct State {
    lanes: [VecDeque<QueuedTask>; 3],
    /// Retries waiting out their backoff
    delayed: Vec<QueuedTask>,
    /// Unique keys of pending, delayed and running tasks
    active_keys: HashSet<String>,
    /// Position in the weighted lane cycle
    cursor: usize,
    closed: bool,
    stats: QueueStats,
}

pub struct JobQueue {
    state: Mutex<State>,
    next_id: AtomicU64,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    /// Lane order visited by dequeue, each lane repeated by its weight
    cycle: Vec<Lane>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        let (wake_tx, wake_rx) = channel::unbounded();
        let cycle = Lane::ALL
            .iter()
            .flat_map(|lane| std::iter::repeat_n(*lane, lane.weight()))
            .collect();
        Self {
            state: Mutex::new(State {
                lanes: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                delayed: Vec::new(),
                active_keys: HashSet::new(),
                cursor: 0,
                closed: false,
                stats: QueueStats::default(),
            }),
            next_id: AtomicU64::new(1),
            wake_tx,
            wake_rx,
            cycle,
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, EnqueueError> {
        self.state.lock().map_err(|_| EnqueueError::Poisoned)
    }

    /// Queue a task with its default options
    pub fn enqueue(&self, task: &Task) -> Result<u64, EnqueueError> {
        self.enqueue_with(task, task.options())
    }

    pub fn enqueue_with(&self, task: &Task, options: TaskOptions) -> Result<u64, EnqueueError> {
        let payload = task.payload_json()?;
        let mut state = self.state()?;
        if state.closed {
            return Err(EnqueueError::Closed);
        }
        if let Some(key) = &options.unique_key
            && !state.active_keys.insert(key.clone())
        {
            return Err(EnqueueError::Duplicate(key.clone()));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let lane = options.queue;
        state.lanes[lane.index()].push_back(QueuedTask {
            id,
            type_name: task.type_name().to_string(),
            payload,
            options,
            retried: 0,
            ready_at: Instant::now(),
        });
        state.stats.enqueued += 1;
        drop(state);

        debug!("Enqueued {} task {} on {} lane", task.type_name(), id, lane.as_str());
        let _ = self.wake_tx.send(());
        Ok(id)
    }

    /// Take the next runnable task, visiting lanes by weight
    pub fn dequeue(&self) -> Option<QueuedTask> {
        let mut state = self.state.lock().ok()?;
        if state.closed {
            return None;
        }
        Self::promote_ready(&mut state);

        let len = self.cycle.len();
        for step in 0..len {
            let pos = (state.cursor + step) % len;
            let lane = self.cycle[pos];
            if let Some(task) = state.lanes[lane.index()].pop_front() {
                state.cursor = (pos + 1) % len;
                return Some(task);
            }
        }
        None
    }

    /// Wait up to `timeout` for a task
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<QueuedTask> {
        if let Some(task) = self.dequeue() {
            return Some(task);
        }
        let wait = self.next_delay().map_or(timeout, |d| d.min(timeout));
        let _ = self.wake_rx.recv_timeout(wait);
        self.dequeue()
    }

    /// Schedule another attempt after `delay`
    pub fn retry_later(&self, mut task: QueuedTask, delay: Duration) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        task.retried += 1;
        task.ready_at = Instant::now() + delay;
        state.stats.retried += 1;
        state.delayed.push(task);
    }

    /// Finish a task for good, freeing its unique key
    pub fn complete(&self, task: &QueuedTask, succeeded: bool) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if let Some(key) = &task.options.unique_key {
            state.active_keys.remove(key);
        }
        if succeeded {
            state.stats.succeeded += 1;
        } else {
            state.stats.failed += 1;
        }
    }

    /// Stop accepting tasks; queued tasks are no longer handed out
    pub fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
        }
    }

    /// Wake up to `waiters` threads blocked in [`dequeue_timeout`](Self::dequeue_timeout)
    pub fn notify(&self, waiters: usize) {
        for _ in 0..waiters {
            let _ = self.wake_tx.send(());
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().map(|s| s.closed).unwrap_or(true)
    }

    /// Tasks pending or waiting for a retry
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .map(|s| s.lanes.iter().map(VecDeque::len).sum::<usize>() + s.delayed.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        self.state.lock().map(|s| s.stats).unwrap_or_default()
    }

    fn promote_ready(state: &mut State) {
        if state.delayed.is_empty() {
            return;
        }
        let now = Instant::now();
        let (ready, waiting): (Vec<_>, Vec<_>) =
            state.delayed.drain(..).partition(|t| t.ready_at <= now);
        state.delayed = waiting;
        for task in ready {
            state.lanes[task.options.queue.index()].push_back(task);
        }
    }

    fn next_delay(&self) -> Option<Duration> {
        let state = self.state.lock().ok()?;
        let now = Instant::now();
        state
            .delayed
            .iter()
            .map(|t| t.ready_at.saturating_duration_since(now))
            .min()
    }
}
