//! Periodic task registration

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use log::{debug, error, info};

use super::queue::{EnqueueError, JobQueue};
use super::tasks::Task;

struct Entry {
    task: Task,
    interval: Duration,
}

/// Enqueues registered tasks on a fixed interval
pub struct Scheduler {
    queue: Arc<JobQueue>,
    entries: Vec<Entry>,
    stop_tx: Option<Sender<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(queue: Arc<JobQueue>) -> Self {
        Self {
            queue,
            entries: Vec::new(),
            stop_tx: None,
            threads: Vec::new(),
        }
    }

    /// Enqueue `task` every `interval` once started
    pub fn register(&mut self, task: Task, interval: Duration) {
        info!("Scheduled {} every {:?}", task.type_name(), interval);
        self.entries.push(Entry { task, interval });
    }

    pub fn start(&mut self) -> std::io::Result<()> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(0);

        for entry in self.entries.drain(..) {
            let queue = self.queue.clone();
            let stop_rx = stop_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("scheduler-{}", entry.task.type_name()))
                .spawn(move || {
                    loop {
                        match stop_rx.recv_timeout(entry.interval) {
                            Err(RecvTimeoutError::Timeout) => tick(&queue, &entry.task),
                            // Stop requested or scheduler dropped
                            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                })?;
            self.threads.push(handle);
        }

        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    /// Stop every timer thread and wait for them
    pub fn shutdown(&mut self) {
        // Dropping the sender disconnects every receiver
        self.stop_tx.take();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("Scheduler thread panicked");
            }
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn tick(queue: &JobQueue, task: &Task) {
    match queue.enqueue(task) {
        Ok(id) => debug!("Scheduler enqueued {} as task {}", task.type_name(), id),
        Err(EnqueueError::Duplicate(key)) => {
            debug!("Scheduler skipped {}: previous run still active", key)
        }
        Err(e) => error!("Scheduler failed to enqueue {}: {}", task.type_name(), e),
    }
}
