//! Background job scheduling
//!
//! - [`Task`] definitions with per-task retry, timeout and lane policy
//! - [`JobQueue`] shared by producers and the [`WorkerPool`]
//! - [`Scheduler`] for periodic tasks
//! - [`SyncHandlers`] running account syncs and the fan-out

mod handlers;
mod queue;
mod retry;
mod scheduler;
mod tasks;
mod worker;

pub use handlers::{FanOutReport, GmailConnector, MailConnector, SyncHandlers};
pub use queue::{EnqueueError, JobQueue, QueueStats, QueuedTask};
pub use retry::RetryConfig;
pub use scheduler::Scheduler;
pub use tasks::{
    DEFAULT_MAX_ACCOUNTS, Lane, SyncAccountPayload, SyncAllPayload, TYPE_EMAIL_SYNC,
    TYPE_EMAIL_SYNC_ALL, Task, TaskError, TaskOptions,
};
pub use worker::{ErrorHook, PoolConfig, TaskHandler, WorkerPool};
