//! Background task definitions
//!
//! Tasks travel through the queue as a type name plus a JSON payload and are
//! decoded again when a worker picks them up.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::retry::RetryConfig;
use crate::sync::SyncMode;

/// Sync one account
pub const TYPE_EMAIL_SYNC: &str = "email:sync";

/// Fan out sync tasks for every eligible account
pub const TYPE_EMAIL_SYNC_ALL: &str = "email:sync:all";

/// Accounts considered by one fan-out when the payload leaves it unset
pub const DEFAULT_MAX_ACCOUNTS: usize = 100;

/// How a task ended when it did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// Worth running again after a backoff
    #[error("{0}")]
    Retryable(String),

    /// Running again will not help
    #[error("{0}")]
    Terminal(String),
}

impl TaskError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskError::Retryable(_))
    }
}

/// Priority lane; workers pick lanes in proportion to their weight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lane {
    Critical,
    Default,
    Low,
}

impl Lane {
    pub const ALL: [Lane; 3] = [Lane::Critical, Lane::Default, Lane::Low];

    pub fn weight(&self) -> usize {
        match self {
            Lane::Critical => 6,
            Lane::Default => 3,
            Lane::Low => 1,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Lane::Critical => 0,
            Lane::Default => 1,
            Lane::Low => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Lane::Critical => "critical",
            Lane::Default => "default",
            Lane::Low => "low",
        }
    }
}

/// Per-task execution policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskOptions {
    pub retry: RetryConfig,
    /// Run time budget handed to the handler as a deadline
    pub timeout: Duration,
    pub queue: Lane,
    /// At most one pending or running task per key
    pub unique_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAccountPayload {
    pub account_id: i64,
    pub sync_type: SyncMode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAllPayload {
    /// 0 means [`DEFAULT_MAX_ACCOUNTS`]
    #[serde(default)]
    pub max_accounts: usize,
}

impl SyncAllPayload {
    pub fn effective_max_accounts(&self) -> usize {
        if self.max_accounts == 0 {
            DEFAULT_MAX_ACCOUNTS
        } else {
            self.max_accounts
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    SyncAccount(SyncAccountPayload),
    SyncAll(SyncAllPayload),
}

impl Task {
    pub fn sync_account(account_id: i64, sync_type: SyncMode) -> Self {
        Task::SyncAccount(SyncAccountPayload {
            account_id,
            sync_type,
        })
    }

    pub fn sync_all(max_accounts: usize) -> Self {
        Task::SyncAll(SyncAllPayload { max_accounts })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Task::SyncAccount(_) => TYPE_EMAIL_SYNC,
            Task::SyncAll(_) => TYPE_EMAIL_SYNC_ALL,
        }
    }

    pub fn options(&self) -> TaskOptions {
        match self {
            Task::SyncAccount(p) => TaskOptions {
                retry: RetryConfig::default().with_max_retries(3),
                timeout: Duration::from_secs(10 * 60),
                queue: Lane::Default,
                unique_key: Some(format!("{}:{}", TYPE_EMAIL_SYNC, p.account_id)),
            },
            Task::SyncAll(_) => TaskOptions {
                retry: RetryConfig::default().with_max_retries(2),
                timeout: Duration::from_secs(30 * 60),
                queue: Lane::Critical,
                unique_key: Some(TYPE_EMAIL_SYNC_ALL.to_string()),
            },
        }
    }

    pub fn payload_json(&self) -> serde_json::Result<String> {
        match self {
            Task::SyncAccount(p) => serde_json::to_string(p),
            Task::SyncAll(p) => serde_json::to_string(p),
        }
    }

    /// Rebuild a task from its queued form
    pub fn decode(type_name: &str, payload: &str) -> Result<Self, TaskError> {
        let bad_payload =
            |e: serde_json::Error| TaskError::Terminal(format!("invalid {} payload: {}", type_name, e));
        match type_name {
            TYPE_EMAIL_SYNC => serde_json::from_str(payload)
                .map(Task::SyncAccount)
                .map_err(bad_payload),
            TYPE_EMAIL_SYNC_ALL => serde_json::from_str(payload)
                .map(Task::SyncAll)
                .map_err(bad_payload),
            other => Err(TaskError::Terminal(format!("unknown task type {}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_account_options() {
        let task = Task::sync_account(42, SyncMode::Incremental);
        let opts = task.options();
        assert_eq!(task.type_name(), "email:sync");
        assert_eq!(opts.retry.max_retries, 3);
        assert_eq!(opts.timeout, Duration::from_secs(600));
        assert_eq!(opts.queue, Lane::Default);
        assert_eq!(opts.unique_key.as_deref(), Some("email:sync:42"));
    }

    #[test]
    fn test_sync_all_options() {
        let task = Task::sync_all(100);
        let opts = task.options();
        assert_eq!(task.type_name(), "email:sync:all");
        assert_eq!(opts.retry.max_retries, 2);
        assert_eq!(opts.timeout, Duration::from_secs(1800));
        assert_eq!(opts.queue, Lane::Critical);
    }

    #[test]
    fn test_payload_wire_format() {
        let task = Task::sync_account(7, SyncMode::History);
        let json = task.payload_json().unwrap();
        assert_eq!(json, r#"{"account_id":7,"sync_type":"history"}"#);
        assert_eq!(Task::decode(task.type_name(), &json).unwrap(), task);
    }

    #[test]
    fn test_decode_defaults_max_accounts() {
        let task = Task::decode(TYPE_EMAIL_SYNC_ALL, "{}").unwrap();
        let Task::SyncAll(payload) = task else {
            panic!("expected fan-out task");
        };
        assert_eq!(payload.effective_max_accounts(), 100);
    }

    #[test]
    fn test_decode_rejects_unknown() {
        assert!(matches!(
            Task::decode("email:unknown", "{}"),
            Err(TaskError::Terminal(_))
        ));
        assert!(matches!(
            Task::decode(TYPE_EMAIL_SYNC, "not json"),
            Err(TaskError::Terminal(_))
        ));
    }

    #[test]
    fn test_lane_weights() {
        let weights: Vec<usize> = Lane::ALL.iter().map(Lane::weight).collect();
        assert_eq!(weights, vec![6, 3, 1]);
    }
}
