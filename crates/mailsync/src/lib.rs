//! Mail sync crate - Gmail mirroring and OAuth token lifecycle
//!
//! This crate provides:
//! - Domain models (Account, Email, EmailAddress)
//! - Credential encryption and OAuth token refresh with write-back
//! - Gmail API client, query building and message normalization
//! - Storage trait abstractions with SQLite and in-memory backends
//! - Idempotent sync passes (initial, incremental, history)
//! - Background job queue, worker pool and scheduler
//!
//! Everything is synchronous; callers pick their own threading.

pub mod config;
pub mod crypto;
pub mod gmail;
pub mod jobs;
pub mod models;
pub mod oauth;
pub mod storage;
pub mod sync;

pub use config::{ConfigError, OAuthCredentials, SyncConfig, WorkerConfig};
pub use crypto::{AesGcmCipher, Cipher, CryptoError, KeyProvider};
pub use gmail::{GmailClient, MailApi, ProviderError};
pub use jobs::{JobQueue, Scheduler, SyncHandlers, Task, TaskError, WorkerPool};
pub use models::{Account, Email, EmailAddress, Provider, SyncStatus};
pub use oauth::{GoogleTokenEndpoint, Token, TokenSource};
pub use storage::{AccountStore, EmailStore, InMemoryMailStore, MailStore, SqliteMailStore};
pub use sync::{Cooldown, MailboxStats, SyncError, SyncErrorKind, SyncMode, SyncResult, SyncService};
