//! Storage trait definitions

use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::models::{Account, Email, SyncStatus};

/// Field-level credential write after a token refresh
///
/// Applying it also resets the account to `active` and clears `sync_error`.
/// Sync bookkeeping columns are never touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenUpdate {
    /// Encrypted access token
    pub access_token: String,
    pub token_expiry: DateTime<Utc>,
    /// Encrypted refresh token; `None` keeps the stored one
    pub refresh_token: Option<String>,
}

/// Field-level write at the end of a sync pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub synced_at: DateTime<Utc>,
    pub status: SyncStatus,
    pub error: Option<String>,
    /// New change-log cursor; `None` keeps the stored one
    pub history_id: Option<String>,
}

/// Persisted per-account OAuth and sync state
///
/// Every mutation is column-scoped so concurrent writers (token refresh and
/// sync status) never clobber each other's fields.
pub trait AccountStore: Send + Sync {
    /// Insert an account, returning its assigned id
    fn insert_account(&self, account: &Account) -> Result<i64>;

    fn get_account(&self, id: i64) -> Result<Option<Account>>;

    /// Google accounts that are not paused and not soft-deleted, oldest first
    fn list_sync_eligible(&self, limit: usize) -> Result<Vec<Account>>;

    fn update_tokens(&self, account_id: i64, update: &TokenUpdate) -> Result<()>;

    fn record_sync_outcome(&self, account_id: i64, outcome: &SyncOutcome) -> Result<()>;

    fn set_sync_status(&self, account_id: i64, status: SyncStatus, error: Option<&str>)
    -> Result<()>;

    fn soft_delete_account(&self, account_id: i64) -> Result<()>;

    /// Try to take the exclusive sync lease for an account
    ///
    /// Succeeds when no lease is held, the held lease has expired, or
    /// `owner` already holds it. Returns whether the lease is now held.
    fn try_acquire_lease(&self, account_id: i64, owner: &str, ttl: Duration) -> Result<bool>;

    /// Release the lease if `owner` holds it
    fn release_lease(&self, account_id: i64, owner: &str) -> Result<()>;
}

/// Local mirror of provider messages
///
/// Rows are keyed by `(account_id, provider_message_id)`. Lookups by that key
/// include soft-deleted rows so a deleted message is never re-inserted.
pub trait EmailStore: Send + Sync {
    fn email_exists(&self, account_id: i64, provider_message_id: &str) -> Result<bool>;

    /// Insert a new email, returning its row id
    ///
    /// Returns `None` without writing when the key already exists.
    fn insert_email(&self, email: &Email) -> Result<Option<i64>>;

    fn get_email(&self, account_id: i64, provider_message_id: &str) -> Result<Option<Email>>;

    /// Rewrite labels and read state; returns false when no row matched
    fn update_email_labels(
        &self,
        account_id: i64,
        provider_message_id: &str,
        labels: &[String],
        is_read: bool,
    ) -> Result<bool>;

    /// Mark deleted; returns false when no live row matched
    fn soft_delete_email(&self, account_id: i64, provider_message_id: &str) -> Result<bool>;

    /// Case id of any live email already linked in this thread
    fn find_thread_case(&self, account_id: i64, thread_id: &str) -> Result<Option<String>>;

    fn set_email_case(&self, email_id: i64, case_id: &str) -> Result<()>;

    /// Live (not soft-deleted) emails
    fn count_emails(&self, account_id: i64) -> Result<usize>;

    /// Live emails with `is_read = false`
    fn count_unread(&self, account_id: i64) -> Result<usize>;

    /// Label set of every live email
    fn list_label_sets(&self, account_id: i64) -> Result<Vec<Vec<String>>>;
}

/// Combined store used by the sync engine and job handlers
pub trait MailStore: AccountStore + EmailStore {}

impl<T: AccountStore + EmailStore> MailStore for T {}
