//! In-memory storage implementation
//!
//! Used by tests and for dry runs where nothing should touch disk.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use super::traits::{AccountStore, EmailStore, SyncOutcome, TokenUpdate};
use crate::models::{Account, Email, Provider, SyncStatus};

struct Lease {
    owner: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    accounts: HashMap<i64, Account>,
    leases: HashMap<i64, Lease>,
    /// Keyed by `(account_id, provider_message_id)`
    emails: HashMap<(i64, String), Email>,
    next_account_id: i64,
    next_email_id: i64,
}

/// In-memory implementation of the account and email stores
///
/// Everything lives behind one RwLock so multi-field updates are atomic the
/// same way a SQLite transaction is.
#[derive(Default)]
pub struct InMemoryMailStore {
    inner: RwLock<Inner>,
}

impl InMemoryMailStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| anyhow!("Store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| anyhow!("Store lock poisoned"))
    }

    /// Number of stored emails including soft-deleted ones
    pub fn total_rows(&self) -> usize {
        self.read().map(|inner| inner.emails.len()).unwrap_or(0)
    }
}

fn live(email: &&Email, account_id: i64) -> bool {
    email.account_id == account_id && email.deleted_at.is_none()
}

impl AccountStore for InMemoryMailStore {
    fn insert_account(&self, account: &Account) -> Result<i64> {
        let mut inner = self.write()?;
        inner.next_account_id += 1;
        let id = inner.next_account_id;
        let mut account = account.clone();
        account.id = id;
        inner.accounts.insert(id, account);
        Ok(id)
    }

    fn get_account(&self, id: i64) -> Result<Option<Account>> {
        Ok(self.read()?.accounts.get(&id).cloned())
    }

    fn list_sync_eligible(&self, limit: usize) -> Result<Vec<Account>> {
        let inner = self.read()?;
        let mut accounts: Vec<Account> = inner
            .accounts
            .values()
            .filter(|a| {
                a.provider == Provider::Google
                    && a.sync_status != SyncStatus::Paused
                    && a.deleted_at.is_none()
            })
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.id);
        accounts.truncate(limit);
        Ok(accounts)
    }

    fn update_tokens(&self, account_id: i64, update: &TokenUpdate) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(account) = inner.accounts.get_mut(&account_id) {
            account.access_token = update.access_token.clone();
            account.token_expiry = update.token_expiry;
            if let Some(refresh) = &update.refresh_token {
                account.refresh_token = refresh.clone();
            }
            account.sync_status = SyncStatus::Active;
            account.sync_error = None;
        }
        Ok(())
    }

    fn record_sync_outcome(&self, account_id: i64, outcome: &SyncOutcome) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(account) = inner.accounts.get_mut(&account_id) {
            account.last_sync_at = Some(outcome.synced_at);
            account.sync_status = outcome.status;
            account.sync_error = outcome.error.clone();
            if let Some(history_id) = &outcome.history_id {
                account.last_history_id = Some(history_id.clone());
            }
        }
        Ok(())
    }

    fn set_sync_status(
        &self,
        account_id: i64,
        status: SyncStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(account) = inner.accounts.get_mut(&account_id) {
            account.sync_status = status;
            account.sync_error = error.map(str::to_string);
        }
        Ok(())
    }

    fn soft_delete_account(&self, account_id: i64) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(account) = inner.accounts.get_mut(&account_id)
            && account.deleted_at.is_none()
        {
            account.deleted_at = Some(Utc::now());
        }
        Ok(())
    }

    fn try_acquire_lease(&self, account_id: i64, owner: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.write()?;
        if !inner.accounts.contains_key(&account_id) {
            return Ok(false);
        }

        let now = Utc::now();
        let free = match inner.leases.get(&account_id) {
            None => true,
            Some(lease) => lease.owner == owner || lease.expires_at <= now,
        };

        if free {
            let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
            inner.leases.insert(
                account_id,
                Lease {
                    owner: owner.to_string(),
                    expires_at: now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
                },
            );
        }
        Ok(free)
    }

    fn release_lease(&self, account_id: i64, owner: &str) -> Result<()> {
        let mut inner = self.write()?;
        if inner
            .leases
            .get(&account_id)
            .is_some_and(|lease| lease.owner == owner)
        {
            inner.leases.remove(&account_id);
        }
        Ok(())
    }
}

impl EmailStore for InMemoryMailStore {
    fn email_exists(&self, account_id: i64, provider_message_id: &str) -> Result<bool> {
        Ok(self
            .read()?
            .emails
            .contains_key(&(account_id, provider_message_id.to_string())))
    }

    fn insert_email(&self, email: &Email) -> Result<Option<i64>> {
        let mut inner = self.write()?;
        let key = (email.account_id, email.provider_message_id.clone());
        if inner.emails.contains_key(&key) {
            return Ok(None);
        }

        inner.next_email_id += 1;
        let id = inner.next_email_id;
        let mut email = email.clone();
        email.id = id;
        inner.emails.insert(key, email);
        Ok(Some(id))
    }

    fn get_email(&self, account_id: i64, provider_message_id: &str) -> Result<Option<Email>> {
        Ok(self
            .read()?
            .emails
            .get(&(account_id, provider_message_id.to_string()))
            .cloned())
    }

    fn update_email_labels(
        &self,
        account_id: i64,
        provider_message_id: &str,
        labels: &[String],
        is_read: bool,
    ) -> Result<bool> {
        let mut inner = self.write()?;
        match inner
            .emails
            .get_mut(&(account_id, provider_message_id.to_string()))
        {
            Some(email) => {
                email.labels = labels.to_vec();
                email.is_read = is_read;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn soft_delete_email(&self, account_id: i64, provider_message_id: &str) -> Result<bool> {
        let mut inner = self.write()?;
        match inner
            .emails
            .get_mut(&(account_id, provider_message_id.to_string()))
        {
            Some(email) if email.deleted_at.is_none() => {
                email.deleted_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn find_thread_case(&self, account_id: i64, thread_id: &str) -> Result<Option<String>> {
        let inner = self.read()?;
        Ok(inner
            .emails
            .values()
            .filter(|e| live(e, account_id) && e.thread_id.as_deref() == Some(thread_id))
            .filter_map(|e| e.case_id.as_ref().map(|c| (e.received_at, c)))
            .min_by_key(|(received_at, _)| *received_at)
            .map(|(_, case_id)| case_id.clone()))
    }

    fn set_email_case(&self, email_id: i64, case_id: &str) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(email) = inner.emails.values_mut().find(|e| e.id == email_id) {
            email.case_id = Some(case_id.to_string());
        }
        Ok(())
    }

    fn count_emails(&self, account_id: i64) -> Result<usize> {
        let inner = self.read()?;
        Ok(inner.emails.values().filter(|e| live(e, account_id)).count())
    }

    fn count_unread(&self, account_id: i64) -> Result<usize> {
        let inner = self.read()?;
        Ok(inner
            .emails
            .values()
            .filter(|e| live(e, account_id) && !e.is_read)
            .count())
    }

    fn list_label_sets(&self, account_id: i64) -> Result<Vec<Vec<String>>> {
        let inner = self.read()?;
        let mut emails: Vec<&Email> = inner
            .emails
            .values()
            .filter(|e| live(e, account_id))
            .collect();
        emails.sort_by_key(|e| e.id);
        Ok(emails.into_iter().map(|e| e.labels.clone()).collect())
    }
}
