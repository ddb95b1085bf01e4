//! Task handlers for account sync and fan-out

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use log::{debug, error, info, warn};

use super::queue::{EnqueueError, JobQueue};
use super::tasks::{SyncAccountPayload, SyncAllPayload, Task, TaskError};
use super::worker::TaskHandler;
use crate::config::SyncConfig;
use crate::crypto::Cipher;
use crate::gmail::{GmailClient, MailApi};
use crate::models::{Account, SyncStatus};
use crate::oauth::{AuthError, TokenEndpoint, TokenSource, token_source_for_account};
use crate::storage::{AccountStore, MailStore};
use crate::sync::{
    Cooldown, SyncErrorKind, SyncMode, SyncService, check_cooldown, classify_auth,
};

/// Lease time beyond the task deadline, covering the final status write
const LEASE_GRACE: Duration = Duration::from_secs(60);

/// Opens an authenticated mail API for an account
pub trait MailConnector: Send + Sync {
    fn connect(&self, account: &Account) -> Result<Arc<dyn MailApi>, AuthError>;
}

/// Production connector: stored credentials, refresh and write-back
pub struct GmailConnector {
    cipher: Arc<dyn Cipher>,
    endpoint: Arc<dyn TokenEndpoint>,
    accounts: Arc<dyn AccountStore>,
}

impl GmailConnector {
    pub fn new(
        cipher: Arc<dyn Cipher>,
        endpoint: Arc<dyn TokenEndpoint>,
        accounts: Arc<dyn AccountStore>,
    ) -> Self {
        Self {
            cipher,
            endpoint,
            accounts,
        }
    }
}

impl MailConnector for GmailConnector {
    fn connect(&self, account: &Account) -> Result<Arc<dyn MailApi>, AuthError> {
        let tokens = token_source_for_account(
            account,
            self.cipher.clone(),
            self.endpoint.clone(),
            self.accounts.clone(),
        )?;
        let tokens: Arc<dyn TokenSource> = Arc::new(tokens);
        Ok(Arc::new(GmailClient::new(tokens)))
    }
}

/// Counters from one fan-out run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub accounts_found: usize,
    pub enqueued: usize,
    pub in_cooldown: usize,
    pub already_queued: usize,
    pub errors: usize,
}

/// Handles `email:sync` and `email:sync:all`
pub struct SyncHandlers {
    store: Arc<dyn MailStore>,
    queue: Arc<JobQueue>,
    connector: Arc<dyn MailConnector>,
    config: SyncConfig,
    owner_prefix: String,
    next_lease: AtomicU64,
}

impl SyncHandlers {
    pub fn new(
        store: Arc<dyn MailStore>,
        queue: Arc<JobQueue>,
        connector: Arc<dyn MailConnector>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            queue,
            connector,
            config,
            owner_prefix: format!("syncd-{}", std::process::id()),
            next_lease: AtomicU64::new(1),
        }
    }

    /// Sync one account
    ///
    /// Missing, non-Gmail and non-active accounts, accounts already being
    /// synced, and rejected credentials all end the task without a retry.
    pub fn handle_sync_account(
        &self,
        payload: &SyncAccountPayload,
        deadline: Instant,
    ) -> Result<(), TaskError> {
        let account_id = payload.account_id;
        info!(
            "Starting {} sync for account {}",
            payload.sync_type, account_id
        );

        let account = match self.store.get_account(account_id) {
            Ok(Some(account)) if account.deleted_at.is_none() => account,
            Ok(_) => {
                warn!("Account {} not found", account_id);
                return Ok(());
            }
            Err(e) => {
                return Err(TaskError::Retryable(format!(
                    "failed to load account {}: {:#}",
                    account_id, e
                )));
            }
        };

        if !account.is_gmail() {
            warn!(
                "Account {} is not a Gmail account (provider {})",
                account_id,
                account.provider.as_str()
            );
            return Ok(());
        }

        if account.sync_status == SyncStatus::Paused {
            info!("Account {} sync is paused, skipping", account_id);
            return Ok(());
        }

        if account.is_token_expired() {
            info!(
                "Account {}: token expired, will refresh during sync",
                account_id
            );
        }

        let owner = format!(
            "{}-{}",
            self.owner_prefix,
            self.next_lease.fetch_add(1, Ordering::Relaxed)
        );
        let ttl = deadline.saturating_duration_since(Instant::now()) + LEASE_GRACE;
        match self.store.try_acquire_lease(account_id, &owner, ttl) {
            Ok(true) => {}
            Ok(false) => {
                info!("Account {} is already being synced, skipping", account_id);
                return Ok(());
            }
            Err(e) => {
                return Err(TaskError::Retryable(format!(
                    "failed to lease account {}: {:#}",
                    account_id, e
                )));
            }
        }

        let outcome = self.sync_leased(account, payload.sync_type, deadline);

        if let Err(e) = self.store.release_lease(account_id, &owner) {
            warn!("Account {}: failed to release lease: {:#}", account_id, e);
        }
        outcome
    }

    fn sync_leased(
        &self,
        account: Account,
        mode: SyncMode,
        deadline: Instant,
    ) -> Result<(), TaskError> {
        let account_id = account.id;

        let api = match self.connector.connect(&account) {
            Ok(api) => api,
            Err(e) if classify_auth(&e) == SyncErrorKind::TransientApi => {
                return Err(TaskError::Retryable(format!(
                    "account {}: {}",
                    account_id, e
                )));
            }
            Err(e) => {
                // Retrying cannot help until the account is re-authorized
                // or the encryption key is fixed
                match classify_auth(&e) {
                    SyncErrorKind::Configuration => {
                        error!("Account {}: stored credentials unreadable: {}", account_id, e)
                    }
                    _ => error!("Account {}: credentials unusable: {}", account_id, e),
                }
                let message = e.to_string();
                if let Err(store_err) =
                    self.store
                        .set_sync_status(account_id, SyncStatus::Error, Some(&message))
                {
                    warn!(
                        "Account {}: failed to record status: {:#}",
                        account_id, store_err
                    );
                }
                return Ok(());
            }
        };

        let service = SyncService::new(self.store.clone(), api, account, self.config.clone());
        let result = service.sync(mode, Some(deadline)).map_err(|e| {
            TaskError::Retryable(format!("account {} sync failed: {:#}", account_id, e))
        })?;

        if let Some(err) = result.fatal_error() {
            // Status already records the failure
            info!("Account {}: not retrying: {}", account_id, err);
            return Ok(());
        }
        if let Some(err) = result.transient_query_error() {
            return Err(TaskError::Retryable(format!(
                "account {}: {}",
                account_id, err
            )));
        }
        Ok(())
    }

    /// Enqueue a sync for every eligible account outside its cooldown
    pub fn handle_sync_all(&self, payload: &SyncAllPayload) -> Result<FanOutReport, TaskError> {
        let max_accounts = payload.effective_max_accounts();
        info!("Starting sync-all fan-out (max {} accounts)", max_accounts);

        let accounts = self
            .store
            .list_sync_eligible(max_accounts)
            .map_err(|e| TaskError::Retryable(format!("failed to list accounts: {:#}", e)))?;

        let mut report = FanOutReport {
            accounts_found: accounts.len(),
            ..FanOutReport::default()
        };
        let now = Utc::now();

        for account in &accounts {
            if let Cooldown::Wait(remaining) =
                check_cooldown(account.last_sync_at, self.config.cooldown, now)
            {
                debug!(
                    "Skipping account {} (in cooldown, {}s remaining)",
                    account.id,
                    remaining.as_secs()
                );
                report.in_cooldown += 1;
                continue;
            }

            let mode = if account.last_sync_at.is_none() {
                SyncMode::Initial
            } else {
                SyncMode::Incremental
            };

            match self.queue.enqueue(&Task::sync_account(account.id, mode)) {
                Ok(_) => report.enqueued += 1,
                Err(EnqueueError::Duplicate(key)) => {
                    debug!("Skipping account {}: {} already queued", account.id, key);
                    report.already_queued += 1;
                }
                Err(e) => {
                    error!("Failed to enqueue sync for account {}: {}", account.id, e);
                    report.errors += 1;
                }
            }
        }

        info!(
            "Sync-all fan-out completed: found={} enqueued={} cooldown={} queued={} errors={}",
            report.accounts_found,
            report.enqueued,
            report.in_cooldown,
            report.already_queued,
            report.errors
        );
        Ok(report)
    }
}

impl TaskHandler for SyncHandlers {
    fn handle(&self, task: &Task, deadline: Instant) -> Result<(), TaskError> {
        match task {
            Task::SyncAccount(payload) => self.handle_sync_account(payload, deadline),
            Task::SyncAll(payload) => self.handle_sync_all(payload).map(|_| ()),
        }
    }
}
