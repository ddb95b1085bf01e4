//! Sync passes for a single account
//!
//! Every pass is idempotent: ids already stored are only refreshed (labels and
//! read state), never re-inserted. Per-message failures are recorded on the
//! result and the pass moves on.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{TimeDelta, Utc};
use log::{debug, info, warn};

use super::result::{SyncError, SyncMode, SyncResult, classify_provider};
use super::stats::MailboxStats;
use super::timing::{Cooldown, check_cooldown};
use crate::config::SyncConfig;
use crate::gmail::api::GmailMessage;
use crate::gmail::query::{self, IN_INBOX, IN_SENT};
use crate::gmail::{ListMessagesOptions, MailApi, ProviderError, normalize_message};
use crate::models::{Account, Direction, SyncStatus, label};
use crate::storage::{MailStore, SyncOutcome};

/// Errors logged individually at the end of a pass
const MAX_LOGGED_ERRORS: usize = 5;

/// Whether the pass keeps going after a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// What happened to one message id
enum ItemOutcome {
    Inserted,
    Updated,
    /// Raced with another writer; nothing changed
    Unchanged,
}

/// Runs sync passes for one account
pub struct SyncService {
    store: Arc<dyn MailStore>,
    api: Arc<dyn MailApi>,
    account: Account,
    config: SyncConfig,
}

impl SyncService {
    pub fn new(
        store: Arc<dyn MailStore>,
        api: Arc<dyn MailApi>,
        account: Account,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            api,
            account,
            config,
        }
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Run the pass for `mode`
    pub fn sync(&self, mode: SyncMode, deadline: Option<Instant>) -> Result<SyncResult> {
        match mode {
            SyncMode::Initial => self.initial_sync(deadline),
            SyncMode::Incremental => self.incremental_sync(deadline),
            SyncMode::History => self.history_sync(deadline),
        }
    }

    /// Bounded pull of recent inbox and sent mail
    pub fn initial_sync(&self, deadline: Option<Instant>) -> Result<SyncResult> {
        let days = self.config.initial_sync_days;
        let cap = Some(self.config.max_initial_emails);
        let queries = [
            query::newer_than(IN_INBOX, days),
            query::newer_than(IN_SENT, days),
        ];

        let mut pass = Pass::new(self, SyncMode::Initial, deadline);
        pass.run_queries(&queries, cap);
        self.capture_profile_cursor(&mut pass.result);
        self.finish(pass.result)
    }

    /// Inbox and sent mail since shortly before the last sync
    ///
    /// Without a previous sync the window falls back to `fallback_days`.
    pub fn incremental_sync(&self, deadline: Option<Instant>) -> Result<SyncResult> {
        let queries = [self.incremental_query(IN_INBOX), self.incremental_query(IN_SENT)];

        let mut pass = Pass::new(self, SyncMode::Incremental, deadline);
        pass.run_queries(&queries, None);
        self.capture_profile_cursor(&mut pass.result);
        self.finish(pass.result)
    }

    /// Apply the provider change log since the stored cursor
    ///
    /// Falls back to [`incremental_sync`](Self::incremental_sync) when there
    /// is no usable cursor or the provider no longer has it.
    pub fn history_sync(&self, deadline: Option<Instant>) -> Result<SyncResult> {
        let Some(cursor) = self
            .account
            .last_history_id
            .as_deref()
            .filter(|c| !c.is_empty())
        else {
            debug!("Account {}: no history cursor, running incremental sync", self.account.id);
            return self.incremental_sync(deadline);
        };

        if cursor.parse::<u64>().is_err() {
            warn!(
                "Account {}: invalid history cursor {:?}, running incremental sync",
                self.account.id, cursor
            );
            return self.incremental_sync(deadline);
        }

        let page = match self.api.get_history(cursor) {
            Ok(page) => page,
            Err(ProviderError::HistoryExpired) => {
                info!(
                    "Account {}: history cursor {} expired, running incremental sync",
                    self.account.id, cursor
                );
                return self.incremental_sync(deadline);
            }
            Err(e) => {
                let mut result = SyncResult::new(SyncMode::History);
                result.errors.push(SyncError::query(
                    classify_provider(&e),
                    format!("failed to get history: {}", e),
                ));
                return self.finish(result);
            }
        };

        let mut fetch: Vec<String> = Vec::new();
        let mut fetch_seen: HashSet<String> = HashSet::new();
        let mut deleted: Vec<String> = Vec::new();

        for record in &page.records {
            let changed = record
                .messages_added
                .iter()
                .flatten()
                .map(|m| &m.message.id)
                .chain(record.labels_added.iter().flatten().map(|c| &c.message.id))
                .chain(record.labels_removed.iter().flatten().map(|c| &c.message.id));
            for id in changed {
                if fetch_seen.insert(id.clone()) {
                    fetch.push(id.clone());
                }
            }
            for removed in record.messages_deleted.iter().flatten() {
                deleted.push(removed.message.id.clone());
            }
        }

        let mut pass = Pass::new(self, SyncMode::History, deadline);

        let deleted_set: HashSet<&str> = deleted.iter().map(String::as_str).collect();
        fetch.retain(|id| !deleted_set.contains(id.as_str()));

        for id in &deleted {
            match self.store.soft_delete_email(self.account.id, id) {
                Ok(true) => pass.result.deleted_emails += 1,
                Ok(false) => {}
                Err(e) => pass
                    .result
                    .errors
                    .push(SyncError::persistence(id, "delete", &e)),
            }
        }

        pass.process_ids(fetch);

        if pass.result.is_clean() {
            pass.result.last_history_id = page.history_id;
        }
        self.finish(pass.result)
    }

    /// Pull messages carrying any of `labels` from the last `max_days` days
    ///
    /// Only inserts messages not stored yet; existing rows are left alone.
    pub fn sync_labels(
        &self,
        labels: &[String],
        max_days: u32,
        deadline: Option<Instant>,
    ) -> Result<SyncResult> {
        let mut opts = ListMessagesOptions::query(format!("newer_than:{}d", max_days));
        opts.labels = labels.to_vec();

        let mut pass = Pass::new(self, SyncMode::Incremental, deadline);
        pass.insert_only = true;
        pass.run_listing(opts, None);
        self.finish(pass.result)
    }

    /// Re-pull labels and read state of one stored message
    ///
    /// Returns false when the message is not stored for this account.
    pub fn refresh_email(&self, provider_message_id: &str) -> Result<bool> {
        if self
            .store
            .get_email(self.account.id, provider_message_id)?
            .is_none()
        {
            return Ok(false);
        }

        let msg = self
            .api
            .get_message(provider_message_id)
            .with_context(|| format!("Failed to get message {} from Gmail", provider_message_id))?;

        let labels = msg.label_ids.unwrap_or_default();
        let is_read = !label::has_label(&labels, label::UNREAD);
        self.store
            .update_email_labels(self.account.id, provider_message_id, &labels, is_read)
    }

    pub fn can_sync(&self, cooldown: std::time::Duration) -> Cooldown {
        check_cooldown(self.account.last_sync_at, cooldown, Utc::now())
    }

    pub fn stats(&self) -> Result<MailboxStats> {
        let account_id = self.account.id;
        let total = self.store.count_emails(account_id)?;
        let unread = self.store.count_unread(account_id)?;
        let label_sets = self.store.list_label_sets(account_id)?;
        Ok(MailboxStats::from_label_sets(total, unread, &label_sets))
    }

    fn incremental_query(&self, scope: &str) -> String {
        match self.account.last_sync_at {
            Some(last) => {
                let overlap =
                    TimeDelta::from_std(self.config.overlap).unwrap_or(TimeDelta::minutes(1));
                query::after_instant(scope, last - overlap)
            }
            None => query::newer_than(scope, self.config.fallback_days),
        }
    }

    /// Take the mailbox's current history id as the next cursor
    ///
    /// Only after a clean pass, so ids skipped by an error or the deadline
    /// are picked up again by the next listing-based pass.
    fn capture_profile_cursor(&self, result: &mut SyncResult) {
        if !result.is_clean() {
            return;
        }
        match self.api.get_profile() {
            Ok(profile) => result.last_history_id = profile.history_id,
            Err(e) => debug!(
                "Account {}: could not read profile history id: {}",
                self.account.id, e
            ),
        }
    }

    /// Record the pass on the account and log a summary
    fn finish(&self, mut result: SyncResult) -> Result<SyncResult> {
        let now = Utc::now();
        result.synced_at = now;

        let outcome = SyncOutcome {
            synced_at: now,
            status: if result.has_errors() {
                SyncStatus::Error
            } else {
                SyncStatus::Active
            },
            error: result.first_error().map(|e| e.message.clone()),
            history_id: result.last_history_id.clone(),
        };
        self.store
            .record_sync_outcome(self.account.id, &outcome)
            .context("Failed to record sync outcome")?;

        info!(
            "Account {} {} sync: fetched={} new={} updated={} deleted={} errors={}{}",
            self.account.id,
            result.mode,
            result.total_fetched,
            result.new_emails,
            result.updated_emails,
            result.deleted_emails,
            result.errors.len(),
            if result.interrupted { " (interrupted)" } else { "" }
        );
        for err in result.errors.iter().take(MAX_LOGGED_ERRORS) {
            warn!("Account {}: sync error: {}", self.account.id, err);
        }

        Ok(result)
    }
}

/// Mutable state of one pass
struct Pass<'a> {
    service: &'a SyncService,
    deadline: Option<Instant>,
    result: SyncResult,
    /// Ids already handled in this pass
    seen: HashSet<String>,
    insert_only: bool,
    stopped: bool,
}

impl<'a> Pass<'a> {
    fn new(service: &'a SyncService, mode: SyncMode, deadline: Option<Instant>) -> Self {
        Self {
            service,
            deadline,
            result: SyncResult::new(mode),
            seen: HashSet::new(),
            insert_only: false,
            stopped: false,
        }
    }

    fn account_id(&self) -> i64 {
        self.service.account.id
    }

    /// Run each query in order; a failed listing does not stop the next one
    fn run_queries(&mut self, queries: &[String], cap: Option<usize>) {
        for q in queries {
            if self.stopped {
                break;
            }
            self.run_listing(ListMessagesOptions::query(q.as_str()), cap);
        }
    }

    fn run_listing(&mut self, mut opts: ListMessagesOptions, cap: Option<usize>) {
        opts.max_results = self.service.config.page_size.clamp(1, 500) as u32;
        let ids = match self.list_ids(opts, cap) {
            Ok(ids) => ids,
            Err(err) => {
                if err.is_fatal() {
                    self.stopped = true;
                }
                self.result.errors.push(err);
                return;
            }
        };
        self.process_ids(ids);
    }

    /// Page through a listing collecting distinct ids, up to `cap`
    fn list_ids(
        &mut self,
        mut opts: ListMessagesOptions,
        cap: Option<usize>,
    ) -> Result<Vec<String>, SyncError> {
        let mut ids = Vec::new();
        let mut listed: HashSet<String> = HashSet::new();

        loop {
            let page = self.service.api.list_messages(&opts).map_err(|e| {
                SyncError::query(
                    classify_provider(&e),
                    format!("failed to list messages ({}): {}", opts.query, e),
                )
            })?;

            for msg in page.messages {
                if cap.is_some_and(|c| ids.len() >= c) {
                    break;
                }
                if listed.insert(msg.id.clone()) {
                    ids.push(msg.id);
                }
            }

            let capped = cap.is_some_and(|c| ids.len() >= c);
            match page.next_page_token {
                Some(token) if !token.is_empty() && !capped => opts.page_token = Some(token),
                _ => break,
            }
        }

        debug!(
            "Account {}: listed {} ids for {:?}",
            self.account_id(),
            ids.len(),
            opts.query
        );
        Ok(ids)
    }

    /// Handle ids in batches, honoring the deadline between items
    fn process_ids(&mut self, ids: Vec<String>) {
        let ids: Vec<String> = ids
            .into_iter()
            .filter(|id| self.seen.insert(id.clone()))
            .collect();
        self.result.total_fetched += ids.len();

        let batch_size = self.service.config.batch_size.max(1);
        for batch in ids.chunks(batch_size) {
            for id in batch {
                if self.deadline.is_some_and(|d| Instant::now() >= d) {
                    self.result.interrupted = true;
                    self.stopped = true;
                    return;
                }
                if self.process_one(id) == Flow::Stop {
                    self.stopped = true;
                    return;
                }
            }
        }
    }

    fn process_one(&mut self, id: &str) -> Flow {
        match self.sync_message(id) {
            Ok(ItemOutcome::Inserted) => self.result.new_emails += 1,
            Ok(ItemOutcome::Updated) => self.result.updated_emails += 1,
            Ok(ItemOutcome::Unchanged) => {}
            Err(err) => {
                // Every remaining id would fail the same way
                let stop = err.is_fatal();
                self.result.errors.push(err);
                if stop {
                    return Flow::Stop;
                }
            }
        }
        Flow::Continue
    }

    fn sync_message(&self, id: &str) -> Result<ItemOutcome, SyncError> {
        let store = &self.service.store;
        let exists = store
            .email_exists(self.account_id(), id)
            .map_err(|e| SyncError::persistence(id, "look up", &e))?;

        if exists && self.insert_only {
            return Ok(ItemOutcome::Unchanged);
        }

        let msg = self
            .service
            .api
            .get_message(id)
            .map_err(|e| SyncError::from_provider_item(id, &e))?;

        if exists {
            self.update_labels(id, msg)
        } else {
            self.insert(id, msg)
        }
    }

    fn update_labels(&self, id: &str, msg: GmailMessage) -> Result<ItemOutcome, SyncError> {
        let labels = msg.label_ids.unwrap_or_default();
        let is_read = !label::has_label(&labels, label::UNREAD);
        self.service
            .store
            .update_email_labels(self.account_id(), id, &labels, is_read)
            .map_err(|e| SyncError::persistence(id, "update", &e))?;
        Ok(ItemOutcome::Updated)
    }

    fn insert(&self, id: &str, msg: GmailMessage) -> Result<ItemOutcome, SyncError> {
        let email = normalize_message(msg, self.account_id());
        let row_id = self
            .service
            .store
            .insert_email(&email)
            .map_err(|e| SyncError::persistence(id, "save", &e))?;

        let Some(row_id) = row_id else {
            return Ok(ItemOutcome::Unchanged);
        };

        if email.direction() == Direction::Outgoing
            && let Some(thread_id) = email.thread_id.as_deref()
        {
            self.link_thread_case(row_id, id, thread_id);
        }
        Ok(ItemOutcome::Inserted)
    }

    /// Copy a case link from the thread onto a newly stored sent message
    fn link_thread_case(&self, row_id: i64, id: &str, thread_id: &str) {
        let store = &self.service.store;
        let case_id = match store.find_thread_case(self.account_id(), thread_id) {
            Ok(Some(case_id)) => case_id,
            Ok(None) => return,
            Err(e) => {
                warn!("Message {}: thread case lookup failed: {:#}", id, e);
                return;
            }
        };
        if let Err(e) = store.set_email_case(row_id, &case_id) {
            warn!("Message {}: failed to link case {}: {:#}", id, case_id, e);
        }
    }
}
