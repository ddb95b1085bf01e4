//! SQLite-based account and email storage

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use rusqlite_migration::{M, Migrations};

use super::traits::{AccountStore, EmailStore, SyncOutcome, TokenUpdate};
use crate::models::{Account, Attachment, Email, EmailAddress, SyncStatus};

/// Database migrations
///
/// Each migration is applied in order. The user_version pragma tracks which
/// migrations have been applied.
fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        // Migration 1: Initial schema
        M::up(
            r#"
            CREATE TABLE accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                provider_id TEXT,
                email TEXT NOT NULL,
                access_token TEXT NOT NULL,   -- ciphertext
                refresh_token TEXT NOT NULL,  -- ciphertext
                token_expiry TEXT NOT NULL,
                sync_status TEXT NOT NULL DEFAULT 'active',
                sync_error TEXT,
                last_sync_at TEXT,
                last_history_id TEXT,
                created_at TEXT NOT NULL,
                deleted_at TEXT
            );

            CREATE INDEX idx_accounts_eligible
                ON accounts(provider, sync_status, deleted_at);

            CREATE TABLE emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                account_id INTEGER NOT NULL,
                provider_message_id TEXT NOT NULL,
                thread_id TEXT,
                from_name TEXT,
                from_email TEXT NOT NULL,
                subject TEXT NOT NULL,
                body_text TEXT NOT NULL,
                body_html TEXT NOT NULL,
                snippet TEXT NOT NULL,
                received_at TEXT NOT NULL,
                sent_at TEXT,
                rfc822_message_id TEXT,
                is_read INTEGER NOT NULL DEFAULT 0,
                has_attachments INTEGER NOT NULL DEFAULT 0,
                attachments TEXT NOT NULL DEFAULT '[]',  -- JSON
                case_id TEXT,
                deleted_at TEXT,
                UNIQUE (account_id, provider_message_id),
                FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_emails_thread ON emails(account_id, thread_id);

            -- Recipients (normalized)
            CREATE TABLE email_recipients (
                email_id INTEGER NOT NULL,
                recipient_type TEXT NOT NULL,
                name TEXT,
                email TEXT NOT NULL,
                position INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (email_id, recipient_type, position),
                FOREIGN KEY (email_id) REFERENCES emails(id) ON DELETE CASCADE
            );

            -- Labels on emails (many-to-many)
            CREATE TABLE email_labels (
                email_id INTEGER NOT NULL,
                label_id TEXT NOT NULL,
                PRIMARY KEY (email_id, label_id),
                FOREIGN KEY (email_id) REFERENCES emails(id) ON DELETE CASCADE
            );

            CREATE INDEX idx_email_labels_label ON email_labels(label_id);
            "#,
        ),
        // Migration 2: Per-account sync lease
        M::up(
            r#"
            ALTER TABLE accounts ADD COLUMN lease_owner TEXT;
            ALTER TABLE accounts ADD COLUMN lease_expires_at INTEGER;  -- epoch millis
            "#,
        ),
    ])
}

const ACCOUNT_COLUMNS: &str = "id, user_id, provider, provider_id, email, access_token, \
     refresh_token, token_expiry, sync_status, sync_error, last_sync_at, last_history_id, \
     created_at, deleted_at";

const EMAIL_COLUMNS: &str = "id, account_id, provider_message_id, thread_id, from_name, \
     from_email, subject, body_text, body_html, snippet, received_at, sent_at, \
     rfc822_message_id, is_read, has_attachments, attachments, case_id, deleted_at";

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in database: {}", s))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

/// Raw account row before text columns are parsed
struct AccountRow {
    id: i64,
    user_id: String,
    provider: String,
    provider_id: Option<String>,
    email: String,
    access_token: String,
    refresh_token: String,
    token_expiry: String,
    sync_status: String,
    sync_error: Option<String>,
    last_sync_at: Option<String>,
    last_history_id: Option<String>,
    created_at: String,
    deleted_at: Option<String>,
}

impl AccountRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            provider: row.get(2)?,
            provider_id: row.get(3)?,
            email: row.get(4)?,
            access_token: row.get(5)?,
            refresh_token: row.get(6)?,
            token_expiry: row.get(7)?,
            sync_status: row.get(8)?,
            sync_error: row.get(9)?,
            last_sync_at: row.get(10)?,
            last_history_id: row.get(11)?,
            created_at: row.get(12)?,
            deleted_at: row.get(13)?,
        })
    }

    fn into_account(self) -> Result<Account> {
        Ok(Account {
            id: self.id,
            user_id: self.user_id,
            provider: self.provider.parse()?,
            provider_id: self.provider_id,
            email: self.email,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_expiry: parse_ts(&self.token_expiry)?,
            sync_status: self.sync_status.parse()?,
            sync_error: self.sync_error,
            last_sync_at: parse_opt_ts(self.last_sync_at)?,
            last_history_id: self.last_history_id,
            created_at: parse_ts(&self.created_at)?,
            deleted_at: parse_opt_ts(self.deleted_at)?,
        })
    }
}

/// Raw email row; recipients and labels are loaded separately
struct EmailRow {
    id: i64,
    account_id: i64,
    provider_message_id: String,
    thread_id: Option<String>,
    from_name: Option<String>,
    from_email: String,
    subject: String,
    body_text: String,
    body_html: String,
    snippet: String,
    received_at: String,
    sent_at: Option<String>,
    rfc822_message_id: Option<String>,
    is_read: bool,
    has_attachments: bool,
    attachments: String,
    case_id: Option<String>,
    deleted_at: Option<String>,
}

impl EmailRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            account_id: row.get(1)?,
            provider_message_id: row.get(2)?,
            thread_id: row.get(3)?,
            from_name: row.get(4)?,
            from_email: row.get(5)?,
            subject: row.get(6)?,
            body_text: row.get(7)?,
            body_html: row.get(8)?,
            snippet: row.get(9)?,
            received_at: row.get(10)?,
            sent_at: row.get(11)?,
            rfc822_message_id: row.get(12)?,
            is_read: row.get(13)?,
            has_attachments: row.get(14)?,
            attachments: row.get(15)?,
            case_id: row.get(16)?,
            deleted_at: row.get(17)?,
        })
    }
}

/// SQLite-based mail storage
///
/// Holds accounts and their mirrored emails. Deleting an account cascades
/// to its emails.
pub struct SqliteMailStore {
    conn: Mutex<Connection>,
}

impl SqliteMailStore {
    /// Open (or create) the database at `db_path` and run migrations
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        // WAL lets the scheduler read while workers write; foreign_keys is
        // required for ON DELETE CASCADE.
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -16000;
            PRAGMA temp_store = MEMORY;
            PRAGMA busy_timeout = 5000;
            PRAGMA foreign_keys = ON;
            "#,
        )?;

        migrations()
            .to_latest(&mut conn)
            .context("Failed to run database migrations")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Database connection lock poisoned"))
    }

    /// Hard-delete an account and, via cascade, all its emails
    pub fn delete_account(&self, account_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM accounts WHERE id = ?", [account_id])?;
        Ok(())
    }

    fn load_recipients(
        conn: &Connection,
        email_id: i64,
        recipient_type: &str,
    ) -> Result<Vec<EmailAddress>> {
        let mut stmt = conn.prepare(
            "SELECT name, email FROM email_recipients
             WHERE email_id = ? AND recipient_type = ?
             ORDER BY position",
        )?;

        let recipients = stmt
            .query_map(params![email_id, recipient_type], |row| {
                Ok(EmailAddress {
                    name: row.get(0)?,
                    email: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(recipients)
    }

    fn save_recipients(
        conn: &Connection,
        email_id: i64,
        recipient_type: &str,
        recipients: &[EmailAddress],
    ) -> Result<()> {
        let mut stmt = conn.prepare(
            "INSERT INTO email_recipients (email_id, recipient_type, name, email, position)
             VALUES (?, ?, ?, ?, ?)",
        )?;

        for (i, addr) in recipients.iter().enumerate() {
            stmt.execute(params![email_id, recipient_type, addr.name, addr.email, i as i64])?;
        }

        Ok(())
    }

    fn load_labels(conn: &Connection, email_id: i64) -> Result<Vec<String>> {
        let mut stmt =
            conn.prepare("SELECT label_id FROM email_labels WHERE email_id = ? ORDER BY rowid")?;

        let labels = stmt
            .query_map([email_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(labels)
    }

    fn save_labels(conn: &Connection, email_id: i64, labels: &[String]) -> Result<()> {
        let mut stmt = conn
            .prepare("INSERT OR IGNORE INTO email_labels (email_id, label_id) VALUES (?, ?)")?;

        for label in labels {
            stmt.execute(params![email_id, label])?;
        }

        Ok(())
    }

    fn hydrate_email(conn: &Connection, row: EmailRow) -> Result<Email> {
        let attachments: Vec<Attachment> = serde_json::from_str(&row.attachments)
            .context("Failed to decode attachments column")?;

        Ok(Email {
            id: row.id,
            account_id: row.account_id,
            provider_message_id: row.provider_message_id,
            thread_id: row.thread_id,
            from: EmailAddress {
                name: row.from_name,
                email: row.from_email,
            },
            to: Self::load_recipients(conn, row.id, "to")?,
            cc: Self::load_recipients(conn, row.id, "cc")?,
            bcc: Self::load_recipients(conn, row.id, "bcc")?,
            subject: row.subject,
            body_text: row.body_text,
            body_html: row.body_html,
            snippet: row.snippet,
            received_at: parse_ts(&row.received_at)?,
            sent_at: parse_opt_ts(row.sent_at)?,
            rfc822_message_id: row.rfc822_message_id,
            labels: Self::load_labels(conn, row.id)?,
            is_read: row.is_read,
            has_attachments: row.has_attachments,
            attachments,
            case_id: row.case_id,
            deleted_at: parse_opt_ts(row.deleted_at)?,
        })
    }
}

impl AccountStore for SqliteMailStore {
    fn insert_account(&self, account: &Account) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO accounts
             (user_id, provider, provider_id, email, access_token, refresh_token, token_expiry,
              sync_status, sync_error, last_sync_at, last_history_id, created_at, deleted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                account.user_id,
                account.provider.as_str(),
                account.provider_id,
                account.email,
                account.access_token,
                account.refresh_token,
                account.token_expiry.to_rfc3339(),
                account.sync_status.as_str(),
                account.sync_error,
                account.last_sync_at.map(|t| t.to_rfc3339()),
                account.last_history_id,
                account.created_at.to_rfc3339(),
                account.deleted_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_account(&self, id: i64) -> Result<Option<Account>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM accounts WHERE id = ?", ACCOUNT_COLUMNS),
                [id],
                AccountRow::from_row,
            )
            .optional()?;

        row.map(AccountRow::into_account).transpose()
    }

    fn list_sync_eligible(&self, limit: usize) -> Result<Vec<Account>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM accounts
             WHERE provider = 'google' AND sync_status != 'paused' AND deleted_at IS NULL
             ORDER BY id
             LIMIT ?",
            ACCOUNT_COLUMNS
        ))?;

        let rows = stmt
            .query_map([limit as i64], AccountRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(AccountRow::into_account).collect()
    }

    fn update_tokens(&self, account_id: i64, update: &TokenUpdate) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE accounts SET
                access_token = ?1,
                token_expiry = ?2,
                refresh_token = COALESCE(?3, refresh_token),
                sync_status = 'active',
                sync_error = NULL
             WHERE id = ?4",
            params![
                update.access_token,
                update.token_expiry.to_rfc3339(),
                update.refresh_token,
                account_id,
            ],
        )?;
        Ok(())
    }

    fn record_sync_outcome(&self, account_id: i64, outcome: &SyncOutcome) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE accounts SET
                last_sync_at = ?1,
                sync_status = ?2,
                sync_error = ?3,
                last_history_id = COALESCE(?4, last_history_id)
             WHERE id = ?5",
            params![
                outcome.synced_at.to_rfc3339(),
                outcome.status.as_str(),
                outcome.error,
                outcome.history_id,
                account_id,
            ],
        )?;
        Ok(())
    }

    fn set_sync_status(
        &self,
        account_id: i64,
        status: SyncStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE accounts SET sync_status = ?1, sync_error = ?2 WHERE id = ?3",
            params![status.as_str(), error, account_id],
        )?;
        Ok(())
    }

    fn soft_delete_account(&self, account_id: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE accounts SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
            params![Utc::now().to_rfc3339(), account_id],
        )?;
        Ok(())
    }

    fn try_acquire_lease(&self, account_id: i64, owner: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let expires_at = now + ttl.as_millis() as i64;

        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE accounts SET lease_owner = ?1, lease_expires_at = ?2
             WHERE id = ?3
               AND (lease_owner IS NULL OR lease_owner = ?1 OR lease_expires_at <= ?4)",
            params![owner, expires_at, account_id, now],
        )?;
        Ok(updated == 1)
    }

    fn release_lease(&self, account_id: i64, owner: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE accounts SET lease_owner = NULL, lease_expires_at = NULL
             WHERE id = ?1 AND lease_owner = ?2",
            params![account_id, owner],
        )?;
        Ok(())
    }
}

impl EmailStore for SqliteMailStore {
    fn email_exists(&self, account_id: i64, provider_message_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM emails WHERE account_id = ? AND provider_message_id = ?",
            params![account_id, provider_message_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn insert_email(&self, email: &Email) -> Result<Option<i64>> {
        let attachments =
            serde_json::to_string(&email.attachments).context("Failed to encode attachments")?;

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        // DO NOTHING keeps the first copy; the row id tells us whether we wrote
        let inserted = tx.execute(
            "INSERT INTO emails
             (account_id, provider_message_id, thread_id, from_name, from_email, subject,
              body_text, body_html, snippet, received_at, sent_at, rfc822_message_id,
              is_read, has_attachments, attachments, case_id, deleted_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(account_id, provider_message_id) DO NOTHING",
            params![
                email.account_id,
                email.provider_message_id,
                email.thread_id,
                email.from.name,
                email.from.email,
                email.subject,
                email.body_text,
                email.body_html,
                email.snippet,
                email.received_at.to_rfc3339(),
                email.sent_at.map(|t| t.to_rfc3339()),
                email.rfc822_message_id,
                email.is_read,
                email.has_attachments,
                attachments,
                email.case_id,
                email.deleted_at.map(|t| t.to_rfc3339()),
            ],
        )?;

        if inserted == 0 {
            return Ok(None);
        }

        let id = tx.last_insert_rowid();
        Self::save_recipients(&tx, id, "to", &email.to)?;
        Self::save_recipients(&tx, id, "cc", &email.cc)?;
        Self::save_recipients(&tx, id, "bcc", &email.bcc)?;
        Self::save_labels(&tx, id, &email.labels)?;

        tx.commit()?;
        Ok(Some(id))
    }

    fn get_email(&self, account_id: i64, provider_message_id: &str) -> Result<Option<Email>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM emails WHERE account_id = ? AND provider_message_id = ?",
                    EMAIL_COLUMNS
                ),
                params![account_id, provider_message_id],
                EmailRow::from_row,
            )
            .optional()?;

        row.map(|row| Self::hydrate_email(&conn, row)).transpose()
    }

    fn update_email_labels(
        &self,
        account_id: i64,
        provider_message_id: &str,
        labels: &[String],
        is_read: bool,
    ) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let id: Option<i64> = tx
            .query_row(
                "SELECT id FROM emails WHERE account_id = ? AND provider_message_id = ?",
                params![account_id, provider_message_id],
                |row| row.get(0),
            )
            .optional()?;

        let Some(id) = id else {
            return Ok(false);
        };

        tx.execute("UPDATE emails SET is_read = ? WHERE id = ?", params![is_read, id])?;
        tx.execute("DELETE FROM email_labels WHERE email_id = ?", [id])?;
        Self::save_labels(&tx, id, labels)?;

        tx.commit()?;
        Ok(true)
    }

    fn soft_delete_email(&self, account_id: i64, provider_message_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE emails SET deleted_at = ?1
             WHERE account_id = ?2 AND provider_message_id = ?3 AND deleted_at IS NULL",
            params![Utc::now().to_rfc3339(), account_id, provider_message_id],
        )?;
        Ok(updated > 0)
    }

    fn find_thread_case(&self, account_id: i64, thread_id: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        let case_id = conn
            .query_row(
                "SELECT case_id FROM emails
                 WHERE account_id = ? AND thread_id = ? AND case_id IS NOT NULL
                   AND deleted_at IS NULL
                 ORDER BY received_at ASC
                 LIMIT 1",
                params![account_id, thread_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(case_id)
    }

    fn set_email_case(&self, email_id: i64, case_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE emails SET case_id = ? WHERE id = ?",
            params![case_id, email_id],
        )?;
        Ok(())
    }

    fn count_emails(&self, account_id: i64) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM emails WHERE account_id = ? AND deleted_at IS NULL",
            [account_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn count_unread(&self, account_id: i64) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM emails
             WHERE account_id = ? AND deleted_at IS NULL AND is_read = 0",
            [account_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn list_label_sets(&self, account_id: i64) -> Result<Vec<Vec<String>>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM emails WHERE account_id = ? AND deleted_at IS NULL ORDER BY id",
        )?;
        let ids = stmt
            .query_map([account_id], |row| row.get::<_, i64>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        ids.into_iter()
            .map(|id| Self::load_labels(&conn, id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Provider, label};
    use tempfile::tempdir;

    fn create_test_store() -> (SqliteMailStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        // Use .test.sqlite extension to clearly distinguish from production databases
        let db_path = dir.path().join("mail.test.sqlite");
        let store = SqliteMailStore::new(&db_path).unwrap();
        (store, dir)
    }

    fn insert_test_account(store: &SqliteMailStore) -> i64 {
        let account = Account::new("user-1", "me@example.com").with_tokens(
            "enc-access",
            "enc-refresh",
            Utc::now(),
        );
        store.insert_account(&account).unwrap()
    }

    fn make_test_email(account_id: i64, id: &str, labels: &[&str]) -> Email {
        Email::builder(account_id, id)
            .thread_id(format!("t-{}", id))
            .from(EmailAddress::with_name("Alice", "alice@example.com"))
            .to(vec![EmailAddress::new("me@example.com")])
            .cc(vec![EmailAddress::new("cc@example.com")])
            .subject("Hello")
            .body_text("Hi there")
            .labels(labels.iter().map(|s| s.to_string()).collect())
            .build()
    }

    #[test]
    fn test_account_crud() {
        let (store, _dir) = create_test_store();
        let id = insert_test_account(&store);

        let account = store.get_account(id).unwrap().unwrap();
        assert_eq!(account.email, "me@example.com");
        assert_eq!(account.access_token, "enc-access");
        assert_eq!(account.provider, Provider::Google);
        assert_eq!(account.sync_status, SyncStatus::Active);

        assert!(store.get_account(id + 100).unwrap().is_none());
    }

    #[test]
    fn test_list_sync_eligible() {
        let (store, _dir) = create_test_store();
        let active = insert_test_account(&store);
        let paused = insert_test_account(&store);
        let deleted = insert_test_account(&store);
        let errored = insert_test_account(&store);
        let outlook = store
            .insert_account(&Account::new("u", "o@example.com").with_provider(Provider::Outlook))
            .unwrap();

        store.set_sync_status(paused, SyncStatus::Paused, None).unwrap();
        store.soft_delete_account(deleted).unwrap();
        store
            .set_sync_status(errored, SyncStatus::Error, Some("status 503"))
            .unwrap();

        let eligible: Vec<i64> = store
            .list_sync_eligible(100)
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(eligible, vec![active, errored]);
        assert!(!eligible.contains(&outlook));

        assert!(store.list_sync_eligible(0).unwrap().is_empty());
    }

    #[test]
    fn test_update_tokens_is_field_scoped() {
        let (store, _dir) = create_test_store();
        let id = insert_test_account(&store);

        let synced_at = Utc::now();
        store
            .record_sync_outcome(
                id,
                &SyncOutcome {
                    synced_at,
                    status: SyncStatus::Error,
                    error: Some("boom".into()),
                    history_id: Some("42".into()),
                },
            )
            .unwrap();

        let expiry = Utc::now() + chrono::Duration::hours(1);
        store
            .update_tokens(
                id,
                &TokenUpdate {
                    access_token: "enc-new".into(),
                    token_expiry: expiry,
                    refresh_token: None,
                },
            )
            .unwrap();

        let account = store.get_account(id).unwrap().unwrap();
        assert_eq!(account.access_token, "enc-new");
        assert_eq!(account.refresh_token, "enc-refresh");
        assert_eq!(account.token_expiry.timestamp(), expiry.timestamp());
        assert_eq!(account.sync_status, SyncStatus::Active);
        assert!(account.sync_error.is_none());
        // Sync bookkeeping untouched
        assert_eq!(account.last_history_id.as_deref(), Some("42"));
        assert_eq!(
            account.last_sync_at.map(|t| t.timestamp()),
            Some(synced_at.timestamp())
        );
    }

    #[test]
    fn test_record_outcome_keeps_cursor_when_none() {
        let (store, _dir) = create_test_store();
        let id = insert_test_account(&store);

        let mut outcome = SyncOutcome {
            synced_at: Utc::now(),
            status: SyncStatus::Active,
            error: None,
            history_id: Some("100".into()),
        };
        store.record_sync_outcome(id, &outcome).unwrap();

        outcome.history_id = None;
        store.record_sync_outcome(id, &outcome).unwrap();

        let account = store.get_account(id).unwrap().unwrap();
        assert_eq!(account.last_history_id.as_deref(), Some("100"));
    }

    #[test]
    fn test_email_insert_and_get() {
        let (store, _dir) = create_test_store();
        let account_id = insert_test_account(&store);

        let email = make_test_email(account_id, "m1", &[label::INBOX, label::UNREAD]);
        let id = store.insert_email(&email).unwrap();
        assert!(id.is_some());

        let loaded = store.get_email(account_id, "m1").unwrap().unwrap();
        assert_eq!(loaded.subject, "Hello");
        assert_eq!(loaded.from.name.as_deref(), Some("Alice"));
        assert_eq!(loaded.to.len(), 1);
        assert_eq!(loaded.cc[0].email, "cc@example.com");
        assert_eq!(loaded.labels, vec!["INBOX", "UNREAD"]);
        assert!(!loaded.is_read);
    }

    #[test]
    fn test_duplicate_insert_is_rejected() {
        let (store, _dir) = create_test_store();
        let account_id = insert_test_account(&store);

        let email = make_test_email(account_id, "m1", &[label::INBOX]);
        assert!(store.insert_email(&email).unwrap().is_some());
        assert!(store.insert_email(&email).unwrap().is_none());
        assert_eq!(store.count_emails(account_id).unwrap(), 1);
    }

    #[test]
    fn test_update_labels() {
        let (store, _dir) = create_test_store();
        let account_id = insert_test_account(&store);
        store
            .insert_email(&make_test_email(account_id, "m1", &[label::INBOX, label::UNREAD]))
            .unwrap();

        let updated = store
            .update_email_labels(account_id, "m1", &[label::INBOX.to_string()], true)
            .unwrap();
        assert!(updated);

        let loaded = store.get_email(account_id, "m1").unwrap().unwrap();
        assert_eq!(loaded.labels, vec!["INBOX"]);
        assert!(loaded.is_read);

        assert!(!store.update_email_labels(account_id, "missing", &[], true).unwrap());
    }

    #[test]
    fn test_soft_delete_keeps_row_for_dedup() {
        let (store, _dir) = create_test_store();
        let account_id = insert_test_account(&store);
        store
            .insert_email(&make_test_email(account_id, "m1", &[label::INBOX]))
            .unwrap();

        assert!(store.soft_delete_email(account_id, "m1").unwrap());
        assert!(!store.soft_delete_email(account_id, "m1").unwrap());

        assert!(store.email_exists(account_id, "m1").unwrap());
        assert_eq!(store.count_emails(account_id).unwrap(), 0);
    }

    #[test]
    fn test_soft_delete_is_scoped_to_account() {
        let (store, _dir) = create_test_store();
        let a = insert_test_account(&store);
        let b = insert_test_account(&store);
        store.insert_email(&make_test_email(a, "m1", &[])).unwrap();
        store.insert_email(&make_test_email(b, "m1", &[])).unwrap();

        store.soft_delete_email(a, "m1").unwrap();
        assert_eq!(store.count_emails(a).unwrap(), 0);
        assert_eq!(store.count_emails(b).unwrap(), 1);
    }

    #[test]
    fn test_thread_case_lookup() {
        let (store, _dir) = create_test_store();
        let account_id = insert_test_account(&store);

        let first = Email::builder(account_id, "m1")
            .thread_id("t1")
            .case_id("case-9")
            .build();
        store.insert_email(&first).unwrap();

        assert_eq!(
            store.find_thread_case(account_id, "t1").unwrap().as_deref(),
            Some("case-9")
        );
        assert!(store.find_thread_case(account_id, "t2").unwrap().is_none());

        let reply_id = store
            .insert_email(&Email::builder(account_id, "m2").thread_id("t1").build())
            .unwrap()
            .unwrap();
        store.set_email_case(reply_id, "case-9").unwrap();
        let reply = store.get_email(account_id, "m2").unwrap().unwrap();
        assert_eq!(reply.case_id.as_deref(), Some("case-9"));
    }

    #[test]
    fn test_counts_and_label_sets() {
        let (store, _dir) = create_test_store();
        let account_id = insert_test_account(&store);
        store
            .insert_email(&make_test_email(account_id, "m1", &[label::INBOX, label::UNREAD]))
            .unwrap();
        store
            .insert_email(&make_test_email(account_id, "m2", &[label::INBOX, label::STARRED]))
            .unwrap();
        store
            .insert_email(&make_test_email(account_id, "m3", &[label::UNREAD]))
            .unwrap();
        store.soft_delete_email(account_id, "m3").unwrap();

        assert_eq!(store.count_emails(account_id).unwrap(), 2);
        assert_eq!(store.count_unread(account_id).unwrap(), 1);

        let sets = store.list_label_sets(account_id).unwrap();
        assert_eq!(sets.len(), 2);
        assert!(sets[1].contains(&label::STARRED.to_string()));
    }

    #[test]
    fn test_account_delete_cascades() {
        let (store, _dir) = create_test_store();
        let account_id = insert_test_account(&store);
        store
            .insert_email(&make_test_email(account_id, "m1", &[label::INBOX]))
            .unwrap();

        store.delete_account(account_id).unwrap();
        assert!(!store.email_exists(account_id, "m1").unwrap());
    }

    #[test]
    fn test_lease_exclusive() {
        let (store, _dir) = create_test_store();
        let id = insert_test_account(&store);
        let ttl = Duration::from_secs(60);

        assert!(store.try_acquire_lease(id, "worker-a", ttl).unwrap());
        assert!(!store.try_acquire_lease(id, "worker-b", ttl).unwrap());
        // Re-entrant for the holder
        assert!(store.try_acquire_lease(id, "worker-a", ttl).unwrap());

        // Only the holder can release
        store.release_lease(id, "worker-b").unwrap();
        assert!(!store.try_acquire_lease(id, "worker-b", ttl).unwrap());

        store.release_lease(id, "worker-a").unwrap();
        assert!(store.try_acquire_lease(id, "worker-b", ttl).unwrap());
    }

    #[test]
    fn test_expired_lease_can_be_taken() {
        let (store, _dir) = create_test_store();
        let id = insert_test_account(&store);

        assert!(store.try_acquire_lease(id, "worker-a", Duration::ZERO).unwrap());
        assert!(store
            .try_acquire_lease(id, "worker-b", Duration::from_secs(60))
            .unwrap());
    }

    #[test]
    fn test_reopen_existing_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("mail.test.sqlite");
        let id = {
            let store = SqliteMailStore::new(&db_path).unwrap();
            insert_test_account(&store)
        };

        let store = SqliteMailStore::new(&db_path).unwrap();
        assert!(store.get_account(id).unwrap().is_some());
    }
}
