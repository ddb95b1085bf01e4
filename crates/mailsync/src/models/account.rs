//! Account model representing a linked mailbox

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// OAuth provider backing an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Outlook,
    Apple,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Outlook => "outlook",
            Provider::Apple => "apple",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Provider::Google),
            "outlook" => Ok(Provider::Outlook),
            "apple" => Ok(Provider::Apple),
            other => anyhow::bail!("Unknown provider: {}", other),
        }
    }
}

/// Advisory sync status of an account
///
/// Overwritten wholesale at the end of every sync pass. `Error` never blocks
/// a manually triggered pass; scheduled sync only picks up `Active` accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Active,
    Paused,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Active => "active",
            SyncStatus::Paused => "paused",
            SyncStatus::Error => "error",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SyncStatus::Active),
            "paused" => Ok(SyncStatus::Paused),
            "error" => Ok(SyncStatus::Error),
            other => anyhow::bail!("Unknown sync status: {}", other),
        }
    }
}

/// A linked mailbox with its (encrypted) OAuth credentials and sync state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Unique integer identifier (database primary key)
    pub id: i64,
    /// Owning identity (user) reference
    pub user_id: String,
    pub provider: Provider,
    /// Subject id issued by the provider
    pub provider_id: Option<String>,
    /// Mailbox email address
    pub email: String,
    /// Encrypted access token (ciphertext, never plaintext)
    #[serde(skip_serializing, default)]
    pub access_token: String,
    /// Encrypted refresh token (ciphertext, never plaintext)
    #[serde(skip_serializing, default)]
    pub refresh_token: String,
    pub token_expiry: DateTime<Utc>,
    pub sync_status: SyncStatus,
    pub sync_error: Option<String>,
    /// When the last sync pass finished
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Provider change-log cursor (Gmail historyId)
    pub last_history_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Soft-delete marker
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Account {
    /// Create a new Google account (id will be assigned by database)
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: 0,
            user_id: user_id.into(),
            provider: Provider::Google,
            provider_id: None,
            email: email.into(),
            access_token: String::new(),
            refresh_token: String::new(),
            token_expiry: Utc::now(),
            sync_status: SyncStatus::Active,
            sync_error: None,
            last_sync_at: None,
            last_history_id: None,
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    /// Set the encrypted tokens and their expiry
    pub fn with_tokens(
        mut self,
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expiry: DateTime<Utc>,
    ) -> Self {
        self.access_token = access_token.into();
        self.refresh_token = refresh_token.into();
        self.token_expiry = expiry;
        self
    }

    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_status(mut self, status: SyncStatus) -> Self {
        self.sync_status = status;
        self
    }

    pub fn with_last_sync_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_sync_at = Some(at);
        self
    }

    pub fn with_history_id(mut self, history_id: impl Into<String>) -> Self {
        self.last_history_id = Some(history_id.into());
        self
    }

    pub fn is_gmail(&self) -> bool {
        self.provider == Provider::Google
    }

    pub fn is_token_expired(&self) -> bool {
        Utc::now() > self.token_expiry
    }

    /// Whether background sync should pick this account up
    ///
    /// Only a paused account is skipped. An account in `error` keeps being
    /// retried so a transient failure does not disable it for good. Token
    /// expiry is not part of this check: the pass refreshes it.
    pub fn is_sync_eligible(&self) -> bool {
        self.is_gmail() && self.sync_status != SyncStatus::Paused && self.deleted_at.is_none()
    }
}
