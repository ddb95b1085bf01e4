//! Outcome of a sync pass and its typed errors

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gmail::ProviderError;
use crate::oauth::AuthError;

/// Which pass ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Initial,
    Incremental,
    History,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Initial => "initial",
            SyncMode::Incremental => "incremental",
            SyncMode::History => "history",
        }
    }

    /// Parse a task payload value; unknown values map to incremental
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "initial" => SyncMode::Initial,
            "history" => SyncMode::History,
            _ => SyncMode::Incremental,
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncErrorKind {
    /// Network, rate limit or unexpected provider response; retry later
    TransientApi,
    /// Credentials rejected; needs re-authorization
    Auth,
    /// A message could not be decoded
    Parse,
    /// Local store write or read failed
    Persistence,
    /// Stored credentials cannot be read with the configured key
    Configuration,
}

/// What a failure invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorScope {
    /// One message id
    Item,
    /// A whole listing (inbox, sent, or the change log)
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncError {
    pub kind: SyncErrorKind,
    pub scope: ErrorScope,
    pub message_id: Option<String>,
    pub message: String,
}

impl SyncError {
    pub fn item(kind: SyncErrorKind, message_id: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            scope: ErrorScope::Item,
            message_id: Some(message_id.to_string()),
            message: message.into(),
        }
    }

    pub fn query(kind: SyncErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            scope: ErrorScope::Query,
            message_id: None,
            message: message.into(),
        }
    }

    /// Failure fetching one message
    pub fn from_provider_item(message_id: &str, err: &ProviderError) -> Self {
        Self::item(
            classify_provider(err),
            message_id,
            format!("failed to get message {}: {}", message_id, err),
        )
    }

    /// Local store failure while handling one message
    pub fn persistence(message_id: &str, action: &str, err: &anyhow::Error) -> Self {
        Self::item(
            SyncErrorKind::Persistence,
            message_id,
            format!("failed to {} message {}: {:#}", action, message_id, err),
        )
    }

    pub fn is_auth(&self) -> bool {
        self.kind == SyncErrorKind::Auth
    }

    /// Every later call for the account would fail the same way
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind, SyncErrorKind::Auth | SyncErrorKind::Configuration)
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SyncError {}

pub fn classify_provider(err: &ProviderError) -> SyncErrorKind {
    match err {
        ProviderError::Decode(_) => SyncErrorKind::Parse,
        ProviderError::Auth(auth) => classify_auth(auth),
        e if e.is_auth() => SyncErrorKind::Auth,
        _ => SyncErrorKind::TransientApi,
    }
}

pub fn classify_auth(err: &AuthError) -> SyncErrorKind {
    match err {
        AuthError::Transient(_) => SyncErrorKind::TransientApi,
        AuthError::Credentials(_) => SyncErrorKind::Configuration,
        _ => SyncErrorKind::Auth,
    }
}

/// Counters and errors accumulated over one pass
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub mode: SyncMode,
    /// Distinct message ids considered
    pub total_fetched: usize,
    pub new_emails: usize,
    pub updated_emails: usize,
    pub deleted_emails: usize,
    pub errors: Vec<SyncError>,
    /// Cursor recorded for the next history pass, when captured
    pub last_history_id: Option<String>,
    pub synced_at: DateTime<Utc>,
    /// The deadline expired before every id was processed
    pub interrupted: bool,
}

impl SyncResult {
    pub fn new(mode: SyncMode) -> Self {
        Self {
            mode,
            total_fetched: 0,
            new_emails: 0,
            updated_emails: 0,
            deleted_emails: 0,
            errors: Vec::new(),
            last_history_id: None,
            synced_at: Utc::now(),
            interrupted: false,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn first_error(&self) -> Option<&SyncError> {
        self.errors.first()
    }

    pub fn has_auth_error(&self) -> bool {
        self.errors.iter().any(SyncError::is_auth)
    }

    pub fn fatal_error(&self) -> Option<&SyncError> {
        self.errors.iter().find(|e| e.is_fatal())
    }

    /// A listing that failed for a reason worth retrying
    pub fn transient_query_error(&self) -> Option<&SyncError> {
        self.errors
            .iter()
            .find(|e| e.scope == ErrorScope::Query && e.kind == SyncErrorKind::TransientApi)
    }

    /// Finished every listing with no error and no interruption
    pub fn is_clean(&self) -> bool {
        !self.interrupted && self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::CryptoError;

    #[test]
    fn test_sync_mode_parse() {
        assert_eq!(SyncMode::parse_lenient("initial"), SyncMode::Initial);
        assert_eq!(SyncMode::parse_lenient("history"), SyncMode::History);
        assert_eq!(SyncMode::parse_lenient("incremental"), SyncMode::Incremental);
        assert_eq!(SyncMode::parse_lenient("bogus"), SyncMode::Incremental);
        assert_eq!(SyncMode::History.to_string(), "history");
    }

    #[test]
    fn test_classify_provider() {
        assert_eq!(
            classify_provider(&ProviderError::Unauthorized(401)),
            SyncErrorKind::Auth
        );
        assert_eq!(
            classify_provider(&ProviderError::Decode("bad json".into())),
            SyncErrorKind::Parse
        );
        assert_eq!(
            classify_provider(&ProviderError::Transient("status 503".into())),
            SyncErrorKind::TransientApi
        );
        assert_eq!(
            classify_provider(&ProviderError::Auth(AuthError::InvalidGrant("revoked".into()))),
            SyncErrorKind::Auth
        );
        assert_eq!(
            classify_provider(&ProviderError::Auth(AuthError::Transient("timeout".into()))),
            SyncErrorKind::TransientApi
        );
    }

    #[test]
    fn test_unreadable_credentials_are_configuration_errors() {
        let err = AuthError::Credentials(CryptoError::Decryption("aead::Error".into()));
        assert_eq!(classify_auth(&err), SyncErrorKind::Configuration);
        assert_eq!(
            classify_auth(&AuthError::MissingRefreshToken),
            SyncErrorKind::Auth
        );

        let sync_err = SyncError::query(classify_auth(&err), err.to_string());
        assert!(sync_err.is_fatal());
        assert!(!sync_err.is_auth());

        let mut result = SyncResult::new(SyncMode::Incremental);
        result.errors.push(SyncError::item(SyncErrorKind::Parse, "m1", "bad"));
        assert!(result.fatal_error().is_none());
        result.errors.push(sync_err);
        assert_eq!(
            result.fatal_error().map(|e| e.kind),
            Some(SyncErrorKind::Configuration)
        );
    }

    #[test]
    fn test_item_error_message() {
        let err = SyncError::from_provider_item("m1", &ProviderError::NotFound);
        assert_eq!(err.scope, ErrorScope::Item);
        assert_eq!(err.message_id.as_deref(), Some("m1"));
        assert!(err.to_string().contains("m1"));
    }

    #[test]
    fn test_result_flags() {
        let mut result = SyncResult::new(SyncMode::Initial);
        assert!(result.is_clean());

        result
            .errors
            .push(SyncError::item(SyncErrorKind::Parse, "m1", "bad"));
        assert!(!result.is_clean());
        assert!(result.transient_query_error().is_none());

        result.errors.push(SyncError::query(
            SyncErrorKind::TransientApi,
            "failed to list messages",
        ));
        assert!(result.transient_query_error().is_some());
        assert_eq!(result.first_error().map(|e| e.message.as_str()), Some("bad"));
    }
}
