//! Configuration loading for mail sync services
//!
//! OAuth credentials are loaded from (in order of priority):
//! 1. Compile-time embedded credentials (for production builds)
//! 2. JSON file (Google Cloud Console format)
//! 3. Runtime environment variables (fallback)
//!
//! Sync and worker tuning come from environment variables with defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Credentials filename in the mailsync config directory
const CREDENTIALS_FILE: &str = "google-credentials.json";

/// Redirect used when none is configured
const DEFAULT_REDIRECT_URL: &str = "http://localhost:8080/oauth/callback";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("Invalid credentials file {path}: {reason}")]
    CredentialsFile { path: String, reason: String },

    #[error("Invalid credentials JSON: {0}")]
    CredentialsJson(String),
}

/// OAuth client credentials for the Google token endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
}

/// Google Cloud Console credential file format
#[derive(Deserialize)]
struct GoogleCredentialFile {
    installed: Option<InstalledCredentials>,
    web: Option<InstalledCredentials>,
}

#[derive(Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    redirect_uris: Vec<String>,
}

impl OAuthCredentials {
    /// Load credentials using the following priority:
    /// 1. Compile-time embedded credentials
    /// 2. JSON file (~/.config/mailsync/google-credentials.json)
    /// 3. Runtime environment variables
    pub fn load() -> Result<Self, ConfigError> {
        if let Some(creds) = Self::from_compile_time() {
            return Ok(creds);
        }

        if config::config_exists(CREDENTIALS_FILE)
            && let Some(path) = Self::default_credentials_path()
        {
            return Self::from_file(&path);
        }

        Self::from_env()
    }

    /// Load credentials embedded at compile time via environment variables.
    /// Build with: GOOGLE_CLIENT_ID=xxx GOOGLE_CLIENT_SECRET=yyy cargo build --release
    pub fn from_compile_time() -> Option<Self> {
        let client_id = option_env!("GOOGLE_CLIENT_ID")?;
        let client_secret = option_env!("GOOGLE_CLIENT_SECRET")?;

        if client_id.is_empty() || client_secret.is_empty() {
            return None;
        }

        Some(Self {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_url: option_env!("GOOGLE_REDIRECT_URL")
                .filter(|s| !s.is_empty())
                .unwrap_or(DEFAULT_REDIRECT_URL)
                .to_string(),
        })
    }

    /// Load credentials from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let creds: GoogleCredentialFile =
            config::load_json_file(path).map_err(|e| ConfigError::CredentialsFile {
                path: path.display().to_string(),
                reason: format!("{:#}", e),
            })?;
        Self::from_credential_file(creds)
    }

    /// Parse credentials from JSON string (Google Cloud Console format)
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let creds: GoogleCredentialFile = serde_json::from_str(json)
            .map_err(|e| ConfigError::CredentialsJson(e.to_string()))?;
        Self::from_credential_file(creds)
    }

    fn from_credential_file(creds: GoogleCredentialFile) -> Result<Self, ConfigError> {
        // Support both "installed" (desktop) and "web" credential types
        let installed = creds.installed.or(creds.web).ok_or_else(|| {
            ConfigError::CredentialsJson("missing 'installed' or 'web' section".into())
        })?;

        // An explicit env override wins over the first registered redirect
        let redirect_url = std::env::var("GOOGLE_REDIRECT_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| installed.redirect_uris.into_iter().next())
            .unwrap_or_else(|| DEFAULT_REDIRECT_URL.to_string());

        Ok(Self {
            client_id: installed.client_id,
            client_secret: installed.client_secret,
            redirect_url,
        })
    }

    /// Load credentials from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let client_id = non_empty_env("GOOGLE_CLIENT_ID")?;
        let client_secret = non_empty_env("GOOGLE_CLIENT_SECRET")?;

        Ok(Self {
            client_id,
            client_secret,
            redirect_url: config::env_or("GOOGLE_REDIRECT_URL", DEFAULT_REDIRECT_URL),
        })
    }

    /// Get the default credentials file path (~/.config/mailsync/google-credentials.json)
    pub fn default_credentials_path() -> Option<PathBuf> {
        config::config_path(CREDENTIALS_FILE)
    }
}

fn non_empty_env(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(key))
}

/// Tuning for sync passes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Look-back window of the initial pass, in days
    pub initial_sync_days: u32,
    /// Per-query cap during the initial pass
    pub max_initial_emails: usize,
    /// Look-back window of an incremental pass with no previous sync, in days
    pub fallback_days: u32,
    /// Incremental window starts this long before the last sync
    pub overlap: Duration,
    pub batch_size: usize,
    pub page_size: usize,
    /// Minimum time between scheduled passes of one account
    pub cooldown: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            initial_sync_days: 7,
            max_initial_emails: 100,
            fallback_days: 30,
            overlap: Duration::from_secs(60),
            batch_size: 50,
            page_size: 100,
            cooldown: Duration::from_secs(5 * 60),
        }
    }
}

impl SyncConfig {
    /// Defaults overridden by `EMAIL_SYNC_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            initial_sync_days: config::env_parse(
                "EMAIL_SYNC_INITIAL_DAYS",
                defaults.initial_sync_days,
            ),
            max_initial_emails: config::env_parse(
                "EMAIL_SYNC_MAX_EMAILS",
                defaults.max_initial_emails,
            ),
            fallback_days: config::env_parse("EMAIL_SYNC_FALLBACK_DAYS", defaults.fallback_days),
            overlap: defaults.overlap,
            batch_size: config::env_parse("EMAIL_SYNC_BATCH_SIZE", defaults.batch_size).max(1),
            page_size: config::env_parse("EMAIL_SYNC_PAGE_SIZE", defaults.page_size).clamp(1, 500),
            cooldown: Duration::from_secs(config::env_parse(
                "EMAIL_SYNC_COOLDOWN_SEC",
                defaults.cooldown.as_secs(),
            )),
        }
    }
}

/// Settings for the background worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Worker threads executing tasks
    pub concurrency: usize,
    /// How often the fan-out task is enqueued
    pub sync_interval: Duration,
    /// Accounts considered per fan-out
    pub max_accounts: usize,
    pub database_path: Option<PathBuf>,
    /// Production mode makes a missing encryption key fatal
    pub production: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            sync_interval: Duration::from_secs(5 * 60),
            max_accounts: 100,
            database_path: None,
            production: false,
        }
    }
}

impl WorkerConfig {
    /// Defaults overridden by `WORKER_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let environment = config::env_or("APP_ENV", "development");
        Self {
            concurrency: config::env_parse("WORKER_CONCURRENCY", defaults.concurrency).max(1),
            sync_interval: Duration::from_secs(config::env_parse(
                "WORKER_SYNC_INTERVAL_SEC",
                defaults.sync_interval.as_secs(),
            )),
            max_accounts: config::env_parse("WORKER_MAX_ACCOUNTS", defaults.max_accounts),
            database_path: std::env::var("DATABASE_PATH")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            production: environment.eq_ignore_ascii_case("production")
                || config::env_flag("PRODUCTION"),
        }
    }

    /// Configured database path, or `mail.sqlite` in the data directory
    pub fn resolved_database_path(&self) -> Option<PathBuf> {
        self.database_path
            .clone()
            .or_else(|| config::data_dir().map(|dir| dir.join("mail.sqlite")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_installed_credentials() {
        let json = r#"{
            "installed": {
                "client_id": "test-client-id.apps.googleusercontent.com",
                "client_secret": "test-secret",
                "auth_uri": "https://accounts.google.com/o/oauth2/auth",
                "token_uri": "https://oauth2.googleapis.com/token",
                "redirect_uris": ["http://localhost"]
            }
        }"#;

        let creds = OAuthCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "test-client-id.apps.googleusercontent.com");
        assert_eq!(creds.client_secret, "test-secret");
        assert!(!creds.redirect_url.is_empty());
    }

    #[test]
    fn test_parse_web_credentials() {
        let json = r#"{
            "web": {
                "client_id": "web-client-id.apps.googleusercontent.com",
                "client_secret": "web-secret"
            }
        }"#;

        let creds = OAuthCredentials::from_json(json).unwrap();
        assert_eq!(creds.client_id, "web-client-id.apps.googleusercontent.com");
        assert_eq!(creds.client_secret, "web-secret");
    }

    #[test]
    fn test_invalid_json() {
        let json = r#"{ "other": {} }"#;
        assert!(OAuthCredentials::from_json(json).is_err());
    }

    #[test]
    fn test_sync_defaults() {
        let config = SyncConfig::default();
        assert_eq!(config.initial_sync_days, 7);
        assert_eq!(config.max_initial_emails, 100);
        assert_eq!(config.fallback_days, 30);
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.cooldown, Duration::from_secs(300));
        assert_eq!(config.overlap, Duration::from_secs(60));
    }

    #[test]
    fn test_worker_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.concurrency, 10);
        assert_eq!(config.sync_interval, Duration::from_secs(300));
        assert_eq!(config.max_accounts, 100);
        assert!(!config.production);
    }

    #[test]
    fn test_resolved_database_path_prefers_explicit() {
        let config = WorkerConfig {
            database_path: Some(PathBuf::from("/tmp/x.sqlite")),
            ..WorkerConfig::default()
        };
        assert_eq!(
            config.resolved_database_path(),
            Some(PathBuf::from("/tmp/x.sqlite"))
        );
    }
}
