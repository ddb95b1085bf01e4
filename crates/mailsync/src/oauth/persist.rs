//! Write-back of refreshed credentials

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use super::endpoint::TokenEndpoint;
use super::refresh::RefreshingTokenSource;
use super::token::{AuthError, Token, TokenSource};
use crate::crypto::Cipher;
use crate::models::Account;
use crate::storage::{AccountStore, TokenUpdate};

/// Called when a token source observes a token it has not seen before
pub trait TokenChangeHandler: Send + Sync {
    fn on_token_changed(&self, token: &Token) -> Result<()>;
}

/// Wraps a token source and reports changed tokens to a handler
///
/// The handler runs only when the access token or expiry differs from the
/// last observed pair. Handler failures are logged and never fail the
/// caller: the token was obtained and is returned regardless.
pub struct PersistingTokenSource<S> {
    base: S,
    handler: Arc<dyn TokenChangeHandler>,
    last_seen: Mutex<Option<(String, DateTime<Utc>)>>,
}

impl<S: TokenSource> PersistingTokenSource<S> {
    pub fn new(base: S, handler: Arc<dyn TokenChangeHandler>) -> Self {
        Self {
            base,
            handler,
            last_seen: Mutex::new(None),
        }
    }

    /// Seed the last observed pair, typically with what is already stored
    pub fn with_last_seen(self, token: &Token) -> Self {
        if let Ok(mut last) = self.last_seen.lock() {
            *last = Some((token.access_token.clone(), token.expiry));
        }
        self
    }
}

impl<S: TokenSource> TokenSource for PersistingTokenSource<S> {
    fn token(&self) -> Result<Token, AuthError> {
        let token = self.base.token()?;
        if token.access_token.is_empty() {
            return Ok(token);
        }

        let Ok(mut last) = self.last_seen.lock() else {
            return Ok(token);
        };

        let changed = match last.as_ref() {
            Some((access, expiry)) => *access != token.access_token || *expiry != token.expiry,
            None => true,
        };

        if changed {
            if let Err(e) = self.handler.on_token_changed(&token) {
                log::warn!("Failed to persist refreshed token: {:#}", e);
            }
            *last = Some((token.access_token.clone(), token.expiry));
        }

        Ok(token)
    }
}

/// Encrypts a changed token and writes it to the account row
pub struct CredentialPersister {
    account_id: i64,
    cipher: Arc<dyn Cipher>,
    store: Arc<dyn AccountStore>,
}

impl CredentialPersister {
    pub fn new(account_id: i64, cipher: Arc<dyn Cipher>, store: Arc<dyn AccountStore>) -> Self {
        Self {
            account_id,
            cipher,
            store,
        }
    }
}

impl TokenChangeHandler for CredentialPersister {
    fn on_token_changed(&self, token: &Token) -> Result<()> {
        let access_token = self
            .cipher
            .encrypt(&token.access_token)
            .context("Failed to encrypt access token")?;

        // A refresh token that fails to encrypt is skipped; the stored one stays valid
        let refresh_token = if token.refresh_token.is_empty() {
            None
        } else {
            match self.cipher.encrypt(&token.refresh_token) {
                Ok(sealed) => Some(sealed),
                Err(e) => {
                    log::warn!("Failed to encrypt refresh token: {}", e);
                    None
                }
            }
        };

        self.store
            .update_tokens(
                self.account_id,
                &TokenUpdate {
                    access_token,
                    token_expiry: token.expiry,
                    refresh_token,
                },
            )
            .with_context(|| format!("Failed to store tokens for account {}", self.account_id))?;

        log::debug!("Persisted refreshed token for account {}", self.account_id);
        Ok(())
    }
}

/// Build the full token stack for a stored account
///
/// Decrypts the stored tokens, wraps them in a refreshing source and writes
/// every refreshed token back through a [`CredentialPersister`].
pub fn token_source_for_account(
    account: &Account,
    cipher: Arc<dyn Cipher>,
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<dyn AccountStore>,
) -> Result<PersistingTokenSource<RefreshingTokenSource>, AuthError> {
    let access_token = cipher.decrypt(&account.access_token)?;
    let refresh_token = if account.refresh_token.is_empty() {
        String::new()
    } else {
        cipher.decrypt(&account.refresh_token)?
    };

    let initial = Token::new(access_token, refresh_token, account.token_expiry);
    let persister = Arc::new(CredentialPersister::new(account.id, cipher, store));

    Ok(
        PersistingTokenSource::new(RefreshingTokenSource::new(endpoint, initial.clone()), persister)
            .with_last_seen(&initial),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Base source returning whatever token is currently set
    struct SettableSource(Mutex<Token>);

    impl SettableSource {
        fn set(&self, token: Token) {
            *self.0.lock().unwrap() = token;
        }
    }

    impl TokenSource for SettableSource {
        fn token(&self) -> Result<Token, AuthError> {
            Ok(self.0.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct CountingHandler {
        writes: AtomicUsize,
        fail: bool,
    }

    impl TokenChangeHandler for CountingHandler {
        fn on_token_changed(&self, _token: &Token) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("database is locked");
            }
            Ok(())
        }
    }

    fn token(access: &str, expiry: DateTime<Utc>) -> Token {
        Token::new(access, "r", expiry)
    }

    #[test]
    fn test_writes_only_on_change() {
        let expiry = Utc::now() + Duration::hours(1);
        let base = Arc::new(SettableSource(Mutex::new(token("a1", expiry))));
        let handler = Arc::new(CountingHandler::default());
        let source = PersistingTokenSource::new(base.clone(), handler.clone());

        // First observation counts as a change
        source.token().unwrap();
        source.token().unwrap();
        source.token().unwrap();
        assert_eq!(handler.writes.load(Ordering::SeqCst), 1);

        // Same access token, new expiry
        base.set(token("a1", expiry + Duration::minutes(5)));
        source.token().unwrap();
        assert_eq!(handler.writes.load(Ordering::SeqCst), 2);

        base.set(token("a2", expiry + Duration::minutes(5)));
        source.token().unwrap();
        source.token().unwrap();
        assert_eq!(handler.writes.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_seeded_pair_suppresses_first_write() {
        let initial = token("a1", Utc::now() + Duration::hours(1));
        let base = Arc::new(SettableSource(Mutex::new(initial.clone())));
        let handler = Arc::new(CountingHandler::default());
        let source = PersistingTokenSource::new(base, handler.clone()).with_last_seen(&initial);

        source.token().unwrap();
        assert_eq!(handler.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_access_token_passes_through() {
        let base = Arc::new(SettableSource(Mutex::new(token("", Utc::now()))));
        let handler = Arc::new(CountingHandler::default());
        let source = PersistingTokenSource::new(base, handler.clone());

        assert!(source.token().unwrap().access_token.is_empty());
        assert_eq!(handler.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_handler_failure_is_swallowed() {
        let base = Arc::new(SettableSource(Mutex::new(token("a1", Utc::now()))));
        let handler = Arc::new(CountingHandler {
            writes: AtomicUsize::new(0),
            fail: true,
        });
        let source = PersistingTokenSource::new(base, handler.clone());

        assert_eq!(source.token().unwrap().access_token, "a1");
        // Not retried on the next call for the same token
        source.token().unwrap();
        assert_eq!(handler.writes.load(Ordering::SeqCst), 1);
    }
}
