//! Refreshing token source

use std::sync::{Arc, Mutex};

use super::endpoint::TokenEndpoint;
use super::token::{AuthError, Token, TokenSource};

/// Hands out the cached token, refreshing it through the endpoint once expired
///
/// The lock is held across the refresh call, so concurrent callers on the
/// same source trigger exactly one refresh and all observe its result.
pub struct RefreshingTokenSource {
    endpoint: Arc<dyn TokenEndpoint>,
    current: Mutex<Token>,
}

impl RefreshingTokenSource {
    pub fn new(endpoint: Arc<dyn TokenEndpoint>, initial: Token) -> Self {
        Self {
            endpoint,
            current: Mutex::new(initial),
        }
    }
}

impl TokenSource for RefreshingTokenSource {
    fn token(&self) -> Result<Token, AuthError> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| AuthError::Transient("token cache lock poisoned".into()))?;

        if current.is_valid() {
            return Ok(current.clone());
        }

        if current.refresh_token.is_empty() {
            return Err(AuthError::MissingRefreshToken);
        }

        log::debug!("Access token expired at {}, refreshing", current.expiry);
        let mut fresh = self.endpoint.refresh(&current.refresh_token)?;
        if fresh.refresh_token.is_empty() {
            fresh.refresh_token = current.refresh_token.clone();
        }

        *current = fresh.clone();
        Ok(fresh)
    }
}
