//! OAuth token value and the token source abstraction

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::CryptoError;

/// Tokens are treated as expired this long before their real expiry
const EXPIRY_DELTA_SECS: i64 = 10;

#[derive(Debug, Error)]
pub enum AuthError {
    /// The refresh token was rejected; only re-consent fixes this
    #[error("Refresh token rejected: {0}")]
    InvalidGrant(String),

    #[error("No refresh token available")]
    MissingRefreshToken,

    /// Network failure or a provider 5xx/429; worth retrying later
    #[error("Token endpoint unavailable: {0}")]
    Transient(String),

    #[error("Failed to decode token response: {0}")]
    Decode(String),

    #[error("Stored credentials unreadable: {0}")]
    Credentials(#[from] CryptoError),
}

impl AuthError {
    /// Whether a later attempt might succeed without user action
    pub fn is_transient(&self) -> bool {
        matches!(self, AuthError::Transient(_))
    }
}

/// A bearer credential pair with its access-token expiry
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub access_token: String,
    /// Empty when the provider did not issue one
    pub refresh_token: String,
    pub expiry: DateTime<Utc>,
    pub token_type: String,
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("token_type", &self.token_type)
            .field("expiry", &self.expiry)
            .field("has_refresh_token", &!self.refresh_token.is_empty())
            .finish_non_exhaustive()
    }
}

impl Token {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expiry: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            expiry,
            token_type: "Bearer".to_string(),
        }
    }

    /// Whether the access token can still be used
    pub fn is_valid(&self) -> bool {
        !self.access_token.is_empty()
            && Utc::now() + Duration::seconds(EXPIRY_DELTA_SECS) < self.expiry
    }

    /// `Authorization` header value
    pub fn authorization(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Anything that can hand out a currently valid token
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Result<Token, AuthError>;
}

impl<T: TokenSource + ?Sized> TokenSource for std::sync::Arc<T> {
    fn token(&self) -> Result<Token, AuthError> {
        (**self).token()
    }
}

/// A fixed token that is never refreshed
pub struct StaticTokenSource(pub Token);

impl TokenSource for StaticTokenSource {
    fn token(&self) -> Result<Token, AuthError> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_window() {
        let fresh = Token::new("a", "r", Utc::now() + Duration::hours(1));
        assert!(fresh.is_valid());

        // Inside the expiry delta counts as expired
        let nearly = Token::new("a", "r", Utc::now() + Duration::seconds(5));
        assert!(!nearly.is_valid());

        let empty = Token::new("", "r", Utc::now() + Duration::hours(1));
        assert!(!empty.is_valid());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let token = Token::new("ya29.secret", "1//refresh", Utc::now());
        let debug = format!("{:?}", token);
        assert!(!debug.contains("ya29.secret"));
        assert!(!debug.contains("1//refresh"));
    }

    #[test]
    fn test_authorization_header() {
        let token = Token::new("abc", "", Utc::now());
        assert_eq!(token.authorization(), "Bearer abc");
    }
}
