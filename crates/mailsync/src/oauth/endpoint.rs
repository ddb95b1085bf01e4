//! Google OAuth2 token endpoint
//!
//! Uses synchronous HTTP (ureq) like the rest of the crate.

use chrono::{Duration, Utc};
use serde::Deserialize;

use super::token::{AuthError, Token};
use crate::config::OAuthCredentials;

/// Scopes requested when linking a Gmail account
pub const GMAIL_SCOPES: [&str; 4] = [
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
    "https://www.googleapis.com/auth/gmail.labels",
];

/// Exchanges grants for tokens
pub trait TokenEndpoint: Send + Sync {
    /// Mint a new access token from a refresh token
    fn refresh(&self, refresh_token: &str) -> Result<Token, AuthError>;

    /// Exchange an authorization code from the consent redirect
    fn exchange_code(&self, code: &str) -> Result<Token, AuthError>;
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
}

impl TokenResponse {
    fn into_token(self) -> Token {
        // Google omits expires_in only for non-expiring grants; one hour is its default
        let expires_in = self.expires_in.unwrap_or(3600);
        Token {
            access_token: self.access_token,
            refresh_token: self.refresh_token.unwrap_or_default(),
            expiry: Utc::now() + Duration::seconds(expires_in),
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
        }
    }
}

pub struct GoogleTokenEndpoint {
    credentials: OAuthCredentials,
    token_url: String,
}

impl GoogleTokenEndpoint {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    pub fn new(credentials: OAuthCredentials) -> Self {
        Self {
            credentials,
            token_url: Self::TOKEN_URL.to_string(),
        }
    }

    /// Point at a different token URL (local test servers)
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Consent URL for offline access to the Gmail scopes
    pub fn authorization_url(&self, state: &str) -> String {
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent&state={}",
            Self::AUTH_URL,
            urlencoding::encode(&self.credentials.client_id),
            urlencoding::encode(&self.credentials.redirect_url),
            urlencoding::encode(&GMAIL_SCOPES.join(" ")),
            urlencoding::encode(state),
        )
    }

    fn post_form(&self, form: &[(&str, &str)]) -> Result<TokenResponse, AuthError> {
        let mut response = ureq::post(&self.token_url)
            .send_form(form.iter().copied())
            .map_err(map_ureq_error)?;

        response
            .body_mut()
            .read_json()
            .map_err(|e| AuthError::Decode(e.to_string()))
    }
}

fn map_ureq_error(err: ureq::Error) -> AuthError {
    match err {
        // invalid_grant comes back as 400; a revoked client as 401
        ureq::Error::StatusCode(code @ (400 | 401 | 403)) => {
            AuthError::InvalidGrant(format!("token endpoint returned {}", code))
        }
        ureq::Error::StatusCode(code) => {
            AuthError::Transient(format!("token endpoint returned {}", code))
        }
        other => AuthError::Transient(other.to_string()),
    }
}

impl TokenEndpoint for GoogleTokenEndpoint {
    fn refresh(&self, refresh_token: &str) -> Result<Token, AuthError> {
        if refresh_token.is_empty() {
            return Err(AuthError::MissingRefreshToken);
        }

        let response = self.post_form(&[
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])?;

        let mut token = response.into_token();
        // Preserve the refresh token if not returned
        if token.refresh_token.is_empty() {
            token.refresh_token = refresh_token.to_string();
        }
        Ok(token)
    }

    fn exchange_code(&self, code: &str) -> Result<Token, AuthError> {
        let response = self.post_form(&[
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", self.credentials.redirect_url.as_str()),
        ])?;
        Ok(response.into_token())
    }
}
