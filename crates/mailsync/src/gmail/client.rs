//! Gmail API HTTP client
//!
//! Uses synchronous HTTP (ureq) to be executor-agnostic. Requests are not
//! retried here; callers decide based on the [`ProviderError`] class.

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use ureq::Body;
use ureq::http::Response;

use super::api::{
    BatchModifyRequest, GmailMessage, HistoryRecord, HistoryResponse, Label, ListLabelsResponse,
    ListMessagesResponse, MessageRef, ModifyLabelsRequest, Profile, RawMessage,
};
use super::compose::{self, ComposeError, SendMessageRequest};
use crate::models::label;
use crate::oauth::{AuthError, TokenSource};

/// Failure talking to the provider, classified by what the caller can do
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Credentials rejected (401, or 403 for a permission or scope reason)
    #[error("Unauthorized (status {0})")]
    Unauthorized(u16),

    #[error("Not found")]
    NotFound,

    /// The history cursor is too old or unknown (404 on history)
    #[error("History ID expired or invalid")]
    HistoryExpired,

    /// Rate limiting, 5xx or transport failure
    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Invalid outgoing message: {0}")]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Transient(_) => true,
            ProviderError::Auth(e) => e.is_transient(),
            _ => false,
        }
    }

    pub fn is_auth(&self) -> bool {
        match self {
            ProviderError::Unauthorized(_) => true,
            ProviderError::Auth(e) => !e.is_transient(),
            _ => false,
        }
    }

    /// Classify an error response from its status and Google's error body
    ///
    /// Gmail reports quota and rate limits as 403 with a `reason` such as
    /// `userRateLimitExceeded`; those are transient, unlike a 403 for a
    /// missing scope or a disabled account.
    fn from_status(code: u16, body: &str) -> Self {
        match code {
            401 => ProviderError::Unauthorized(code),
            403 => match rate_limit_reason(body) {
                Some(reason) => ProviderError::Transient(format!("status 403 ({})", reason)),
                None => ProviderError::Unauthorized(code),
            },
            404 => ProviderError::NotFound,
            429 | 500.. => ProviderError::Transient(format!("status {}", code)),
            _ => ProviderError::Status(code),
        }
    }

    fn from_ureq(err: ureq::Error) -> Self {
        match err {
            ureq::Error::StatusCode(code) => ProviderError::from_status(code, ""),
            other => ProviderError::Transient(other.to_string()),
        }
    }
}

/// Error reasons that mean "slow down", not "not allowed"
const RATE_LIMIT_REASONS: [&str; 3] = [
    "rateLimitExceeded",
    "userRateLimitExceeded",
    "dailyLimitExceeded",
];

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    errors: Vec<ErrorItem>,
}

#[derive(Debug, Deserialize)]
struct ErrorItem {
    #[serde(default)]
    reason: String,
}

fn rate_limit_reason(body: &str) -> Option<String> {
    let response: ErrorResponse = serde_json::from_str(body).ok()?;
    response
        .error
        .errors
        .into_iter()
        .map(|e| e.reason)
        .find(|reason| RATE_LIMIT_REASONS.contains(&reason.as_str()))
}

/// Pass through success responses; read the body of error responses to
/// classify them
fn check_status(mut response: Response<Body>) -> Result<Response<Body>, ProviderError> {
    let code = response.status().as_u16();
    if code < 400 {
        return Ok(response);
    }
    let body = response.body_mut().read_to_string().unwrap_or_default();
    Err(ProviderError::from_status(code, &body))
}

/// Options for listing messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListMessagesOptions {
    /// Gmail search syntax (e.g. "in:inbox newer_than:7d")
    pub query: String,
    pub labels: Vec<String>,
    /// Page size, 1-500
    pub max_results: u32,
    pub page_token: Option<String>,
    pub include_spam_trash: bool,
}

impl Default for ListMessagesOptions {
    fn default() -> Self {
        Self {
            query: String::new(),
            labels: Vec::new(),
            max_results: 100,
            page_token: None,
            include_spam_trash: false,
        }
    }
}

impl ListMessagesOptions {
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

/// One page of message references
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageList {
    pub messages: Vec<MessageRef>,
    pub next_page_token: Option<String>,
    pub result_size_estimate: u32,
}

/// All change-log records after a cursor
#[derive(Debug, Clone, Default)]
pub struct HistoryPage {
    pub records: Vec<HistoryRecord>,
    /// Cursor to resume from next time
    pub history_id: Option<String>,
}

/// Mail provider operations used by the sync engine
pub trait MailApi: Send + Sync {
    fn list_messages(&self, opts: &ListMessagesOptions) -> Result<MessageList, ProviderError>;

    /// Full message (format=full)
    fn get_message(&self, id: &str) -> Result<GmailMessage, ProviderError>;

    /// Send a message, returning the provider message id
    fn send_message(&self, req: &SendMessageRequest) -> Result<String, ProviderError>;

    fn modify_labels(&self, id: &str, req: &ModifyLabelsRequest) -> Result<(), ProviderError>;

    fn batch_modify_labels(&self, req: &BatchModifyRequest) -> Result<(), ProviderError>;

    /// Every history page after `start_history_id`
    ///
    /// Fails with [`ProviderError::HistoryExpired`] when the cursor is no
    /// longer known to the provider.
    fn get_history(&self, start_history_id: &str) -> Result<HistoryPage, ProviderError>;

    fn list_labels(&self) -> Result<Vec<Label>, ProviderError>;

    fn get_profile(&self) -> Result<Profile, ProviderError>;

    fn mark_as_read(&self, id: &str) -> Result<(), ProviderError> {
        self.modify_labels(id, &ModifyLabelsRequest::remove(label::UNREAD))
    }

    fn mark_as_unread(&self, id: &str) -> Result<(), ProviderError> {
        self.modify_labels(id, &ModifyLabelsRequest::add(label::UNREAD))
    }

    fn add_star(&self, id: &str) -> Result<(), ProviderError> {
        self.modify_labels(id, &ModifyLabelsRequest::add(label::STARRED))
    }

    fn remove_star(&self, id: &str) -> Result<(), ProviderError> {
        self.modify_labels(id, &ModifyLabelsRequest::remove(label::STARRED))
    }

    /// Remove from the inbox without deleting
    fn archive(&self, id: &str) -> Result<(), ProviderError> {
        self.modify_labels(id, &ModifyLabelsRequest::remove(label::INBOX))
    }
}

/// Gmail API client bound to one account's token source
pub struct GmailClient {
    tokens: Arc<dyn TokenSource>,
    agent: ureq::Agent,
    base_url: String,
}

impl GmailClient {
    /// Gmail API base URL
    const BASE_URL: &'static str = "https://gmail.googleapis.com/gmail/v1/users/me";

    pub fn new(tokens: Arc<dyn TokenSource>) -> Self {
        // Error statuses come back as responses so their bodies can be read
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            tokens,
            agent,
            base_url: Self::BASE_URL.to_string(),
        }
    }

    /// Point at a different API root (local test servers)
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn authorization(&self) -> Result<String, ProviderError> {
        Ok(self.tokens.token()?.authorization())
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ProviderError> {
        let mut response = self
            .agent
            .get(url)
            .header("Authorization", &self.authorization()?)
            .call()
            .map_err(ProviderError::from_ureq)
            .and_then(check_status)?;

        response
            .body_mut()
            .read_json()
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }

    fn post_json<B: serde::Serialize>(&self, url: &str, body: &B) -> Result<(), ProviderError> {
        self.agent
            .post(url)
            .header("Authorization", &self.authorization()?)
            .send_json(body)
            .map_err(ProviderError::from_ureq)
            .and_then(check_status)?;
        Ok(())
    }

    fn post_empty(&self, url: &str) -> Result<(), ProviderError> {
        self.agent
            .post(url)
            .header("Authorization", &self.authorization()?)
            .send_empty()
            .map_err(ProviderError::from_ureq)
            .and_then(check_status)?;
        Ok(())
    }

    fn list_url(&self, opts: &ListMessagesOptions) -> String {
        let mut url = format!(
            "{}/messages?maxResults={}",
            self.base_url,
            opts.max_results.clamp(1, 500)
        );

        if !opts.query.is_empty() {
            url.push_str(&format!("&q={}", urlencoding::encode(&opts.query)));
        }
        for label in &opts.labels {
            url.push_str(&format!("&labelIds={}", urlencoding::encode(label)));
        }
        if let Some(token) = &opts.page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }
        if opts.include_spam_trash {
            url.push_str("&includeSpamTrash=true");
        }

        url
    }

    /// List one page of history after a cursor
    fn list_history(
        &self,
        start_history_id: &str,
        page_token: Option<&str>,
    ) -> Result<HistoryResponse, ProviderError> {
        let mut url = format!(
            "{}/history?startHistoryId={}",
            self.base_url,
            urlencoding::encode(start_history_id)
        );
        for history_type in ["messageAdded", "messageDeleted", "labelAdded", "labelRemoved"] {
            url.push_str(&format!("&historyTypes={}", history_type));
        }
        if let Some(token) = page_token {
            url.push_str(&format!("&pageToken={}", urlencoding::encode(token)));
        }

        match self.get_json(&url) {
            Err(ProviderError::NotFound) => Err(ProviderError::HistoryExpired),
            other => other,
        }
    }

    /// Move a message to trash
    pub fn trash(&self, id: &str) -> Result<(), ProviderError> {
        self.post_empty(&format!("{}/messages/{}/trash", self.base_url, urlencoding::encode(id)))
    }

    /// Restore a message from trash
    pub fn untrash(&self, id: &str) -> Result<(), ProviderError> {
        self.post_empty(&format!(
            "{}/messages/{}/untrash",
            self.base_url,
            urlencoding::encode(id)
        ))
    }

    /// Permanently delete a message
    pub fn delete(&self, id: &str) -> Result<(), ProviderError> {
        self.agent
            .delete(&format!("{}/messages/{}", self.base_url, urlencoding::encode(id)))
            .header("Authorization", &self.authorization()?)
            .call()
            .map_err(ProviderError::from_ureq)
            .and_then(check_status)?;
        Ok(())
    }
}

impl MailApi for GmailClient {
    fn list_messages(&self, opts: &ListMessagesOptions) -> Result<MessageList, ProviderError> {
        let response: ListMessagesResponse = self.get_json(&self.list_url(opts))?;

        Ok(MessageList {
            messages: response.messages.unwrap_or_default(),
            next_page_token: response.next_page_token.filter(|t| !t.is_empty()),
            result_size_estimate: response.result_size_estimate.unwrap_or(0),
        })
    }

    fn get_message(&self, id: &str) -> Result<GmailMessage, ProviderError> {
        self.get_json(&format!(
            "{}/messages/{}?format=full",
            self.base_url,
            urlencoding::encode(id)
        ))
    }

    fn send_message(&self, req: &SendMessageRequest) -> Result<String, ProviderError> {
        let body = RawMessage {
            raw: compose::encode_raw(&compose::build_rfc2822_message(req)?),
            thread_id: req.thread_id.clone(),
        };

        let mut response = self
            .agent
            .post(&format!("{}/messages/send", self.base_url))
            .header("Authorization", &self.authorization()?)
            .send_json(&body)
            .map_err(ProviderError::from_ureq)
            .and_then(check_status)?;

        let sent: MessageRef = response
            .body_mut()
            .read_json()
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        Ok(sent.id)
    }

    fn modify_labels(&self, id: &str, req: &ModifyLabelsRequest) -> Result<(), ProviderError> {
        self.post_json(
            &format!("{}/messages/{}/modify", self.base_url, urlencoding::encode(id)),
            req,
        )
    }

    fn batch_modify_labels(&self, req: &BatchModifyRequest) -> Result<(), ProviderError> {
        if req.ids.is_empty() {
            return Ok(());
        }
        self.post_json(&format!("{}/messages/batchModify", self.base_url), req)
    }

    fn get_history(&self, start_history_id: &str) -> Result<HistoryPage, ProviderError> {
        let mut records = Vec::new();
        let mut history_id = None;
        let mut page_token: Option<String> = None;

        loop {
            let response = self.list_history(start_history_id, page_token.as_deref())?;

            if let Some(page) = response.history {
                records.extend(page);
            }
            if response.history_id.is_some() {
                history_id = response.history_id;
            }

            match response.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(HistoryPage {
            records,
            history_id,
        })
    }

    fn list_labels(&self) -> Result<Vec<Label>, ProviderError> {
        let response: ListLabelsResponse = self.get_json(&format!("{}/labels", self.base_url))?;
        Ok(response.labels.unwrap_or_default())
    }

    fn get_profile(&self) -> Result<Profile, ProviderError> {
        self.get_json(&format!("{}/profile", self.base_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::{StaticTokenSource, Token};
    use chrono::Utc;

    fn client() -> GmailClient {
        GmailClient::new(Arc::new(StaticTokenSource(Token::new(
            "access",
            "",
            Utc::now(),
        ))))
    }

    #[test]
    fn test_list_url() {
        let opts = ListMessagesOptions {
            query: "in:inbox newer_than:7d".into(),
            labels: vec!["INBOX".into(), "UNREAD".into()],
            max_results: 1000,
            page_token: Some("tok".into()),
            include_spam_trash: false,
        };
        let url = client().list_url(&opts);
        assert_eq!(
            url,
            "https://gmail.googleapis.com/gmail/v1/users/me/messages?maxResults=500\
             &q=in%3Ainbox%20newer_than%3A7d&labelIds=INBOX&labelIds=UNREAD&pageToken=tok"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(matches!(
            ProviderError::from_ureq(ureq::Error::StatusCode(401)),
            ProviderError::Unauthorized(401)
        ));
        assert!(ProviderError::from_ureq(ureq::Error::StatusCode(403)).is_auth());
        assert!(matches!(
            ProviderError::from_ureq(ureq::Error::StatusCode(404)),
            ProviderError::NotFound
        ));
        assert!(ProviderError::from_ureq(ureq::Error::StatusCode(429)).is_transient());
        assert!(ProviderError::from_ureq(ureq::Error::StatusCode(503)).is_transient());
        assert!(matches!(
            ProviderError::from_ureq(ureq::Error::StatusCode(400)),
            ProviderError::Status(400)
        ));
    }

    #[test]
    fn test_rate_limited_403_is_transient() {
        let body = r#"{
            "error": {
                "code": 403,
                "message": "User-rate limit exceeded.",
                "errors": [{
                    "domain": "usageLimits",
                    "reason": "userRateLimitExceeded",
                    "message": "User-rate limit exceeded."
                }],
                "status": "PERMISSION_DENIED"
            }
        }"#;
        let err = ProviderError::from_status(403, body);
        assert!(err.is_transient());
        assert!(!err.is_auth());
        assert!(err.to_string().contains("userRateLimitExceeded"));

        let body = r#"{"error":{"code":403,"errors":[{"reason":"rateLimitExceeded"}]}}"#;
        assert!(ProviderError::from_status(403, body).is_transient());
    }

    #[test]
    fn test_permission_403_is_unauthorized() {
        let body = r#"{
            "error": {
                "code": 403,
                "message": "Request had insufficient authentication scopes.",
                "errors": [{"domain": "global", "reason": "insufficientPermissions"}],
                "status": "PERMISSION_DENIED"
            }
        }"#;
        assert!(matches!(
            ProviderError::from_status(403, body),
            ProviderError::Unauthorized(403)
        ));
        assert!(matches!(
            ProviderError::from_status(403, "<html>Forbidden</html>"),
            ProviderError::Unauthorized(403)
        ));
        assert!(matches!(
            ProviderError::from_status(401, body),
            ProviderError::Unauthorized(401)
        ));
    }

    #[test]
    fn test_auth_error_classification() {
        let revoked = ProviderError::from(AuthError::InvalidGrant("revoked".into()));
        assert!(revoked.is_auth());
        assert!(!revoked.is_transient());

        let flaky = ProviderError::from(AuthError::Transient("timeout".into()));
        assert!(flaky.is_transient());
        assert!(!flaky.is_auth());
    }

    #[test]
    fn test_default_list_options() {
        let opts = ListMessagesOptions::query("in:sent");
        assert_eq!(opts.max_results, 100);
        assert!(!opts.include_spam_trash);
    }
}
