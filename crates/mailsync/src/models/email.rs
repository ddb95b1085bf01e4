//! Email model representing one provider message mirrored locally

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::label;

/// An email address with optional display name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailAddress {
    /// Display name (e.g., "John Doe")
    pub name: Option<String>,
    /// Email address (e.g., "john@example.com")
    pub email: String,
}

impl EmailAddress {
    /// Create a new email address with just the email
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            name: None,
            email: email.into(),
        }
    }

    /// Create a new email address with a display name
    pub fn with_name(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            email: email.into(),
        }
    }

    /// Lenient parse of "John Doe <john@example.com>"
    ///
    /// Splits on the angle bracket without validating anything. Used as the
    /// fallback when strict address parsing rejects a header.
    pub fn parse(s: &str) -> Self {
        let s = s.trim();

        if let Some(angle_start) = s.rfind('<')
            && let Some(angle_end) = s.rfind('>')
            && angle_start < angle_end
        {
            let name = s[..angle_start].trim().trim_matches('"').trim();
            let email = s[angle_start + 1..angle_end].trim();
            return Self {
                name: if name.is_empty() {
                    None
                } else {
                    Some(name.to_string())
                },
                email: email.to_string(),
            };
        }

        Self {
            name: None,
            email: s.to_string(),
        }
    }

    /// Format the email address for display
    pub fn display(&self) -> String {
        match &self.name {
            Some(name) => format!("{} <{}>", name, self.email),
            None => self.email.clone(),
        }
    }
}

/// Attachment metadata; content stays at the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub part_id: String,
    pub filename: String,
    pub mime_type: String,
    /// Size in bytes, clamped to `i32::MAX`
    pub size: i32,
}

/// Whether a message was received or sent by the account owner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
}

/// A single mirrored message
///
/// `(account_id, provider_message_id)` is the dedup key. Once stored, only
/// `labels` and `is_read` are ever rewritten by sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    /// Local row id (0 until stored)
    pub id: i64,
    pub account_id: i64,
    /// Provider message id (Gmail message ID)
    pub provider_message_id: String,
    pub thread_id: Option<String>,
    pub from: EmailAddress,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub bcc: Vec<EmailAddress>,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
    pub snippet: String,
    /// Provider-side receive time (Gmail internalDate)
    pub received_at: DateTime<Utc>,
    /// Date header, when present and parseable
    pub sent_at: Option<DateTime<Utc>>,
    /// RFC 822 Message-ID header
    pub rfc822_message_id: Option<String>,
    pub labels: Vec<String>,
    pub is_read: bool,
    pub has_attachments: bool,
    pub attachments: Vec<Attachment>,
    /// Business case this message is linked to
    pub case_id: Option<String>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Email {
    /// Create a new email builder
    pub fn builder(account_id: i64, provider_message_id: impl Into<String>) -> EmailBuilder {
        EmailBuilder::new(account_id, provider_message_id.into())
    }

    pub fn has_label(&self, l: &str) -> bool {
        label::has_label(&self.labels, l)
    }

    pub fn direction(&self) -> Direction {
        if self.has_label(label::SENT) {
            Direction::Outgoing
        } else {
            Direction::Incoming
        }
    }

    pub fn is_important(&self) -> bool {
        self.has_label(label::IMPORTANT)
    }

    pub fn is_in_inbox(&self) -> bool {
        self.has_label(label::INBOX)
    }

    pub fn category(&self) -> &str {
        label::category_of(&self.labels)
    }
}

/// Builder for creating Email instances
pub struct EmailBuilder {
    account_id: i64,
    provider_message_id: String,
    thread_id: Option<String>,
    from: Option<EmailAddress>,
    to: Vec<EmailAddress>,
    cc: Vec<EmailAddress>,
    bcc: Vec<EmailAddress>,
    subject: String,
    body_text: String,
    body_html: String,
    snippet: String,
    received_at: Option<DateTime<Utc>>,
    sent_at: Option<DateTime<Utc>>,
    rfc822_message_id: Option<String>,
    labels: Vec<String>,
    attachments: Vec<Attachment>,
    case_id: Option<String>,
}

impl EmailBuilder {
    fn new(account_id: i64, provider_message_id: String) -> Self {
        Self {
            account_id,
            provider_message_id,
            thread_id: None,
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            body_text: String::new(),
            body_html: String::new(),
            snippet: String::new(),
            received_at: None,
            sent_at: None,
            rfc822_message_id: None,
            labels: Vec::new(),
            attachments: Vec::new(),
            case_id: None,
        }
    }

    pub fn thread_id(mut self, thread_id: impl Into<String>) -> Self {
        let thread_id = thread_id.into();
        self.thread_id = if thread_id.is_empty() { None } else { Some(thread_id) };
        self
    }

    pub fn from(mut self, from: EmailAddress) -> Self {
        self.from = Some(from);
        self
    }

    pub fn to(mut self, to: Vec<EmailAddress>) -> Self {
        self.to = to;
        self
    }

    pub fn cc(mut self, cc: Vec<EmailAddress>) -> Self {
        self.cc = cc;
        self
    }

    pub fn bcc(mut self, bcc: Vec<EmailAddress>) -> Self {
        self.bcc = bcc;
        self
    }

    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn body_text(mut self, body_text: impl Into<String>) -> Self {
        self.body_text = body_text.into();
        self
    }

    pub fn body_html(mut self, body_html: impl Into<String>) -> Self {
        self.body_html = body_html.into();
        self
    }

    pub fn snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = snippet.into();
        self
    }

    pub fn received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }

    pub fn sent_at(mut self, sent_at: Option<DateTime<Utc>>) -> Self {
        self.sent_at = sent_at;
        self
    }

    pub fn rfc822_message_id(mut self, id: Option<String>) -> Self {
        self.rfc822_message_id = id;
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    pub fn attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn case_id(mut self, case_id: impl Into<String>) -> Self {
        self.case_id = Some(case_id.into());
        self
    }

    pub fn build(self) -> Email {
        let is_read = !label::has_label(&self.labels, label::UNREAD);
        Email {
            id: 0,
            account_id: self.account_id,
            provider_message_id: self.provider_message_id,
            thread_id: self.thread_id,
            from: self.from.unwrap_or_default(),
            to: self.to,
            cc: self.cc,
            bcc: self.bcc,
            subject: self.subject,
            body_text: self.body_text,
            body_html: self.body_html,
            snippet: self.snippet,
            received_at: self.received_at.unwrap_or_else(Utc::now),
            sent_at: self.sent_at,
            rfc822_message_id: self.rfc822_message_id,
            is_read,
            has_attachments: !self.attachments.is_empty(),
            labels: self.labels,
            attachments: self.attachments,
            case_id: self.case_id,
            deleted_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_email_with_name() {
        let addr = EmailAddress::parse("John Doe <john@example.com>");
        assert_eq!(addr.name, Some("John Doe".to_string()));
        assert_eq!(addr.email, "john@example.com");
    }

    #[test]
    fn test_parse_email_with_quoted_name() {
        let addr = EmailAddress::parse("\"Doe, John\" <john@example.com>");
        assert_eq!(addr.name, Some("Doe, John".to_string()));
        assert_eq!(addr.email, "john@example.com");
    }

    #[test]
    fn test_parse_email_without_name() {
        let addr = EmailAddress::parse("john@example.com");
        assert_eq!(addr.name, None);
        assert_eq!(addr.email, "john@example.com");
    }

    #[test]
    fn test_display_with_name() {
        let addr = EmailAddress::with_name("John Doe", "john@example.com");
        assert_eq!(addr.display(), "John Doe <john@example.com>");
    }

    #[test]
    fn test_read_flag_derived_from_unread_label() {
        let unread = Email::builder(1, "m1")
            .labels(vec!["INBOX".into(), "UNREAD".into()])
            .build();
        assert!(!unread.is_read);

        let read = Email::builder(1, "m2").labels(vec!["INBOX".into()]).build();
        assert!(read.is_read);
    }

    #[test]
    fn test_direction() {
        let sent = Email::builder(1, "m1").labels(vec!["SENT".into()]).build();
        assert_eq!(sent.direction(), Direction::Outgoing);

        let received = Email::builder(1, "m2").labels(vec!["INBOX".into()]).build();
        assert_eq!(received.direction(), Direction::Incoming);
    }

    #[test]
    fn test_empty_thread_id_is_none() {
        let email = Email::builder(1, "m1").thread_id("").build();
        assert!(email.thread_id.is_none());
    }
}
