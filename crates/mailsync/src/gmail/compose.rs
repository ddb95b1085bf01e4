//! Outgoing message construction
//!
//! Messages are assembled with lettre's builder, which takes care of header
//! encoding (RFC 2047 subjects), MIME boundaries and transfer encodings. The
//! formatted bytes are then base64url encoded for `messages.send`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use lettre::Message;
use lettre::message::{Mailbox, MessageBuilder, MultiPart, SinglePart};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("Message has no recipients")]
    NoRecipients,

    #[error("Invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Failed to build message: {0}")]
    Build(#[from] lettre::error::Error),
}

/// A message to send
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendMessageRequest {
    /// Sender mailbox, normally the account address
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub text_body: String,
    /// Sent as multipart/alternative together with a non-empty text body
    pub html_body: Option<String>,
    /// Message-ID being replied to
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    /// Provider thread to file the message under
    pub thread_id: Option<String>,
}

/// Build the message with lettre
pub fn build_message(req: &SendMessageRequest) -> Result<Message, ComposeError> {
    if req.to.is_empty() && req.cc.is_empty() && req.bcc.is_empty() {
        return Err(ComposeError::NoRecipients);
    }

    // Bcc stays in the submitted bytes; Gmail strips it on delivery
    let mut builder = Message::builder()
        .from(parse_mailbox(&req.from)?)
        .subject(header_safe(req.subject.trim()))
        .keep_bcc();

    for address in &req.to {
        builder = builder.to(parse_mailbox(address)?);
    }
    for address in &req.cc {
        builder = builder.cc(parse_mailbox(address)?);
    }
    for address in &req.bcc {
        builder = builder.bcc(parse_mailbox(address)?);
    }

    if let Some(id) = non_empty(&req.in_reply_to) {
        builder = builder.in_reply_to(header_safe(id));
    }
    if let Some(references) = non_empty(&req.references) {
        builder = builder.references(header_safe(references));
    }

    attach_body(builder, req)
}

/// Build the wire form of a message (CRLF line endings)
pub fn build_rfc2822_message(req: &SendMessageRequest) -> Result<Vec<u8>, ComposeError> {
    Ok(build_message(req)?.formatted())
}

fn attach_body(builder: MessageBuilder, req: &SendMessageRequest) -> Result<Message, ComposeError> {
    let text = req.text_body.clone();
    let html = req.html_body.clone().unwrap_or_default();

    let message = match (text.is_empty(), html.is_empty()) {
        (false, false) => builder.multipart(MultiPart::alternative_plain_html(text, html))?,
        (true, false) => builder.singlepart(SinglePart::html(html))?,
        _ => builder.singlepart(SinglePart::plain(text))?,
    };
    Ok(message)
}

fn parse_mailbox(address: &str) -> Result<Mailbox, ComposeError> {
    address
        .trim()
        .parse::<Mailbox>()
        .map_err(|e| ComposeError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Collapse line breaks so a value cannot start a new header
fn header_safe(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

/// base64url encoding expected by `messages.send`
pub fn encode_raw(message: &[u8]) -> String {
    URL_SAFE.encode(message)
}
