//! Gmail API response normalization
//!
//! Converts Gmail API messages to the [`Email`] domain model. Normalization
//! never fails: missing or malformed pieces degrade to empty values.

use base64::prelude::*;
use chrono::{DateTime, TimeZone, Utc};

use super::api::{GmailMessage, Header, MessagePart};
use crate::models::{Attachment, Email, EmailAddress};

/// Normalize a Gmail API message to an Email for `account_id`
pub fn normalize_message(gmail_msg: GmailMessage, account_id: i64) -> Email {
    let headers: &[Header] = gmail_msg
        .payload
        .as_ref()
        .and_then(|p| p.headers.as_deref())
        .unwrap_or_default();

    let from = extract_header(headers, "From")
        .and_then(|s| parse_address_list(s).into_iter().next())
        .unwrap_or_default();
    let to = addresses(headers, "To");
    let cc = addresses(headers, "Cc");
    let bcc = addresses(headers, "Bcc");
    let subject = extract_header(headers, "Subject").unwrap_or_default();
    let sent_at = extract_header(headers, "Date").and_then(parse_date);
    let rfc822_message_id = extract_header(headers, "Message-ID")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    let received_at = gmail_msg
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .filter(|ms| *ms > 0)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .or(sent_at)
        .unwrap_or_else(Utc::now);

    let mut body = ParsedBody::default();
    if let Some(payload) = &gmail_msg.payload {
        walk_part(payload, &mut body);
    }

    Email::builder(account_id, gmail_msg.id)
        .thread_id(gmail_msg.thread_id)
        .from(from)
        .to(to)
        .cc(cc)
        .bcc(bcc)
        .subject(subject)
        .body_text(body.text.unwrap_or_default())
        .body_html(body.html.unwrap_or_default())
        .snippet(decode_html_entities(&gmail_msg.snippet))
        .received_at(received_at)
        .sent_at(sent_at)
        .rfc822_message_id(rfc822_message_id)
        .labels(gmail_msg.label_ids.unwrap_or_default())
        .attachments(body.attachments)
        .build()
}

/// Extract a header value by name
fn extract_header<'a>(headers: &'a [Header], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

fn addresses(headers: &[Header], name: &str) -> Vec<EmailAddress> {
    extract_header(headers, name)
        .map(parse_address_list)
        .unwrap_or_default()
}

/// Parse an RFC 2822 Date header, tolerating a trailing zone comment
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let without_comment = match value.rfind(" (") {
        Some(idx) if value.ends_with(')') => &value[..idx],
        _ => value,
    };

    DateTime::parse_from_rfc2822(without_comment)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse a header address list such as `"Doe, John" <j@x.com>, a@y.com`
///
/// Commas inside quoted names or angle brackets do not split entries. An
/// entry that fails strict parsing falls back to a plain `name <addr>` split.
pub fn parse_address_list(s: &str) -> Vec<EmailAddress> {
    split_addresses(s)
        .into_iter()
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| parse_mailbox(entry).unwrap_or_else(|| EmailAddress::parse(entry)))
        .collect()
}

/// Split on top-level commas
fn split_addresses(s: &str) -> Vec<&str> {
    let mut entries = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut angle_depth = 0usize;
    let mut paren_depth = 0usize;
    let mut start = 0;

    for (i, ch) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => angle_depth += 1,
            '>' if !in_quotes => angle_depth = angle_depth.saturating_sub(1),
            '(' if !in_quotes => paren_depth += 1,
            ')' if !in_quotes => paren_depth = paren_depth.saturating_sub(1),
            ',' if !in_quotes && angle_depth == 0 && paren_depth == 0 => {
                entries.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    entries.push(&s[start..]);
    entries
}

/// Strict parse of one mailbox: `addr`, `<addr>` or `name <addr>`
fn parse_mailbox(entry: &str) -> Option<EmailAddress> {
    let entry = strip_comments(entry.trim());
    let entry = entry.trim();

    match entry.find('<') {
        Some(open) => {
            let rest = &entry[open + 1..];
            let close = rest.find('>')?;
            if !rest[close + 1..].trim().is_empty() {
                return None;
            }
            let addr = rest[..close].trim();
            if !is_valid_addr(addr) {
                return None;
            }
            let name = unquote(entry[..open].trim())?;
            Some(EmailAddress {
                name: if name.is_empty() { None } else { Some(name) },
                email: addr.to_string(),
            })
        }
        None if is_valid_addr(entry) => Some(EmailAddress::new(entry)),
        None => None,
    }
}

/// Remove `(comment)` sections outside quotes
fn strip_comments(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_quotes = false;
    let mut depth = 0usize;
    for ch in s.chars() {
        match ch {
            '"' if depth == 0 => {
                in_quotes = !in_quotes;
                out.push(ch);
            }
            '(' if !in_quotes => depth += 1,
            ')' if !in_quotes && depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}

/// Unquote a display name; `None` when quotes are unbalanced
fn unquote(name: &str) -> Option<String> {
    if let Some(inner) = name.strip_prefix('"') {
        let inner = inner.strip_suffix('"')?;
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(ch) = chars.next() {
            if ch == '\\' {
                out.push(chars.next()?);
            } else {
                out.push(ch);
            }
        }
        return Some(out);
    }

    if name.contains('"') {
        return None;
    }
    Some(name.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn is_valid_addr(addr: &str) -> bool {
    let Some((local, domain)) = addr.rsplit_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !addr.chars().any(|c| c.is_whitespace() || matches!(c, '<' | '>' | ',' | '"'))
}

/// Bodies and attachments collected from the MIME tree
#[derive(Default)]
struct ParsedBody {
    text: Option<String>,
    html: Option<String>,
    attachments: Vec<Attachment>,
}

/// Depth-first MIME walk
///
/// A part with a filename and an attachment id is recorded as an attachment.
/// A part with children recurses. A leaf text/plain or text/html part fills
/// the matching body once; later parts of the same type are ignored.
fn walk_part(part: &MessagePart, body: &mut ParsedBody) {
    let filename = part.filename.as_deref().unwrap_or_default();
    if let Some(part_body) = &part.body
        && !filename.is_empty()
        && part_body
            .attachment_id
            .as_deref()
            .is_some_and(|id| !id.is_empty())
    {
        let size = part_body.size.unwrap_or(0).min(i32::MAX as u64) as i32;
        body.attachments.push(Attachment {
            part_id: part.part_id.clone().unwrap_or_default(),
            filename: filename.to_string(),
            mime_type: part.mime_type.clone().unwrap_or_default(),
            size,
        });
    }

    if let Some(children) = part.parts.as_deref()
        && !children.is_empty()
    {
        for child in children {
            walk_part(child, body);
        }
        return;
    }

    let Some(data) = part
        .body
        .as_ref()
        .and_then(|b| b.data.as_deref())
        .filter(|d| !d.is_empty())
    else {
        return;
    };

    let slot = match base_mime_type(part.mime_type.as_deref()).as_str() {
        "text/plain" => &mut body.text,
        "text/html" => &mut body.html,
        _ => return,
    };

    if slot.is_none()
        && let Some(decoded) = decode_base64_body(data)
    {
        *slot = Some(decoded);
    }
}

/// `text/plain; charset=UTF-8` -> `text/plain`
fn base_mime_type(mime_type: Option<&str>) -> String {
    mime_type
        .unwrap_or_default()
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Decode base64-encoded body data
///
/// Gmail uses URL-safe base64 but padding can vary, so we try multiple decoders.
fn decode_base64_body(data: &str) -> Option<String> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE};

    let decoders: &[&base64::engine::GeneralPurpose] =
        &[&BASE64_URL_SAFE_NO_PAD, &URL_SAFE, &STANDARD, &STANDARD_NO_PAD];

    let data = data.trim();
    decoders
        .iter()
        .find_map(|decoder| decoder.decode(data).ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Decode HTML entities in snippet text
fn decode_html_entities(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}

/// Crude HTML to text: drops script/style blocks, replaces tags with spaces
pub fn extract_plain_text(html: &str) -> String {
    let mut text = remove_tag_and_content(html, "script");
    text = remove_tag_and_content(&text, "style");

    let mut out = String::with_capacity(text.len());
    let mut rest = text.as_str();
    while let Some(start) = rest.find('<') {
        let Some(end) = rest[start..].find('>') else {
            break;
        };
        out.push_str(&rest[..start]);
        out.push(' ');
        rest = &rest[start + end + 1..];
    }
    out.push_str(rest);

    out.trim().to_string()
}

/// Remove every `<tag ...>...</tag>` block, case-insensitively
fn remove_tag_and_content(html: &str, tag: &str) -> String {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut result = html.to_string();

    loop {
        // ASCII lowercasing keeps byte offsets aligned with `result`
        let lower = result.to_ascii_lowercase();
        let Some(start) = lower.find(&open) else {
            break;
        };
        let Some(end) = lower[start..].find(&close) else {
            break;
        };
        result.replace_range(start..start + end + close.len(), "");
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::api::MessageBody;

    fn header(name: &str, value: &str) -> Header {
        Header {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    fn b64(s: &str) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(s)
    }

    fn leaf(mime_type: &str, data: &str) -> MessagePart {
        MessagePart {
            mime_type: Some(mime_type.to_string()),
            body: Some(MessageBody {
                size: Some(data.len() as u64),
                data: Some(b64(data)),
                attachment_id: None,
            }),
            ..Default::default()
        }
    }

    fn message(payload: Option<MessagePart>, labels: &[&str]) -> GmailMessage {
        GmailMessage {
            id: "m1".into(),
            thread_id: "t1".into(),
            label_ids: Some(labels.iter().map(|s| s.to_string()).collect()),
            snippet: "Tom &amp; Jerry".into(),
            internal_date: Some("1700000000000".into()),
            payload,
            ..Default::default()
        }
    }

    #[test]
    fn test_extract_header_case_insensitive() {
        let headers = vec![header("FROM", "test@example.com")];
        assert_eq!(extract_header(&headers, "from"), Some("test@example.com"));
        assert_eq!(extract_header(&headers, "Cc"), None);
    }

    #[test]
    fn test_parse_address_list() {
        let addrs = parse_address_list("alice@example.com, Bob <bob@example.com>");
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].email, "alice@example.com");
        assert_eq!(addrs[1].email, "bob@example.com");
        assert_eq!(addrs[1].name, Some("Bob".to_string()));
    }

    #[test]
    fn test_parse_address_list_quoted_comma() {
        let addrs = parse_address_list(r#""Doe, John" <john@example.com>, "A \"B\"" <ab@example.com>"#);
        assert_eq!(addrs.len(), 2);
        assert_eq!(addrs[0].name.as_deref(), Some("Doe, John"));
        assert_eq!(addrs[0].email, "john@example.com");
        assert_eq!(addrs[1].name.as_deref(), Some(r#"A "B""#));
    }

    #[test]
    fn test_parse_address_with_comment() {
        let addrs = parse_address_list("jane@example.com (Jane Smith)");
        assert_eq!(addrs[0].email, "jane@example.com");
    }

    #[test]
    fn test_malformed_address_falls_back() {
        let addrs = parse_address_list("Weird Name <not an address>");
        assert_eq!(addrs.len(), 1);
        assert_eq!(addrs[0].name.as_deref(), Some("Weird Name"));
        assert_eq!(addrs[0].email, "not an address");
    }

    #[test]
    fn test_parse_date() {
        let dt = parse_date("Tue, 14 Nov 2023 22:13:20 +0000 (UTC)").unwrap();
        assert_eq!(dt.timestamp(), 1700000000);
        assert!(parse_date("not a date").is_none());
    }

    #[test]
    fn test_normalize_multipart() {
        let payload = MessagePart {
            mime_type: Some("multipart/mixed".into()),
            headers: Some(vec![
                header("From", "Alice <alice@example.com>"),
                header("To", "me@example.com, other@example.com"),
                header("Subject", "Report"),
                header("Message-ID", "<abc@mail.example.com>"),
                header("Date", "Tue, 14 Nov 2023 22:13:20 +0000"),
            ]),
            parts: Some(vec![
                MessagePart {
                    mime_type: Some("multipart/alternative".into()),
                    parts: Some(vec![
                        leaf("text/plain; charset=UTF-8", "plain body"),
                        leaf("text/html", "<p>html body</p>"),
                    ]),
                    ..Default::default()
                },
                // A later text part must not override the first
                leaf("text/plain", "second plain"),
                MessagePart {
                    part_id: Some("2".into()),
                    mime_type: Some("application/pdf".into()),
                    filename: Some("report.pdf".into()),
                    body: Some(MessageBody {
                        size: Some(5_000_000_000),
                        data: None,
                        attachment_id: Some("att-1".into()),
                    }),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        };

        let email = normalize_message(message(Some(payload), &["INBOX", "UNREAD"]), 7);
        assert_eq!(email.account_id, 7);
        assert_eq!(email.provider_message_id, "m1");
        assert_eq!(email.thread_id.as_deref(), Some("t1"));
        assert_eq!(email.from.email, "alice@example.com");
        assert_eq!(email.to.len(), 2);
        assert_eq!(email.subject, "Report");
        assert_eq!(email.body_text, "plain body");
        assert_eq!(email.body_html, "<p>html body</p>");
        assert_eq!(email.snippet, "Tom & Jerry");
        assert_eq!(email.rfc822_message_id.as_deref(), Some("<abc@mail.example.com>"));
        assert_eq!(email.received_at.timestamp_millis(), 1_700_000_000_000);
        assert!(email.sent_at.is_some());
        assert!(!email.is_read);

        assert!(email.has_attachments);
        assert_eq!(email.attachments.len(), 1);
        assert_eq!(email.attachments[0].filename, "report.pdf");
        assert_eq!(email.attachments[0].part_id, "2");
        assert_eq!(email.attachments[0].size, i32::MAX);
    }

    #[test]
    fn test_alternative_with_html_first() {
        let payload = MessagePart {
            mime_type: Some("multipart/alternative".into()),
            headers: Some(vec![header("Subject", "Newsletter")]),
            parts: Some(vec![
                leaf("text/html; charset=UTF-8", "<h1>Issue 12</h1>"),
                leaf("text/plain; charset=UTF-8", "Issue 12"),
            ]),
            ..Default::default()
        };

        let email = normalize_message(message(Some(payload), &["INBOX"]), 3);
        assert_eq!(email.body_html, "<h1>Issue 12</h1>");
        assert_eq!(email.body_text, "Issue 12");
        assert!(!email.has_attachments);
    }

    #[test]
    fn test_normalize_without_payload() {
        let email = normalize_message(message(None, &["INBOX"]), 1);
        assert!(email.body_text.is_empty());
        assert!(email.body_html.is_empty());
        assert!(email.from.email.is_empty());
        assert!(email.is_read);
        assert!(!email.has_attachments);
    }

    #[test]
    fn test_single_part_html() {
        let mut payload = leaf("text/html", "<b>only html</b>");
        payload.headers = Some(vec![header("Subject", "x")]);
        let email = normalize_message(message(Some(payload), &[]), 1);
        assert!(email.body_text.is_empty());
        assert_eq!(email.body_html, "<b>only html</b>");
    }

    #[test]
    fn test_filename_without_attachment_id_is_inline() {
        let mut part = leaf("text/plain", "inline text");
        part.filename = Some("note.txt".into());
        let payload = MessagePart {
            mime_type: Some("multipart/mixed".into()),
            parts: Some(vec![part]),
            ..Default::default()
        };
        let email = normalize_message(message(Some(payload), &[]), 1);
        assert!(!email.has_attachments);
        assert_eq!(email.body_text, "inline text");
    }

    #[test]
    fn test_received_at_falls_back_to_date_header() {
        let payload = MessagePart {
            headers: Some(vec![header("Date", "Tue, 14 Nov 2023 22:13:20 +0000")]),
            ..Default::default()
        };
        let mut msg = message(Some(payload), &[]);
        msg.internal_date = None;
        let email = normalize_message(msg, 1);
        assert_eq!(email.received_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_decode_base64_body() {
        // "Hello, World!" in base64url
        assert_eq!(decode_base64_body("SGVsbG8sIFdvcmxkIQ"), Some("Hello, World!".to_string()));
        assert_eq!(decode_base64_body("SGVsbG8sIFdvcmxkIQ=="), Some("Hello, World!".to_string()));
    }

    #[test]
    fn test_decode_html_entities() {
        assert_eq!(
            decode_html_entities("Hello &amp; welcome &lt;user&gt;"),
            "Hello & welcome <user>"
        );
        // Decoded ampersand must not start a second entity
        assert_eq!(decode_html_entities("&amp;lt;"), "&lt;");
    }

    #[test]
    fn test_extract_plain_text() {
        let html = "<html><head><STYLE>p{color:red}</STYLE><script>alert(1)</script></head>\
                    <body><p>Hello</p><p>World</p></body></html>";
        let text = extract_plain_text(html);
        assert!(text.contains("Hello"));
        assert!(text.contains("World"));
        assert!(!text.contains("alert"));
        assert!(!text.contains("color"));
        assert!(!text.contains('<'));
    }
}
