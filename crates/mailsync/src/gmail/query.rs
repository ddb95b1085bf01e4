//! Gmail search query construction

use chrono::{DateTime, NaiveDate, Utc};

pub const IN_INBOX: &str = "in:inbox";
pub const IN_SENT: &str = "in:sent";

/// `{scope} newer_than:{days}d`
pub fn newer_than(scope: &str, days: u32) -> String {
    format!("{} newer_than:{}d", scope, days)
}

/// `{scope} after:{epoch seconds}`
///
/// Gmail accepts a Unix timestamp for `after:`, which keeps the window exact
/// to the second instead of rounding to a whole day.
pub fn after_instant(scope: &str, since: DateTime<Utc>) -> String {
    format!("{} after:{}", scope, since.timestamp())
}

/// Structured search filters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    pub from: Option<String>,
    pub to: Option<String>,
    pub subject: Option<String>,
    /// Free-text words that must appear
    pub has_words: Option<String>,
    /// Words that must not appear
    pub doesnt_have: Option<String>,
    pub after: Option<NaiveDate>,
    pub before: Option<NaiveDate>,
    pub has_attachment: bool,
    pub is_unread: bool,
    pub is_starred: bool,
    pub labels: Vec<String>,
}

impl SearchOptions {
    /// Render as a Gmail query string (terms space separated)
    pub fn build_query(&self) -> String {
        let mut terms: Vec<String> = Vec::new();

        if let Some(from) = non_empty(&self.from) {
            terms.push(format!("from:{}", from));
        }
        if let Some(to) = non_empty(&self.to) {
            terms.push(format!("to:{}", to));
        }
        if let Some(subject) = non_empty(&self.subject) {
            terms.push(format!("subject:{}", subject));
        }
        if let Some(words) = non_empty(&self.has_words) {
            terms.push(words.to_string());
        }
        if let Some(words) = non_empty(&self.doesnt_have) {
            terms.push(format!("-{}", words));
        }
        if let Some(after) = self.after {
            terms.push(format!("after:{}", after.format("%Y/%m/%d")));
        }
        if let Some(before) = self.before {
            terms.push(format!("before:{}", before.format("%Y/%m/%d")));
        }
        if self.has_attachment {
            terms.push("has:attachment".to_string());
        }
        if self.is_unread {
            terms.push("is:unread".to_string());
        }
        if self.is_starred {
            terms.push("is:starred".to_string());
        }
        for label in &self.labels {
            terms.push(format!("label:{}", label));
        }

        terms.join(" ")
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sync_queries() {
        assert_eq!(newer_than(IN_INBOX, 7), "in:inbox newer_than:7d");
        let since = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(after_instant(IN_SENT, since), "in:sent after:1704164645");
    }

    #[test]
    fn test_build_query_order() {
        let opts = SearchOptions {
            from: Some("alice@example.com".into()),
            to: Some("bob@example.com".into()),
            subject: Some("invoice".into()),
            has_words: Some("urgent".into()),
            doesnt_have: Some("spam".into()),
            after: NaiveDate::from_ymd_opt(2024, 3, 1),
            before: NaiveDate::from_ymd_opt(2024, 3, 31),
            has_attachment: true,
            is_unread: true,
            is_starred: true,
            labels: vec!["Work".into(), "Clients".into()],
        };

        assert_eq!(
            opts.build_query(),
            "from:alice@example.com to:bob@example.com subject:invoice urgent -spam \
             after:2024/03/01 before:2024/03/31 has:attachment is:unread is:starred \
             label:Work label:Clients"
        );
    }

    #[test]
    fn test_empty_fields_skipped() {
        let opts = SearchOptions {
            from: Some("  ".into()),
            is_unread: true,
            ..Default::default()
        };
        assert_eq!(opts.build_query(), "is:unread");
        assert_eq!(SearchOptions::default().build_query(), "");
    }
}
