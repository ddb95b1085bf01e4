//! Well-known Gmail label identifiers

pub const INBOX: &str = "INBOX";
pub const SENT: &str = "SENT";
pub const DRAFT: &str = "DRAFT";
pub const SPAM: &str = "SPAM";
pub const TRASH: &str = "TRASH";
pub const UNREAD: &str = "UNREAD";
pub const STARRED: &str = "STARRED";
pub const IMPORTANT: &str = "IMPORTANT";

pub const CATEGORY_PERSONAL: &str = "CATEGORY_PERSONAL";
pub const CATEGORY_SOCIAL: &str = "CATEGORY_SOCIAL";
pub const CATEGORY_PROMOTIONS: &str = "CATEGORY_PROMOTIONS";
pub const CATEGORY_UPDATES: &str = "CATEGORY_UPDATES";
pub const CATEGORY_FORUMS: &str = "CATEGORY_FORUMS";

/// Inbox categories tracked in mailbox statistics
pub const CATEGORIES: [&str; 5] = [
    CATEGORY_PERSONAL,
    CATEGORY_SOCIAL,
    CATEGORY_PROMOTIONS,
    CATEGORY_UPDATES,
    CATEGORY_FORUMS,
];

/// Check whether a label set contains `label`
pub fn has_label(labels: &[String], label: &str) -> bool {
    labels.iter().any(|l| l == label)
}

/// Gmail inbox category of a message, defaulting to Personal
pub fn category_of(labels: &[String]) -> &str {
    labels
        .iter()
        .find(|l| l.starts_with("CATEGORY_"))
        .map(String::as_str)
        .unwrap_or(CATEGORY_PERSONAL)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(ls: &[&str]) -> Vec<String> {
        ls.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_category_of() {
        assert_eq!(category_of(&labels(&["INBOX", "CATEGORY_SOCIAL"])), CATEGORY_SOCIAL);
        assert_eq!(category_of(&labels(&["INBOX"])), CATEGORY_PERSONAL);
        assert_eq!(category_of(&[]), CATEGORY_PERSONAL);
    }

    #[test]
    fn test_has_label() {
        let ls = labels(&["INBOX", "UNREAD"]);
        assert!(has_label(&ls, UNREAD));
        assert!(!has_label(&ls, STARRED));
    }
}
