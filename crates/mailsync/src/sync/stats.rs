//! Per-account mailbox statistics

use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::label::{self, CATEGORIES};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MailboxStats {
    pub total_messages: usize,
    pub unread_messages: usize,
    pub starred_messages: usize,
    pub important_messages: usize,
    /// Count per `CATEGORY_*` label
    pub category_counts: BTreeMap<String, usize>,
    /// Count per label id across all messages
    pub label_counts: BTreeMap<String, usize>,
}

impl MailboxStats {
    /// Tally label-derived counters from every live message's label set
    ///
    /// Scans in memory, so cost grows with the mailbox.
    pub fn from_label_sets(
        total_messages: usize,
        unread_messages: usize,
        label_sets: &[Vec<String>],
    ) -> Self {
        let mut stats = Self {
            total_messages,
            unread_messages,
            ..Self::default()
        };

        for labels in label_sets {
            if label::has_label(labels, label::STARRED) {
                stats.starred_messages += 1;
            }
            if label::has_label(labels, label::IMPORTANT) {
                stats.important_messages += 1;
            }
            for category in CATEGORIES {
                if label::has_label(labels, category) {
                    *stats.category_counts.entry(category.to_string()).or_default() += 1;
                }
            }
            for l in labels {
                *stats.label_counts.entry(l.clone()).or_default() += 1;
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(ls: &[&str]) -> Vec<String> {
        ls.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_from_label_sets() {
        let sets = vec![
            labels(&["INBOX", "STARRED", "CATEGORY_SOCIAL"]),
            labels(&["INBOX", "IMPORTANT", "UNREAD"]),
            labels(&["SENT", "STARRED"]),
        ];
        let stats = MailboxStats::from_label_sets(3, 1, &sets);

        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.unread_messages, 1);
        assert_eq!(stats.starred_messages, 2);
        assert_eq!(stats.important_messages, 1);
        assert_eq!(stats.category_counts.get("CATEGORY_SOCIAL"), Some(&1));
        assert_eq!(stats.category_counts.get("CATEGORY_PERSONAL"), None);
        assert_eq!(stats.label_counts.get("INBOX"), Some(&2));
        assert_eq!(stats.label_counts.get("SENT"), Some(&1));
    }

    #[test]
    fn test_empty_mailbox() {
        let stats = MailboxStats::from_label_sets(0, 0, &[]);
        assert_eq!(stats, MailboxStats::default());
    }
}
