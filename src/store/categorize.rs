//! Recency grouping for the conversation list.

use std::fmt;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::store::types::Conversation;

/// Recency bucket a conversation falls into.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum RecencyBucket {
    /// Created today.
    Today,
    /// Created yesterday.
    Yesterday,
    /// Created within the last seven days, before yesterday.
    LastWeek,
    /// Created between seven and thirty days ago.
    LastMonth,
    /// Anything older, or dated in the future.
    BeforeLastMonth,
}

impl RecencyBucket {
    /// All buckets in display order.
    pub const ALL: [Self; 5] = [
        Self::Today,
        Self::Yesterday,
        Self::LastWeek,
        Self::LastMonth,
        Self::BeforeLastMonth,
    ];

    /// Heading shown above the bucket.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Today => "Today",
            Self::Yesterday => "Yesterday",
            Self::LastWeek => "Last Week",
            Self::LastMonth => "Last Month",
            Self::BeforeLastMonth => "Before Last Month",
        }
    }

    /// Bucket for a creation date relative to `today`.
    #[must_use]
    pub fn for_date(date: NaiveDate, today: NaiveDate) -> Self {
        let yesterday = today - Duration::days(1);
        let week_ago = today - Duration::days(7);
        let month_ago = today - Duration::days(30);

        if date == today {
            Self::Today
        } else if date == yesterday {
            Self::Yesterday
        } else if week_ago <= date && date < today {
            Self::LastWeek
        } else if month_ago <= date && date < week_ago {
            Self::LastMonth
        } else {
            Self::BeforeLastMonth
        }
    }
}

impl fmt::Display for RecencyBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Conversations sharing a recency bucket.
#[derive(Clone, Debug, Serialize)]
pub struct ConversationGroup {
    /// The bucket.
    pub bucket: RecencyBucket,
    /// Heading for display.
    pub label: &'static str,
    /// Members, in the order they were supplied.
    pub conversations: Vec<Conversation>,
}

/// Group conversations by recency.
///
/// Only non-empty groups are returned, in [`RecencyBucket::ALL`] order. A
/// timestamp that cannot be parsed counts as `today`.
#[must_use]
pub fn categorize(conversations: &[Conversation], today: NaiveDate) -> Vec<ConversationGroup> {
    let mut groups: Vec<ConversationGroup> = RecencyBucket::ALL
        .iter()
        .map(|&bucket| ConversationGroup {
            bucket,
            label: bucket.label(),
            conversations: Vec::new(),
        })
        .collect();

    for conversation in conversations {
        let date = conversation.created_on().unwrap_or(today);
        let bucket = RecencyBucket::for_date(date, today);
        if let Some(group) = groups.iter_mut().find(|g| g.bucket == bucket) {
            group.conversations.push(conversation.clone());
        }
    }

    groups.retain(|g| !g.conversations.is_empty());
    groups
}
