//! Row types for the conversation store.
//!
//! Identifiers are strongly-typed wrappers over SQLite row ids so a message id
//! can never be passed where a conversation id is expected.

use core::fmt;
use core::num::ParseIntError;
use core::str::FromStr;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Storage format for timestamps (naive local ISO-8601 with microseconds).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Declare an integer row-id newtype with a consistent API.
macro_rules! define_row_id {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[repr(transparent)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            /// Borrow the raw row id.
            #[inline]
            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            #[inline]
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl FromStr for $name {
            type Err = ParseIntError;

            #[inline]
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.trim().parse()?))
            }
        }

        impl rusqlite::types::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.0))
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(
                value: rusqlite::types::ValueRef<'_>,
            ) -> rusqlite::types::FromSqlResult<Self> {
                i64::column_result(value).map(Self)
            }
        }
    };
}

define_row_id!(
    /// Identifier of a conversation. Monotonic, never reused.
    ConversationId
);

define_row_id!(
    /// Identifier of a stored message.
    MessageId
);

/// Author of a message.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// User input.
    User,
    /// Assistant response.
    Assistant,
}

impl MessageRole {
    /// Stable string form for storage and provider payloads.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(value.to_string()),
        }
    }
}

/// A conversation row as listed in the sidebar.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique identifier.
    pub id: ConversationId,
    /// Display title.
    pub title: String,
    /// Model identifier; empty when a legacy row has none.
    pub model: String,
    /// Creation timestamp as stored (ISO-8601 text).
    pub timestamp: String,
}

impl Conversation {
    /// Creation date, if the stored timestamp parses.
    #[must_use]
    pub fn created_on(&self) -> Option<NaiveDate> {
        parse_timestamp_date(&self.timestamp)
    }
}

/// A stored message.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Row identifier.
    pub id: MessageId,
    /// Owning conversation.
    pub conversation_id: ConversationId,
    /// Author.
    pub role: MessageRole,
    /// Text content.
    pub content: String,
    /// Insertion timestamp as stored.
    pub timestamp: String,
}

/// Current local time in storage format.
#[must_use]
pub fn now_timestamp() -> String {
    Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string()
}

/// Extract the calendar date from a stored timestamp.
///
/// Accepts RFC 3339, naive ISO-8601 date-times (with or without fractional
/// seconds) and bare dates.
#[must_use]
pub fn parse_timestamp_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(dt.date());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip_through_str() {
        assert_eq!("user".parse::<MessageRole>(), Ok(MessageRole::User));
        assert_eq!("assistant".parse::<MessageRole>(), Ok(MessageRole::Assistant));
        assert_eq!(MessageRole::Assistant.to_string(), "assistant");
        assert!("system".parse::<MessageRole>().is_err());
    }

    #[test]
    fn test_conversation_id_parses_trimmed_input() {
        assert_eq!(" 42 ".parse::<ConversationId>(), Ok(ConversationId(42)));
        assert!("abc".parse::<ConversationId>().is_err());
    }

    #[test]
    fn test_parse_timestamp_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 9);
        assert_eq!(parse_timestamp_date("2024-03-09T14:02:11.123456"), expected);
        assert_eq!(parse_timestamp_date("2024-03-09T14:02:11"), expected);
        assert_eq!(parse_timestamp_date("2024-03-09 14:02:11"), expected);
        assert_eq!(parse_timestamp_date("2024-03-09"), expected);
        assert_eq!(parse_timestamp_date("not a date"), None);
        assert_eq!(parse_timestamp_date(""), None);
    }

    #[test]
    fn test_offset_timestamps_keep_their_written_date() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 10);
        assert_eq!(parse_timestamp_date("2024-03-10T23:30:00+05:00"), expected);
        assert_eq!(parse_timestamp_date("2024-03-10T00:30:00-08:00"), expected);
        assert_eq!(parse_timestamp_date("2024-03-10T12:00:00Z"), expected);
    }

    #[test]
    fn test_now_timestamp_is_parseable() {
        let stamp = now_timestamp();
        assert_eq!(parse_timestamp_date(&stamp), Some(Local::now().date_naive()));
    }
}
