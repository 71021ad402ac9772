//! Archive data model: channels, messages and their ordering marker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Width of the integer-length prefix in decimal sort keys.
const LENGTH_WIDTH: usize = 10;

/// Opaque, totally ordered marker for a message's place in channel history.
///
/// Upstream positions are usually decimal timestamps (`1700000000.000100`).
/// Those compare numerically at any precision; anything else compares as a
/// plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Position(String);

impl Position {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// String whose lexicographic order matches the position order. Persisted
    /// next to the raw position so SQLite can sort by it.
    ///
    /// Decimals encode as `<integer digit count>:<integer>.<fraction>` with
    /// leading integer zeros and trailing fraction zeros removed, so equal
    /// digit counts compare digit by digit and a shorter fraction is a prefix
    /// of any longer one.
    pub fn sort_key(&self) -> String {
        match split_decimal(&self.0) {
            Some((integer, fraction)) => format!(
                "{length:0>width$}:{integer}.{fraction}",
                length = integer.len(),
                width = LENGTH_WIDTH,
            ),
            None => self.0.clone(),
        }
    }
}

fn split_decimal(value: &str) -> Option<(&str, &str)> {
    let (integer, fraction) = value.split_once('.').unwrap_or((value, ""));
    if integer.is_empty()
        || !integer.bytes().all(|byte| byte.is_ascii_digit())
        || !fraction.bytes().all(|byte| byte.is_ascii_digit())
    {
        return None;
    }
    Some((integer.trim_start_matches('0'), fraction.trim_end_matches('0')))
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key()
            .cmp(&other.sort_key())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Position {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A registered channel and its archiving progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub channel_id: String,
    pub display_name: String,
    /// Everything at or before this position is archived. `None` means
    /// archiving starts from the beginning of history.
    pub cursor: Option<Position>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One archived message. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub channel_id: String,
    pub position: Position,
    pub author: Option<String>,
    pub body: String,
}

/// Row cap for message queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryLimit {
    Bounded(u32),
    Unbounded,
}

impl QueryLimit {
    /// SQLite treats a negative LIMIT as "no limit".
    pub(crate) fn as_sql(self) -> i64 {
        match self {
            QueryLimit::Bounded(limit) => i64::from(limit),
            QueryLimit::Unbounded => -1,
        }
    }
}
