//! Message filtering.

use chrono::{FixedOffset, Local, NaiveDateTime, TimeZone};

use crate::domain::{ContentType, MessageRecord, Result};

use super::parser::{parse_date_bound, Bound};

/// Inclusive `[start, end]` bound on epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    #[must_use]
    pub const fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Builds a range from user-supplied dates; open ends are unbounded.
    ///
    /// Dates are interpreted in `offset`, or the local zone when `None`.
    ///
    /// # Errors
    /// Returns `InvalidData` if a date cannot be parsed.
    pub fn from_inputs(
        start: Option<&str>,
        end: Option<&str>,
        offset: Option<FixedOffset>,
    ) -> Result<Option<Self>> {
        if start.is_none() && end.is_none() {
            return Ok(None);
        }
        let start = start
            .map(|s| parse_date_bound(s, Bound::Start).map(|d| to_epoch(d, offset)))
            .transpose()?
            .unwrap_or(i64::MIN);
        let end = end
            .map(|s| parse_date_bound(s, Bound::End).map(|d| to_epoch(d, offset)))
            .transpose()?
            .unwrap_or(i64::MAX);
        Ok(Some(Self { start, end }))
    }

    /// An inverted range contains nothing.
    #[must_use]
    pub const fn contains(&self, timestamp: i64) -> bool {
        self.start <= timestamp && timestamp <= self.end
    }
}

fn to_epoch(naive: NaiveDateTime, offset: Option<FixedOffset>) -> i64 {
    let zoned = match offset {
        Some(tz) => tz.from_local_datetime(&naive).single().map(|dt| dt.timestamp()),
        None => Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.timestamp()),
    };
    zoned.unwrap_or_else(|| naive.and_utc().timestamp())
}

/// Composable predicates applied to merged messages (logical AND).
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub time_range: Option<TimeRange>,
    /// Case-insensitive substring of the content.
    pub keyword: Option<String>,
    /// Allowed content types; empty allows all.
    pub content_types: Vec<ContentType>,
}

impl MessageFilter {
    /// Filter keeping only text messages.
    #[must_use]
    pub fn text_only() -> Self {
        Self {
            content_types: vec![ContentType::Text],
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_time_range(mut self, range: Option<TimeRange>) -> Self {
        self.time_range = range;
        self
    }

    #[must_use]
    pub fn with_keyword(mut self, keyword: Option<&str>) -> Self {
        self.keyword = keyword
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_lowercase);
        self
    }

    /// Whether a record passes every configured predicate.
    #[must_use]
    pub fn matches(&self, record: &MessageRecord) -> bool {
        if let Some(range) = &self.time_range {
            if !range.contains(record.timestamp) {
                return false;
            }
        }
        if !self.content_types.is_empty() && !self.content_types.contains(&record.content_type) {
            return false;
        }
        self.keyword.as_deref().is_none_or(|keyword| {
            record.content.to_lowercase().contains(keyword)
        })
    }

    /// Lazily filters a record stream.
    pub fn apply<'f, I>(&'f self, records: I) -> impl Iterator<Item = MessageRecord> + 'f
    where
        I: IntoIterator<Item = MessageRecord>,
        I::IntoIter: 'f,
    {
        records.into_iter().filter(move |r| self.matches(r))
    }
}
