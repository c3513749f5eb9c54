//! Aggregate read models over persisted events
//!
//! Result rows for the column-store reports (top events, time series,
//! search pages) and the filters they take. The same types are produced by
//! every `EventStore`, so `matches` and `TimeGranularity::bucket_start`
//! define the semantics the SQL backends mirror.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, Duration, DurationRound, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::{Event, EventCategory};

/// Default number of rows returned by `top_events`
pub const DEFAULT_TOP_EVENTS_LIMIT: usize = 10;

/// Default page size of `search_events`
pub const DEFAULT_SEARCH_LIMIT: usize = 100;

/// Largest page `search_events` returns
pub const MAX_SEARCH_LIMIT: usize = 1000;

/// Occurrences of one event name within a window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventNameCount {
    pub event_name: String,
    pub count: u64,
}

/// Events falling into one time bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeBucket {
    /// Start of the bucket (UTC)
    pub bucket: DateTime<Utc>,
    pub count: u64,
}

/// Bucket width of a time series
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeGranularity {
    Minute,
    #[default]
    Hour,
    Day,
    /// Weeks start on Monday
    Week,
    Month,
    Quarter,
    Year,
}

impl TimeGranularity {
    pub const ALL: [TimeGranularity; 7] = [
        TimeGranularity::Minute,
        TimeGranularity::Hour,
        TimeGranularity::Day,
        TimeGranularity::Week,
        TimeGranularity::Month,
        TimeGranularity::Quarter,
        TimeGranularity::Year,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeGranularity::Minute => "MINUTE",
            TimeGranularity::Hour => "HOUR",
            TimeGranularity::Day => "DAY",
            TimeGranularity::Week => "WEEK",
            TimeGranularity::Month => "MONTH",
            TimeGranularity::Quarter => "QUARTER",
            TimeGranularity::Year => "YEAR",
        }
    }

    /// Start of the UTC bucket containing `at`
    pub fn bucket_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let date = at.date_naive();
        let first_day = match self {
            TimeGranularity::Minute => {
                return at.duration_trunc(Duration::minutes(1)).unwrap_or(at);
            }
            TimeGranularity::Hour => return at.duration_trunc(Duration::hours(1)).unwrap_or(at),
            TimeGranularity::Day => Some(date),
            TimeGranularity::Week => {
                date.checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
            }
            TimeGranularity::Month => date.with_day(1),
            TimeGranularity::Quarter => {
                NaiveDate::from_ymd_opt(date.year(), date.month0() / 3 * 3 + 1, 1)
            }
            TimeGranularity::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1),
        };
        first_day.map_or(at, |day| day.and_time(NaiveTime::default()).and_utc())
    }
}

impl fmt::Display for TimeGranularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown granularity
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown time granularity: {0}")]
pub struct UnknownGranularity(pub String);

impl FromStr for TimeGranularity {
    type Err = UnknownGranularity;

    /// Case-insensitive
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TimeGranularity::ALL
            .into_iter()
            .find(|g| g.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownGranularity(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Filters and paging for `search_events`
#[derive(Debug, Clone, PartialEq)]
pub struct EventSearch {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub event_type: Option<EventCategory>,
    pub event_name: Option<String>,
    pub user_id: Option<String>,
    /// Substring matched against the event name or the JSON-encoded
    /// properties (case-sensitive)
    pub text: Option<String>,
    /// 1-based page number
    pub page: usize,
    pub limit: usize,
    pub sort_order: SortOrder,
}

impl EventSearch {
    /// Search `[start, end]`, newest first, first page of 100
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            event_type: None,
            event_name: None,
            user_id: None,
            text: None,
            page: 1,
            limit: DEFAULT_SEARCH_LIMIT,
            sort_order: SortOrder::Desc,
        }
    }

    pub fn with_event_type(mut self, event_type: EventCategory) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn with_event_name(mut self, event_name: impl Into<String>) -> Self {
        self.event_name = Some(event_name.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Empty text disables the text filter
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.text = (!text.is_empty()).then_some(text);
        self
    }

    /// Pages start at 1; limit is clamped to `1..=MAX_SEARCH_LIMIT`
    pub fn with_page(mut self, page: usize, limit: usize) -> Self {
        self.page = page.max(1);
        self.limit = limit.clamp(1, MAX_SEARCH_LIMIT);
        self
    }

    pub fn with_sort_order(mut self, sort_order: SortOrder) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Rows skipped before this page
    pub fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }

    /// Whether an event passes every filter (paging aside)
    pub fn matches(&self, event: &Event) -> bool {
        if event.timestamp < self.start || event.timestamp > self.end {
            return false;
        }
        if self.event_type.is_some_and(|t| event.event_type != t) {
            return false;
        }
        if let Some(name) = &self.event_name {
            if &event.event_name != name {
                return false;
            }
        }
        if let Some(user_id) = &self.user_id {
            if event.user_id.as_ref() != Some(user_id) {
                return false;
            }
        }
        match &self.text {
            Some(text) => {
                event.event_name.contains(text.as_str())
                    || serde_json::to_string(&event.properties)
                        .is_ok_and(|properties| properties.contains(text.as_str()))
            }
            None => true,
        }
    }
}

/// Paging metadata of a search result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub limit: usize,
    /// Events matching the filters across all pages
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(page: usize, limit: usize, total: u64) -> Self {
        let limit = limit.max(1);
        let offset = page.saturating_sub(1).saturating_mul(limit) as u64;
        Self {
            page,
            limit,
            total,
            total_pages: total.div_ceil(limit as u64),
            has_next: offset + (limit as u64) < total,
            has_prev: page > 1,
        }
    }
}

/// One page of search results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    pub events: Vec<Event>,
    pub pagination: Pagination,
}

impl SearchPage {
    /// No results, reported as page 1
    pub fn empty(limit: usize) -> Self {
        Self {
            events: Vec::new(),
            pagination: Pagination::new(1, limit, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventSource, Platform};
    use crate::JsonMap;
    use chrono::TimeZone;
    use serde_json::json;
    use uuid::Uuid;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn event(name: &str, user: Option<&str>, timestamp: DateTime<Utc>) -> Event {
        let mut properties = JsonMap::new();
        properties.insert("course".to_string(), json!("rust-101"));
        Event {
            id: Uuid::now_v7(),
            user_id: user.map(str::to_string),
            session_id: None,
            event_type: EventCategory::LearningEvent,
            event_name: name.to_string(),
            properties,
            timestamp,
            source: EventSource::WebApp,
            version: "1.0.0".to_string(),
            platform: Platform::Web,
            user_agent: None,
            ip_address: None,
            location: None,
            metadata: JsonMap::new(),
        }
    }

    #[test]
    fn test_bucket_start() {
        let t = at(2024, 8, 15, 13, 47, 29);
        let cases = [
            (TimeGranularity::Minute, at(2024, 8, 15, 13, 47, 0)),
            (TimeGranularity::Hour, at(2024, 8, 15, 13, 0, 0)),
            (TimeGranularity::Day, at(2024, 8, 15, 0, 0, 0)),
            // 2024-08-15 is a Thursday
            (TimeGranularity::Week, at(2024, 8, 12, 0, 0, 0)),
            (TimeGranularity::Month, at(2024, 8, 1, 0, 0, 0)),
            (TimeGranularity::Quarter, at(2024, 7, 1, 0, 0, 0)),
            (TimeGranularity::Year, at(2024, 1, 1, 0, 0, 0)),
        ];
        for (granularity, expected) in cases {
            assert_eq!(granularity.bucket_start(t), expected, "{}", granularity);
        }
    }

    #[test]
    fn test_granularity_parse_is_case_insensitive() {
        assert_eq!("day".parse::<TimeGranularity>().unwrap(), TimeGranularity::Day);
        assert_eq!("WEEK".parse::<TimeGranularity>().unwrap(), TimeGranularity::Week);
        assert!("fortnight".parse::<TimeGranularity>().is_err());
    }

    #[test]
    fn test_pagination() {
        let p = Pagination::new(1, 10, 25);
        assert_eq!(p.total_pages, 3);
        assert!(p.has_next);
        assert!(!p.has_prev);

        let p = Pagination::new(3, 10, 25);
        assert!(!p.has_next);
        assert!(p.has_prev);

        let p = Pagination::new(1, 10, 0);
        assert_eq!(p.total_pages, 0);
        assert!(!p.has_next);
    }

    #[test]
    fn test_search_paging_is_clamped() {
        let now = Utc::now();
        let search = EventSearch::new(now, now).with_page(0, 0);
        assert_eq!((search.page, search.limit, search.offset()), (1, 1, 0));

        let search = EventSearch::new(now, now).with_page(3, 5000);
        assert_eq!(search.limit, MAX_SEARCH_LIMIT);
        assert_eq!(search.offset(), 2 * MAX_SEARCH_LIMIT);
    }

    #[test]
    fn test_search_filters() {
        let t = at(2024, 8, 15, 12, 0, 0);
        let window = EventSearch::new(t - Duration::hours(1), t + Duration::hours(1));

        let lesson = event("LessonCompleted", Some("u1"), t);
        assert!(window.matches(&lesson));
        assert!(!window.matches(&event("LessonCompleted", Some("u1"), t + Duration::hours(2))));

        assert!(window.clone().with_user_id("u1").matches(&lesson));
        assert!(!window.clone().with_user_id("u2").matches(&lesson));
        assert!(!window.clone().with_event_name("Lesson").matches(&lesson));
        assert!(!window
            .clone()
            .with_event_type(EventCategory::SystemEvent)
            .matches(&lesson));

        assert!(window.clone().with_text("Lesson").matches(&lesson));
        assert!(window.clone().with_text("rust-101").matches(&lesson));
        assert!(!window.clone().with_text("lesson").matches(&lesson));
        assert!(window.clone().with_text("").matches(&lesson));
    }
}
