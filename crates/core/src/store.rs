// Backend traits consumed by the tracker
//
// EventStore is the durable column store (system of record).
// CacheStore is the key-value cache backing the real-time views.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{CacheError, StoreError};
use crate::event::{Event, EventCategory};
use crate::report::{EventNameCount, EventSearch, SearchPage, TimeBucket, TimeGranularity};

/// Durable column store for events
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Name of this store (for logging)
    fn name(&self) -> &'static str;

    /// Write a batch of events in one bulk insert, preserving order
    async fn insert_events(&self, events: &[Event]) -> Result<(), StoreError>;

    /// Check that the store is reachable
    async fn ping(&self) -> Result<(), StoreError>;

    /// Count events whose timestamp falls within `[start, end]`
    async fn count_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        category: Option<EventCategory>,
    ) -> Result<u64, StoreError>;

    /// Look up a single persisted event
    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError>;

    /// Most frequent event names in `[start, end]`, by count descending then
    /// name ascending
    async fn top_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EventNameCount>, StoreError>;

    /// Distinct non-null user ids in `[start, end]`
    async fn active_users(&self, start: DateTime<Utc>, end: DateTime<Utc>)
        -> Result<u64, StoreError>;

    /// Event counts per UTC bucket, oldest first; empty buckets are omitted
    async fn time_series(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: TimeGranularity,
        category: Option<EventCategory>,
    ) -> Result<Vec<TimeBucket>, StoreError>;

    /// One page of events matching the search filters, ordered by timestamp
    async fn search_events(&self, search: &EventSearch) -> Result<SearchPage, StoreError>;
}

/// Key-value cache with Redis semantics
///
/// List indices follow Redis conventions: inclusive, negative values count
/// from the end.
#[async_trait]
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &'static str;

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Prepend a value, returning the new list length
    async fn lpush(&self, key: &str, value: String) -> Result<usize, CacheError>;

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError>;

    async fn lrange(&self, key: &str, start: isize, stop: isize)
        -> Result<Vec<String>, CacheError>;

    /// Increment a counter, returning the new value
    async fn incr(&self, key: &str) -> Result<i64, CacheError>;

    /// Set a key's time to live; returns false if the key does not exist
    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}
