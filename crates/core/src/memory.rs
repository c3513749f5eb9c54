//! In-memory implementations of EventStore and CacheStore
//!
//! Used for dev mode (`--memory` in the CLI) and throughout the tests. Both
//! provide the same semantics as the ClickHouse and Redis backends, plus
//! failure injection so retry and degradation paths can be exercised.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::{CacheError, StoreError};
use crate::event::{Event, EventCategory};
use crate::report::{
    EventNameCount, EventSearch, Pagination, SearchPage, SortOrder, TimeBucket, TimeGranularity,
};
use crate::store::{CacheStore, EventStore};

// =============================================================================
// Event store
// =============================================================================

/// In-memory column store
///
/// Every insert attempt is recorded, including failed ones, so tests can
/// assert on exactly what the tracker tried to write.
pub struct InMemoryEventStore {
    persisted: RwLock<Vec<Event>>,
    attempts: Mutex<Vec<Vec<Event>>>,
    failing: AtomicBool,
    fail_next: AtomicUsize,
    available: AtomicBool,
    gate: watch::Sender<bool>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            persisted: RwLock::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
            fail_next: AtomicUsize::new(0),
            available: AtomicBool::new(true),
            gate,
        }
    }

    /// Make every insert fail until switched off again
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make the next `count` inserts fail
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Make ping report the store as unreachable
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Block inserts (after they are recorded) until `release` is called
    pub fn hold(&self) {
        self.gate.send_replace(true);
    }

    pub fn release(&self) {
        self.gate.send_replace(false);
    }

    /// Every batch passed to `insert_events`, in call order
    pub fn insert_attempts(&self) -> Vec<Vec<Event>> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Events that were written successfully, in write order
    pub fn events(&self) -> Vec<Event> {
        self.persisted.read().clone()
    }

    pub fn event_count(&self) -> usize {
        self.persisted.read().len()
    }

    fn persisted_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<Event> {
        self.persisted
            .read()
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .cloned()
            .collect()
    }

    fn should_fail(&self) -> bool {
        if self.failing.load(Ordering::SeqCst) {
            return true;
        }
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert_events(&self, events: &[Event]) -> Result<(), StoreError> {
        self.attempts.lock().push(events.to_vec());

        let mut gate = self.gate.subscribe();
        if gate.wait_for(|held| !*held).await.is_err() {
            return Err(StoreError::Unavailable("store dropped".to_string()));
        }

        if self.should_fail() {
            return Err(StoreError::Unavailable("injected insert failure".to_string()));
        }

        self.persisted.write().extend_from_slice(events);
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Connection("memory store marked unavailable".to_string()))
        }
    }

    async fn count_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        category: Option<EventCategory>,
    ) -> Result<u64, StoreError> {
        let count = self
            .persisted
            .read()
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp <= end)
            .filter(|e| category.map_or(true, |c| e.event_type == c))
            .count();
        Ok(count as u64)
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        Ok(self.persisted.read().iter().find(|e| e.id == id).cloned())
    }

    async fn top_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EventNameCount>, StoreError> {
        let mut counts: HashMap<String, u64> = HashMap::new();
        for event in self.persisted_between(start, end) {
            *counts.entry(event.event_name).or_default() += 1;
        }

        let mut top: Vec<EventNameCount> = counts
            .into_iter()
            .map(|(event_name, count)| EventNameCount { event_name, count })
            .collect();
        top.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.event_name.cmp(&b.event_name))
        });
        top.truncate(limit);
        Ok(top)
    }

    async fn active_users(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let users: HashSet<String> = self
            .persisted_between(start, end)
            .into_iter()
            .filter_map(|e| e.user_id)
            .collect();
        Ok(users.len() as u64)
    }

    async fn time_series(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: TimeGranularity,
        category: Option<EventCategory>,
    ) -> Result<Vec<TimeBucket>, StoreError> {
        let mut buckets: BTreeMap<DateTime<Utc>, u64> = BTreeMap::new();
        for event in self.persisted_between(start, end) {
            if category.map_or(true, |c| event.event_type == c) {
                *buckets.entry(granularity.bucket_start(event.timestamp)).or_default() += 1;
            }
        }
        Ok(buckets
            .into_iter()
            .map(|(bucket, count)| TimeBucket { bucket, count })
            .collect())
    }

    async fn search_events(&self, search: &EventSearch) -> Result<SearchPage, StoreError> {
        let mut matching: Vec<Event> = self
            .persisted
            .read()
            .iter()
            .filter(|e| search.matches(e))
            .cloned()
            .collect();
        match search.sort_order {
            SortOrder::Asc => matching.sort_by_key(|e| e.timestamp),
            SortOrder::Desc => matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
        }

        let total = matching.len() as u64;
        let events = matching
            .into_iter()
            .skip(search.offset())
            .take(search.limit)
            .collect();
        Ok(SearchPage {
            events,
            pagination: Pagination::new(search.page, search.limit, total),
        })
    }
}

// =============================================================================
// Cache
// =============================================================================

#[derive(Debug, Clone)]
enum CacheValue {
    Text(String),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: CacheValue,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory key-value cache with Redis-like expiry
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    failing: AtomicBool,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every command fail until switched off again
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Remaining time to live of a key, if it has one
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries
            .lock()
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    fn check(&self, command: &'static str) -> Result<(), CacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CacheError::Command {
                command,
                message: "injected cache failure".to_string(),
            });
        }
        Ok(())
    }

    fn wrong_type(command: &'static str) -> CacheError {
        CacheError::Command {
            command,
            message: "WRONGTYPE Operation against a key holding the wrong kind of value"
                .to_string(),
        }
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve Redis-style inclusive indices against a list length
fn resolve_range(start: isize, stop: isize, len: usize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl CacheStore for InMemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.check("SETEX")?;
        self.entries.lock().insert(
            key.to_string(),
            CacheEntry {
                value: CacheValue::Text(value),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        self.check("GET")?;
        let now = Instant::now();
        let entries = self.entries.lock();
        match entries.get(key).filter(|e| !e.is_expired(now)) {
            None => Ok(None),
            Some(CacheEntry {
                value: CacheValue::Text(text),
                ..
            }) => Ok(Some(text.clone())),
            Some(_) => Err(Self::wrong_type("GET")),
        }
    }

    async fn lpush(&self, key: &str, value: String) -> Result<usize, CacheError> {
        self.check("LPUSH")?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        let entry = entries.entry(key.to_string()).or_insert_with(|| CacheEntry {
            value: CacheValue::List(VecDeque::new()),
            expires_at: None,
        });
        match &mut entry.value {
            CacheValue::List(list) => {
                list.push_front(value);
                Ok(list.len())
            }
            CacheValue::Text(_) => Err(Self::wrong_type("LPUSH")),
        }
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), CacheError> {
        self.check("LTRIM")?;
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return Ok(());
        };
        let CacheValue::List(list) = &mut entry.value else {
            return Err(Self::wrong_type("LTRIM"));
        };
        match resolve_range(start, stop, list.len()) {
            Some((from, to)) => {
                list.truncate(to + 1);
                list.drain(..from);
            }
            None => list.clear(),
        }
        Ok(())
    }

    async fn lrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CacheError> {
        self.check("LRANGE")?;
        let now = Instant::now();
        let entries = self.entries.lock();
        let Some(entry) = entries.get(key).filter(|e| !e.is_expired(now)) else {
            return Ok(Vec::new());
        };
        let CacheValue::List(list) = &entry.value else {
            return Err(Self::wrong_type("LRANGE"));
        };
        Ok(match resolve_range(start, stop, list.len()) {
            Some((from, to)) => list.range(from..=to).cloned().collect(),
            None => Vec::new(),
        })
    }

    async fn incr(&self, key: &str) -> Result<i64, CacheError> {
        self.check("INCR")?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        let entry = entries.entry(key.to_string()).or_insert_with(|| CacheEntry {
            value: CacheValue::Text("0".to_string()),
            expires_at: None,
        });
        let CacheValue::Text(text) = &mut entry.value else {
            return Err(Self::wrong_type("INCR"));
        };
        let next = text
            .parse::<i64>()
            .map_err(|_| CacheError::Command {
                command: "INCR",
                message: "value is not an integer".to_string(),
            })?
            + 1;
        *text = next.to_string();
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError> {
        self.check("EXPIRE")?;
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get_mut(key).filter(|e| !e.is_expired(now)) {
            Some(entry) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ping(&self) -> Result<(), CacheError> {
        self.check("PING")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::CreateEventRequest;

    fn event(name: &str) -> Event {
        Event::from_validated(
            CreateEventRequest::new(EventCategory::SystemEvent, name),
            EventCategory::SystemEvent,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_store_records_failed_attempts() {
        let store = InMemoryEventStore::new();
        store.fail_next(1);

        assert!(store.insert_events(&[event("A")]).await.is_err());
        store.insert_events(&[event("B")]).await.unwrap();

        assert_eq!(store.attempt_count(), 2);
        assert_eq!(store.event_count(), 1);
        assert_eq!(store.events()[0].event_name, "B");
    }

    #[tokio::test]
    async fn test_store_count_and_find() {
        let store = InMemoryEventStore::new();
        let a = event("A");
        let id = a.id;
        store.insert_events(&[a, event("B")]).await.unwrap();

        let start = Utc::now() - chrono::Duration::hours(1);
        let end = Utc::now();
        assert_eq!(store.count_events(start, end, None).await.unwrap(), 2);
        assert_eq!(
            store
                .count_events(start, end, Some(EventCategory::ErrorEvent))
                .await
                .unwrap(),
            0
        );
        assert_eq!(store.find_event(id).await.unwrap().unwrap().event_name, "A");
        assert!(store.find_event(Uuid::now_v7()).await.unwrap().is_none());
    }

    fn event_at(name: &str, user: Option<&str>, minutes_ago: i64, base: DateTime<Utc>) -> Event {
        let mut request = CreateEventRequest::new(EventCategory::LearningEvent, name)
            .with_timestamp(base - chrono::Duration::minutes(minutes_ago));
        if let Some(user) = user {
            request = request.with_user_id(user);
        }
        Event::from_validated(request, EventCategory::LearningEvent, base)
    }

    async fn seeded_store(base: DateTime<Utc>) -> InMemoryEventStore {
        let store = InMemoryEventStore::new();
        store
            .insert_events(&[
                event_at("Quiz", Some("u1"), 5, base),
                event_at("Lesson", Some("u2"), 10, base),
                event_at("Quiz", Some("u2"), 15, base),
                event_at("Badge", None, 20, base),
                event_at("Lesson", Some("u1"), 25, base),
                event_at("Quiz", Some("u3"), 90, base),
            ])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_store_top_events_and_active_users() {
        let base = Utc::now();
        let store = seeded_store(base).await;
        let start = base - chrono::Duration::hours(1);

        let top = store.top_events(start, base, 10).await.unwrap();
        let top: Vec<(&str, u64)> = top.iter().map(|t| (t.event_name.as_str(), t.count)).collect();
        assert_eq!(top, vec![("Lesson", 2), ("Quiz", 2), ("Badge", 1)]);

        assert_eq!(store.top_events(start, base, 1).await.unwrap().len(), 1);
        assert_eq!(store.active_users(start, base).await.unwrap(), 2);
        assert_eq!(
            store
                .active_users(base - chrono::Duration::hours(2), base)
                .await
                .unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_store_time_series_buckets() {
        use chrono::TimeZone;

        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let store = seeded_store(base).await;

        let series = store
            .time_series(
                base - chrono::Duration::hours(3),
                base,
                TimeGranularity::Hour,
                None,
            )
            .await
            .unwrap();
        let expected = vec![
            TimeBucket {
                bucket: Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap(),
                count: 1,
            },
            TimeBucket {
                bucket: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
                count: 5,
            },
        ];
        assert_eq!(series, expected);

        let none = store
            .time_series(
                base - chrono::Duration::hours(3),
                base,
                TimeGranularity::Day,
                Some(EventCategory::ErrorEvent),
            )
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_store_search_pages_and_sorts() {
        let base = Utc::now();
        let store = seeded_store(base).await;
        let search = EventSearch::new(base - chrono::Duration::hours(2), base).with_page(1, 2);

        let page = store.search_events(&search).await.unwrap();
        let names: Vec<&str> = page.events.iter().map(|e| e.event_name.as_str()).collect();
        assert_eq!(names, vec!["Quiz", "Lesson"]);
        assert_eq!(page.pagination.total, 6);
        assert_eq!(page.pagination.total_pages, 3);
        assert!(page.pagination.has_next);
        assert!(!page.pagination.has_prev);

        let last = store
            .search_events(&search.clone().with_page(3, 2).with_sort_order(SortOrder::Asc))
            .await
            .unwrap();
        let names: Vec<&str> = last.events.iter().map(|e| e.event_name.as_str()).collect();
        assert_eq!(names, vec!["Lesson", "Quiz"]);
        assert!(!last.pagination.has_next);
        assert!(last.pagination.has_prev);

        let quizzes = store
            .search_events(&search.clone().with_event_name("Quiz").with_user_id("u2"))
            .await
            .unwrap();
        assert_eq!(quizzes.pagination.total, 1);
        assert_eq!(quizzes.events[0].user_id.as_deref(), Some("u2"));
    }

    #[tokio::test]
    async fn test_store_ping_unavailable() {
        let store = InMemoryEventStore::new();
        assert!(store.ping().await.is_ok());
        store.set_available(false);
        assert!(store.ping().await.is_err());
    }

    #[test]
    fn test_resolve_range() {
        assert_eq!(resolve_range(0, 999, 5), Some((0, 4)));
        assert_eq!(resolve_range(0, -1, 5), Some((0, 4)));
        assert_eq!(resolve_range(-2, -1, 5), Some((3, 4)));
        assert_eq!(resolve_range(3, 1, 5), None);
        assert_eq!(resolve_range(0, 0, 0), None);
        assert_eq!(resolve_range(7, 9, 5), None);
    }

    #[tokio::test]
    async fn test_cache_list_push_trim_range() {
        let cache = InMemoryCache::new();
        for i in 0..5 {
            cache.lpush("list", i.to_string()).await.unwrap();
        }
        cache.ltrim("list", 0, 2).await.unwrap();

        let values = cache.lrange("list", 0, -1).await.unwrap();
        assert_eq!(values, vec!["4", "3", "2"]);
    }

    #[tokio::test]
    async fn test_cache_incr_and_expire() {
        let cache = InMemoryCache::new();
        assert!(!cache.expire("counter", Duration::from_secs(10)).await.unwrap());
        assert_eq!(cache.incr("counter").await.unwrap(), 1);
        assert_eq!(cache.incr("counter").await.unwrap(), 2);
        assert!(cache.expire("counter", Duration::from_secs(10)).await.unwrap());
        assert!(cache.ttl("counter").is_some());
        assert_eq!(cache.get("counter").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_entries_expire() {
        let cache = InMemoryCache::new();
        cache
            .set_ex("key", "value".to_string(), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.contains_key("key"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_failure_injection() {
        let cache = InMemoryCache::new();
        cache.set_failing(true);
        assert!(cache.ping().await.is_err());
        assert!(cache.incr("counter").await.is_err());
    }
}
