// Real-time cache views
//
// Owns the cache key layout: per-event snapshots, the capped recent-events
// list, and the rolling counters. Writes are best effort; every failed cache
// command is logged on its own and never propagates.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::CacheError;
use crate::event::{Event, EventCategory};
use crate::store::CacheStore;

/// Key of the recent-events list
pub const RECENT_EVENTS_KEY: &str = "events:realtime";

/// Number of entries kept in the recent-events list
pub const RECENT_EVENTS_CAP: usize = 1000;

/// TTL of a single event snapshot
pub const SNAPSHOT_TTL: Duration = Duration::from_secs(3600);

/// TTL of the hourly, category, name and user counters
pub const COUNTER_TTL: Duration = Duration::from_secs(86_400);

/// TTL of the daily counter
pub const DAILY_COUNTER_TTL: Duration = Duration::from_secs(2_592_000);

pub fn snapshot_key(id: Uuid) -> String {
    format!("event:{}", id)
}

/// Hourly counter key, UTC with 1-based months
pub fn hour_key(at: DateTime<Utc>) -> String {
    format!("events:hour:{}", at.format("%Y:%m:%d:%H"))
}

/// Daily counter key, UTC with 1-based months
pub fn day_key(at: DateTime<Utc>) -> String {
    format!("events:day:{}", at.format("%Y:%m:%d"))
}

pub fn type_key(category: EventCategory) -> String {
    format!("events:type:{}", category.as_str())
}

pub fn name_key(name: &str) -> String {
    format!("events:name:{}", name)
}

pub fn user_key(user_id: &str) -> String {
    format!("events:user:{}", user_id)
}

/// Current hour and day event counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub hourly: u64,
    pub daily: u64,
}

/// Best-effort real-time views over a key-value cache
#[derive(Clone)]
pub struct RealtimeCache {
    cache: Arc<dyn CacheStore>,
}

impl RealtimeCache {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    pub fn backend_name(&self) -> &'static str {
        self.cache.name()
    }

    /// Apply every cache side effect of an accepted event.
    ///
    /// Counters are keyed by `now` (time of recording), not by the event's
    /// own timestamp.
    pub async fn record(&self, event: &Event, now: DateTime<Utc>) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Failed to serialize event for cache");
                return;
            }
        };

        let key = snapshot_key(event.id);
        if let Err(e) = self.cache.set_ex(&key, payload.clone(), SNAPSHOT_TTL).await {
            log_cache_error(&key, &e);
        }

        match self.cache.lpush(RECENT_EVENTS_KEY, payload).await {
            Ok(_) => {
                if let Err(e) = self
                    .cache
                    .ltrim(RECENT_EVENTS_KEY, 0, RECENT_EVENTS_CAP as isize - 1)
                    .await
                {
                    log_cache_error(RECENT_EVENTS_KEY, &e);
                }
            }
            Err(e) => log_cache_error(RECENT_EVENTS_KEY, &e),
        }

        let mut counters = vec![
            (hour_key(now), COUNTER_TTL),
            (day_key(now), DAILY_COUNTER_TTL),
            (type_key(event.event_type), COUNTER_TTL),
            (name_key(&event.event_name), COUNTER_TTL),
        ];
        if let Some(user_id) = &event.user_id {
            counters.push((user_key(user_id), COUNTER_TTL));
        }

        join_all(
            counters
                .iter()
                .map(|(key, ttl)| self.bump_counter(key, *ttl)),
        )
        .await;

        debug!(event_id = %event.id, "Recorded event in real-time cache");
    }

    async fn bump_counter(&self, key: &str, ttl: Duration) {
        if let Err(e) = self.cache.incr(key).await {
            log_cache_error(key, &e);
        }
        if let Err(e) = self.cache.expire(key, ttl).await {
            log_cache_error(key, &e);
        }
    }

    /// Newest-first slice of the recent-events list.
    ///
    /// Entries that no longer parse as events are skipped.
    pub async fn recent_events(&self, limit: usize) -> Result<Vec<Event>, CacheError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let raw = self
            .cache
            .lrange(RECENT_EVENTS_KEY, 0, limit as isize - 1)
            .await?;

        Ok(raw
            .iter()
            .filter_map(|entry| match serde_json::from_str::<Event>(entry) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "Skipping unparsable entry in recent events list");
                    None
                }
            })
            .collect())
    }

    /// Snapshot written when the event was tracked, if it has not expired
    pub async fn cached_event(&self, id: Uuid) -> Result<Option<Event>, CacheError> {
        match self.cache.get(&snapshot_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Hourly and daily counts for the hour and day containing `now`
    pub async fn counters(&self, now: DateTime<Utc>) -> Result<CounterSnapshot, CacheError> {
        let (hour, day) = (hour_key(now), day_key(now));
        let (hourly, daily) =
            futures::try_join!(self.read_counter(&hour), self.read_counter(&day))?;
        Ok(CounterSnapshot { hourly, daily })
    }

    /// Value of a single counter key; missing keys read as zero
    pub async fn read_counter(&self, key: &str) -> Result<u64, CacheError> {
        match self.cache.get(key).await? {
            Some(raw) => raw.trim().parse().map_err(|_| CacheError::Command {
                command: "GET",
                message: format!("counter {} holds a non-numeric value", key),
            }),
            None => Ok(0),
        }
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        self.cache.ping().await
    }
}

fn log_cache_error(key: &str, error: &CacheError) {
    warn!(key = %key, error = %error, "Real-time cache update failed");
}
