// Read-side queries over the pipeline
//
// Every query degrades instead of failing: backend errors are logged and an
// empty or zero result is returned.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::event::{Event, EventCategory};
use crate::realtime::{RealtimeCache, RECENT_EVENTS_CAP};
use crate::report::{EventNameCount, EventSearch, SearchPage, TimeBucket, TimeGranularity};
use crate::store::EventStore;
use crate::tracker::EventTracker;

/// Default number of events returned by `recent_events`
pub const DEFAULT_RECENT_LIMIT: usize = 100;

/// Live counters plus the current buffer length
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub hourly: u64,
    pub daily: u64,
    pub buffer_size: usize,
}

pub struct EventQueries {
    tracker: Arc<EventTracker>,
    store: Arc<dyn EventStore>,
    cache: RealtimeCache,
}

impl EventQueries {
    pub fn new(
        tracker: Arc<EventTracker>,
        store: Arc<dyn EventStore>,
        cache: RealtimeCache,
    ) -> Self {
        Self {
            tracker,
            store,
            cache,
        }
    }

    /// Newest-first recent events from the real-time list
    pub async fn recent_events(&self, limit: usize) -> Vec<Event> {
        self.cache.recent_events(limit).await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to read recent events");
            Vec::new()
        })
    }

    /// Hourly and daily counts for the current hour and day
    pub async fn event_stats(&self) -> EventStats {
        let buffer_size = self.tracker.buffered_len();
        match self.cache.counters(Utc::now()).await {
            Ok(counters) => EventStats {
                hourly: counters.hourly,
                daily: counters.daily,
                buffer_size,
            },
            Err(e) => {
                warn!(error = %e, "Failed to read event counters");
                EventStats {
                    buffer_size,
                    ..Default::default()
                }
            }
        }
    }

    /// Look an event up in the cache, then in the column store
    pub async fn get_event(&self, id: Uuid) -> Option<Event> {
        match self.cache.cached_event(id).await {
            Ok(Some(event)) => return Some(event),
            Ok(None) => {}
            Err(e) => warn!(event_id = %id, error = %e, "Failed to read cached event"),
        }

        self.store.find_event(id).await.unwrap_or_else(|e| {
            warn!(event_id = %id, error = %e, "Failed to read event from store");
            None
        })
    }

    /// Number of persisted events in `[start, end]`
    pub async fn count_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        category: Option<EventCategory>,
    ) -> u64 {
        self.store
            .count_events(start, end, category)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to count events");
                0
            })
    }

    /// Most frequent event names in `[start, end]`
    pub async fn top_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Vec<EventNameCount> {
        self.store
            .top_events(start, end, limit)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to get top events");
                Vec::new()
            })
    }

    /// Distinct users with at least one event in `[start, end]`
    pub async fn active_users(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
        self.store.active_users(start, end).await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to get active users");
            0
        })
    }

    pub async fn time_series(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: TimeGranularity,
        category: Option<EventCategory>,
    ) -> Vec<TimeBucket> {
        self.store
            .time_series(start, end, granularity, category)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, granularity = %granularity, "Failed to get time series");
                Vec::new()
            })
    }

    /// One page of persisted events; an empty first page on failure
    pub async fn search_events(&self, search: &EventSearch) -> SearchPage {
        self.store.search_events(search).await.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to search events");
            SearchPage::empty(search.limit)
        })
    }

    /// Distinct property keys of recent events with the given name, sorted
    pub async fn event_property_keys(&self, event_name: &str, limit: usize) -> Vec<String> {
        self.recent_events(RECENT_EVENTS_CAP)
            .await
            .iter()
            .filter(|e| e.event_name == event_name)
            .flat_map(|e| e.properties.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .take(limit)
            .collect()
    }
}
