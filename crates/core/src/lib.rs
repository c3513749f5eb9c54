// Analytics Core
//
// Backend-agnostic event intake for the WriteWave analytics service:
// validation, in-memory buffering, batched flushes to a column store and
// best-effort real-time views in a key-value cache.
//
// Key design decisions:
// - Uses traits (EventStore, CacheStore) for pluggable backends
// - `track` never waits on durable I/O; threshold flushes and cache side
//   effects run on a TaskTracker drained at shutdown
// - Flushes are serialized so a failed batch is re-queued before the next
//   flush detaches the buffer
// - Store and cache errors are logged, never returned to `track` callers

pub mod buffer;
pub mod config;
pub mod error;
pub mod event;
pub mod health;
pub mod query;
pub mod realtime;
pub mod report;
pub mod store;
pub mod telemetry;
pub mod tracker;
pub mod validation;

// In-memory implementations for dev mode and testing
pub mod memory;

// Re-exports for convenience
pub use config::TrackerConfig;
pub use error::{CacheError, StoreError};
pub use event::{
    CreateEventRequest, Event, EventCategory, EventSource, GeoLocation, JsonMap, Platform,
    UnknownCategory, DEFAULT_EVENT_VERSION,
};
pub use health::{check_health, ComponentStatus, HealthReport, HealthStatus};
pub use memory::{InMemoryCache, InMemoryEventStore};
pub use query::{EventQueries, EventStats, DEFAULT_RECENT_LIMIT};
pub use realtime::{CounterSnapshot, RealtimeCache};
pub use report::{
    EventNameCount, EventSearch, Pagination, SearchPage, SortOrder, TimeBucket, TimeGranularity,
    UnknownGranularity,
};
pub use store::{CacheStore, EventStore};
pub use tracker::{BatchOutcome, EventTracker, FlushOutcome, RejectedEvent};
pub use validation::{validate_event, ValidationError, ValidationIssue};
