// Backend wiring for CLI commands

use std::sync::Arc;

use analytics_core::{
    CacheStore, EventQueries, EventStore, EventTracker, InMemoryCache, InMemoryEventStore,
    RealtimeCache, TrackerConfig,
};
use analytics_storage::{ClickHouseEventStore, RedisCache};
use anyhow::{Context, Result};
use tracing::info;

/// The column store and cache a command runs against
pub struct Backends {
    pub store: Arc<dyn EventStore>,
    pub cache: Arc<dyn CacheStore>,
}

impl Backends {
    /// Connect to ClickHouse and Redis, or build in-memory stand-ins
    pub async fn connect(memory: bool) -> Result<Self> {
        if memory {
            info!("Using in-memory backends");
            return Ok(Self {
                store: Arc::new(InMemoryEventStore::new()),
                cache: Arc::new(InMemoryCache::new()),
            });
        }

        let store = ClickHouseEventStore::from_env().context("Failed to create ClickHouse client")?;
        info!(
            url = %store.config().url,
            table = %store.config().qualified_table(),
            "ClickHouse configured"
        );

        let cache = RedisCache::from_env()
            .await
            .context("Failed to connect to Redis")?;

        Ok(Self {
            store: Arc::new(store),
            cache: Arc::new(cache),
        })
    }

    pub fn tracker(&self, config: TrackerConfig) -> EventTracker {
        EventTracker::new(config, self.store.clone()).with_cache(self.cache.clone())
    }

    /// Queries backed by an idle tracker; the reported buffer size is that
    /// of this process only
    pub fn queries(&self) -> EventQueries {
        let tracker = Arc::new(EventTracker::new(
            TrackerConfig::default().with_scheduled_flush(false),
            self.store.clone(),
        ));
        EventQueries::new(
            tracker,
            self.store.clone(),
            RealtimeCache::new(self.cache.clone()),
        )
    }
}
