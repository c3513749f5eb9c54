// Backend health checks

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::store::{CacheStore, EventStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Up,
    Down,
}

impl ComponentStatus {
    fn from_ok(ok: bool) -> Self {
        if ok {
            ComponentStatus::Up
        } else {
            ComponentStatus::Down
        }
    }
}

/// Reachability of the column store and the cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: HealthStatus,
    pub column_store: ComponentStatus,
    pub cache: ComponentStatus,
    /// Wall time spent pinging both backends
    pub latency_ms: u64,
}

/// Ping both backends concurrently
///
/// The report is `Degraded` if either backend is unreachable.
pub async fn check_health(store: &dyn EventStore, cache: &dyn CacheStore) -> HealthReport {
    let started = Instant::now();
    let (store_result, cache_result) = tokio::join!(store.ping(), cache.ping());

    if let Err(e) = &store_result {
        warn!(store = store.name(), error = %e, "Column store health check failed");
    }
    if let Err(e) = &cache_result {
        warn!(cache = cache.name(), error = %e, "Cache health check failed");
    }

    let column_store = ComponentStatus::from_ok(store_result.is_ok());
    let cache = ComponentStatus::from_ok(cache_result.is_ok());
    let status = if column_store == ComponentStatus::Up && cache == ComponentStatus::Up {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };

    HealthReport {
        status,
        column_store,
        cache,
        latency_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryCache, InMemoryEventStore};

    #[tokio::test]
    async fn test_healthy_when_both_up() {
        let report = check_health(&InMemoryEventStore::new(), &InMemoryCache::new()).await;
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.column_store, ComponentStatus::Up);
        assert_eq!(report.cache, ComponentStatus::Up);
    }

    #[tokio::test]
    async fn test_degraded_when_one_down() {
        let store = InMemoryEventStore::new();
        store.set_available(false);
        let report = check_health(&store, &InMemoryCache::new()).await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.column_store, ComponentStatus::Down);

        let cache = InMemoryCache::new();
        cache.set_failing(true);
        let report = check_health(&InMemoryEventStore::new(), &cache).await;
        assert_eq!(report.status, HealthStatus::Degraded);
        assert_eq!(report.cache, ComponentStatus::Down);
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let report = HealthReport {
            status: HealthStatus::Healthy,
            column_store: ComponentStatus::Up,
            cache: ComponentStatus::Up,
            latency_ms: 3,
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["columnStore"], "up");
        assert_eq!(value["latencyMs"], 3);
    }
}
