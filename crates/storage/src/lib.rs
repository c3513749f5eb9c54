// Analytics Storage
//
// Production implementations of the core backend traits:
// - ClickHouseEventStore: EventStore over the ClickHouse HTTP interface
// - RedisCache: CacheStore over a Redis ConnectionManager

pub mod cache;
pub mod clickhouse;

pub use cache::{RedisCache, RedisConfig};
pub use clickhouse::{ClickHouseConfig, ClickHouseEventStore, EventRow};
