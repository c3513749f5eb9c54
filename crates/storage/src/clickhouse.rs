// ClickHouse Event Store
//
// Writes and reads events through the ClickHouse HTTP interface.
// Inserts are one `INSERT ... FORMAT JSONEachRow` request per batch with one
// JSON row per line; reads bind values as server-side query parameters.

use std::env;
use std::time::Duration;

use analytics_core::report::{
    EventNameCount, EventSearch, Pagination, SearchPage, SortOrder, TimeBucket, TimeGranularity,
};
use analytics_core::{Event, EventCategory, EventStore, GeoLocation, JsonMap, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

/// Text format of a `DateTime64(3, 'UTC')` column
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Column and parameter type of event timestamps. The explicit zone keeps
/// text values in UTC whatever the server's own timezone is.
const TIMESTAMP_TYPE: &str = "DateTime64(3, 'UTC')";

/// Configuration for the ClickHouse connection
#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    /// HTTP endpoint (e.g., http://localhost:8123)
    pub url: String,
    pub database: String,
    pub table: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ClickHouseConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8123".to_string(),
            database: "analytics".to_string(),
            table: "events".to_string(),
            user: None,
            password: None,
            timeout: Duration::from_secs(30),
        }
    }
}

impl ClickHouseConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `CLICKHOUSE_URL`: HTTP endpoint (default: http://localhost:8123)
    /// - `CLICKHOUSE_DATABASE`: Database name (default: analytics)
    /// - `CLICKHOUSE_TABLE`: Events table (default: events)
    /// - `CLICKHOUSE_USER`: Username
    /// - `CLICKHOUSE_PASSWORD`: Password
    /// - `CLICKHOUSE_TIMEOUT_MS`: Request timeout in ms (default: 30000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: env::var("CLICKHOUSE_URL").unwrap_or(defaults.url),
            database: env::var("CLICKHOUSE_DATABASE").unwrap_or(defaults.database),
            table: env::var("CLICKHOUSE_TABLE").unwrap_or(defaults.table),
            user: env::var("CLICKHOUSE_USER").ok().filter(|v| !v.is_empty()),
            password: env::var("CLICKHOUSE_PASSWORD").ok().filter(|v| !v.is_empty()),
            timeout: env::var("CLICKHOUSE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fully qualified, quoted table name
    pub fn qualified_table(&self) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.database),
            quote_identifier(&self.table)
        )
    }

    /// `CREATE TABLE IF NOT EXISTS` statement for the events table
    pub fn create_table_sql(&self) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             id UUID, \
             user_id Nullable(String), \
             session_id Nullable(String), \
             event_type LowCardinality(String), \
             event_name String, \
             properties String, \
             timestamp {ts}, \
             source LowCardinality(String), \
             version String, \
             platform LowCardinality(String), \
             user_agent Nullable(String), \
             ip_address Nullable(String), \
             country Nullable(String), \
             region Nullable(String), \
             city Nullable(String), \
             latitude Nullable(Float64), \
             longitude Nullable(Float64), \
             timezone Nullable(String), \
             metadata String\
             ) ENGINE = MergeTree \
             PARTITION BY toYYYYMM(timestamp) \
             ORDER BY (event_type, timestamp, id)",
            table = self.qualified_table(),
            ts = TIMESTAMP_TYPE,
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/", self.url.trim_end_matches('/'))
    }
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('\\', "\\\\").replace('`', "\\`"))
}

/// One row of the events table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRow {
    pub id: Uuid,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub event_type: String,
    pub event_name: String,
    /// JSON-encoded property map
    pub properties: String,
    pub timestamp: String,
    pub source: String,
    pub version: String,
    pub platform: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
    /// JSON-encoded metadata map
    pub metadata: String,
}

impl EventRow {
    pub fn from_event(event: &Event) -> Result<Self, StoreError> {
        let location = event.location.clone().unwrap_or_default();
        Ok(Self {
            id: event.id,
            user_id: event.user_id.clone(),
            session_id: event.session_id.clone(),
            event_type: event.event_type.as_str().to_string(),
            event_name: event.event_name.clone(),
            properties: serde_json::to_string(&event.properties)?,
            timestamp: event.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            source: event.source.as_str().to_string(),
            version: event.version.clone(),
            platform: event.platform.as_str().to_string(),
            user_agent: event.user_agent.clone(),
            ip_address: event.ip_address.clone(),
            country: location.country,
            region: location.region,
            city: location.city,
            latitude: location.latitude,
            longitude: location.longitude,
            timezone: location.timezone,
            metadata: serde_json::to_string(&event.metadata)?,
        })
    }

    pub fn into_event(self) -> Result<Event, StoreError> {
        let event_type = self
            .event_type
            .parse::<EventCategory>()
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let location = GeoLocation {
            country: self.country,
            region: self.region,
            city: self.city,
            latitude: self.latitude,
            longitude: self.longitude,
            timezone: self.timezone,
        };
        let location = (location != GeoLocation::default()).then_some(location);

        Ok(Event {
            id: self.id,
            user_id: self.user_id,
            session_id: self.session_id,
            event_type,
            event_name: self.event_name,
            properties: parse_json_map(&self.properties)?,
            timestamp: parse_timestamp(&self.timestamp)?,
            source: serde_json::from_value(serde_json::Value::String(self.source))?,
            version: self.version,
            platform: serde_json::from_value(serde_json::Value::String(self.platform))?,
            user_agent: self.user_agent,
            ip_address: self.ip_address,
            location,
            metadata: parse_json_map(&self.metadata)?,
        })
    }
}

fn parse_json_map(raw: &str) -> Result<JsonMap, StoreError> {
    if raw.trim().is_empty() {
        return Ok(JsonMap::new());
    }
    Ok(serde_json::from_str(raw)?)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| StoreError::Serialization(format!("invalid timestamp {:?}: {}", raw, e)))
}

/// Encode a batch as JSONEachRow, one row per line
pub fn encode_rows(events: &[Event]) -> Result<String, StoreError> {
    let mut body = String::new();
    for event in events {
        body.push_str(&serde_json::to_string(&EventRow::from_event(event)?)?);
        body.push('\n');
    }
    Ok(body)
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct NameCountRow {
    event_name: String,
    count: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct BucketRow {
    bucket: String,
    count: serde_json::Value,
}

/// Parse each non-empty line of a JSONEachRow response
fn parse_rows<T: serde::de::DeserializeOwned>(body: &str) -> Result<Vec<T>, StoreError> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(StoreError::from))
        .collect()
}

/// First row's count, or 0 for an empty result
fn first_count(body: &str) -> Result<u64, StoreError> {
    match parse_rows::<CountRow>(body)?.first() {
        Some(row) => parse_count(&row.count),
        None => Ok(0),
    }
}

/// UTC bucket start expression; every branch yields `DateTime('UTC')`
fn bucket_expression(granularity: TimeGranularity) -> &'static str {
    match granularity {
        TimeGranularity::Minute => "toDateTime(toStartOfMinute(timestamp), 'UTC')",
        TimeGranularity::Hour => "toDateTime(toStartOfHour(timestamp), 'UTC')",
        TimeGranularity::Day => "toDateTime(toStartOfDay(timestamp), 'UTC')",
        TimeGranularity::Week => "toDateTime(toMonday(timestamp), 'UTC')",
        TimeGranularity::Month => "toDateTime(toStartOfMonth(timestamp), 'UTC')",
        TimeGranularity::Quarter => "toDateTime(toStartOfQuarter(timestamp), 'UTC')",
        TimeGranularity::Year => "toDateTime(toStartOfYear(timestamp), 'UTC')",
    }
}

/// Escape `LIKE` wildcards so user text matches literally
fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// A WHERE clause with server-side bound parameters
#[derive(Debug, Default)]
struct Filter {
    conditions: Vec<String>,
    params: Vec<(String, String)>,
}

impl Filter {
    /// `timestamp` within `[start, end]`
    fn window(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        let mut filter = Self::default();
        filter.push(
            format!("timestamp >= {{start:{}}}", TIMESTAMP_TYPE),
            "start",
            start.format(TIMESTAMP_FORMAT).to_string(),
        );
        filter.push(
            format!("timestamp <= {{end:{}}}", TIMESTAMP_TYPE),
            "end",
            end.format(TIMESTAMP_FORMAT).to_string(),
        );
        filter
    }

    fn for_search(search: &EventSearch) -> Self {
        let mut filter = Self::window(search.start, search.end);
        if let Some(event_type) = search.event_type {
            filter.push("event_type = {event_type:String}", "event_type", event_type.as_str());
        }
        if let Some(name) = &search.event_name {
            filter.push("event_name = {event_name:String}", "event_name", name);
        }
        if let Some(user_id) = &search.user_id {
            filter.push("user_id = {user_id:String}", "user_id", user_id);
        }
        if let Some(text) = &search.text {
            filter.push(
                "(event_name LIKE {text:String} OR properties LIKE {text:String})",
                "text",
                format!("%{}%", escape_like(text)),
            );
        }
        filter
    }

    fn push(&mut self, condition: impl Into<String>, name: &str, value: impl Into<String>) {
        self.conditions.push(condition.into());
        self.bind(name, value);
    }

    fn bind(&mut self, name: &str, value: impl Into<String>) {
        self.params.push((format!("param_{}", name), value.into()));
    }

    fn clause(&self) -> String {
        self.conditions.join(" AND ")
    }
}

/// ClickHouse quotes 64-bit integers in JSON output by default
fn parse_count(value: &serde_json::Value) -> Result<u64, StoreError> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
    .ok_or_else(|| StoreError::Serialization(format!("unexpected count value: {}", value)))
}

/// Event store backed by ClickHouse
pub struct ClickHouseEventStore {
    client: Client,
    config: ClickHouseConfig,
}

impl ClickHouseEventStore {
    pub fn new(config: ClickHouseConfig) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn from_env() -> Result<Self, StoreError> {
        Self::new(ClickHouseConfig::from_env())
    }

    pub fn config(&self) -> &ClickHouseConfig {
        &self.config
    }

    /// Create the events table if it does not exist yet
    pub async fn ensure_table(&self) -> Result<(), StoreError> {
        self.execute(&self.config.create_table_sql(), &[], None).await?;
        info!(table = %self.config.qualified_table(), "ClickHouse events table ready");
        Ok(())
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = match &self.config.user {
            Some(user) => request.header("X-ClickHouse-User", user),
            None => request,
        };
        match &self.config.password {
            Some(password) => request.header("X-ClickHouse-Key", password),
            None => request,
        }
    }

    /// Run a query and return the raw response body
    async fn execute(
        &self,
        query: &str,
        params: &[(String, String)],
        body: Option<String>,
    ) -> Result<String, StoreError> {
        let mut request = self
            .client
            .post(self.config.endpoint())
            .query(&[("query", query)])
            .query(params);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        if !status.is_success() {
            error!(status = %status, body = %text.trim(), "ClickHouse query failed");
            return Err(StoreError::Query {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl EventStore for ClickHouseEventStore {
    fn name(&self) -> &'static str {
        "clickhouse"
    }

    async fn insert_events(&self, events: &[Event]) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        let body = encode_rows(events)?;
        let query = format!("INSERT INTO {} FORMAT JSONEachRow", self.config.qualified_table());

        debug!(
            count = events.len(),
            table = %self.config.table,
            "Inserting events into ClickHouse"
        );
        self.execute(&query, &[], Some(body)).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let url = format!("{}/ping", self.config.url.trim_end_matches('/'));
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        if status.is_success() && body.trim() == "Ok." {
            Ok(())
        } else {
            Err(StoreError::Query {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn count_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        category: Option<EventCategory>,
    ) -> Result<u64, StoreError> {
        let mut filter = Filter::window(start, end);
        if let Some(category) = category {
            filter.push("event_type = {category:String}", "category", category.as_str());
        }
        let query = format!(
            "SELECT count() AS count FROM {} WHERE {} FORMAT JSONEachRow",
            self.config.qualified_table(),
            filter.clause()
        );

        let body = self.execute(&query, &filter.params, None).await?;
        first_count(&body)
    }

    async fn find_event(&self, id: Uuid) -> Result<Option<Event>, StoreError> {
        let query = format!(
            "SELECT * FROM {} WHERE id = {{id:UUID}} LIMIT 1 FORMAT JSONEachRow",
            self.config.qualified_table()
        );
        let params = [("param_id".to_string(), id.to_string())];

        let body = self.execute(&query, &params, None).await?;
        match body.lines().find(|line| !line.trim().is_empty()) {
            Some(line) => {
                let row: EventRow = serde_json::from_str(line)?;
                row.into_event().map(Some)
            }
            None => Ok(None),
        }
    }

    async fn top_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EventNameCount>, StoreError> {
        let mut filter = Filter::window(start, end);
        filter.bind("limit", limit.to_string());
        let query = format!(
            "SELECT event_name, count() AS count FROM {} WHERE {} \
             GROUP BY event_name ORDER BY count DESC, event_name ASC \
             LIMIT {{limit:UInt64}} FORMAT JSONEachRow",
            self.config.qualified_table(),
            filter.clause()
        );

        let body = self.execute(&query, &filter.params, None).await?;
        parse_rows::<NameCountRow>(&body)?
            .into_iter()
            .map(|row| {
                Ok(EventNameCount {
                    count: parse_count(&row.count)?,
                    event_name: row.event_name,
                })
            })
            .collect()
    }

    async fn active_users(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let filter = Filter::window(start, end);
        let query = format!(
            "SELECT uniqExact(user_id) AS count FROM {} WHERE {} AND user_id IS NOT NULL \
             FORMAT JSONEachRow",
            self.config.qualified_table(),
            filter.clause()
        );

        let body = self.execute(&query, &filter.params, None).await?;
        first_count(&body)
    }

    async fn time_series(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        granularity: TimeGranularity,
        category: Option<EventCategory>,
    ) -> Result<Vec<TimeBucket>, StoreError> {
        let mut filter = Filter::window(start, end);
        if let Some(category) = category {
            filter.push("event_type = {category:String}", "category", category.as_str());
        }
        let query = format!(
            "SELECT {} AS bucket, count() AS count FROM {} WHERE {} \
             GROUP BY bucket ORDER BY bucket ASC FORMAT JSONEachRow",
            bucket_expression(granularity),
            self.config.qualified_table(),
            filter.clause()
        );

        let body = self.execute(&query, &filter.params, None).await?;
        parse_rows::<BucketRow>(&body)?
            .into_iter()
            .map(|row| {
                Ok(TimeBucket {
                    bucket: parse_timestamp(&row.bucket)?,
                    count: parse_count(&row.count)?,
                })
            })
            .collect()
    }

    async fn search_events(&self, search: &EventSearch) -> Result<SearchPage, StoreError> {
        let filter = Filter::for_search(search);
        let table = self.config.qualified_table();
        let order = match search.sort_order {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };

        let mut page_params = filter.params.clone();
        page_params.push(("param_limit".to_string(), search.limit.to_string()));
        page_params.push(("param_offset".to_string(), search.offset().to_string()));
        let page_query = format!(
            "SELECT * FROM {} WHERE {} ORDER BY timestamp {} \
             LIMIT {{limit:UInt64}} OFFSET {{offset:UInt64}} FORMAT JSONEachRow",
            table,
            filter.clause(),
            order
        );
        let count_query = format!(
            "SELECT count() AS count FROM {} WHERE {} FORMAT JSONEachRow",
            table,
            filter.clause()
        );

        let (rows, total) = tokio::try_join!(
            self.execute(&page_query, &page_params, None),
            self.execute(&count_query, &filter.params, None),
        )?;

        let events = parse_rows::<EventRow>(&rows)?
            .into_iter()
            .map(EventRow::into_event)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SearchPage {
            events,
            pagination: Pagination::new(search.page, search.limit, first_count(&total)?),
        })
    }
}
