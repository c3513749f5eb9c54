// Read-side event commands

use analytics_core::{Event, EventCategory, EventSearch, SortOrder, TimeGranularity};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::backends::Backends;
use crate::output::{print_field, print_table_header, print_table_row, OutputFormat};

fn print_events(events: &[Event]) {
    if events.is_empty() {
        println!("No events found");
        return;
    }

    print_table_header(&[("ID", 36), ("TYPE", 18), ("NAME", 24), ("USER", 16), ("TIME", 20)]);
    for event in events {
        let id = event.id.to_string();
        let time = event.timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
        print_table_row(&[
            (&id, 36),
            (event.event_type.as_str(), 18),
            (&event.event_name, 24),
            (event.user_id.as_deref().unwrap_or("-"), 16),
            (&time, 20),
        ]);
    }
}

pub async fn recent(backends: &Backends, output: OutputFormat, limit: usize) -> Result<()> {
    let events = backends.queries().recent_events(limit).await;

    if output.is_text() {
        print_events(&events);
    } else {
        output.print_value(&json!({ "data": events, "total": events.len() }))?;
    }
    Ok(())
}

pub async fn stats(backends: &Backends, output: OutputFormat) -> Result<()> {
    let stats = backends.queries().event_stats().await;

    if output.is_text() {
        print_field("This hour", &stats.hourly.to_string());
        print_field("Today", &stats.daily.to_string());
        print_field("Buffered", &stats.buffer_size.to_string());
    } else {
        output.print_value(&stats)?;
    }
    Ok(())
}

/// `[now - hours, now]`
fn trailing_window(hours: i64) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let end = Utc::now();
    let start = Duration::try_hours(hours)
        .and_then(|window| end.checked_sub_signed(window))
        .with_context(|| format!("window of {} hours is out of range", hours))?;
    Ok((start, end))
}

pub async fn count(
    backends: &Backends,
    output: OutputFormat,
    hours: i64,
    category: Option<EventCategory>,
) -> Result<()> {
    let (start, end) = trailing_window(hours)?;
    let count = backends.queries().count_events(start, end, category).await;

    if output.is_text() {
        let scope = category.map_or("all".to_string(), |c| c.to_string());
        print_field("Window", &format!("last {}h", hours));
        print_field("Category", &scope);
        print_field("Events", &count.to_string());
    } else {
        output.print_value(&json!({
            "start": start,
            "end": end,
            "category": category,
            "count": count,
        }))?;
    }
    Ok(())
}

pub async fn top(
    backends: &Backends,
    output: OutputFormat,
    hours: i64,
    limit: usize,
) -> Result<()> {
    let (start, end) = trailing_window(hours)?;
    let top = backends.queries().top_events(start, end, limit).await;

    if output.is_text() {
        if top.is_empty() {
            println!("No events found");
            return Ok(());
        }
        print_table_header(&[("EVENT", 32), ("COUNT", 12)]);
        for row in &top {
            print_table_row(&[(&row.event_name, 32), (&row.count.to_string(), 12)]);
        }
    } else {
        output.print_value(&json!({ "start": start, "end": end, "data": top }))?;
    }
    Ok(())
}

pub async fn active_users(backends: &Backends, output: OutputFormat, hours: i64) -> Result<()> {
    let (start, end) = trailing_window(hours)?;
    let users = backends.queries().active_users(start, end).await;

    if output.is_text() {
        print_field("Window", &format!("last {}h", hours));
        print_field("Active users", &users.to_string());
    } else {
        output.print_value(&json!({ "start": start, "end": end, "activeUsers": users }))?;
    }
    Ok(())
}

pub async fn time_series(
    backends: &Backends,
    output: OutputFormat,
    hours: i64,
    granularity: TimeGranularity,
    category: Option<EventCategory>,
) -> Result<()> {
    let (start, end) = trailing_window(hours)?;
    let series = backends
        .queries()
        .time_series(start, end, granularity, category)
        .await;

    if output.is_text() {
        if series.is_empty() {
            println!("No events found");
            return Ok(());
        }
        print_table_header(&[("BUCKET", 22), ("COUNT", 12)]);
        for point in &series {
            let bucket = point.bucket.format("%Y-%m-%d %H:%M").to_string();
            print_table_row(&[(&bucket, 22), (&point.count.to_string(), 12)]);
        }
    } else {
        output.print_value(&json!({
            "start": start,
            "end": end,
            "granularity": granularity,
            "category": category,
            "data": series,
        }))?;
    }
    Ok(())
}

/// Filters of the `search` command
pub struct SearchOptions {
    pub hours: i64,
    pub text: Option<String>,
    pub category: Option<EventCategory>,
    pub name: Option<String>,
    pub user: Option<String>,
    pub page: usize,
    pub limit: usize,
    pub ascending: bool,
}

impl SearchOptions {
    fn to_search(&self) -> Result<EventSearch> {
        let (start, end) = trailing_window(self.hours)?;
        let mut search = EventSearch::new(start, end).with_page(self.page, self.limit);
        if let Some(text) = &self.text {
            search = search.with_text(text.as_str());
        }
        if let Some(category) = self.category {
            search = search.with_event_type(category);
        }
        if let Some(name) = &self.name {
            search = search.with_event_name(name.as_str());
        }
        if let Some(user) = &self.user {
            search = search.with_user_id(user.as_str());
        }
        if self.ascending {
            search = search.with_sort_order(SortOrder::Asc);
        }
        Ok(search)
    }
}

pub async fn search(
    backends: &Backends,
    output: OutputFormat,
    options: SearchOptions,
) -> Result<()> {
    let search = options.to_search()?;
    let page = backends.queries().search_events(&search).await;

    if output.is_text() {
        print_events(&page.events);
        let p = page.pagination;
        println!();
        println!(
            "Page {} of {} ({} matching events)",
            p.page,
            p.total_pages.max(1),
            p.total
        );
    } else {
        output.print_value(&page)?;
    }
    Ok(())
}

pub async fn get(backends: &Backends, output: OutputFormat, id: Uuid) -> Result<()> {
    let event = backends
        .queries()
        .get_event(id)
        .await
        .ok_or_else(|| anyhow!("event {} not found", id))?;

    if output.is_text() {
        print_field("ID", &event.id.to_string());
        print_field("Type", event.event_type.as_str());
        print_field("Name", &event.event_name);
        print_field("User", event.user_id.as_deref().unwrap_or("-"));
        print_field("Session", event.session_id.as_deref().unwrap_or("-"));
        print_field("Timestamp", &event.timestamp.to_rfc3339());
        print_field("Platform", event.platform.as_str());
        print_field("Source", event.source.as_str());
        print_field(
            "Properties",
            &serde_json::to_string(&event.properties)?,
        );
    } else {
        output.print_value(&event)?;
    }
    Ok(())
}

pub async fn properties(
    backends: &Backends,
    output: OutputFormat,
    event_name: &str,
    limit: usize,
) -> Result<()> {
    let keys = backends
        .queries()
        .event_property_keys(event_name, limit)
        .await;

    if output.is_text() {
        if keys.is_empty() {
            println!("No properties found for {}", event_name);
        }
        for key in &keys {
            println!("{}", key);
        }
    } else {
        output.print_value(&json!({ "eventName": event_name, "properties": keys }))?;
    }
    Ok(())
}
