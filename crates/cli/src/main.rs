// Analytics CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: Logs go to stderr so stdout carries only command output.

mod backends;
mod commands;
mod output;

use std::path::PathBuf;

use analytics_core::report::{DEFAULT_SEARCH_LIMIT, DEFAULT_TOP_EVENTS_LIMIT};
use analytics_core::telemetry::{init_telemetry, TelemetryConfig};
use analytics_core::{EventCategory, TimeGranularity, UnknownCategory, DEFAULT_RECENT_LIMIT};
use anyhow::Result;
use clap::{Args, Parser, Subcommand};

use crate::backends::Backends;
use crate::commands::events::SearchOptions;
use crate::output::OutputFormat;

/// Longest accepted `--hours` window (100 years)
const MAX_WINDOW_HOURS: i64 = 876_000;

/// Category names are accepted in any case
fn parse_category(value: &str) -> Result<EventCategory, UnknownCategory> {
    value.to_uppercase().parse()
}

/// Trailing time window of the store reports
#[derive(Args, Debug, Clone, Copy)]
pub struct Window {
    /// Window size in hours, ending now
    #[arg(
        long,
        default_value_t = 24,
        value_parser = clap::value_parser!(i64).range(1..=MAX_WINDOW_HOURS)
    )]
    pub hours: i64,
}

#[derive(Parser)]
#[command(name = "analytics")]
#[command(about = "WriteWave analytics - ingest events and inspect the pipeline")]
#[command(version)]
pub struct Cli {
    /// Output format
    #[arg(long, short, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Use in-memory backends instead of ClickHouse and Redis
    #[arg(long, env = "ANALYTICS_MEMORY_BACKENDS")]
    pub memory: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Track line-delimited JSON events from a file or stdin
    Ingest {
        /// Input file (defaults to stdin)
        #[arg(long, short)]
        file: Option<PathBuf>,
    },

    /// Check that the column store and cache are reachable
    Health,

    /// Show the most recent events from the real-time cache
    Recent {
        /// Maximum number of events
        #[arg(long, short, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: usize,
    },

    /// Show this hour's and today's event counters
    Stats,

    /// Count persisted events over a trailing window
    Count {
        #[command(flatten)]
        window: Window,

        /// Restrict to one category (e.g. LEARNING_EVENT)
        #[arg(long, short, value_parser = parse_category)]
        category: Option<EventCategory>,
    },

    /// Most frequent event names over a trailing window
    Top {
        #[command(flatten)]
        window: Window,

        /// Maximum number of event names
        #[arg(long, short, default_value_t = DEFAULT_TOP_EVENTS_LIMIT)]
        limit: usize,
    },

    /// Count distinct users over a trailing window
    ActiveUsers {
        #[command(flatten)]
        window: Window,
    },

    /// Event counts per time bucket
    Timeseries {
        #[command(flatten)]
        window: Window,

        /// Bucket width: minute, hour, day, week, month, quarter or year
        #[arg(long, short, default_value = "hour")]
        granularity: TimeGranularity,

        /// Restrict to one category (e.g. ERROR_EVENT)
        #[arg(long, short, value_parser = parse_category)]
        category: Option<EventCategory>,
    },

    /// Search persisted events
    Search {
        /// Text matched against event names and properties
        text: Option<String>,

        #[command(flatten)]
        window: Window,

        #[arg(long, short, value_parser = parse_category)]
        category: Option<EventCategory>,

        /// Exact event name
        #[arg(long, short)]
        name: Option<String>,

        /// User ID
        #[arg(long, short)]
        user: Option<String>,

        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Page size
        #[arg(long, short, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: usize,

        /// Oldest first
        #[arg(long)]
        asc: bool,
    },

    /// Show a single event
    Get {
        /// Event ID
        id: uuid::Uuid,
    },

    /// List property keys seen on recent events with this name
    Properties {
        /// Event name
        name: String,

        /// Maximum number of keys
        #[arg(long, short, default_value = "100")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loaded environment from {}", path.display());
    }

    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "info")
    // - OTEL_SERVICE_NAME: Service name (default: "analytics-service")
    init_telemetry(TelemetryConfig::from_env());

    let cli = Cli::parse();
    let backends = Backends::connect(cli.memory).await?;
    let output = cli.output;

    match cli.command {
        Commands::Ingest { file } => commands::ingest::run(&backends, output, file).await,
        Commands::Health => commands::health::run(&backends, output).await,
        Commands::Recent { limit } => commands::events::recent(&backends, output, limit).await,
        Commands::Stats => commands::events::stats(&backends, output).await,
        Commands::Count { window, category } => {
            commands::events::count(&backends, output, window.hours, category).await
        }
        Commands::Top { window, limit } => {
            commands::events::top(&backends, output, window.hours, limit).await
        }
        Commands::ActiveUsers { window } => {
            commands::events::active_users(&backends, output, window.hours).await
        }
        Commands::Timeseries {
            window,
            granularity,
            category,
        } => {
            commands::events::time_series(&backends, output, window.hours, granularity, category)
                .await
        }
        Commands::Search {
            text,
            window,
            category,
            name,
            user,
            page,
            limit,
            asc,
        } => {
            let options = SearchOptions {
                hours: window.hours,
                text,
                category,
                name,
                user,
                page,
                limit,
                ascending: asc,
            };
            commands::events::search(&backends, output, options).await
        }
        Commands::Get { id } => commands::events::get(&backends, output, id).await,
        Commands::Properties { name, limit } => {
            commands::events::properties(&backends, output, &name, limit).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ingest_with_output() {
        let cli = Cli::parse_from([
            "analytics",
            "--output",
            "json",
            "--memory",
            "ingest",
            "-f",
            "events.ndjson",
        ]);
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(cli.memory);
        match cli.command {
            Commands::Ingest { file } => assert_eq!(file, Some(PathBuf::from("events.ndjson"))),
            _ => panic!("expected ingest"),
        }
    }

    #[test]
    fn test_parse_count_defaults() {
        let cli = Cli::parse_from(["analytics", "count"]);
        match cli.command {
            Commands::Count { window, category } => {
                assert_eq!(window.hours, 24);
                assert!(category.is_none());
            }
            _ => panic!("expected count"),
        }
    }

    #[test]
    fn test_count_category_is_case_insensitive() {
        let cli = Cli::parse_from(["analytics", "count", "--category", "learning_event"]);
        match cli.command {
            Commands::Count { category, .. } => {
                assert_eq!(category, Some(EventCategory::LearningEvent));
            }
            _ => panic!("expected count"),
        }
        assert!(Cli::try_parse_from(["analytics", "count", "-c", "nope"]).is_err());
    }

    #[test]
    fn test_window_hours_out_of_range_rejected() {
        for hours in ["0", "-5", "3000000000"] {
            let result = Cli::try_parse_from(["analytics", "count", "--hours", hours]);
            assert!(result.is_err(), "--hours {} should be rejected", hours);
        }
        assert!(Cli::try_parse_from(["analytics", "top", "--hours", "876000"]).is_ok());
    }

    #[test]
    fn test_parse_timeseries_and_search() {
        let cli = Cli::parse_from(["analytics", "timeseries", "-g", "week", "--hours", "720"]);
        match cli.command {
            Commands::Timeseries {
                window,
                granularity,
                category,
            } => {
                assert_eq!(window.hours, 720);
                assert_eq!(granularity, TimeGranularity::Week);
                assert!(category.is_none());
            }
            _ => panic!("expected timeseries"),
        }

        let cli = Cli::parse_from(["analytics", "search", "quiz", "--user", "u1", "--asc"]);
        match cli.command {
            Commands::Search {
                text,
                user,
                page,
                limit,
                asc,
                ..
            } => {
                assert_eq!(text.as_deref(), Some("quiz"));
                assert_eq!(user.as_deref(), Some("u1"));
                assert_eq!(page, 1);
                assert_eq!(limit, DEFAULT_SEARCH_LIMIT);
                assert!(asc);
            }
            _ => panic!("expected search"),
        }
    }
}
