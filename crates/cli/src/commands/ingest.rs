// Stream intake command
//
// Reads one JSON event request per line from a file or stdin and tracks it.
// EOF or Ctrl-C ends the stream; the tracker then shuts down with a final
// flush.

use std::path::PathBuf;

use analytics_core::{CreateEventRequest, EventTracker, FlushOutcome, TrackerConfig};
use anyhow::{Context, Result};
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::backends::Backends;
use crate::output::{print_field, OutputFormat};

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub lines: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub malformed: usize,
    pub final_flush: Option<FlushOutcome>,
    pub remaining_buffered: usize,
}

impl IngestSummary {
    /// Parse and track one input line; blank lines are skipped
    fn ingest_line(&mut self, tracker: &EventTracker, line_no: usize, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        self.lines += 1;

        let request: CreateEventRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed event");
                self.malformed += 1;
                return;
            }
        };

        match tracker.track(request) {
            Ok(_) => self.accepted += 1,
            Err(e) => {
                warn!(line = line_no, reasons = %e, "Event rejected");
                self.rejected += 1;
            }
        }
    }
}

pub async fn run(backends: &Backends, output: OutputFormat, file: Option<PathBuf>) -> Result<()> {
    let tracker = backends.tracker(TrackerConfig::from_env());
    tracker.start();

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &file {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let summary = ingest(&tracker, reader).await;
    let summary = match summary {
        Ok(summary) => summary,
        Err(e) => {
            tracker.shutdown().await;
            return Err(e);
        }
    };

    if output.is_text() {
        print_field("Lines", &summary.lines.to_string());
        print_field("Accepted", &summary.accepted.to_string());
        print_field("Rejected", &summary.rejected.to_string());
        print_field("Malformed", &summary.malformed.to_string());
        let final_flush = match summary.final_flush {
            Some(FlushOutcome::Empty) => "nothing to flush".to_string(),
            Some(FlushOutcome::Written { count }) => format!("wrote {}", count),
            Some(FlushOutcome::Failed { attempted, dropped }) => {
                format!("failed ({} attempted, {} dropped)", attempted, dropped)
            }
            None => "timed out".to_string(),
        };
        print_field("Final flush", &final_flush);
        print_field("Unflushed", &summary.remaining_buffered.to_string());
    } else {
        output.print_value(&summary)?;
    }

    Ok(())
}

async fn ingest(
    tracker: &EventTracker,
    reader: Box<dyn AsyncBufRead + Unpin + Send>,
) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();
    let mut lines = reader.lines();
    let mut line_no = 0;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read input")? {
                    Some(line) => {
                        line_no += 1;
                        summary.ingest_line(tracker, line_no, &line);
                    }
                    None => break,
                }
            }
            _ = &mut ctrl_c => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    info!(
        accepted = summary.accepted,
        rejected = summary.rejected,
        malformed = summary.malformed,
        "Input stream ended"
    );

    summary.final_flush = tracker.shutdown().await;
    summary.remaining_buffered = tracker.buffered_len();
    Ok(summary)
}
