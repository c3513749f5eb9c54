// Backend health command

use analytics_core::{check_health, ComponentStatus, HealthStatus};
use anyhow::{bail, Result};

use crate::backends::Backends;
use crate::output::{print_field, OutputFormat};

fn label(status: ComponentStatus) -> &'static str {
    match status {
        ComponentStatus::Up => "up",
        ComponentStatus::Down => "down",
    }
}

pub async fn run(backends: &Backends, output: OutputFormat) -> Result<()> {
    let report = check_health(backends.store.as_ref(), backends.cache.as_ref()).await;

    if output.is_text() {
        let status = match report.status {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
        };
        print_field("Status", status);
        print_field(
            &format!("Store ({})", backends.store.name()),
            label(report.column_store),
        );
        print_field(
            &format!("Cache ({})", backends.cache.name()),
            label(report.cache),
        );
        print_field("Latency", &format!("{}ms", report.latency_ms));
    } else {
        output.print_value(&report)?;
    }

    if report.status == HealthStatus::Degraded {
        bail!("one or more backends are unreachable");
    }
    Ok(())
}
