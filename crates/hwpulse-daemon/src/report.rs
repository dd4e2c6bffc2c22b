//! Sample reporting.

use anyhow::{Context, Result};
use hwpulse_engine::{MetricSample, RateUnit};
use std::io::Write;
use tracing::info;

use crate::config::OutputFormat;

/// Formats a scaled rate with one decimal place, e.g. `1.5 MB/s`.
pub fn format_rate(value: f64, unit: RateUnit) -> String {
    format!("{:.1} {}", value, unit)
}

/// Formats a sample as a single human-readable line.
pub fn format_line(sample: &MetricSample) -> String {
    let power = if sample.has_power_reading() {
        format!("{:.1} W", sample.cpu_power_watts)
    } else {
        "n/a".to_string()
    };
    format!(
        "cpu {:.1}% ({}) gpu {:.1}% ram {:.1}% disk {:.1}% up {} down {}",
        sample.cpu_usage_pct,
        power,
        sample.gpu_usage_pct,
        sample.ram_usage_pct,
        sample.disk_usage_pct,
        format_rate(sample.net_upload_rate, sample.net_upload_unit),
        format_rate(sample.net_download_rate, sample.net_download_unit),
    )
}

/// Writes one sample in the configured format.
pub fn report(format: OutputFormat, sample: &MetricSample) -> Result<()> {
    match format {
        OutputFormat::Log => {
            info!("#{} {}", sample.sequence, format_line(sample));
        }
        OutputFormat::Json => {
            let line = serde_json::to_string(sample).context("Failed to serialize sample")?;
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{}", line).context("Failed to write sample")?;
        }
    }
    Ok(())
}
