//! The published metrics snapshot.

use crate::rate::RateUnit;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `cpu_power_watts` value meaning "no power sensor available".
pub const NO_POWER_SENSOR: f64 = -1.0;

/// Immutable result of one sampling tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Tick counter, starting at 1. Zero before the first tick completes.
    pub sequence: u64,
    /// Wall-clock time the sample was assembled.
    pub timestamp: DateTime<Utc>,
    /// CPU usage percentage (0-100)
    pub cpu_usage_pct: f64,
    /// GPU usage percentage (0-100)
    pub gpu_usage_pct: f64,
    /// RAM usage percentage (0-100)
    pub ram_usage_pct: f64,
    /// Busiest disk's usage percentage (0-100)
    pub disk_usage_pct: f64,
    pub net_upload_rate: f64,
    pub net_upload_unit: RateUnit,
    pub net_download_rate: f64,
    pub net_download_unit: RateUnit,
    /// CPU package power in watts, or [`NO_POWER_SENSOR`].
    pub cpu_power_watts: f64,
}

impl MetricSample {
    /// The snapshot published before the first tick completes.
    pub fn empty() -> Self {
        Self {
            sequence: 0,
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            cpu_usage_pct: 0.0,
            gpu_usage_pct: 0.0,
            ram_usage_pct: 0.0,
            disk_usage_pct: 0.0,
            net_upload_rate: 0.0,
            net_upload_unit: RateUnit::BytesPerSec,
            net_download_rate: 0.0,
            net_download_unit: RateUnit::BytesPerSec,
            cpu_power_watts: NO_POWER_SENSOR,
        }
    }

    /// Returns true if a power sensor backs `cpu_power_watts`.
    pub fn has_power_reading(&self) -> bool {
        self.cpu_power_watts >= 0.0
    }
}

impl Default for MetricSample {
    fn default() -> Self {
        Self::empty()
    }
}

/// Clamps a percentage to `[0, 100]`. Non-finite values read as zero.
pub(crate) fn clamp_pct(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sample() {
        let sample = MetricSample::empty();
        assert_eq!(sample.sequence, 0);
        assert_eq!(sample.cpu_usage_pct, 0.0);
        assert_eq!(sample.cpu_power_watts, NO_POWER_SENSOR);
        assert!(!sample.has_power_reading());
        assert_eq!(sample.timestamp.timestamp(), 0);
    }

    #[test]
    fn test_clamp_pct() {
        assert_eq!(clamp_pct(-3.0), 0.0);
        assert_eq!(clamp_pct(42.5), 42.5);
        assert_eq!(clamp_pct(100.4), 100.0);
        assert_eq!(clamp_pct(f64::NAN), 0.0);
    }

    #[test]
    fn test_serializes_field_names() {
        let json = serde_json::to_value(MetricSample::empty()).unwrap();
        assert_eq!(json["cpu_power_watts"], -1.0);
        assert_eq!(json["net_upload_unit"], "B/s");
        assert!(json.get("disk_usage_pct").is_some());
    }
}
