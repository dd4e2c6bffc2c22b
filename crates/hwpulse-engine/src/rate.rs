//! Byte-rate unit scaling.
//!
//! Rates are presented in bytes/second on a base-1000 ladder, the way
//! network throughput is conventionally shown.

use serde::{Deserialize, Serialize};
use std::fmt;

const KILO: f64 = 1_000.0;
const MEGA: f64 = 1_000_000.0;
const GIGA: f64 = 1_000_000_000.0;

/// Presentation unit of a scaled rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RateUnit {
    #[default]
    #[serde(rename = "B/s")]
    BytesPerSec,
    #[serde(rename = "KB/s")]
    KiloBytesPerSec,
    #[serde(rename = "MB/s")]
    MegaBytesPerSec,
    #[serde(rename = "GB/s")]
    GigaBytesPerSec,
}

impl RateUnit {
    /// Returns the unit suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            RateUnit::BytesPerSec => "B/s",
            RateUnit::KiloBytesPerSec => "KB/s",
            RateUnit::MegaBytesPerSec => "MB/s",
            RateUnit::GigaBytesPerSec => "GB/s",
        }
    }
}

impl fmt::Display for RateUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scales a bytes/second value to the largest unit that keeps it below 1000.
///
/// No rounding is applied. Negative and non-finite input reads as zero.
pub fn scale(bytes_per_sec: f64) -> (f64, RateUnit) {
    let value = if bytes_per_sec.is_finite() && bytes_per_sec > 0.0 {
        bytes_per_sec
    } else {
        0.0
    };

    if value >= GIGA {
        (value / GIGA, RateUnit::GigaBytesPerSec)
    } else if value >= MEGA {
        (value / MEGA, RateUnit::MegaBytesPerSec)
    } else if value >= KILO {
        (value / KILO, RateUnit::KiloBytesPerSec)
    } else {
        (value, RateUnit::BytesPerSec)
    }
}
