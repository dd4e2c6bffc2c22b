//! hwpulse sampling engine
//!
//! Discovers CPU, GPU and storage sensors once, picks the network adapter
//! that carries real traffic, and publishes an immutable [`MetricSample`]
//! on a fixed interval.

pub mod adapter;
pub mod backend;
pub mod error;
pub mod inventory;
pub mod publisher;
pub mod rate;
pub mod sample;
pub mod scheduler;

pub use adapter::{AdapterSelection, AdapterSelector, AdapterTarget, SelectionReason};
pub use backend::{
    linux::LinuxHardware, linux_net::LinuxNetwork, HardwareBackend, NetworkBackend,
};
pub use error::{Error, Result};
pub use inventory::{HardwareInventory, Role, SensorBinding};
pub use publisher::{EngineConfig, MetricsPublisher, SampleReader, SubscriptionId};
pub use rate::{scale, RateUnit};
pub use sample::{MetricSample, NO_POWER_SENSOR};
pub use scheduler::{EngineState, SampleScheduler, Sampler};

/// Default sampling interval in milliseconds.
pub const DEFAULT_INTERVAL_MS: u64 = 1000;
