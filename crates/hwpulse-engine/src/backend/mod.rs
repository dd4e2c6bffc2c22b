//! Hardware and network counter backends.
//!
//! The engine only talks to the platform through the two traits in this
//! module. [`linux`] and [`linux_net`] implement them on procfs/sysfs.

pub mod linux;
pub mod linux_net;

#[cfg(test)]
pub(crate) mod fake;

use crate::Result;
use std::fmt;

/// Opaque reference to one readable sensor of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SensorHandle(pub u32);

impl fmt::Display for SensorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sensor#{}", self.0)
    }
}

/// Opaque reference to one hardware node of a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Device grouping of a hardware node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareKind {
    Cpu,
    Gpu,
    Storage,
    Memory,
    Network,
    Other,
}

/// Quantity a sensor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// Percentage, 0-100.
    Load,
    /// Watts.
    Power,
    /// Bytes/second.
    Throughput,
    /// Degrees Celsius.
    Temperature,
    Other,
}

/// A hardware node as enumerated by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub kind: HardwareKind,
    pub name: String,
}

/// A sensor as enumerated by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorInfo {
    pub handle: SensorHandle,
    pub kind: SensorKind,
    pub label: String,
}

/// Hardware sensor backend.
///
/// Sensor values are only current after the owning node has been refreshed
/// with [`HardwareBackend::update`].
pub trait HardwareBackend: Send + 'static {
    /// Initializes the platform API. Fails with `BackendUnavailable`.
    fn open(&mut self) -> Result<()>;

    /// Returns all hardware nodes in discovery order.
    fn nodes(&self) -> Vec<NodeInfo>;

    /// Returns the sensors of a node in discovery order.
    fn sensors(&self, node: NodeId) -> Vec<SensorInfo>;

    /// Refreshes the counters of a node.
    fn update(&mut self, node: NodeId) -> Result<()>;

    /// Reads the value cached by the last refresh. `None` if the sensor has
    /// no value yet.
    fn read(&self, sensor: SensorHandle) -> Result<Option<f64>>;

    /// Total physical memory in MiB.
    fn total_memory_mb(&self) -> Result<f64>;

    /// Currently available memory in MiB.
    fn available_memory_mb(&self) -> Result<f64>;

    /// Releases the backend. Safe to call more than once.
    fn close(&mut self);
}

/// A network adapter as seen during selection.
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterInfo {
    pub name: String,
    pub description: String,
    /// Best-effort received bytes/second at enumeration time.
    pub received_per_sec: f64,
}

/// Bytes/second in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Throughput {
    pub sent_per_sec: f64,
    pub received_per_sec: f64,
}

/// Network throughput counter backend.
pub trait NetworkBackend: Send + 'static {
    /// Enumerates adapters with a single received-rate sample each.
    fn adapters(&mut self) -> Result<Vec<AdapterInfo>>;

    /// Reads the per-second counters bound to `target`.
    ///
    /// Fails with `AdapterVanished` when a named adapter no longer exists.
    fn read_throughput(&mut self, target: &crate::AdapterTarget) -> Result<Throughput>;

    /// Drops any counter state bound to an adapter.
    fn release(&mut self);
}
