//! One-time sensor discovery.
//!
//! Walks the backend's hardware nodes once and keeps exactly the sensor
//! handles the sampler reads on every tick.

use crate::backend::{HardwareBackend, HardwareKind, NodeId, SensorInfo, SensorKind};
use crate::Result;
use tracing::{debug, info, warn};

/// Labels of the aggregate CPU load sensor.
const CPU_LOAD_LABELS: &[&str] = &["CPU Total"];

/// Labels vendors use for package/SoC power.
const CPU_POWER_LABELS: &[&str] = &["CPU Package", "Package Power", "CPU PPT", "Package"];

/// Labels of the GPU core load sensor.
const GPU_LOAD_LABELS: &[&str] = &["GPU Core"];

/// Logical role a cached sensor plays in a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    CpuLoad,
    CpuPower,
    GpuLoad,
    DiskLoad,
}

/// A cached sensor together with the node that must be refreshed before
/// reading it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorBinding {
    pub node: NodeId,
    pub sensor: crate::backend::SensorHandle,
}

/// Sensors resolved per role. An unresolved role is a permanent, valid state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HardwareInventory {
    pub cpu_load: Option<SensorBinding>,
    pub cpu_power: Option<SensorBinding>,
    pub gpu_load: Option<SensorBinding>,
    pub disk_load: Vec<SensorBinding>,
}

fn label_matches(label: &str, candidates: &[&str]) -> bool {
    let label = label.trim();
    candidates.iter().any(|c| label.eq_ignore_ascii_case(c))
}

impl HardwareInventory {
    /// Walks all hardware nodes exactly once and caches the sensors per role.
    ///
    /// The first matching sensor wins a role. Disk load sensors are collected
    /// from every storage node. A node that fails to refresh is skipped.
    pub fn discover<H: HardwareBackend>(backend: &mut H) -> Result<Self> {
        let mut inventory = Self::default();

        for node in backend.nodes() {
            if !matches!(
                node.kind,
                HardwareKind::Cpu | HardwareKind::Gpu | HardwareKind::Storage
            ) {
                continue;
            }

            // Sensors only report values after a refresh
            if let Err(e) = backend.update(node.id) {
                warn!("Skipping {} ({}): {}", node.name, node.id, e);
                continue;
            }

            let sensors = backend.sensors(node.id);
            debug!(
                "Scanning {:?} node '{}' with {} sensors",
                node.kind,
                node.name,
                sensors.len()
            );

            for sensor in &sensors {
                inventory.offer(node.kind, node.id, sensor);
            }
        }

        info!(
            "Discovered sensors: cpu_load={} cpu_power={} gpu_load={} disks={}",
            inventory.cpu_load.is_some(),
            inventory.cpu_power.is_some(),
            inventory.gpu_load.is_some(),
            inventory.disk_load.len()
        );
        Ok(inventory)
    }

    fn offer(&mut self, kind: HardwareKind, node: NodeId, sensor: &SensorInfo) {
        let binding = SensorBinding {
            node,
            sensor: sensor.handle,
        };

        match (kind, sensor.kind) {
            (HardwareKind::Cpu, SensorKind::Load) if label_matches(&sensor.label, CPU_LOAD_LABELS) => {
                self.cpu_load.get_or_insert(binding);
            }
            (HardwareKind::Cpu, SensorKind::Power)
                if label_matches(&sensor.label, CPU_POWER_LABELS) =>
            {
                self.cpu_power.get_or_insert(binding);
            }
            (HardwareKind::Gpu, SensorKind::Load) if label_matches(&sensor.label, GPU_LOAD_LABELS) => {
                self.gpu_load.get_or_insert(binding);
            }
            (HardwareKind::Storage, SensorKind::Load) => {
                self.disk_load.push(binding);
            }
            _ => {}
        }
    }

    /// Returns the bindings cached for a role.
    pub fn bindings(&self, role: Role) -> Vec<SensorBinding> {
        match role {
            Role::CpuLoad => self.cpu_load.into_iter().collect(),
            Role::CpuPower => self.cpu_power.into_iter().collect(),
            Role::GpuLoad => self.gpu_load.into_iter().collect(),
            Role::DiskLoad => self.disk_load.clone(),
        }
    }

    /// Returns true if at least one sensor backs the role.
    pub fn is_resolved(&self, role: Role) -> bool {
        !self.bindings(role).is_empty()
    }

    /// Distinct nodes backing resolved roles, in first-seen order.
    pub fn nodes_to_refresh(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = Vec::new();
        let bindings = self
            .cpu_load
            .iter()
            .chain(self.cpu_power.iter())
            .chain(self.gpu_load.iter())
            .chain(self.disk_load.iter());
        for binding in bindings {
            if !nodes.contains(&binding.node) {
                nodes.push(binding.node);
            }
        }
        nodes
    }
}
