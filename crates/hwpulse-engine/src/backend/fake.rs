//! Scriptable in-memory backends for tests.
//!
//! Both fakes keep their state behind an `Arc<Mutex<..>>` so a test can keep
//! a [`FakeControl`] / [`FakeNetControl`] and change values after the engine
//! has taken ownership of the backend.

use super::{
    AdapterInfo, HardwareBackend, HardwareKind, NetworkBackend, NodeId, NodeInfo, SensorHandle,
    SensorInfo, SensorKind, Throughput,
};
use crate::{AdapterTarget, Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct FakeSensor {
    info: SensorInfo,
    value: Option<f64>,
}

struct FakeNode {
    info: NodeInfo,
    sensors: Vec<FakeSensor>,
}

#[derive(Default)]
struct HardwareState {
    nodes: Vec<FakeNode>,
    updates: HashMap<NodeId, usize>,
    fail_open: bool,
    fail_reads: bool,
    panic_reads: bool,
    stall_next_update: Option<Duration>,
    closes: usize,
    total_mb: f64,
    available_mb: f64,
}

/// Fake hardware backend.
pub struct FakeHardware {
    state: Arc<Mutex<HardwareState>>,
    next_handle: u32,
}

/// Handle for mutating a [`FakeHardware`] after it has been moved.
#[derive(Clone)]
pub struct FakeControl {
    state: Arc<Mutex<HardwareState>>,
}

impl FakeHardware {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HardwareState {
                total_mb: 16384.0,
                available_mb: 8192.0,
                ..Default::default()
            })),
            next_handle: 0,
        }
    }

    /// Adds a node with `(kind, label, value)` sensors.
    pub fn with_node(
        mut self,
        kind: HardwareKind,
        name: &str,
        sensors: &[(SensorKind, &str, f64)],
    ) -> Self {
        let mut state = self.state.lock().unwrap();
        let id = NodeId(state.nodes.len() as u32);
        let sensors = sensors
            .iter()
            .map(|(kind, label, value)| {
                let handle = SensorHandle(self.next_handle);
                self.next_handle += 1;
                FakeSensor {
                    info: SensorInfo {
                        handle,
                        kind: *kind,
                        label: label.to_string(),
                    },
                    value: Some(*value),
                }
            })
            .collect();
        state.nodes.push(FakeNode {
            info: NodeInfo {
                id,
                kind,
                name: name.to_string(),
            },
            sensors,
        });
        drop(state);
        self
    }

    pub fn with_memory(self, total_mb: f64, available_mb: f64) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.total_mb = total_mb;
            state.available_mb = available_mb;
        }
        self
    }

    pub fn failing_open(self) -> Self {
        self.state.lock().unwrap().fail_open = true;
        self
    }

    pub fn control(&self) -> FakeControl {
        FakeControl {
            state: self.state.clone(),
        }
    }
}

impl FakeControl {
    /// Sets the value of every sensor carrying `label`.
    pub fn set(&self, label: &str, value: Option<f64>) {
        let mut state = self.state.lock().unwrap();
        for node in &mut state.nodes {
            for sensor in &mut node.sensors {
                if sensor.info.label == label {
                    sensor.value = value;
                }
            }
        }
    }

    pub fn set_available_mb(&self, available_mb: f64) {
        self.state.lock().unwrap().available_mb = available_mb;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    pub fn panic_reads(&self, panic: bool) {
        self.state.lock().unwrap().panic_reads = panic;
    }

    /// Makes the next node refresh block the calling thread for `delay`.
    pub fn stall_next_update(&self, delay: Duration) {
        self.state.lock().unwrap().stall_next_update = Some(delay);
    }

    pub fn update_count(&self, node: NodeId) -> usize {
        self.state
            .lock()
            .unwrap()
            .updates
            .get(&node)
            .copied()
            .unwrap_or(0)
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().closes
    }
}

impl HardwareBackend for FakeHardware {
    fn open(&mut self) -> Result<()> {
        if self.state.lock().unwrap().fail_open {
            return Err(Error::BackendUnavailable("fake backend refused".into()));
        }
        Ok(())
    }

    fn nodes(&self) -> Vec<NodeInfo> {
        let state = self.state.lock().unwrap();
        state.nodes.iter().map(|n| n.info.clone()).collect()
    }

    fn sensors(&self, node: NodeId) -> Vec<SensorInfo> {
        let state = self.state.lock().unwrap();
        state
            .nodes
            .iter()
            .find(|n| n.info.id == node)
            .map(|n| n.sensors.iter().map(|s| s.info.clone()).collect())
            .unwrap_or_default()
    }

    fn update(&mut self, node: NodeId) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.nodes.iter().any(|n| n.info.id == node) {
            return Err(Error::UnknownNode(node));
        }
        *state.updates.entry(node).or_insert(0) += 1;
        if let Some(delay) = state.stall_next_update.take() {
            drop(state);
            std::thread::sleep(delay);
        }
        Ok(())
    }

    fn read(&self, sensor: SensorHandle) -> Result<Option<f64>> {
        let state = self.state.lock().unwrap();
        if state.panic_reads {
            drop(state);
            panic!("fake sensor fault");
        }
        if state.fail_reads {
            return Err(Error::Counter("fake sensor fault".into()));
        }
        state
            .nodes
            .iter()
            .flat_map(|n| n.sensors.iter())
            .find(|s| s.info.handle == sensor)
            .map(|s| s.value)
            .ok_or(Error::UnknownSensor(sensor))
    }

    fn total_memory_mb(&self) -> Result<f64> {
        Ok(self.state.lock().unwrap().total_mb)
    }

    fn available_memory_mb(&self) -> Result<f64> {
        Ok(self.state.lock().unwrap().available_mb)
    }

    fn close(&mut self) {
        self.state.lock().unwrap().closes += 1;
    }
}

#[derive(Default)]
struct NetworkState {
    adapters: Vec<AdapterInfo>,
    fail_enumeration: bool,
    throughput: HashMap<String, Throughput>,
    aggregate: Throughput,
    vanished: Vec<String>,
    enumerations: usize,
    releases: usize,
}

/// Fake network backend.
pub struct FakeNetwork {
    state: Arc<Mutex<NetworkState>>,
}

/// Handle for mutating a [`FakeNetwork`] after it has been moved.
#[derive(Clone)]
pub struct FakeNetControl {
    state: Arc<Mutex<NetworkState>>,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState::default())),
        }
    }

    /// Adds an adapter reporting `received_per_sec` during selection.
    pub fn with_adapter(self, name: &str, description: &str, received_per_sec: f64) -> Self {
        self.state.lock().unwrap().adapters.push(AdapterInfo {
            name: name.to_string(),
            description: description.to_string(),
            received_per_sec,
        });
        self
    }

    pub fn with_throughput(self, name: &str, sent: f64, received: f64) -> Self {
        self.control().set_throughput(name, sent, received);
        self
    }

    pub fn failing_enumeration(self) -> Self {
        self.state.lock().unwrap().fail_enumeration = true;
        self
    }

    pub fn control(&self) -> FakeNetControl {
        FakeNetControl {
            state: self.state.clone(),
        }
    }
}

impl FakeNetControl {
    pub fn set_throughput(&self, name: &str, sent: f64, received: f64) {
        self.state.lock().unwrap().throughput.insert(
            name.to_string(),
            Throughput {
                sent_per_sec: sent,
                received_per_sec: received,
            },
        );
    }

    pub fn set_aggregate(&self, sent: f64, received: f64) {
        self.state.lock().unwrap().aggregate = Throughput {
            sent_per_sec: sent,
            received_per_sec: received,
        };
    }

    /// Removes an adapter: reads fail with `AdapterVanished` and it no longer
    /// enumerates.
    pub fn remove(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.adapters.retain(|a| a.name != name);
        state.vanished.push(name.to_string());
    }

    pub fn enumerations(&self) -> usize {
        self.state.lock().unwrap().enumerations
    }

    pub fn releases(&self) -> usize {
        self.state.lock().unwrap().releases
    }
}

impl NetworkBackend for FakeNetwork {
    fn adapters(&mut self) -> Result<Vec<AdapterInfo>> {
        let mut state = self.state.lock().unwrap();
        state.enumerations += 1;
        if state.fail_enumeration {
            return Err(Error::Counter("fake enumeration failure".into()));
        }
        Ok(state.adapters.clone())
    }

    fn read_throughput(&mut self, target: &AdapterTarget) -> Result<Throughput> {
        let state = self.state.lock().unwrap();
        match target {
            AdapterTarget::Aggregate => Ok(state.aggregate),
            AdapterTarget::Named(name) => {
                if state.vanished.contains(name) {
                    return Err(Error::AdapterVanished(name.clone()));
                }
                Ok(state.throughput.get(name).copied().unwrap_or_default())
            }
        }
    }

    fn release(&mut self) {
        self.state.lock().unwrap().releases += 1;
    }
}
