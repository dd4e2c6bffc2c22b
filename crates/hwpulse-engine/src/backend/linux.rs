//! procfs/sysfs hardware backend.
//!
//! - CPU load from `/proc/stat` jiffy deltas
//! - CPU package power from RAPL `energy_uj` deltas
//! - GPU load from DRM `gpu_busy_percent`
//! - Disk load from the `io_ticks` column of `/proc/diskstats`
//! - Memory from `/proc/meminfo`

use super::{HardwareBackend, HardwareKind, NodeId, NodeInfo, SensorHandle, SensorInfo, SensorKind};
use crate::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Block devices that never represent a physical disk.
const IGNORED_BLOCK_PREFIXES: &[&str] = &["loop", "ram", "zram", "dm-", "sr", "fd", "nbd"];

/// Parses the aggregate `cpu` line of `/proc/stat` into (idle, total) jiffies.
fn parse_cpu_times(content: &str) -> Option<(u64, u64)> {
    let line = content.lines().find(|l| l.starts_with("cpu "))?;
    let parts: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|s| s.parse().ok())
        .collect();

    if parts.len() < 4 {
        return None;
    }
    // user nice system idle iowait irq softirq steal; guest time is already in user
    let idle = parts[3] + parts.get(4).copied().unwrap_or(0);
    let total: u64 = parts.iter().take(8).sum();
    Some((idle, total))
}

fn cpu_load_percent(prev: (u64, u64), cur: (u64, u64)) -> Option<f64> {
    let idle_delta = cur.0.saturating_sub(prev.0);
    let total_delta = cur.1.saturating_sub(prev.1);
    if total_delta == 0 {
        return None;
    }
    Some(100.0 * (1.0 - (idle_delta as f64 / total_delta as f64)))
}

/// Reads milliseconds spent doing I/O for `device` from `/proc/diskstats`.
///
/// Fields: major minor name reads_completed reads_merged sectors_read
///         time_reading writes_completed writes_merged sectors_written
///         time_writing ios_in_progress time_doing_io weighted_time_doing_io
fn parse_io_ticks(content: &str, device: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() >= 13 && parts[2] == device {
            parts[12].parse().ok()
        } else {
            None
        }
    })
}

fn busy_percent(prev_ticks: u64, ticks: u64, elapsed: Duration) -> Option<f64> {
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    if elapsed_ms <= 0.0 {
        return None;
    }
    let busy_ms = ticks.saturating_sub(prev_ticks) as f64;
    Some((100.0 * busy_ms / elapsed_ms).min(100.0))
}

/// Watts from two energy readings. The counter wraps at `max_range_uj`.
fn rapl_watts(prev_uj: u64, cur_uj: u64, elapsed: Duration, max_range_uj: Option<u64>) -> Option<f64> {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return None;
    }
    let delta = if cur_uj >= prev_uj {
        cur_uj - prev_uj
    } else {
        max_range_uj?.checked_sub(prev_uj)? + cur_uj
    };
    Some(delta as f64 / secs / 1_000_000.0)
}

fn parse_meminfo_kb(content: &str, key: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let rest = line.strip_prefix(key)?.strip_prefix(':')?;
        rest.split_whitespace().next()?.parse().ok()
    })
}

/// Physical memory in bytes as reported by `sysconf`.
fn physical_memory_bytes() -> Option<u64> {
    // SAFETY: sysconf has no preconditions and only reads system constants.
    let (pages, page_size) =
        unsafe { (libc::sysconf(libc::_SC_PHYS_PAGES), libc::sysconf(libc::_SC_PAGESIZE)) };
    if pages <= 0 || page_size <= 0 {
        return None;
    }
    Some(pages as u64 * page_size as u64)
}

fn read_u64(path: &Path) -> Result<u64> {
    let content = fs::read_to_string(path)?;
    content
        .trim()
        .parse()
        .map_err(|_| Error::Counter(format!("{}: not a number", path.display())))
}

fn sorted_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .map(|e| e.file_name().to_string_lossy().to_string())
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

enum Counter {
    CpuTime {
        last: Option<(u64, u64)>,
    },
    Rapl {
        energy: PathBuf,
        max_range_uj: Option<u64>,
        last: Option<(u64, Instant)>,
    },
    GpuBusy {
        path: PathBuf,
    },
    IoTicks {
        device: String,
        last: Option<(u64, Instant)>,
    },
}

struct LinuxSensor {
    info: SensorInfo,
    counter: Counter,
    value: Option<f64>,
}

struct LinuxNode {
    info: NodeInfo,
    sensors: Vec<LinuxSensor>,
}

/// Hardware backend reading procfs and sysfs.
pub struct LinuxHardware {
    proc_root: PathBuf,
    sys_root: PathBuf,
    nodes: Vec<LinuxNode>,
    next_handle: u32,
    open: bool,
}

impl LinuxHardware {
    /// Creates a backend over the live `/proc` and `/sys`.
    pub fn new() -> Self {
        Self::with_roots("/proc", "/sys")
    }

    /// Creates a backend over alternative proc and sys mounts.
    pub fn with_roots<P: Into<PathBuf>, S: Into<PathBuf>>(proc_root: P, sys_root: S) -> Self {
        Self {
            proc_root: proc_root.into(),
            sys_root: sys_root.into(),
            nodes: Vec::new(),
            next_handle: 0,
            open: false,
        }
    }

    fn sensor(&mut self, kind: SensorKind, label: &str, counter: Counter) -> LinuxSensor {
        let handle = SensorHandle(self.next_handle);
        self.next_handle += 1;
        LinuxSensor {
            info: SensorInfo {
                handle,
                kind,
                label: label.to_string(),
            },
            counter,
            value: None,
        }
    }

    fn push_node(&mut self, kind: HardwareKind, name: String, sensors: Vec<LinuxSensor>) {
        let id = NodeId(self.nodes.len() as u32);
        debug!("Found {:?} node {} ({}) with {} sensors", kind, id, name, sensors.len());
        self.nodes.push(LinuxNode {
            info: NodeInfo { id, kind, name },
            sensors,
        });
    }

    fn cpu_model(&self) -> String {
        fs::read_to_string(self.proc_root.join("cpuinfo"))
            .ok()
            .and_then(|content| {
                content.lines().find_map(|line| {
                    let (key, value) = line.split_once(':')?;
                    (key.trim() == "model name").then(|| value.trim().to_string())
                })
            })
            .unwrap_or_else(|| "cpu".to_string())
    }

    /// Finds the first readable RAPL package zone.
    fn package_zone(&self) -> Option<(PathBuf, Option<u64>)> {
        let base = self.sys_root.join("class/powercap");
        sorted_entries(&base).into_iter().find_map(|entry| {
            let zone = base.join(entry);
            let name = fs::read_to_string(zone.join("name")).ok()?;
            if !name.trim().starts_with("package") {
                return None;
            }
            // energy_uj is often root-only
            let energy = zone.join("energy_uj");
            read_u64(&energy).ok()?;
            let max_range = read_u64(&zone.join("max_energy_range_uj")).ok();
            Some((energy, max_range))
        })
    }

    fn enumerate(&mut self) {
        self.nodes.clear();
        self.next_handle = 0;

        let mut cpu_sensors = vec![self.sensor(
            SensorKind::Load,
            "CPU Total",
            Counter::CpuTime { last: None },
        )];
        if let Some((energy, max_range_uj)) = self.package_zone() {
            let power = self.sensor(
                SensorKind::Power,
                "CPU Package",
                Counter::Rapl {
                    energy,
                    max_range_uj,
                    last: None,
                },
            );
            cpu_sensors.push(power);
        }
        let model = self.cpu_model();
        self.push_node(HardwareKind::Cpu, model, cpu_sensors);

        let drm = self.sys_root.join("class/drm");
        for card in sorted_entries(&drm) {
            let is_card = card
                .strip_prefix("card")
                .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()));
            let busy = drm.join(&card).join("device/gpu_busy_percent");
            if !is_card || !busy.exists() {
                continue;
            }
            let load = self.sensor(SensorKind::Load, "GPU Core", Counter::GpuBusy { path: busy });
            self.push_node(HardwareKind::Gpu, card, vec![load]);
        }

        for device in sorted_entries(&self.sys_root.join("block")) {
            if IGNORED_BLOCK_PREFIXES.iter().any(|p| device.starts_with(p)) {
                continue;
            }
            let load = self.sensor(
                SensorKind::Load,
                "Total Activity",
                Counter::IoTicks {
                    device: device.clone(),
                    last: None,
                },
            );
            self.push_node(HardwareKind::Storage, device, vec![load]);
        }
    }

    fn node_mut(&mut self, node: NodeId) -> Result<&mut LinuxNode> {
        if !self.open {
            return Err(Error::BackendClosed);
        }
        self.nodes
            .get_mut(node.0 as usize)
            .ok_or(Error::UnknownNode(node))
    }
}

impl Default for LinuxHardware {
    fn default() -> Self {
        Self::new()
    }
}

fn sample_counter(counter: &mut Counter, proc_root: &Path) -> Result<Option<f64>> {
    let now = Instant::now();
    match counter {
        Counter::CpuTime { last } => {
            let content = fs::read_to_string(proc_root.join("stat"))?;
            let times = parse_cpu_times(&content)
                .ok_or_else(|| Error::Counter("malformed /proc/stat".into()))?;
            let load = last.and_then(|prev| cpu_load_percent(prev, times));
            *last = Some(times);
            Ok(load)
        }
        Counter::Rapl {
            energy,
            max_range_uj,
            last,
        } => {
            let uj = read_u64(energy)?;
            let watts = last.and_then(|(prev, at)| rapl_watts(prev, uj, now - at, *max_range_uj));
            *last = Some((uj, now));
            Ok(watts)
        }
        // A GPU or disk that goes away reads as absent until it comes back
        Counter::GpuBusy { path } => match read_u64(path) {
            Ok(busy) => Ok(Some(busy as f64)),
            Err(e) => {
                debug!("{}: {}", path.display(), e);
                Ok(None)
            }
        },
        Counter::IoTicks { device, last } => {
            let content = fs::read_to_string(proc_root.join("diskstats"))?;
            let Some(ticks) = parse_io_ticks(&content, device) else {
                if last.take().is_some() {
                    warn!("Disk {} disappeared from diskstats", device);
                }
                return Ok(None);
            };
            let busy = last.and_then(|(prev, at)| busy_percent(prev, ticks, now - at));
            *last = Some((ticks, now));
            Ok(busy)
        }
    }
}

impl HardwareBackend for LinuxHardware {
    fn open(&mut self) -> Result<()> {
        if self.open {
            return Ok(());
        }
        let stat = self.proc_root.join("stat");
        fs::read_to_string(&stat)
            .map_err(|e| Error::BackendUnavailable(format!("{}: {}", stat.display(), e)))?;

        self.open = true;
        self.enumerate();
        info!(
            "Hardware backend opened ({} nodes under {} and {})",
            self.nodes.len(),
            self.proc_root.display(),
            self.sys_root.display()
        );
        Ok(())
    }

    fn nodes(&self) -> Vec<NodeInfo> {
        self.nodes.iter().map(|n| n.info.clone()).collect()
    }

    fn sensors(&self, node: NodeId) -> Vec<SensorInfo> {
        self.nodes
            .get(node.0 as usize)
            .map(|n| n.sensors.iter().map(|s| s.info.clone()).collect())
            .unwrap_or_default()
    }

    fn update(&mut self, node: NodeId) -> Result<()> {
        let proc_root = self.proc_root.clone();
        let node = self.node_mut(node)?;
        for sensor in &mut node.sensors {
            sensor.value = sample_counter(&mut sensor.counter, &proc_root)?;
        }
        Ok(())
    }

    fn read(&self, sensor: SensorHandle) -> Result<Option<f64>> {
        if !self.open {
            return Err(Error::BackendClosed);
        }
        self.nodes
            .iter()
            .flat_map(|n| n.sensors.iter())
            .find(|s| s.info.handle == sensor)
            .map(|s| s.value)
            .ok_or(Error::UnknownSensor(sensor))
    }

    fn total_memory_mb(&self) -> Result<f64> {
        let meminfo = fs::read_to_string(self.proc_root.join("meminfo")).unwrap_or_default();
        if let Some(kb) = parse_meminfo_kb(&meminfo, "MemTotal") {
            return Ok(kb as f64 / 1024.0);
        }
        physical_memory_bytes()
            .map(|bytes| bytes as f64 / (1024.0 * 1024.0))
            .ok_or_else(|| Error::Counter("total memory unknown".into()))
    }

    fn available_memory_mb(&self) -> Result<f64> {
        let meminfo = fs::read_to_string(self.proc_root.join("meminfo"))?;
        parse_meminfo_kb(&meminfo, "MemAvailable")
            .map(|kb| kb as f64 / 1024.0)
            .ok_or_else(|| Error::Counter("MemAvailable missing from meminfo".into()))
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.nodes.clear();
            debug!("Hardware backend closed");
        }
    }
}
