//! Network throughput from `/sys/class/net/<iface>/statistics`.

use super::{AdapterInfo, NetworkBackend, Throughput};
use crate::{AdapterTarget, Error, Result};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default sampling window of the first adapter enumeration.
pub const DEFAULT_PROBE_WINDOW: Duration = Duration::from_millis(250);

// ARPHRD_* link types from <linux/if_arp.h>
const ARPHRD_TUNNEL: u32 = 768;
const ARPHRD_TUNNEL6: u32 = 769;
const ARPHRD_LOOPBACK: u32 = 772;
const ARPHRD_SIT: u32 = 776;
const ARPHRD_IPGRE: u32 = 778;
const ARPHRD_NONE: u32 = 65534;

/// Counter state bound to one target.
struct Binding {
    target: AdapterTarget,
    rx_bytes: u64,
    tx_bytes: u64,
    at: Instant,
}

fn per_second(delta: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    delta as f64 / secs
}

/// Network backend over sysfs interface statistics.
pub struct LinuxNetwork {
    sys_root: PathBuf,
    probe_window: Duration,
    last_scan: Option<(Instant, HashMap<String, u64>)>,
    binding: Option<Binding>,
}

impl LinuxNetwork {
    pub fn new() -> Self {
        Self::with_root("/sys", DEFAULT_PROBE_WINDOW)
    }

    pub fn with_root<P: Into<PathBuf>>(sys_root: P, probe_window: Duration) -> Self {
        Self {
            sys_root: sys_root.into(),
            probe_window,
            last_scan: None,
            binding: None,
        }
    }

    fn net_dir(&self) -> PathBuf {
        self.sys_root.join("class/net")
    }

    fn list_interfaces(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = fs::read_dir(self.net_dir())?
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    /// Describes an interface by link type, falling back to its driver.
    fn describe(&self, name: &str) -> String {
        let iface = self.net_dir().join(name);
        let link_type = fs::read_to_string(iface.join("type"))
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok());

        match link_type {
            Some(ARPHRD_LOOPBACK) => return "loopback".to_string(),
            Some(ARPHRD_SIT) => return "6to4 tunnel".to_string(),
            Some(ARPHRD_TUNNEL | ARPHRD_TUNNEL6 | ARPHRD_IPGRE | ARPHRD_NONE) => {
                return "tunnel".to_string()
            }
            _ => {}
        }

        fs::read_link(iface.join("device/driver"))
            .ok()
            .and_then(|driver| {
                driver
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
            })
            .unwrap_or_else(|| "virtual".to_string())
    }

    /// Reads (rx_bytes, tx_bytes) of one interface.
    fn read_counters(&self, name: &str) -> Result<(u64, u64)> {
        let stats = self.net_dir().join(name).join("statistics");
        if !self.net_dir().join(name).exists() {
            return Err(Error::AdapterVanished(name.to_string()));
        }
        let read = |file: &str| -> Result<u64> {
            let path = stats.join(file);
            fs::read_to_string(&path)?
                .trim()
                .parse()
                .map_err(|_| Error::Counter(format!("{}: not a number", path.display())))
        };
        Ok((read("rx_bytes")?, read("tx_bytes")?))
    }

    fn received_totals(&self, names: &[String]) -> HashMap<String, u64> {
        names
            .iter()
            .filter_map(|name| {
                let (rx, _) = self.read_counters(name).ok()?;
                Some((name.clone(), rx))
            })
            .collect()
    }

    fn read_target(&self, target: &AdapterTarget) -> Result<(u64, u64)> {
        match target {
            AdapterTarget::Named(name) => self.read_counters(name),
            AdapterTarget::Aggregate => {
                let mut totals = (0u64, 0u64);
                for name in self.list_interfaces()? {
                    if self.describe(&name) == "loopback" {
                        continue;
                    }
                    if let Ok((rx, tx)) = self.read_counters(&name) {
                        totals.0 = totals.0.saturating_add(rx);
                        totals.1 = totals.1.saturating_add(tx);
                    }
                }
                Ok(totals)
            }
        }
    }
}

impl Default for LinuxNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkBackend for LinuxNetwork {
    fn adapters(&mut self) -> Result<Vec<AdapterInfo>> {
        let names = self.list_interfaces()?;

        let (since, baseline) = match self.last_scan.take() {
            Some(scan) => scan,
            None => {
                let start = Instant::now();
                let baseline = self.received_totals(&names);
                std::thread::sleep(self.probe_window);
                (start, baseline)
            }
        };

        let now = Instant::now();
        let totals = self.received_totals(&names);
        let elapsed = now - since;

        let adapters = names
            .iter()
            .filter(|name| totals.contains_key(*name))
            .map(|name| {
                let received_per_sec = match (baseline.get(name), totals.get(name)) {
                    (Some(before), Some(after)) => per_second(after.saturating_sub(*before), elapsed),
                    _ => 0.0,
                };
                AdapterInfo {
                    name: name.clone(),
                    description: self.describe(name),
                    received_per_sec,
                }
            })
            .collect();

        self.last_scan = Some((now, totals));
        Ok(adapters)
    }

    fn read_throughput(&mut self, target: &AdapterTarget) -> Result<Throughput> {
        let (rx_bytes, tx_bytes) = self.read_target(target)?;
        let now = Instant::now();

        let throughput = match &self.binding {
            Some(prev) if &prev.target == target => {
                let elapsed = now - prev.at;
                Throughput {
                    sent_per_sec: per_second(tx_bytes.saturating_sub(prev.tx_bytes), elapsed),
                    received_per_sec: per_second(rx_bytes.saturating_sub(prev.rx_bytes), elapsed),
                }
            }
            _ => {
                debug!("Priming network counters for {}", target);
                Throughput::default()
            }
        };

        self.binding = Some(Binding {
            target: target.clone(),
            rx_bytes,
            tx_bytes,
            at: now,
        });
        Ok(throughput)
    }

    fn release(&mut self) {
        self.binding = None;
    }
}
