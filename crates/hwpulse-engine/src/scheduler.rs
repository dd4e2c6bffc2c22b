//! Fixed-interval sampling.
//!
//! [`Sampler`] owns every sensor and counter handle and turns them into one
//! [`MetricSample`] per tick. [`SampleScheduler`] moves the sampler into a
//! tokio task for the duration of a run and takes it back on stop.

use crate::adapter::AdapterSelector;
use crate::backend::{HardwareBackend, NetworkBackend, NodeId, Throughput};
use crate::inventory::{HardwareInventory, SensorBinding};
use crate::rate::scale;
use crate::sample::{clamp_pct, MetricSample, NO_POWER_SENSOR};
use crate::{Error, Result};
use chrono::Utc;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// How often repeated tick failures are summarized in the log.
const ERROR_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// RAM usage from total and available MiB.
pub(crate) fn ram_usage_pct(total_mb: f64, available_mb: f64) -> f64 {
    if total_mb <= 0.0 {
        return 0.0;
    }
    clamp_pct(100.0 - (available_mb / total_mb * 100.0))
}

/// Disk usage is the busiest disk, so one saturated disk is never hidden by
/// idle ones.
pub(crate) fn disk_usage_pct(values: impl IntoIterator<Item = f64>) -> f64 {
    values
        .into_iter()
        .map(clamp_pct)
        .fold(0.0, f64::max)
}

/// Reads cached sensors and counters into samples.
pub struct Sampler<H, N> {
    hardware: H,
    network: N,
    inventory: HardwareInventory,
    selector: AdapterSelector,
    refresh: Vec<NodeId>,
    total_memory_mb: f64,
    sequence: u64,
}

impl<H: HardwareBackend, N: NetworkBackend> Sampler<H, N> {
    /// Creates a sampler over discovered sensors. `total_memory_mb` is
    /// treated as fixed for the life of the sampler.
    pub fn new(
        hardware: H,
        network: N,
        inventory: HardwareInventory,
        selector: AdapterSelector,
        total_memory_mb: f64,
    ) -> Self {
        let refresh = inventory.nodes_to_refresh();
        Self {
            hardware,
            network,
            inventory,
            selector,
            refresh,
            total_memory_mb,
            sequence: 0,
        }
    }

    /// Runs one sampling pass. Either every field of the returned sample is
    /// fresh or an error is returned and nothing changes.
    pub fn tick(&mut self) -> Result<MetricSample> {
        // Each node once, even when several roles read from it
        for node in &self.refresh {
            self.hardware.update(*node)?;
        }

        let cpu_usage_pct = clamp_pct(self.read(self.inventory.cpu_load)?.unwrap_or(0.0));
        let gpu_usage_pct = clamp_pct(self.read(self.inventory.gpu_load)?.unwrap_or(0.0));
        let cpu_power_watts = self
            .read(self.inventory.cpu_power)?
            .unwrap_or(NO_POWER_SENSOR);

        let available_mb = self.hardware.available_memory_mb()?;
        let ram_usage_pct = ram_usage_pct(self.total_memory_mb, available_mb);

        let mut disks = Vec::with_capacity(self.inventory.disk_load.len());
        for binding in &self.inventory.disk_load {
            if let Some(value) = self.hardware.read(binding.sensor)? {
                disks.push(value);
            }
        }
        let disk_usage_pct = disk_usage_pct(disks);

        let throughput = self.read_network()?;
        let (net_upload_rate, net_upload_unit) = scale(throughput.sent_per_sec);
        let (net_download_rate, net_download_unit) = scale(throughput.received_per_sec);

        self.sequence += 1;
        Ok(MetricSample {
            sequence: self.sequence,
            timestamp: Utc::now(),
            cpu_usage_pct,
            gpu_usage_pct,
            ram_usage_pct,
            disk_usage_pct,
            net_upload_rate,
            net_upload_unit,
            net_download_rate,
            net_download_unit,
            cpu_power_watts,
        })
    }

    fn read(&self, binding: Option<SensorBinding>) -> Result<Option<f64>> {
        match binding {
            Some(binding) => self.hardware.read(binding.sensor),
            None => Ok(None),
        }
    }

    fn read_network(&mut self) -> Result<Throughput> {
        let target = self.selector.resolve(&mut self.network).clone();
        match self.network.read_throughput(&target) {
            Ok(throughput) => Ok(throughput),
            Err(e) => {
                if e.is_unrecoverable() {
                    self.selector.invalidate();
                }
                Err(e)
            }
        }
    }

    /// Returns the discovered sensors.
    pub fn inventory(&self) -> &HardwareInventory {
        &self.inventory
    }

    /// Returns the adapter selector and its cached selection.
    pub fn selector(&self) -> &AdapterSelector {
        &self.selector
    }

    fn release(&mut self) {
        self.network.release();
    }

    fn close(&mut self) {
        self.network.release();
        self.hardware.close();
    }
}

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running,
    Stopped,
    Closed,
}

struct Run<H, N> {
    active: Arc<AtomicBool>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<Sampler<H, N>>,
}

enum Phase<H, N> {
    Idle(Sampler<H, N>),
    Running(Run<H, N>),
    Stopped(Sampler<H, N>),
    Closed,
}

/// Owns the sampler and the timer task driving it.
pub struct SampleScheduler<H, N> {
    interval: Duration,
    phase: Phase<H, N>,
}

impl<H: HardwareBackend, N: NetworkBackend> SampleScheduler<H, N> {
    pub fn new(sampler: Sampler<H, N>, interval: Duration) -> Self {
        Self {
            interval,
            phase: Phase::Idle(sampler),
        }
    }

    pub fn state(&self) -> EngineState {
        match self.phase {
            Phase::Idle(_) => EngineState::Idle,
            Phase::Running(_) => EngineState::Running,
            Phase::Stopped(_) => EngineState::Stopped,
            Phase::Closed => EngineState::Closed,
        }
    }

    /// Arms the timer. `publish` runs on the timer task once per successful
    /// tick. Starting a running scheduler does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(&mut self, publish: F) -> Result<()>
    where
        F: Fn(MetricSample) + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Runtime(e.to_string()))?;

        let sampler = match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Idle(sampler) | Phase::Stopped(sampler) => sampler,
            Phase::Running(run) => {
                self.phase = Phase::Running(run);
                return Ok(());
            }
            Phase::Closed => return Err(Error::Closed),
        };

        let active = Arc::new(AtomicBool::new(true));
        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = runtime.spawn(run(
            sampler,
            self.interval,
            active.clone(),
            shutdown_rx,
            publish,
        ));
        info!("Sampling every {:?}", self.interval);

        self.phase = Phase::Running(Run {
            active,
            shutdown,
            task,
        });
        Ok(())
    }

    /// Disarms the timer and waits for an in-flight tick to finish. No
    /// sample is published after this returns.
    pub async fn stop(&mut self) {
        let run = match std::mem::replace(&mut self.phase, Phase::Closed) {
            Phase::Running(run) => run,
            other => {
                self.phase = other;
                return;
            }
        };

        run.active.store(false, Ordering::Release);
        let _ = run.shutdown.send(());

        match run.task.await {
            Ok(mut sampler) => {
                sampler.release();
                self.phase = Phase::Stopped(sampler);
                info!("Sampling stopped");
            }
            Err(e) => {
                // The sampler, and with it the backends, went down with the task
                error!("Sampling task ended abnormally, engine closed: {}", e);
                self.phase = Phase::Closed;
            }
        }
    }

    /// Stops if needed and releases the backends. Safe to call repeatedly.
    pub async fn close(&mut self) {
        self.stop().await;
        if let Phase::Idle(mut sampler) | Phase::Stopped(mut sampler) =
            std::mem::replace(&mut self.phase, Phase::Closed)
        {
            sampler.close();
            info!("Backends closed");
        }
    }
}

impl<H, N> Drop for SampleScheduler<H, N> {
    fn drop(&mut self) {
        if let Phase::Running(run) = &self.phase {
            run.active.store(false, Ordering::Release);
            run.task.abort();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn run<H, N, F>(
    mut sampler: Sampler<H, N>,
    period: Duration,
    active: Arc<AtomicBool>,
    mut shutdown: oneshot::Receiver<()>,
    publish: F,
) -> Sampler<H, N>
where
    H: HardwareBackend,
    N: NetworkBackend,
    F: Fn(MetricSample),
{
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut suppressed: u32 = 0;
    let mut last_error_log: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
        }

        let outcome = catch_unwind(AssertUnwindSafe(|| sampler.tick()))
            .unwrap_or_else(|payload| Err(Error::TickPanicked(panic_message(payload.as_ref()))));

        match outcome {
            Ok(sample) => {
                if !active.load(Ordering::Acquire) {
                    break;
                }
                debug!("Tick {} sampled", sample.sequence);
                publish(sample);
            }
            Err(e) => {
                // First failure right away, then a summary at most once a minute
                let due = last_error_log.map_or(true, |t| t.elapsed() >= ERROR_LOG_INTERVAL);
                if due {
                    if suppressed > 0 {
                        warn!(
                            "Sampling tick failed (repeated {} times since last report): {}",
                            suppressed + 1,
                            e
                        );
                    } else {
                        warn!("Sampling tick failed: {}", e);
                    }
                    last_error_log = Some(Instant::now());
                    suppressed = 0;
                } else {
                    suppressed += 1;
                }
            }
        }
    }

    sampler
}
