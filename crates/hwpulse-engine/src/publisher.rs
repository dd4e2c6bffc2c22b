//! Public engine surface.
//!
//! Consumers open a [`MetricsPublisher`], start it, and read
//! [`MetricSample`]s through [`MetricsPublisher::latest`], a
//! [`SampleReader`], or per-tick subscriptions.

use crate::adapter::AdapterSelector;
use crate::backend::{HardwareBackend, NetworkBackend};
use crate::inventory::HardwareInventory;
use crate::sample::MetricSample;
use crate::scheduler::{EngineState, SampleScheduler, Sampler};
use crate::{Result, DEFAULT_INTERVAL_MS};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sampling interval.
    pub interval: Duration,
    /// Interface to bind network rates to when present.
    pub preferred_interface: Option<String>,
    /// Substrings added to the adapter blacklist.
    pub extra_blacklist: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            preferred_interface: None,
            extra_blacklist: Vec::new(),
        }
    }
}

/// Token returned by [`MetricsPublisher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Observers {
    next_id: AtomicU64,
    entries: Mutex<Vec<(SubscriptionId, Callback)>>,
}

impl Observers {
    fn add(&self, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.lock().unwrap().push((id, callback));
        id
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    fn notify(&self) {
        // Snapshot so callbacks may subscribe or unsubscribe
        let callbacks: Vec<Callback> = self
            .entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback())).is_err() {
                warn!("Sample subscriber panicked");
            }
        }
    }
}

struct Shared {
    latest: watch::Sender<MetricSample>,
    observers: Observers,
}

impl Shared {
    fn publish(&self, sample: MetricSample) {
        self.latest.send_replace(sample);
        self.observers.notify();
    }
}

/// Cloneable read handle on the latest sample.
#[derive(Clone)]
pub struct SampleReader {
    rx: watch::Receiver<MetricSample>,
}

impl SampleReader {
    /// Returns the most recently published sample.
    pub fn latest(&self) -> MetricSample {
        *self.rx.borrow()
    }

    /// Waits for the next published sample. Returns `None` once the
    /// publisher is gone.
    pub async fn changed(&mut self) -> Option<MetricSample> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }
}

/// The sampling engine.
pub struct MetricsPublisher<H, N> {
    scheduler: SampleScheduler<H, N>,
    shared: Arc<Shared>,
}

impl<H: HardwareBackend, N: NetworkBackend> MetricsPublisher<H, N> {
    /// Opens the hardware backend, discovers sensors and binds network
    /// counters. Only an unavailable backend is an error.
    pub fn open(mut hardware: H, mut network: N, config: EngineConfig) -> Result<Self> {
        hardware.open()?;

        let inventory = match HardwareInventory::discover(&mut hardware) {
            Ok(inventory) => inventory,
            Err(e) => {
                hardware.close();
                return Err(e);
            }
        };

        let total_memory_mb = hardware.total_memory_mb().unwrap_or_else(|e| {
            warn!("Failed to read total memory: {}. RAM usage will read 0.", e);
            0.0
        });

        let mut selector =
            AdapterSelector::new(config.preferred_interface.clone(), &config.extra_blacklist);
        selector.resolve(&mut network);

        let sampler = Sampler::new(hardware, network, inventory, selector, total_memory_mb);
        let (latest, _) = watch::channel(MetricSample::empty());
        info!("Engine opened ({:.0} MiB RAM)", total_memory_mb);

        Ok(Self {
            scheduler: SampleScheduler::new(sampler, config.interval),
            shared: Arc::new(Shared {
                latest,
                observers: Observers::default(),
            }),
        })
    }

    /// Starts sampling. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        let shared = self.shared.clone();
        self.scheduler.start(move |sample| shared.publish(sample))
    }

    /// Stops sampling. No notification fires after this returns.
    pub async fn stop(&mut self) {
        self.scheduler.stop().await;
    }

    /// Stops sampling if needed and releases the backends.
    pub async fn close(&mut self) {
        self.scheduler.close().await;
    }

    pub fn state(&self) -> EngineState {
        self.scheduler.state()
    }

    /// Returns the most recently published sample, or
    /// [`MetricSample::empty`] before the first tick.
    pub fn latest(&self) -> MetricSample {
        *self.shared.latest.borrow()
    }

    /// Returns a read handle that outlives borrows of the publisher.
    pub fn reader(&self) -> SampleReader {
        SampleReader {
            rx: self.shared.latest.subscribe(),
        }
    }

    /// Registers a callback fired once per published sample, after the
    /// sample is installed. Callbacks run on the sampling task.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.observers.add(Arc::new(callback))
    }

    /// Removes a subscription. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.observers.remove(id)
    }
}
