//! Active network adapter selection.
//!
//! Picks the adapter carrying the most received traffic, ignoring tunnels,
//! loopback and other pseudo-adapters. This is a heuristic: a busy virtual
//! adapter whose name is not blacklisted can still win.

use crate::backend::{AdapterInfo, NetworkBackend};
use std::fmt;
use tracing::{debug, info, warn};

/// Substrings (case-insensitive) that mark non-physical adapters.
pub const DEFAULT_BLACKLIST: &[&str] = &[
    "WAN Miniport",
    "6to4 Adapter",
    "Microsoft IP-HTTPS",
    "Microsoft Kernel Debug",
    "Teredo Tunneling",
    "Network Monitor",
    "loopback",
    "tunnel",
    "docker",
    "veth",
    "virbr",
];

/// The counter instance network rates are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterTarget {
    /// A single adapter by name.
    Named(String),
    /// Sum over all interfaces.
    Aggregate,
}

impl fmt::Display for AdapterTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterTarget::Named(name) => f.write_str(name),
            AdapterTarget::Aggregate => f.write_str("_Total"),
        }
    }
}

/// Why a target was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionReason {
    /// The configured interface was present.
    Configured,
    /// Highest received bytes/second among candidates.
    Busiest,
    /// Nothing qualified, or enumeration failed.
    Fallback,
}

/// A resolved adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterSelection {
    pub target: AdapterTarget,
    pub reason: SelectionReason,
}

/// Chooses and caches the adapter network rates are read from.
pub struct AdapterSelector {
    blacklist: Vec<String>,
    preferred: Option<String>,
    selection: Option<AdapterSelection>,
}

impl AdapterSelector {
    /// Creates a selector with the default blacklist plus `extra` entries.
    pub fn new(preferred: Option<String>, extra: &[String]) -> Self {
        let blacklist = DEFAULT_BLACKLIST
            .iter()
            .map(|s| s.to_string())
            .chain(extra.iter().filter(|s| !s.is_empty()).cloned())
            .map(|s| s.to_lowercase())
            .collect();
        Self {
            blacklist,
            preferred,
            selection: None,
        }
    }

    /// Returns true if the name or description contains a blacklisted
    /// substring.
    pub fn is_blacklisted(&self, name: &str, description: &str) -> bool {
        let name = name.to_lowercase();
        let description = description.to_lowercase();
        self.blacklist
            .iter()
            .any(|entry| name.contains(entry.as_str()) || description.contains(entry.as_str()))
    }

    /// Picks a target from an enumeration result.
    pub fn choose(&self, adapters: &[AdapterInfo]) -> AdapterSelection {
        let candidates: Vec<&AdapterInfo> = adapters
            .iter()
            .filter(|a| {
                let excluded = self.is_blacklisted(&a.name, &a.description);
                debug!(
                    "Adapter {} ({}): {:.0} B/s received{}",
                    a.name,
                    a.description,
                    a.received_per_sec,
                    if excluded { ", blacklisted" } else { "" }
                );
                !excluded
            })
            .collect();

        if let Some(preferred) = &self.preferred {
            if candidates.iter().any(|a| &a.name == preferred) {
                return AdapterSelection {
                    target: AdapterTarget::Named(preferred.clone()),
                    reason: SelectionReason::Configured,
                };
            }
            warn!(
                "Configured interface {} not usable, selecting automatically",
                preferred
            );
        }

        let mut busiest: Option<&AdapterInfo> = None;
        let mut max_received = 0.0;
        for adapter in candidates {
            if adapter.received_per_sec > max_received {
                max_received = adapter.received_per_sec;
                busiest = Some(adapter);
            }
        }

        match busiest {
            Some(adapter) => AdapterSelection {
                target: AdapterTarget::Named(adapter.name.clone()),
                reason: SelectionReason::Busiest,
            },
            None => AdapterSelection {
                target: AdapterTarget::Aggregate,
                reason: SelectionReason::Fallback,
            },
        }
    }

    /// Enumerates adapters and selects one. Never fails: enumeration errors
    /// fall back to the aggregate counter.
    pub fn select<N: NetworkBackend>(&self, backend: &mut N) -> AdapterSelection {
        match backend.adapters() {
            Ok(adapters) => self.choose(&adapters),
            Err(e) => {
                warn!("Failed to enumerate network adapters: {}", e);
                AdapterSelection {
                    target: AdapterTarget::Aggregate,
                    reason: SelectionReason::Fallback,
                }
            }
        }
    }

    /// Returns the cached target, selecting one first if needed.
    pub fn resolve<N: NetworkBackend>(&mut self, backend: &mut N) -> &AdapterTarget {
        let selection = match self.selection.take() {
            Some(selection) => selection,
            None => {
                let selection = self.select(backend);
                info!(
                    "Network rates bound to {} ({:?})",
                    selection.target, selection.reason
                );
                selection
            }
        };
        &self.selection.insert(selection).target
    }

    /// Returns the cached selection without resolving.
    pub fn current(&self) -> Option<&AdapterSelection> {
        self.selection.as_ref()
    }

    /// Drops the cached selection so the next `resolve` selects again.
    pub fn invalidate(&mut self) {
        if let Some(selection) = self.selection.take() {
            info!("Dropping network adapter {}", selection.target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeNetwork;

    fn adapter(name: &str, description: &str, received: f64) -> AdapterInfo {
        AdapterInfo {
            name: name.to_string(),
            description: description.to_string(),
            received_per_sec: received,
        }
    }

    #[test]
    fn test_busiest_adapter_wins() {
        let selector = AdapterSelector::new(None, &[]);
        let selection = selector.choose(&[
            adapter("eth0", "e1000e", 1_000.0),
            adapter("wlan0", "iwlwifi", 50_000.0),
        ]);
        assert_eq!(selection.target, AdapterTarget::Named("wlan0".into()));
        assert_eq!(selection.reason, SelectionReason::Busiest);
    }

    #[test]
    fn test_blacklisted_adapter_never_wins() {
        let selector = AdapterSelector::new(None, &[]);
        let selection = selector.choose(&[
            adapter("Teredo Tunneling Pseudo-Interface", "", 9_000_000.0),
            adapter("tun0", "tunnel", 8_000_000.0),
            adapter("eth0", "Intel Ethernet", 10.0),
        ]);
        assert_eq!(selection.target, AdapterTarget::Named("eth0".into()));
    }

    #[test]
    fn test_blacklist_is_case_insensitive() {
        let selector = AdapterSelector::new(None, &["WireGuard".to_string()]);
        assert!(selector.is_blacklisted("WAN MINIPORT (IP)", ""));
        assert!(selector.is_blacklisted("lo", "Loopback"));
        assert!(selector.is_blacklisted("wg0", "wireguard"));
        assert!(!selector.is_blacklisted("enp3s0", "r8169"));
    }

    #[test]
    fn test_ties_keep_enumeration_order() {
        let selector = AdapterSelector::new(None, &[]);
        let selection = selector.choose(&[
            adapter("eth0", "igb", 500.0),
            adapter("eth1", "igb", 500.0),
        ]);
        assert_eq!(selection.target, AdapterTarget::Named("eth0".into()));
    }

    #[test]
    fn test_idle_or_empty_falls_back_to_aggregate() {
        let selector = AdapterSelector::new(None, &[]);
        for adapters in [vec![], vec![adapter("eth0", "igb", 0.0)]] {
            let selection = selector.choose(&adapters);
            assert_eq!(selection.target, AdapterTarget::Aggregate);
            assert_eq!(selection.reason, SelectionReason::Fallback);
        }
    }

    #[test]
    fn test_enumeration_failure_falls_back_to_aggregate() {
        let selector = AdapterSelector::new(None, &[]);
        let mut backend = FakeNetwork::new().failing_enumeration();
        assert_eq!(selector.select(&mut backend).target, AdapterTarget::Aggregate);
    }

    #[test]
    fn test_configured_interface_wins_when_present() {
        let selector = AdapterSelector::new(Some("eth1".into()), &[]);
        let selection = selector.choose(&[
            adapter("eth0", "igb", 90_000.0),
            adapter("eth1", "igb", 0.0),
        ]);
        assert_eq!(selection.target, AdapterTarget::Named("eth1".into()));
        assert_eq!(selection.reason, SelectionReason::Configured);

        let missing = AdapterSelector::new(Some("eth9".into()), &[]);
        let selection = missing.choose(&[adapter("eth0", "igb", 90_000.0)]);
        assert_eq!(selection.target, AdapterTarget::Named("eth0".into()));
    }

    #[test]
    fn test_resolve_caches_until_invalidated() {
        let mut selector = AdapterSelector::new(None, &[]);
        let mut backend = FakeNetwork::new().with_adapter("eth0", "igb", 100.0);
        let control = backend.control();

        assert_eq!(
            selector.resolve(&mut backend),
            &AdapterTarget::Named("eth0".into())
        );
        selector.resolve(&mut backend);
        assert_eq!(control.enumerations(), 1);

        selector.invalidate();
        assert!(selector.current().is_none());
        selector.resolve(&mut backend);
        assert_eq!(control.enumerations(), 2);
    }

    #[test]
    fn test_aggregate_display() {
        assert_eq!(AdapterTarget::Aggregate.to_string(), "_Total");
        assert_eq!(AdapterTarget::Named("eth0".into()).to_string(), "eth0");
    }
}
