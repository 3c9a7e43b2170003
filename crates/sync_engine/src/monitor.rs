//! Connectivity monitoring: decides when to trigger a drain pass.
//!
//! Two signals feed the engine. A periodic timer checks a host-provided
//! online/offline predicate and drains when there is pending work; the
//! host additionally forwards its discrete "became online" / "became
//! offline" transition events for an immediate reaction. Overlapping
//! drain passes cannot happen: the engine's own in-flight guard makes a
//! concurrent trigger a no-op.

use std::sync::Arc;
use std::time::Duration;

use crate::engine::SyncEngine;
use crate::status::SyncStatus;

/// Host-provided liveness signal.
///
/// In a browser-hosted deployment this maps to the network-status API;
/// any equivalent signal works for other hosts.
pub trait ConnectivityProbe: Send + Sync {
    /// Whether the backend is currently believed reachable.
    fn is_online(&self) -> bool;
}

/// Probe for hosts without a liveness signal; always reports online,
/// leaving failure detection to the apply function itself.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysOnline;

impl ConnectivityProbe for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Interval between periodic replay checks.
    pub poll_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
        }
    }
}

impl MonitorConfig {
    /// Set the replay-check interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Periodic and event-driven trigger for drain passes.
pub struct ConnectivityMonitor {
    engine: Arc<SyncEngine>,
    probe: Arc<dyn ConnectivityProbe>,
    config: MonitorConfig,
}

impl ConnectivityMonitor {
    /// Create a monitor with the default configuration.
    pub fn new(engine: Arc<SyncEngine>, probe: Arc<dyn ConnectivityProbe>) -> Self {
        Self::with_config(engine, probe, MonitorConfig::default())
    }

    /// Create a monitor with a custom configuration.
    pub fn with_config(
        engine: Arc<SyncEngine>,
        probe: Arc<dyn ConnectivityProbe>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            engine,
            probe,
            config,
        }
    }

    /// Spawn the periodic retry task. The task handle is registered
    /// with the engine so that `SyncEngine::dispose` stops it.
    pub fn start(&self) {
        let engine = self.engine.clone();
        let probe = self.probe.clone();
        let interval = self.config.poll_interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                if probe.is_online() && engine.queue_len() > 0 {
                    engine.process_queue().await;
                }
            }
        });
        self.engine.register_monitor_task(handle);
    }

    /// Host signal: connectivity was just restored. Drains immediately
    /// when work is pending; otherwise goes straight to online.
    pub async fn became_online(&self) {
        if self.engine.queue_len() > 0 {
            self.engine.process_queue().await;
        } else {
            self.engine.set_status(SyncStatus::Online);
        }
    }

    /// Host signal: connectivity was just lost. Takes effect regardless
    /// of queue contents.
    pub fn became_offline(&self) {
        self.engine.set_status(SyncStatus::Offline);
    }
}
