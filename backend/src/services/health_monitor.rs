//! Heartbeat health monitor.
//!
//! Periodic sweep over running agents: anything without a heartbeat in the
//! last two intervals is stale and gets recovered through the controller.
//! The monitor never touches the store's status columns itself; it only
//! issues controller intents, so the controller stays the single writer of
//! the state machine.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::services::agent_store::AgentStore;
use crate::services::controller::AgentController;

/// Configuration for the health monitor job
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Sweep interval; staleness threshold is twice this
    pub heartbeat_interval: Duration,
    /// Whether the job is enabled
    pub enabled: bool,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            enabled: true,
        }
    }
}

/// Background job runner for the stale-heartbeat sweep
pub struct HealthMonitor {
    store: AgentStore,
    controller: Arc<AgentController>,
    config: HealthMonitorConfig,
}

impl HealthMonitor {
    pub fn new(
        store: AgentStore,
        controller: Arc<AgentController>,
        config: HealthMonitorConfig,
    ) -> Self {
        Self {
            store,
            controller,
            config,
        }
    }

    /// Start the sweep loop.
    ///
    /// Returns a shutdown sender that can be used to stop the job.
    pub fn start(self) -> watch::Sender<bool> {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        if !self.config.enabled {
            info!("health monitor is disabled");
            return shutdown_tx;
        }

        let interval = self.config.heartbeat_interval;

        tokio::spawn(async move {
            info!("starting health monitor with interval {:?}", interval);

            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.tick().await; // Skip the first immediate tick

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        self.sweep().await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("health monitor shutting down");
                            break;
                        }
                    }
                }
            }
        });

        shutdown_tx
    }

    /// One pass: find stale running agents and recover each through the
    /// controller.
    async fn sweep(&self) {
        let threshold = self.config.heartbeat_interval * 2;

        let stale = match self.store.find_stale_running(threshold).await {
            Ok(agents) => agents,
            Err(e) => {
                error!(error = %e, "stale-agent query failed");
                return;
            }
        };

        if stale.is_empty() {
            return;
        }

        warn!(count = stale.len(), "found stale agents");
        for agent in stale {
            if let Err(e) = self.controller.recover_stale(agent.id).await {
                error!(agent_id = agent.id, error = %e, "stale-agent recovery failed");
            }
        }
    }
}
