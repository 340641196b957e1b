//! The reconciliation loop.
//!
//! - Cold start: rebuild the port pool from surviving containers, adopt the
//!   running ones, then launch every service that should run but was not
//!   adopted. Nothing is launched until the pool has been rebuilt; a failed
//!   scan is retried on the next tick.
//! - Every tick: refresh dock statuses, clean up expired services, push the
//!   registration directory upstream if it changed.
//!
//! Ticks never overlap and a failing tick never ends the loop.

use super::StatusSync;
use crate::state::ServiceRegistry;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub adopted: Vec<String>,
    pub launched: Vec<String>,
    pub failed: Vec<String>,
    pub swept: Vec<String>,
    pub pushed: bool,
}

pub struct Reconciler {
    registry: Arc<ServiceRegistry>,
    sync: Arc<StatusSync>,
    interval: Duration,
    ticks: u64,
    recovered: bool,
}

impl Reconciler {
    pub fn new(registry: Arc<ServiceRegistry>, sync: Arc<StatusSync>, interval: Duration) -> Self {
        Self {
            registry,
            sync,
            interval,
            ticks: 0,
            recovered: false,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Whether the cold start has completed.
    pub fn is_recovered(&self) -> bool {
        self.recovered
    }

    /// Run one tick to completion.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        if !self.recovered {
            self.cold_start(&mut report).await;
        }
        self.steady(&mut report).await;
        self.ticks += 1;
        report
    }

    async fn cold_start(&mut self, report: &mut TickReport) {
        let self_name = self.registry.self_name().to_string();
        let mut started: HashSet<String> = HashSet::from([self_name.clone()]);

        let containers = match self.registry.driver().recover_ports().await {
            Ok(containers) => containers,
            Err(e) => {
                tracing::error!(
                    "Failed to inspect managed containers, postponing launches: {}",
                    e
                );
                return;
            }
        };
        self.recovered = true;

        for container in containers {
            if container.name == self_name || !container.running {
                continue;
            }
            let name = container.name.clone();
            tracing::info!("Adopting running container {}", name);
            self.registry.set_dock_status(&name, container).await;
            self.sync.request_app_state(&name).await;
            started.insert(name.clone());
            report.adopted.push(name);
        }

        for name in self.registry.should_start().await {
            if started.contains(&name) {
                continue;
            }
            match self.registry.run_service(&name).await {
                Ok(_) => {
                    tracing::info!("Launched {}", name);
                    report.launched.push(name);
                }
                Err(e) => {
                    tracing::error!("Failed to launch {}: {}", name, e);
                    report.failed.push(name);
                }
            }
        }
    }

    async fn steady(&self, report: &mut TickReport) {
        match self.registry.driver().list_managed().await {
            Ok(containers) => {
                for container in containers {
                    let name = container.name.clone();
                    self.registry.set_dock_status(&name, container).await;
                }
            }
            Err(e) => tracing::warn!("Failed to refresh container statuses: {}", e),
        }

        for name in self.registry.sweep_expired().await {
            tracing::info!("Service {} expired, cleaning its state", name);
            self.registry.clean_status(&name).await;
            report.swept.push(name);
        }

        report.pushed = self.sync.check_registrations_changed().await;
    }

    /// Tick until `cancel_token` fires.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        use futures::FutureExt;
        use std::panic::AssertUnwindSafe;

        loop {
            let result = AssertUnwindSafe(self.tick()).catch_unwind().await;
            if let Err(panic_info) = result {
                let panic_msg = if let Some(s) = panic_info.downcast_ref::<&str>() {
                    s.to_string()
                } else if let Some(s) = panic_info.downcast_ref::<String>() {
                    s.clone()
                } else {
                    "Unknown panic".to_string()
                };
                tracing::error!("Reconciliation tick panicked: {}. Continuing...", panic_msg);
                self.ticks += 1;
            }

            tokio::select! {
                _ = cancel_token.cancelled() => {
                    tracing::debug!("Reconciliation loop shutting down");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {}
            }
        }
    }
}
