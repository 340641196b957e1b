use super::{
    AppStatus, BuildOptions, ConfigStore, DashPosition, ManualState, RegistrationRecord,
    ServiceConfig, ServiceSnapshot, ServiceState,
};
use crate::docker::{ContainerDriver, ContainerSummary};
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

/// A single service entry
pub type StateEntry = Arc<Mutex<ServiceState>>;

/// Parameters a run request may carry for a service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceParams {
    pub build_options: Option<BuildOptions>,
    pub pos: Option<DashPosition>,
}

#[derive(Default)]
struct Entries {
    /// Names in first-reference order.
    order: Vec<String>,
    by_name: HashMap<String, StateEntry>,
}

impl Entries {
    fn snapshot(&self) -> Vec<(String, StateEntry)> {
        self.order
            .iter()
            .filter_map(|name| {
                self.by_name
                    .get(name)
                    .map(|entry| (name.clone(), entry.clone()))
            })
            .collect()
    }
}

/// Owner of every [`ServiceState`]; every lifecycle operation goes through it.
///
/// # Lock Ordering
///
/// 1. `entries` (RwLock), only long enough to look up or insert an entry
/// 2. Individual service `Mutex`es
///
/// A service mutex is never held across a runtime call: operations set the
/// manual state, release the lock, call the driver, then lock again to
/// record the outcome.
pub struct ServiceRegistry {
    entries: RwLock<Entries>,
    driver: Arc<ContainerDriver>,
    store: Arc<dyn ConfigStore>,
    timeout: Duration,
    startup: Vec<String>,
    self_name: String,
    last_registrations_hash: parking_lot::Mutex<Option<u64>>,
}

impl ServiceRegistry {
    pub fn new(
        driver: Arc<ContainerDriver>,
        store: Arc<dyn ConfigStore>,
        timeout: Duration,
        startup: Vec<String>,
        self_name: impl Into<String>,
    ) -> Self {
        Self {
            entries: RwLock::new(Entries::default()),
            driver,
            store,
            timeout,
            startup,
            self_name: self_name.into(),
            last_registrations_hash: parking_lot::Mutex::new(None),
        }
    }

    pub fn driver(&self) -> &Arc<ContainerDriver> {
        &self.driver
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn self_name(&self) -> &str {
        &self.self_name
    }

    async fn entry(&self, name: &str) -> StateEntry {
        if let Some(entry) = self.entries.read().await.by_name.get(name) {
            return entry.clone();
        }

        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.by_name.get(name) {
            return entry.clone();
        }

        let mut state = ServiceState::new(name, self.timeout);
        match self.store.load(name) {
            Ok(Some(config)) => state.apply_config(&config),
            Ok(None) => {}
            Err(e) => tracing::warn!("Failed to load config of {}: {}", name, e),
        }
        tracing::debug!("Tracking service {}", name);

        let entry = Arc::new(Mutex::new(state));
        entries.order.push(name.to_string());
        entries.by_name.insert(name.to_string(), entry.clone());
        entry
    }

    async fn existing(&self, name: &str) -> Result<StateEntry> {
        self.entries
            .read()
            .await
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("service '{}'", name)))
    }

    /// Callers hold the service's lock so saves of one service never race.
    fn save_config(&self, name: &str, config: &ServiceConfig) {
        if let Err(e) = self.store.save(name, config) {
            tracing::warn!("Failed to save config of {}: {}", name, e);
        }
    }

    /// The state of `name`, created on first reference. Supplied params are
    /// merged into the service config and persisted.
    pub async fn get(&self, name: &str, params: Option<&ServiceParams>) -> StateEntry {
        let entry = self.entry(name).await;
        if let Some(params) = params {
            let mut state = entry.lock().await;
            if let Some(options) = &params.build_options {
                state.set_build_options(options);
            }
            if let Some(pos) = params.pos {
                state.set_pos(Some(pos.col), Some(pos.row));
            }
            self.save_config(name, &state.config());
        }
        entry
    }

    pub async fn is_exists(&self, name: &str) -> bool {
        self.entries.read().await.by_name.contains_key(name)
    }

    pub async fn names(&self) -> Vec<String> {
        self.entries.read().await.order.clone()
    }

    pub async fn get_state(&self, name: &str) -> Option<ServiceSnapshot> {
        let entry = self.entries.read().await.by_name.get(name).cloned()?;
        let state = entry.lock().await;
        Some(state.full_state())
    }

    /// Snapshots of every service with a visible state.
    pub async fn list_states(&self) -> Vec<ServiceSnapshot> {
        let entries = self.entries.read().await.snapshot();
        let mut states = Vec::with_capacity(entries.len());
        for (_, entry) in entries {
            let snapshot = entry.lock().await.full_state();
            if snapshot.state.is_some() {
                states.push(snapshot);
            }
        }
        states
    }

    async fn snapshot_of(&self, entry: &StateEntry) -> ServiceSnapshot {
        entry.lock().await.full_state()
    }

    async fn set_manual_state(&self, entry: &StateEntry, manual: Option<ManualState>) {
        entry.lock().await.set_manual_state(manual);
    }

    /// Re-read the runtime's view of one container into its state.
    async fn refresh_dock_status(&self, name: &str) -> Result<()> {
        if let Some(summary) = self.driver.get(name).await? {
            self.set_dock_status(name, summary).await;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Build and (re)create the service's container.
    pub async fn run_service(&self, name: &str) -> Result<ServiceSnapshot> {
        if !self.driver.is_native(name) {
            return Err(Error::NotFound(format!("image '{}'", name)));
        }
        let entry = self.entry(name).await;
        let options = {
            let mut state = entry.lock().await;
            state.set_manual_state(Some(ManualState::Starting));
            state.build_options().clone()
        };

        match self.driver.run_container(name, &options).await {
            Ok(summary) => {
                self.set_dock_status(name, summary).await;
                Ok(self.snapshot_of(&entry).await)
            }
            Err(e) => {
                tracing::error!("Failed to run {}: {}", name, e);
                self.set_manual_state(&entry, None).await;
                Err(e)
            }
        }
    }

    /// Stop the service's container. A service without a container is left
    /// untouched.
    pub async fn stop_service(&self, name: &str) -> Result<ServiceSnapshot> {
        let entry = self.existing(name).await?;
        if !self.driver.stop_container(name).await? {
            tracing::debug!("No container to stop for {}", name);
        }
        self.refresh_dock_status(name).await?;
        Ok(self.snapshot_of(&entry).await)
    }

    pub async fn restart_service(&self, name: &str) -> Result<ServiceSnapshot> {
        let entry = self.existing(name).await?;
        self.bounce(name, &entry).await
    }

    /// Bring a stopped container back up.
    pub async fn start_service(&self, name: &str) -> Result<ServiceSnapshot> {
        let entry = self.existing(name).await?;
        self.bounce(name, &entry).await
    }

    async fn bounce(&self, name: &str, entry: &StateEntry) -> Result<ServiceSnapshot> {
        self.set_manual_state(entry, Some(ManualState::Starting))
            .await;
        match self.driver.restart_container(name).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("No container to restart for {}", name);
                self.set_manual_state(entry, None).await;
            }
            Err(e) => {
                self.set_manual_state(entry, None).await;
                return Err(e);
            }
        }
        if let Err(e) = self.refresh_dock_status(name).await {
            self.set_manual_state(entry, None).await;
            return Err(e);
        }
        Ok(self.snapshot_of(entry).await)
    }

    /// Remove the service's container and reset its state. The entry itself
    /// survives so identity (position, build options) is kept.
    pub async fn remove_service(&self, name: &str) -> Result<ServiceSnapshot> {
        let entry = self.existing(name).await?;
        self.set_manual_state(&entry, Some(ManualState::Removing))
            .await;
        match self.driver.remove_container(name).await {
            Ok(_) => {
                entry.lock().await.clean_status();
                Ok(self.snapshot_of(&entry).await)
            }
            Err(e) => {
                self.set_manual_state(&entry, None).await;
                Err(e)
            }
        }
    }

    /// Run every service that should be up. Failures are logged per service.
    pub async fn rebuild_all(&self) -> Vec<String> {
        let mut rebuilt = Vec::new();
        for name in self.should_start().await {
            match self.run_service(&name).await {
                Ok(_) => rebuilt.push(name),
                Err(e) => tracing::warn!("Rebuild of {} failed: {}", name, e),
            }
        }
        rebuilt
    }

    // ------------------------------------------------------------------
    // Status intake
    // ------------------------------------------------------------------

    pub async fn set_app_status(&self, name: &str, status: AppStatus) {
        let entry = self.entry(name).await;
        let mut state = entry.lock().await;
        state.set_app_status(status, Instant::now());
        self.save_config(name, &state.config());
    }

    pub async fn set_dock_status(&self, name: &str, status: ContainerSummary) {
        let entry = self.entry(name).await;
        let running = status.running;
        let mut state = entry.lock().await;
        state.set_dock_status(status, Instant::now());
        if running {
            self.save_config(name, &state.config());
        }
    }

    pub async fn clean_status(&self, name: &str) {
        if let Ok(entry) = self.existing(name).await {
            entry.lock().await.clean_status();
        }
    }

    // ------------------------------------------------------------------
    // Fleet-wide views
    // ------------------------------------------------------------------

    /// Every registered method of every service, in registry order and then
    /// per-service order.
    pub async fn aggregate_registrations(&self) -> Vec<RegistrationRecord> {
        let entries = self.entries.read().await.snapshot();
        let mut records = Vec::new();
        for (_, entry) in entries {
            records.extend(entry.lock().await.methods().iter().cloned());
        }
        records
    }

    /// Names of services whose statuses have both gone stale and which are
    /// neither protected nor persistent.
    pub async fn sweep_expired(&self) -> Vec<String> {
        let now = Instant::now();
        let entries = self.entries.read().await.snapshot();
        let mut expired = Vec::new();
        for (name, entry) in entries {
            if entry.lock().await.is_expired_at(now) {
                expired.push(name);
            }
        }
        expired
    }

    /// Names with a persisted config.
    pub fn list_configured(&self) -> Result<Vec<String>> {
        self.store.names()
    }

    pub fn configs(&self) -> Result<BTreeMap<String, ServiceConfig>> {
        self.store.load_all()
    }

    /// Configured startup names followed by persisted config names, without
    /// duplicates and without the controller itself.
    pub async fn should_start(&self) -> Vec<String> {
        let configured = self.list_configured().unwrap_or_else(|e| {
            tracing::warn!("Failed to list persisted configs: {}", e);
            Vec::new()
        });
        let mut names: Vec<String> = Vec::new();
        for name in self.startup.iter().chain(configured.iter()) {
            if name.is_empty() || *name == self.self_name || names.contains(name) {
                continue;
            }
            names.push(name.clone());
        }
        names
    }

    pub fn startup(&self) -> &[String] {
        &self.startup
    }

    /// Hash of the registration set last delivered to the frontier.
    pub fn pushed_registrations_hash(&self) -> Option<u64> {
        *self.last_registrations_hash.lock()
    }

    pub fn record_registrations_hash(&self, hash: u64) {
        *self.last_registrations_hash.lock() = Some(hash);
    }
}
