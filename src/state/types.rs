use crate::docker::ContainerSummary;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::Instant;

/// State string reported by both the runtime and healthy services.
pub const STATUS_RUNNING: &str = "running";

/// Runtime states that are still in flux and do not end a manual override.
const TRANSITIONAL_DOCK_STATES: [&str; 2] = ["created", "restarting"];

/// Controller-asserted override shown while an operation is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManualState {
    Starting,
    Removing,
}

impl fmt::Display for ManualState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManualState::Starting => write!(f, "starting"),
            ManualState::Removing => write!(f, "removing"),
        }
    }
}

/// One RPC method a service exposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodRegistration {
    pub method: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub options: Map<String, Value>,
}

/// A method registration annotated with its owning service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub service: String,
    #[serde(flatten)]
    pub registration: MethodRegistration,
}

/// Dashboard cell. Only exists when both coordinates are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashPosition {
    pub col: u32,
    pub row: u32,
}

impl DashPosition {
    pub fn from_parts(col: Option<u32>, row: Option<u32>) -> Option<Self> {
        Some(Self {
            col: col?,
            row: row?,
        })
    }
}

impl fmt::Display for DashPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.col, self.row)
    }
}

impl FromStr for DashPosition {
    type Err = String;

    /// Parse `"COLxROW"`, e.g. `"3x4"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (col, row) = s
            .split_once('x')
            .ok_or_else(|| format!("position '{}' is not COLxROW", s))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<u32>()
                .map_err(|e| format!("position '{}': {}", s, e))
        };
        Ok(Self {
            col: parse(col)?,
            row: parse(row)?,
        })
    }
}

/// Build-time knobs persisted with the service config. Merging only
/// overwrites the fields the incoming value sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Extra `KEY=VALUE` entries for the container environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nocache: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_remove: Option<bool>,
}

impl BuildOptions {
    pub fn merge(&mut self, other: &BuildOptions) {
        if other.env.is_some() {
            self.env = other.env.clone();
        }
        if other.nocache.is_some() {
            self.nocache = other.nocache;
        }
        if other.auto_remove.is_some() {
            self.auto_remove = other.auto_remove;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.env.is_none() && self.nocache.is_none() && self.auto_remove.is_none()
    }
}

/// The persisted part of a service's state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<DashPosition>,
    #[serde(default)]
    pub build_options: BuildOptions,
}

/// Metadata a service reports about itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub native: bool,
    pub protected: bool,
    pub persistent: bool,
}

/// Status a service reports about itself when asked over RPC.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_uptime: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub register: Option<Vec<MethodRegistration>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<ServiceMeta>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AppStatus {
    /// Interpret an RPC response. Anything but a non-empty object counts as
    /// "no status".
    pub fn from_value(value: Value) -> Option<Self> {
        if !matches!(&value, Value::Object(map) if !map.is_empty()) {
            return None;
        }
        serde_json::from_value(value)
            .map_err(|e| tracing::debug!("Ignoring malformed status payload: {}", e))
            .ok()
    }

    pub fn is_running(&self) -> bool {
        self.app_state.as_deref() == Some(STATUS_RUNNING)
    }
}

/// Point-in-time view of one service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub name: String,
    pub title: String,
    pub state: Option<String>,
    pub running: Option<bool>,
    pub uptime: Option<u64>,
    /// Whether a fresh runtime observation backs this snapshot.
    pub inband: bool,
    pub pos: Option<String>,
    pub meta: SnapshotFlags,
    pub register: Vec<RegistrationRecord>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFlags {
    pub native: bool,
    pub managed: bool,
    pub protected: bool,
    pub persistent: bool,
}

/// In-memory record of one service, fed by two independently stale sources:
/// the container runtime (dock status) and the service itself (app status).
///
/// Staleness is evaluated on every read: a status older than the timeout
/// reads as absent.
#[derive(Debug, Clone)]
pub struct ServiceState {
    name: String,
    title: String,
    timeout: Duration,
    pos: Option<DashPosition>,
    build_options: BuildOptions,
    meta: ServiceMeta,
    methods: Vec<RegistrationRecord>,
    app: Option<AppStatus>,
    app_ts: Option<Instant>,
    dock: Option<ContainerSummary>,
    dock_ts: Option<Instant>,
    manual_state: Option<ManualState>,
    managed: bool,
    protected: bool,
    persistent: bool,
    native: bool,
}

impl ServiceState {
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        let name = name.into();
        let title = title_from_name(&name);
        let mut state = Self {
            name,
            title,
            timeout,
            pos: None,
            build_options: BuildOptions::default(),
            meta: ServiceMeta::default(),
            methods: Vec::new(),
            app: None,
            app_ts: None,
            dock: None,
            dock_ts: None,
            manual_state: None,
            managed: false,
            protected: false,
            persistent: false,
            native: false,
        };
        state.clean_status();
        state
    }

    /// Reset everything observed, keeping identity (name, title, dashboard
    /// position, build options).
    pub fn clean_status(&mut self) {
        tracing::debug!("Restoring clean state of {}", self.name);
        self.meta = ServiceMeta::default();
        self.methods.clear();
        self.app = None;
        self.app_ts = None;
        self.dock = None;
        self.dock_ts = None;
        self.manual_state = None;
        self.managed = false;
        self.protected = false;
        self.persistent = false;
        self.native = false;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn pos(&self) -> Option<DashPosition> {
        self.pos
    }

    pub fn build_options(&self) -> &BuildOptions {
        &self.build_options
    }

    pub fn meta(&self) -> &ServiceMeta {
        &self.meta
    }

    pub fn methods(&self) -> &[RegistrationRecord] {
        &self.methods
    }

    pub fn manual_state(&self) -> Option<ManualState> {
        self.manual_state
    }

    pub fn is_native(&self) -> bool {
        self.native
    }

    pub fn is_protected(&self) -> bool {
        self.protected
    }

    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub fn is_managed(&self) -> bool {
        self.managed
    }

    pub fn config(&self) -> ServiceConfig {
        ServiceConfig {
            pos: self.pos,
            build_options: self.build_options.clone(),
        }
    }

    pub fn apply_config(&mut self, config: &ServiceConfig) {
        self.set_build_options(&config.build_options);
        if let Some(pos) = config.pos {
            self.pos = Some(pos);
        }
    }

    pub fn set_build_options(&mut self, options: &BuildOptions) {
        self.build_options.merge(options);
    }

    pub fn set_pos(&mut self, col: Option<u32>, row: Option<u32>) {
        if let Some(pos) = DashPosition::from_parts(col, row) {
            self.pos = Some(pos);
        }
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
    }

    pub fn set_meta(&mut self, meta: ServiceMeta) {
        if let Some(ref title) = meta.title {
            self.title = title.clone();
        }
        self.native = meta.native;
        self.meta = meta;
    }

    pub fn set_manual_state(&mut self, state: Option<ManualState>) {
        self.manual_state = state;
    }

    // ------------------------------------------------------------------
    // Status sources
    // ------------------------------------------------------------------

    fn is_fresh(&self, ts: Option<Instant>, now: Instant) -> bool {
        ts.is_some_and(|ts| now < ts + self.timeout)
    }

    pub fn app_status_at(&self, now: Instant) -> Option<&AppStatus> {
        if self.is_fresh(self.app_ts, now) {
            self.app.as_ref()
        } else {
            None
        }
    }

    pub fn app_status(&self) -> Option<&AppStatus> {
        self.app_status_at(Instant::now())
    }

    pub fn dock_status_at(&self, now: Instant) -> Option<&ContainerSummary> {
        if self.is_fresh(self.dock_ts, now) {
            self.dock.as_ref()
        } else {
            None
        }
    }

    pub fn dock_status(&self) -> Option<&ContainerSummary> {
        self.dock_status_at(Instant::now())
    }

    /// Record a heartbeat-sourced status. A `register` list in the payload
    /// replaces the registrations wholesale; a missing or empty one keeps
    /// the previous list.
    pub fn set_app_status(&mut self, status: AppStatus, now: Instant) {
        if let Some(meta) = status.meta.clone() {
            self.set_meta(meta);
        }
        if let Some(ref methods) = status.register {
            self.set_methods(methods);
        }
        self.app = Some(status);
        self.app_ts = Some(now);
    }

    fn set_methods(&mut self, methods: &[MethodRegistration]) {
        if methods.is_empty() {
            return;
        }
        self.methods = methods
            .iter()
            .map(|m| RegistrationRecord {
                service: self.name.clone(),
                registration: m.clone(),
            })
            .collect();
    }

    /// Record a runtime-sourced status and recompute the ownership flags
    /// from the metadata known at this moment.
    ///
    /// Only a running container refreshes the dock timestamp, so a stopped
    /// container still goes stale and its service can expire.
    ///
    /// A definitive runtime state ends a `Starting` override; `Removing` is
    /// only ended by [`clean_status`](Self::clean_status).
    pub fn set_dock_status(&mut self, status: ContainerSummary, now: Instant) {
        self.managed = true;
        self.protected = self.meta.protected;
        self.persistent = self.meta.persistent;
        self.native = self.meta.native;

        if self.manual_state == Some(ManualState::Starting)
            && !TRANSITIONAL_DOCK_STATES.contains(&status.state.as_str())
        {
            self.manual_state = None;
        }

        if status.running {
            self.dock_ts = Some(now);
        }
        self.dock = Some(status);
    }

    // ------------------------------------------------------------------
    // Derived views
    // ------------------------------------------------------------------

    /// Externally visible state: manual override, else fresh dock status,
    /// else a fresh app status that reports running.
    pub fn state_at(&self, now: Instant) -> Option<String> {
        if let Some(manual) = self.manual_state {
            return Some(manual.to_string());
        }
        if let Some(dock) = self.dock_status_at(now) {
            return Some(dock.state.clone());
        }
        match self.app_status_at(now) {
            Some(app) if app.is_running() => Some(STATUS_RUNNING.to_string()),
            _ => None,
        }
    }

    pub fn state(&self) -> Option<String> {
        self.state_at(Instant::now())
    }

    pub fn is_active_at(&self, now: Instant) -> bool {
        if let Some(dock) = self.dock_status_at(now) {
            if dock.state == STATUS_RUNNING {
                return true;
            }
        }
        self.app_status_at(now).is_some_and(AppStatus::is_running)
    }

    /// Neither source is fresh although at least one reported before, and
    /// the service is not exempt from cleanup.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        if self.protected || self.persistent {
            return false;
        }
        let seen = self.app_ts.is_some() || self.dock_ts.is_some();
        seen && self.dock_status_at(now).is_none() && self.app_status_at(now).is_none()
    }

    pub fn full_state_at(&self, now: Instant) -> ServiceSnapshot {
        let dock = self.dock_status_at(now);
        let app = self.app_status_at(now);

        let (running, uptime, inband) = match (dock, app) {
            (Some(dock), app) => (
                Some(dock.running),
                app.and_then(|a| a.app_uptime).or(dock.uptime),
                dock.managed,
            ),
            (None, Some(app)) if app.is_running() => (Some(true), app.app_uptime, false),
            _ => (None, None, false),
        };

        ServiceSnapshot {
            name: self.name.clone(),
            title: self.title.clone(),
            state: self.state_at(now),
            running,
            uptime,
            inband,
            pos: self.pos.map(|p| p.to_string()),
            meta: SnapshotFlags {
                native: self.native,
                managed: self.managed,
                protected: self.protected,
                persistent: self.persistent,
            },
            register: self.methods.clone(),
        }
    }

    pub fn full_state(&self) -> ServiceSnapshot {
        self.full_state_at(Instant::now())
    }
}

/// `"my_service"` becomes `"My Service"`.
fn title_from_name(name: &str) -> String {
    let mut title = String::with_capacity(name.len());
    let mut word_start = true;
    for c in name.replace('_', " ").chars() {
        if c.is_alphabetic() {
            if word_start {
                title.extend(c.to_uppercase());
            } else {
                title.extend(c.to_lowercase());
            }
            word_start = false;
        } else {
            title.push(c);
            word_start = true;
        }
    }
    title
}
