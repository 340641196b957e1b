//! Contract between the controller and the container runtime.
//!
//! The driver only talks to the runtime through [`ContainerRuntime`]; the
//! production implementation is the docker CLI ([`super::DockerClient`]).

use super::DockerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Label marking a container (or image) as owned by this controller.
pub const MANAGED_LABEL: &str = "director.managed";
/// Label carrying the space-separated host ports allocated to a container.
pub const PORTS_LABEL: &str = "director.ports";
/// Label carrying the logical service name.
pub const SERVICE_LABEL: &str = "director.service";

/// Labels every controller-owned container and image carries.
///
/// When `ports` is non-empty the allocated host ports are recorded too, so
/// the port pool can be rebuilt from a running fleet after a restart.
pub fn managed_labels(service: Option<&str>, ports: &[u16]) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    if let Some(service) = service {
        labels.insert(SERVICE_LABEL.to_string(), service.to_string());
    }
    if !ports.is_empty() {
        labels.insert(PORTS_LABEL.to_string(), pack_ports(ports));
    }
    labels
}

pub fn pack_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a ports label. Garbage entries are skipped rather than failing the
/// whole container.
pub fn unpack_ports(label: &str) -> Vec<u16> {
    label
        .split_whitespace()
        .filter_map(|p| p.parse().ok())
        .collect()
}

/// A container as reported by the runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub running: bool,
    pub state: String,
    pub started_at: Option<DateTime<Utc>>,
    pub labels: HashMap<String, String>,
}

impl ContainerInfo {
    pub fn is_managed(&self) -> bool {
        self.labels.contains_key(MANAGED_LABEL)
    }

    /// Host ports recorded on the container's ports label.
    pub fn ports(&self) -> Vec<u16> {
        self.labels
            .get(PORTS_LABEL)
            .map(|l| unpack_ports(l))
            .unwrap_or_default()
    }

    /// Seconds since start, only while running.
    pub fn uptime(&self, now: DateTime<Utc>) -> Option<u64> {
        if !self.running {
            return None;
        }
        self.started_at
            .map(|started| (now - started).num_seconds().max(0) as u64)
    }

    pub fn summary(&self) -> ContainerSummary {
        ContainerSummary {
            name: self.name.clone(),
            running: self.running,
            state: self.state.clone(),
            uptime: self.uptime(Utc::now()),
            ports: self.ports(),
            managed: self.is_managed(),
        }
    }
}

/// Short status summary of one container; this is the "dock status" a
/// service state records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub name: String,
    pub running: bool,
    pub state: String,
    pub uptime: Option<u64>,
    #[serde(default)]
    pub ports: Vec<u16>,
    #[serde(default)]
    pub managed: bool,
}

/// Result of inspecting a built image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: String,
    /// Container-side ports the image exposes, e.g. `"8080/tcp"`.
    pub exposed_ports: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BuildSpec {
    pub tag: String,
    pub context: PathBuf,
    pub labels: BTreeMap<String, String>,
    pub nocache: bool,
}

/// One item of a streaming image build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// A chunk of build output.
    Log(String),
    /// The identity of the image produced by the build.
    Image(String),
}

pub type BuildStream = BoxStream<'static, Result<BuildEvent, DockerError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartPolicy {
    #[default]
    UnlessStopped,
    No,
}

impl RestartPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestartPolicy::UnlessStopped => "unless-stopped",
            RestartPolicy::No => "no",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    /// Container-side port spec, e.g. `"8080/tcp"`.
    pub container_port: String,
    pub host_ip: Option<String>,
    pub host_port: u16,
}

impl PortBinding {
    /// Render as a `-p` argument: `[ip:]host:container`.
    pub fn to_publish_arg(&self) -> String {
        match &self.host_ip {
            Some(ip) => format!("{}:{}:{}", ip, self.host_port, self.container_port),
            None => format!("{}:{}", self.host_port, self.container_port),
        }
    }
}

/// Everything needed to create a container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub hostname: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub ports: Vec<PortBinding>,
    pub restart_policy: RestartPolicy,
    pub auto_remove: bool,
    pub network: Option<String>,
    pub memory: Option<String>,
    pub stop_signal: String,
}

impl ContainerSpec {
    pub fn allocated_ports(&self) -> Vec<u16> {
        self.ports.iter().map(|p| p.host_port).collect()
    }
}

/// Operations the controller needs from a container runtime.
///
/// Implementations must be safe to share across tasks; every call may block
/// on I/O. No method retries on its own.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// List every container (running or not) carrying `label`.
    async fn list(&self, label: &str) -> Result<Vec<ContainerInfo>, DockerError>;

    /// Inspect one container by name.
    async fn inspect(&self, name: &str) -> Result<ContainerInfo, DockerError>;

    async fn inspect_image(&self, tag: &str) -> Result<ImageInfo, DockerError>;

    /// Start a build. The stream yields build output and finally the image
    /// identity; a failed build ends the stream with an error.
    async fn build(&self, spec: &BuildSpec) -> Result<BuildStream, DockerError>;

    /// Create a container, replacing any existing one with the same name.
    /// Returns the container id.
    async fn create_or_replace(&self, spec: &ContainerSpec) -> Result<String, DockerError>;

    async fn start(&self, name: &str) -> Result<(), DockerError>;

    async fn stop(&self, name: &str) -> Result<(), DockerError>;

    async fn restart(&self, name: &str) -> Result<(), DockerError>;

    async fn remove(&self, name: &str) -> Result<(), DockerError>;

    /// Release the connection. Must be callable at any point, any number of times.
    async fn close(&self) {}
}
