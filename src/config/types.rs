//! Controller settings.
//!
//! This module contains the root [`Settings`] struct loaded from
//! `director.yaml`. Every field has a default, so an empty file is valid.

use super::duration::human;
use crate::error::{Error, Result};
use crate::port::DEFAULT_PORT_RANGE;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure for director.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the image catalog (`base/`, `collection/`, `user/`).
    pub images_dir: PathBuf,

    /// Tag given to the base image every service image builds on.
    pub base_image: String,

    /// Services launched on cold start when no container is running for them.
    pub startup: Vec<String>,

    pub container_params: ContainerParams,

    /// Environment injected into every managed container.
    pub container_env: BTreeMap<String, String>,

    pub port_range: PortRange,

    /// How long a dock or app status stays fresh after it was recorded.
    #[serde(with = "human")]
    pub service_timeout: Duration,

    /// Interval between reconciliation ticks.
    #[serde(with = "human")]
    pub tick_interval: Duration,

    pub rpc: RpcSettings,

    /// Directory for persisted per-service configs. Defaults to
    /// `~/.director/configs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_dir: Option<PathBuf>,

    /// Name this controller runs under; never adopted or auto-started.
    pub self_name: String,

    /// Upstream service that receives the aggregated registrations.
    pub frontier_name: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            images_dir: PathBuf::from("images"),
            base_image: "director-base".to_string(),
            startup: Vec::new(),
            container_params: ContainerParams::default(),
            container_env: BTreeMap::new(),
            port_range: PortRange::default(),
            service_timeout: Duration::from_secs(30),
            tick_interval: Duration::from_secs(5),
            rpc: RpcSettings::default(),
            config_dir: None,
            self_name: "director".to_string(),
            frontier_name: "frontier".to_string(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.port_range.start > self.port_range.end {
            return Err(Error::Config(format!(
                "port_range start {} is above end {}",
                self.port_range.start, self.port_range.end
            )));
        }
        if self.tick_interval.is_zero() {
            return Err(Error::Config("tick_interval must be positive".to_string()));
        }
        if self.service_timeout.is_zero() {
            return Err(Error::Config(
                "service_timeout must be positive".to_string(),
            ));
        }
        if self.self_name.is_empty() || self.frontier_name.is_empty() {
            return Err(Error::Config(
                "self_name and frontier_name cannot be empty".to_string(),
            ));
        }
        url::Url::parse(&self.rpc.endpoint).map_err(|e| {
            Error::Config(format!("Invalid rpc endpoint '{}': {}", self.rpc.endpoint, e))
        })?;
        Ok(())
    }

    /// Directory where per-service configs are persisted.
    pub fn resolved_config_dir(&self) -> PathBuf {
        self.config_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".director")
                .join("configs")
        })
    }
}

/// Defaults applied to every container the driver creates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerParams {
    /// Host address published ports bind to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    /// Memory limit in docker syntax, e.g. "512m".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    /// Inclusive.
    pub end: u16,
}

impl Default for PortRange {
    fn default() -> Self {
        Self {
            start: *DEFAULT_PORT_RANGE.start(),
            end: *DEFAULT_PORT_RANGE.end(),
        }
    }
}

impl From<PortRange> for RangeInclusive<u16> {
    fn from(range: PortRange) -> Self {
        range.start..=range.end
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcSettings {
    /// Base URL of the RPC gateway; calls go to `{endpoint}/{service}/{method}`.
    pub endpoint: String,
    #[serde(with = "human")]
    pub timeout: Duration,
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}
