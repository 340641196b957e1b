//! Container driver: image builds, port allocation and container lifecycle.
//!
//! The driver is the only component that talks to the [`ContainerRuntime`].
//! It owns the host port pool and the image catalog; callers address
//! containers by service name.

use super::{
    managed_labels, BuildEvent, BuildSpec, ContainerInfo, ContainerRuntime, ContainerSpec,
    ContainerSummary, DockerError, ImageInfo, PortBinding, RestartPolicy, MANAGED_LABEL,
};
use crate::catalog::{ImageCatalog, ImageDef};
use crate::config::ContainerParams;
use crate::error::{Error, Result};
use crate::port::PortAllocator;
use crate::state::BuildOptions;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Signal sent to a container's main process on stop.
const STOP_SIGNAL: &str = "SIGTERM";

pub struct ContainerDriver {
    runtime: Arc<dyn ContainerRuntime>,
    ports: Mutex<PortAllocator>,
    catalog: RwLock<ImageCatalog>,
    params: ContainerParams,
    env: BTreeMap<String, String>,
}

impl ContainerDriver {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        ports: PortAllocator,
        catalog: ImageCatalog,
        params: ContainerParams,
        env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            runtime,
            ports: Mutex::new(ports),
            catalog: RwLock::new(catalog),
            params,
            env,
        }
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        &self.runtime
    }

    /// Rescan the image catalog from disk.
    pub fn reload_catalog(&self) -> Result<()> {
        self.catalog.write().load()
    }

    pub fn images(&self) -> Vec<ImageDef> {
        self.catalog.read().list()
    }

    pub fn is_native(&self, name: &str) -> bool {
        self.catalog.read().is_native(name)
    }

    pub fn available_ports(&self) -> usize {
        self.ports.lock().available()
    }

    pub fn is_port_free(&self, port: u16) -> bool {
        self.ports.lock().is_free(port)
    }

    async fn managed(&self) -> Result<Vec<ContainerInfo>> {
        let label = format!("{}=true", MANAGED_LABEL);
        Ok(self.runtime.list(&label).await?)
    }

    async fn find_managed(&self, name: &str) -> Result<Option<ContainerInfo>> {
        Ok(self.managed().await?.into_iter().find(|c| c.name == name))
    }

    /// Every container carrying the ownership label, summarized.
    pub async fn list_managed(&self) -> Result<Vec<ContainerSummary>> {
        Ok(self
            .managed()
            .await?
            .iter()
            .map(ContainerInfo::summary)
            .collect())
    }

    /// Summary of one managed container, `None` when absent.
    pub async fn get(&self, name: &str) -> Result<Option<ContainerSummary>> {
        Ok(self.find_managed(name).await?.map(|c| c.summary()))
    }

    /// Mark every port recorded on a surviving managed container as taken.
    ///
    /// Must run before the first allocation after a controller restart.
    pub async fn recover_ports(&self) -> Result<Vec<ContainerSummary>> {
        if let Err(e) = self.reload_catalog() {
            tracing::warn!("Failed to load image catalog: {}", e);
        }

        let containers = self.managed().await?;
        let mut ports = self.ports.lock();
        for container in &containers {
            tracing::info!("Inspecting container {}", container.name);
            for port in container.ports() {
                if ports.reserve(port) {
                    tracing::info!(" -> {} port:{}", container.name, port);
                } else {
                    tracing::debug!(
                        " -> {} port:{} outside pool or already taken",
                        container.name,
                        port
                    );
                }
            }
        }
        Ok(containers.iter().map(ContainerInfo::summary).collect())
    }

    /// Build `tag` from the directory at `path` and return the resulting image.
    pub async fn build_image(&self, tag: &str, path: &Path, nocache: bool) -> Result<ImageInfo> {
        let context = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let spec = BuildSpec {
            tag: tag.to_string(),
            context,
            labels: managed_labels(None, &[]),
            nocache,
        };
        tracing::info!("Building image {} from {}", tag, spec.context.display());

        let build_failed = |e: DockerError| Error::BuildFailed {
            image: tag.to_string(),
            reason: e.to_string(),
        };

        let mut stream = self.runtime.build(&spec).await.map_err(build_failed)?;
        let mut image_id = None;
        while let Some(event) = stream.next().await {
            match event.map_err(build_failed)? {
                BuildEvent::Log(line) => tracing::debug!("[{}] {}", tag, line),
                BuildEvent::Image(id) => image_id = Some(id),
            }
        }

        let image = self.runtime.inspect_image(tag).await.map_err(build_failed)?;
        tracing::info!(
            "Image created {} ({})",
            tag,
            image_id.as_deref().unwrap_or(&image.id)
        );
        Ok(image)
    }

    /// Rebuild the base image and the service image, then create-or-replace
    /// and start the service's container with freshly allocated host ports.
    pub async fn run_container(
        &self,
        name: &str,
        options: &BuildOptions,
    ) -> Result<ContainerSummary> {
        let (base, def) = {
            let catalog = self.catalog.read();
            (catalog.base().cloned(), catalog.get(name).cloned())
        };
        let def = def.ok_or_else(|| Error::NotFound(format!("image '{}'", name)))?;
        let nocache = options.nocache.unwrap_or(false);

        match base {
            Some(base) => {
                self.build_image(&base.name, &base.path, nocache).await?;
            }
            None => tracing::warn!("No base image in catalog, building {} directly", name),
        }
        let image = self.build_image(&def.name, &def.path, nocache).await?;

        let previous = self.find_managed(name).await?;
        let bindings = self.allocate_bindings(&image.exposed_ports)?;
        let spec = self.container_spec(name, &image, options, bindings);
        let allocated = spec.allocated_ports();

        tracing::info!("Starting container {}. ports: {:?}", name, allocated);
        let started = self.create_and_start(&spec).await;
        let info = match started {
            Ok(info) => info,
            Err(e) => {
                self.release_ports(&allocated);
                return Err(e);
            }
        };

        // The replaced container's ports are free again unless reused.
        if let Some(previous) = previous {
            let stale: Vec<u16> = previous
                .ports()
                .into_iter()
                .filter(|p| !allocated.contains(p))
                .collect();
            self.release_ports(&stale);
        }

        tracing::info!("Started container {} [{}]", info.name, info.id);
        Ok(info.summary())
    }

    async fn create_and_start(&self, spec: &ContainerSpec) -> Result<ContainerInfo> {
        self.runtime.create_or_replace(spec).await?;
        self.runtime.start(&spec.name).await?;
        Ok(self.runtime.inspect(&spec.name).await?)
    }

    fn allocate_bindings(&self, exposed: &[String]) -> Result<Vec<PortBinding>> {
        let mut ports = self.ports.lock();
        let mut bindings = Vec::with_capacity(exposed.len());
        for container_port in exposed {
            match ports.allocate(None) {
                Ok(host_port) => bindings.push(PortBinding {
                    container_port: container_port.clone(),
                    host_ip: self.params.bind_ip.clone(),
                    host_port,
                }),
                Err(e) => {
                    for binding in &bindings {
                        ports.release(binding.host_port);
                    }
                    return Err(e);
                }
            }
        }
        Ok(bindings)
    }

    fn release_ports(&self, released: &[u16]) {
        if released.is_empty() {
            return;
        }
        let mut ports = self.ports.lock();
        for port in released {
            ports.release(*port);
        }
        tracing::debug!("Released ports {:?}", released);
    }

    fn container_spec(
        &self,
        name: &str,
        image: &ImageInfo,
        options: &BuildOptions,
        ports: Vec<PortBinding>,
    ) -> ContainerSpec {
        let mut env = vec![format!("NAME={}", name)];
        env.extend(self.env.iter().map(|(k, v)| format!("{}={}", k, v)));
        if let Some(extra) = &options.env {
            env.extend(extra.iter().cloned());
        }

        let host_ports: Vec<u16> = ports.iter().map(|p| p.host_port).collect();
        let auto_remove = options.auto_remove.unwrap_or(false);

        ContainerSpec {
            name: name.to_string(),
            image: if image.id.is_empty() {
                name.to_string()
            } else {
                image.id.clone()
            },
            hostname: name.to_string(),
            cmd: vec![name.to_string()],
            env,
            labels: managed_labels(Some(name), &host_ports),
            ports,
            restart_policy: if auto_remove {
                RestartPolicy::No
            } else {
                RestartPolicy::UnlessStopped
            },
            auto_remove,
            network: self.params.network.clone(),
            memory: self.params.memory.clone(),
            stop_signal: STOP_SIGNAL.to_string(),
        }
    }

    /// Stop a managed container. `false` when there is none by that name.
    pub async fn stop_container(&self, name: &str) -> Result<bool> {
        if self.find_managed(name).await?.is_none() {
            return Ok(false);
        }
        tracing::info!("Stopping container {}", name);
        self.runtime.stop(name).await?;
        Ok(true)
    }

    pub async fn restart_container(&self, name: &str) -> Result<bool> {
        if self.find_managed(name).await?.is_none() {
            return Ok(false);
        }
        tracing::info!("Restarting container {}", name);
        self.runtime.restart(name).await?;
        Ok(true)
    }

    /// Stop, then delete a managed container and return its host ports to
    /// the pool.
    pub async fn remove_container(&self, name: &str) -> Result<bool> {
        let Some(container) = self.find_managed(name).await? else {
            return Ok(false);
        };
        if container.running {
            tracing::info!("Stopping container {}", name);
            self.runtime.stop(name).await?;
        }
        tracing::info!("Removing container {}", name);
        match self.runtime.remove(name).await {
            Ok(()) => {}
            // auto-remove containers vanish on stop
            Err(DockerError::ContainerNotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }
        self.release_ports(&container.ports());
        Ok(true)
    }

    /// Release the runtime connection. Safe to call when nothing ran.
    pub async fn close(&self) {
        tracing::debug!("Closing container runtime connection");
        self.runtime.close().await;
    }
}
