//! In-memory collaborators shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use director::catalog::{ImageCatalog, ImageCategory, ImageDef};
use director::docker::{
    managed_labels, BuildEvent, BuildSpec, BuildStream, ContainerInfo, ContainerRuntime,
    ContainerSpec, DockerError, ImageInfo,
};
use director::rpc::RpcClient;
use director::state::MemoryConfigStore;
use director::{Director, Settings};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct RuntimeState {
    containers: BTreeMap<String, ContainerInfo>,
    auto_remove: HashSet<String>,
    exposed: HashMap<String, Vec<String>>,
    images: HashMap<String, ImageInfo>,
    fail_build: HashSet<String>,
    fail_create: HashSet<String>,
    failing_lists: u32,
    specs: Vec<ContainerSpec>,
    builds: Vec<String>,
    calls: Vec<String>,
    next_id: u32,
}

/// Container runtime that keeps containers and images in memory.
#[derive(Default)]
pub struct FakeRuntime {
    state: Mutex<RuntimeState>,
    closed: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Images built under `tag` expose these container ports.
    pub fn expose(&self, tag: &str, ports: &[&str]) {
        self.state
            .lock()
            .exposed
            .insert(tag.to_string(), ports.iter().map(|p| p.to_string()).collect());
    }

    pub fn fail_build(&self, tag: &str) {
        self.state.lock().fail_build.insert(tag.to_string());
    }

    pub fn fail_create(&self, name: &str) {
        self.state.lock().fail_create.insert(name.to_string());
    }

    /// The next `count` list calls fail as if the daemon were unreachable.
    pub fn fail_lists(&self, count: u32) {
        self.state.lock().failing_lists = count;
    }

    /// A managed container that survived a controller restart.
    pub fn add_running(&self, name: &str, ports: &[u16]) {
        let mut state = self.state.lock();
        state.next_id += 1;
        let info = ContainerInfo {
            id: format!("c{}", state.next_id),
            name: name.to_string(),
            running: true,
            state: "running".to_string(),
            started_at: Some(chrono::Utc::now()),
            labels: managed_labels(Some(name), ports).into_iter().collect(),
        };
        state.containers.insert(name.to_string(), info);
    }

    /// A container this controller does not own.
    pub fn add_foreign(&self, name: &str) {
        let mut state = self.state.lock();
        state.containers.insert(
            name.to_string(),
            ContainerInfo {
                id: format!("foreign-{}", name),
                name: name.to_string(),
                running: true,
                state: "running".to_string(),
                started_at: None,
                labels: HashMap::new(),
            },
        );
    }

    /// Simulate a container dying outside the controller's control.
    pub fn kill(&self, name: &str) {
        if let Some(container) = self.state.lock().containers.get_mut(name) {
            container.running = false;
            container.state = "exited".to_string();
        }
    }

    pub fn container(&self, name: &str) -> Option<ContainerInfo> {
        self.state.lock().containers.get(name).cloned()
    }

    pub fn specs(&self) -> Vec<ContainerSpec> {
        self.state.lock().specs.clone()
    }

    pub fn last_spec(&self, name: &str) -> Option<ContainerSpec> {
        self.state
            .lock()
            .specs
            .iter()
            .rev()
            .find(|s| s.name == name)
            .cloned()
    }

    pub fn builds(&self) -> Vec<String> {
        self.state.lock().builds.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.state.lock().calls.push(call);
    }

    fn not_found(name: &str) -> DockerError {
        DockerError::ContainerNotFound {
            container: name.to_string(),
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list(&self, label: &str) -> Result<Vec<ContainerInfo>, DockerError> {
        let key = label.split('=').next().unwrap_or(label);
        let mut state = self.state.lock();
        if state.failing_lists > 0 {
            state.failing_lists -= 1;
            return Err(DockerError::DaemonUnavailable);
        }
        Ok(state
            .containers
            .values()
            .filter(|c| c.labels.contains_key(key))
            .cloned()
            .collect())
    }

    async fn inspect(&self, name: &str) -> Result<ContainerInfo, DockerError> {
        self.container(name).ok_or_else(|| Self::not_found(name))
    }

    async fn inspect_image(&self, tag: &str) -> Result<ImageInfo, DockerError> {
        self.state
            .lock()
            .images
            .get(tag)
            .cloned()
            .ok_or_else(|| DockerError::cmd_failed("docker image inspect", "No such image", Some(1)))
    }

    async fn build(&self, spec: &BuildSpec) -> Result<BuildStream, DockerError> {
        let mut state = self.state.lock();
        state.builds.push(spec.tag.clone());
        if state.fail_build.contains(&spec.tag) {
            let events: Vec<Result<BuildEvent, DockerError>> = vec![
                Ok(BuildEvent::Log("Step 1/2 : FROM base".to_string())),
                Err(DockerError::cmd_failed("docker build", "RUN returned 1", Some(1))),
            ];
            return Ok(futures::stream::iter(events).boxed());
        }

        let id = format!("sha256:{}", spec.tag);
        let exposed = state.exposed.get(&spec.tag).cloned().unwrap_or_default();
        state.images.insert(
            spec.tag.clone(),
            ImageInfo {
                id: id.clone(),
                exposed_ports: exposed,
            },
        );
        let events: Vec<Result<BuildEvent, DockerError>> = vec![
            Ok(BuildEvent::Log(format!("Step 1/1 : building {}", spec.tag))),
            Ok(BuildEvent::Image(id)),
        ];
        Ok(futures::stream::iter(events).boxed())
    }

    async fn create_or_replace(&self, spec: &ContainerSpec) -> Result<String, DockerError> {
        self.record(format!("create {}", spec.name));
        let mut state = self.state.lock();
        state.specs.push(spec.clone());
        if state.fail_create.contains(&spec.name) {
            return Err(DockerError::cmd_failed(
                "docker create",
                "Conflict. The container name is already in use",
                Some(125),
            ));
        }
        state.next_id += 1;
        let id = format!("c{}", state.next_id);
        state.containers.insert(
            spec.name.clone(),
            ContainerInfo {
                id: id.clone(),
                name: spec.name.clone(),
                running: false,
                state: "created".to_string(),
                started_at: None,
                labels: spec.labels.clone().into_iter().collect(),
            },
        );
        if spec.auto_remove {
            state.auto_remove.insert(spec.name.clone());
        } else {
            state.auto_remove.remove(&spec.name);
        }
        Ok(id)
    }

    async fn start(&self, name: &str) -> Result<(), DockerError> {
        self.record(format!("start {}", name));
        let mut state = self.state.lock();
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| Self::not_found(name))?;
        container.running = true;
        container.state = "running".to_string();
        container.started_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), DockerError> {
        self.record(format!("stop {}", name));
        let mut state = self.state.lock();
        if state.auto_remove.contains(name) {
            state.containers.remove(name);
            return Ok(());
        }
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| Self::not_found(name))?;
        container.running = false;
        container.state = "exited".to_string();
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<(), DockerError> {
        self.record(format!("restart {}", name));
        let mut state = self.state.lock();
        let container = state
            .containers
            .get_mut(name)
            .ok_or_else(|| Self::not_found(name))?;
        container.running = true;
        container.state = "running".to_string();
        container.started_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), DockerError> {
        self.record(format!("remove {}", name));
        self.state
            .lock()
            .containers
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Self::not_found(name))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// RPC channel with canned replies per service.
#[derive(Default)]
pub struct FakeRpc {
    replies: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<(String, String, Map<String, Value>)>>,
}

impl FakeRpc {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every request to `service` answers `reply`.
    pub fn reply(&self, service: &str, reply: Value) {
        self.replies.lock().insert(service.to_string(), reply);
    }

    /// `service` stops answering.
    pub fn silence(&self, service: &str) {
        self.replies.lock().remove(service);
    }

    pub fn calls(&self) -> Vec<(String, String, Map<String, Value>)> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, service: &str) -> Vec<(String, Map<String, Value>)> {
        self.calls
            .lock()
            .iter()
            .filter(|(s, _, _)| s == service)
            .map(|(_, m, p)| (m.clone(), p.clone()))
            .collect()
    }
}

#[async_trait]
impl RpcClient for FakeRpc {
    async fn request(
        &self,
        service: &str,
        method: &str,
        payload: Map<String, Value>,
    ) -> Option<Value> {
        self.calls
            .lock()
            .push((service.to_string(), method.to_string(), payload));
        self.replies.lock().get(service).cloned()
    }
}

/// A catalog with a base image and the given service images; paths are
/// never read by the fake runtime.
pub fn catalog(names: &[&str]) -> ImageCatalog {
    let base = ImageDef {
        name: "director-base".to_string(),
        category: ImageCategory::Base,
        path: PathBuf::from("/images/base"),
    };
    ImageCatalog::from_images(
        Some(base),
        names.iter().map(|name| ImageDef {
            name: name.to_string(),
            category: ImageCategory::Collection,
            path: PathBuf::from(format!("/images/collection/{}", name)),
        }),
    )
}

pub struct Harness {
    pub director: Director,
    pub runtime: Arc<FakeRuntime>,
    pub rpc: Arc<FakeRpc>,
    pub store: Arc<MemoryConfigStore>,
}

pub fn harness(settings: Settings, images: &[&str]) -> Harness {
    harness_with(settings, images, FakeRuntime::new(), MemoryConfigStore::new())
}

pub fn harness_with(
    settings: Settings,
    images: &[&str],
    runtime: Arc<FakeRuntime>,
    store: MemoryConfigStore,
) -> Harness {
    let rpc = FakeRpc::new();
    let store = Arc::new(store);
    let director = Director::builder()
        .settings(settings)
        .runtime(runtime.clone())
        .rpc_client(rpc.clone())
        .config_store(store.clone())
        .catalog(catalog(images))
        .build()
        .expect("director builds");
    Harness {
        director,
        runtime,
        rpc,
        store,
    }
}

pub fn params(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
