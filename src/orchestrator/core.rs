use super::{DirectorBuilder, Reconciler, StatusSync};
use crate::catalog::ImageDef;
use crate::config::Settings;
use crate::docker::{ContainerDriver, ContainerSummary};
use crate::error::{Error, Result};
use crate::rpc::{RpcClient, REQUEST_STATUS};
use crate::state::{
    BuildOptions, DashPosition, RegistrationRecord, ServiceConfig, ServiceParams,
    ServiceRegistry, ServiceSnapshot,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Parameters of a run request, parsed from a free-form payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRequest {
    pub build_options: BuildOptions,
    pub pos: Option<DashPosition>,
}

impl RunRequest {
    /// Accepts `env` (list or single string), `nocache` and `auto_remove`
    /// (booleans or their string forms) and `pos` as `"COLxROW"`.
    pub fn from_params(params: &Map<String, Value>) -> Result<Self> {
        let mut request = RunRequest::default();

        if let Some(env) = params.get("env") {
            request.build_options.env = Some(match env {
                Value::Array(items) => items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
                Value::String(s) if !s.is_empty() => vec![s.clone()],
                _ => Vec::new(),
            });
        }
        if let Some(value) = params.get("nocache") {
            request.build_options.nocache = Some(str2bool(value));
        }
        if let Some(value) = params.get("auto_remove") {
            request.build_options.auto_remove = Some(str2bool(value));
        }
        if let Some(Value::String(pos)) = params.get("pos") {
            if !pos.is_empty() {
                request.pos = Some(pos.parse().map_err(Error::Config)?);
            }
        }
        Ok(request)
    }

    fn into_params(self) -> ServiceParams {
        ServiceParams {
            build_options: Some(self.build_options),
            pos: self.pos,
        }
    }
}

fn str2bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        Value::String(s) => matches!(
            s.to_ascii_lowercase().as_str(),
            "yes" | "true" | "t" | "1" | "y"
        ),
        _ => false,
    }
}

/// The controller: every externally exposed operation, typed.
///
/// # Example
///
/// ```no_run
/// use director::{Director, Settings};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), director::Error> {
/// let director = Director::builder().settings(Settings::default()).build()?;
/// let cancel = CancellationToken::new();
/// director.serve(cancel).await;
/// # Ok(())
/// # }
/// ```
pub struct Director {
    settings: Settings,
    driver: Arc<ContainerDriver>,
    registry: Arc<ServiceRegistry>,
    sync: Arc<StatusSync>,
    rpc: Arc<dyn RpcClient>,
}

impl Director {
    pub fn builder() -> DirectorBuilder {
        DirectorBuilder::new()
    }

    pub(super) fn from_parts(
        settings: Settings,
        driver: Arc<ContainerDriver>,
        registry: Arc<ServiceRegistry>,
        rpc: Arc<dyn RpcClient>,
    ) -> Self {
        let sync = Arc::new(StatusSync::new(
            registry.clone(),
            rpc.clone(),
            settings.frontier_name.clone(),
        ));
        Self {
            settings,
            driver,
            registry,
            sync,
            rpc,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn driver(&self) -> &Arc<ContainerDriver> {
        &self.driver
    }

    pub fn status_sync(&self) -> &Arc<StatusSync> {
        &self.sync
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            self.registry.clone(),
            self.sync.clone(),
            self.settings.tick_interval,
        )
    }

    /// Run the reconciliation loop until cancelled, then release the runtime.
    pub async fn serve(&self, cancel_token: CancellationToken) {
        tracing::info!(
            "Director started, ticking every {:?}",
            self.settings.tick_interval
        );
        self.reconciler().run(cancel_token).await;
        self.driver.close().await;
        tracing::info!("Director stopped");
    }

    // ------------------------------------------------------------------
    // Read operations
    // ------------------------------------------------------------------

    /// Services with a visible state.
    pub async fn list(&self) -> Vec<ServiceSnapshot> {
        self.registry.list_states().await
    }

    pub async fn registrations(&self) -> Vec<RegistrationRecord> {
        self.registry.aggregate_registrations().await
    }

    pub async fn notify_alive(&self, name: &str, payload: &Map<String, Value>) {
        self.sync.notify_alive(name, payload).await;
    }

    /// Runtime details of a managed container.
    pub async fn show(&self, name: &str) -> Result<ContainerSummary> {
        self.driver
            .get(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("container '{}'", name)))
    }

    pub fn list_images(&self) -> Result<Vec<ImageDef>> {
        self.driver.reload_catalog()?;
        Ok(self.driver.images())
    }

    pub fn list_configs(&self) -> Result<BTreeMap<String, ServiceConfig>> {
        self.registry.configs()
    }

    pub async fn status_call(&self, name: &str) -> Option<Value> {
        self.rpc.request(name, REQUEST_STATUS, Map::new()).await
    }

    pub async fn call(&self, name: &str, method: &str, params: Map<String, Value>) -> Option<Value> {
        self.rpc.request(name, method, params).await
    }

    /// Debug view: the snapshot of `name` (or one field of it), else the
    /// names of every tracked service.
    pub async fn get_state(&self, name: Option<&str>, prop: Option<&str>) -> Result<Value> {
        if let Some(name) = name {
            if let Some(snapshot) = self.registry.get_state(name).await {
                let value = serde_json::to_value(snapshot)?;
                if let Some(field) = prop.and_then(|p| value.get(p)) {
                    return Ok(field.clone());
                }
                return Ok(value);
            }
        }
        Ok(serde_json::to_value(self.registry.names().await)?)
    }

    // ------------------------------------------------------------------
    // Lifecycle operations
    // ------------------------------------------------------------------

    /// Build and run `name` with the given parameters, which are merged into
    /// and persisted with its config first.
    pub async fn run(&self, name: &str, params: &Map<String, Value>) -> Result<ServiceSnapshot> {
        if !self.driver.is_native(name) {
            return Err(Error::NotFound(format!("image '{}'", name)));
        }
        let request = RunRequest::from_params(params)?;
        tracing::debug!("Run request for {}: {:?}", name, request);
        self.registry.get(name, Some(&request.into_params())).await;
        self.registry.run_service(name).await
    }

    pub async fn rebuild_all(&self) -> Vec<String> {
        self.registry.rebuild_all().await
    }

    pub async fn restart(&self, name: &str) -> Result<ServiceSnapshot> {
        self.registry.restart_service(name).await
    }

    pub async fn stop(&self, name: &str) -> Result<ServiceSnapshot> {
        self.registry.stop_service(name).await
    }

    pub async fn start(&self, name: &str) -> Result<ServiceSnapshot> {
        self.registry.start_service(name).await
    }

    pub async fn remove(&self, name: &str) -> Result<ServiceSnapshot> {
        self.registry.remove_service(name).await
    }
}
