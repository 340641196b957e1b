use super::Director;
use crate::catalog::ImageCatalog;
use crate::config::Settings;
use crate::docker::{ContainerDriver, ContainerRuntime, DockerClient};
use crate::error::Result;
use crate::port::PortAllocator;
use crate::rpc::{HttpRpcClient, RpcClient};
use crate::state::{ConfigStore, JsonConfigStore, ServiceRegistry};
use std::sync::Arc;

/// Builder for constructing a [`Director`] with a fluent API.
///
/// Every collaborator has a production default derived from the settings:
/// the docker CLI runtime, an HTTP RPC client against `rpc.endpoint`, a JSON
/// config store under the config directory and the image catalog under
/// `images_dir`. Tests swap them for in-memory fakes.
///
/// # Example
///
/// ```no_run
/// use director::{Director, Settings, state::MemoryConfigStore};
/// use std::sync::Arc;
///
/// # fn example() -> Result<(), director::Error> {
/// let director = Director::builder()
///     .settings(Settings::default())
///     .config_store(Arc::new(MemoryConfigStore::new()))
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct DirectorBuilder {
    settings: Option<Settings>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    rpc: Option<Arc<dyn RpcClient>>,
    store: Option<Arc<dyn ConfigStore>>,
    catalog: Option<ImageCatalog>,
}

impl DirectorBuilder {
    pub fn new() -> Self {
        Self {
            settings: None,
            runtime: None,
            rpc: None,
            store: None,
            catalog: None,
        }
    }

    /// If not set, defaults to [`Settings::default`].
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn rpc_client(mut self, rpc: Arc<dyn RpcClient>) -> Self {
        self.rpc = Some(rpc);
        self
    }

    pub fn config_store(mut self, store: Arc<dyn ConfigStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use an already populated catalog instead of scanning `images_dir`.
    pub fn catalog(mut self, catalog: ImageCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// # Errors
    ///
    /// Returns an error if the settings do not validate or the default RPC
    /// client cannot be created.
    pub fn build(self) -> Result<Director> {
        let settings = self.settings.unwrap_or_default();
        settings.validate()?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Arc::new(DockerClient::new()),
        };
        let rpc = match self.rpc {
            Some(rpc) => rpc,
            None => Arc::new(HttpRpcClient::new(
                &settings.rpc.endpoint,
                settings.rpc.timeout,
            )?),
        };
        let store = match self.store {
            Some(store) => store,
            None => Arc::new(JsonConfigStore::new(settings.resolved_config_dir())),
        };
        let catalog = match self.catalog {
            Some(catalog) => catalog,
            None => {
                let mut catalog =
                    ImageCatalog::new(&settings.images_dir, settings.base_image.clone());
                if let Err(e) = catalog.load() {
                    tracing::warn!(
                        "Failed to scan images in {}: {}",
                        settings.images_dir.display(),
                        e
                    );
                }
                catalog
            }
        };

        let driver = Arc::new(ContainerDriver::new(
            runtime,
            PortAllocator::new(settings.port_range.into()),
            catalog,
            settings.container_params.clone(),
            settings.container_env.clone(),
        ));
        let registry = Arc::new(ServiceRegistry::new(
            driver.clone(),
            store,
            settings.service_timeout,
            settings.startup.clone(),
            settings.self_name.clone(),
        ));

        Ok(Director::from_parts(settings, driver, registry, rpc))
    }
}

impl Default for DirectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
