use super::ServiceConfig;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Persisted per-service configuration, keyed by service name.
///
/// The registry reads it at startup to decide which services to relaunch
/// and writes through it whenever a service's config may have changed.
///
/// # Implementations
///
/// - [`JsonConfigStore`] - one `<name>.json` file per service
/// - [`MemoryConfigStore`] - in-process map, for tests and dry runs
pub trait ConfigStore: Send + Sync {
    fn load(&self, name: &str) -> Result<Option<ServiceConfig>>;

    fn save(&self, name: &str, config: &ServiceConfig) -> Result<()>;

    /// Names with a stored config, sorted.
    fn names(&self) -> Result<Vec<String>>;

    fn load_all(&self) -> Result<BTreeMap<String, ServiceConfig>> {
        let mut configs = BTreeMap::new();
        for name in self.names()? {
            if let Some(config) = self.load(&name)? {
                configs.insert(name, config);
            }
        }
        Ok(configs)
    }
}

/// Config store writing one JSON document per service under a directory.
pub struct JsonConfigStore {
    dir: PathBuf,
    writes: AtomicU64,
}

impl JsonConfigStore {
    /// The directory is created lazily on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            writes: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(Error::Store(format!("Invalid service name '{}'", name)));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }

    /// Atomic file write using write-then-rename. Every write gets its own
    /// temp file, so concurrent saves of one name never share it.
    fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<()> {
        let seq = self.writes.fetch_add(1, Ordering::Relaxed);
        let temp_path = path.with_extension(format!("json.{}.{}.tmp", std::process::id(), seq));
        let mut file = fs::File::create(&temp_path)
            .map_err(|e| Error::Store(format!("Failed to create temp file: {}", e)))?;
        file.write_all(content)
            .map_err(|e| Error::Store(format!("Failed to write temp file: {}", e)))?;
        file.sync_all()
            .map_err(|e| Error::Store(format!("Failed to sync temp file: {}", e)))?;
        drop(file);

        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            Error::Store(format!("Failed to rename temp file: {}", e))
        })?;
        Ok(())
    }
}

impl ConfigStore for JsonConfigStore {
    fn load(&self, name: &str) -> Result<Option<ServiceConfig>> {
        let path = self.path_for(name)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn save(&self, name: &str, config: &ServiceConfig) -> Result<()> {
        let path = self.path_for(name)?;
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Store(format!(
                "Failed to create config directory '{}': {}",
                self.dir.display(),
                e
            ))
        })?;
        let content = serde_json::to_vec_pretty(config)?;
        self.write_atomic(&path, &content)?;
        tracing::debug!("Saved config of {} to {}", name, path.display());
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Config store that never touches disk.
#[derive(Default)]
pub struct MemoryConfigStore {
    configs: Mutex<BTreeMap<String, ServiceConfig>>,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_configs(configs: impl IntoIterator<Item = (String, ServiceConfig)>) -> Self {
        Self {
            configs: Mutex::new(configs.into_iter().collect()),
        }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self, name: &str) -> Result<Option<ServiceConfig>> {
        Ok(self.configs.lock().get(name).cloned())
    }

    fn save(&self, name: &str, config: &ServiceConfig) -> Result<()> {
        self.configs.lock().insert(name.to_string(), config.clone());
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>> {
        Ok(self.configs.lock().keys().cloned().collect())
    }
}
