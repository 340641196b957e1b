use super::Settings;
use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAMES: [&str; 2] = ["director.yaml", "director.yml"];

pub struct Parser;

impl Parser {
    pub fn new() -> Self {
        Self
    }

    /// Find config file starting from current directory
    pub fn find_config_file(&self) -> Result<PathBuf> {
        let current_dir = std::env::current_dir()?;
        Self::find_config_in_dir(&current_dir)
    }

    pub fn find_config_in_dir(dir: &Path) -> Result<PathBuf> {
        for name in CONFIG_FILE_NAMES {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        if let Some(parent) = dir.parent() {
            return Self::find_config_in_dir(parent);
        }

        Err(Error::Config(
            "Could not find director.yaml in current directory or any parent".to_string(),
        ))
    }

    /// Load and validate settings from a file path.
    ///
    /// A relative `images_dir` or `config_dir` is resolved against the
    /// directory holding the file.
    pub fn load_config<P: AsRef<Path>>(&self, path: P) -> Result<Settings> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let mut settings = self.parse_config(&content)?;
        if let Some(base) = path.parent() {
            if settings.images_dir.is_relative() {
                settings.images_dir = base.join(&settings.images_dir);
            }
            if let Some(dir) = settings.config_dir.as_mut() {
                if dir.is_relative() {
                    *dir = base.join(&*dir);
                }
            }
        }
        Ok(settings)
    }

    /// Parse settings from a YAML string
    pub fn parse_config(&self, content: &str) -> Result<Settings> {
        // An empty document deserializes to unit, not to an empty mapping.
        let settings: Settings = if content.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml::from_str(content)
                .map_err(|e| Error::Config(format!("Failed to parse YAML config: {}", e)))?
        };
        settings.validate()?;
        Ok(settings)
    }
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
images_dir: /srv/images
startup:
  - api
  - worker
container_params:
  bind_ip: 0.0.0.0
  network: custom
  memory: 512m
container_env:
  REDIS_DSN: redis://redis:6379
port_range:
  start: 9100
  end: 9199
service_timeout: 1m
tick_interval: 2
rpc:
  endpoint: http://gateway:8080
  timeout: 500ms
"#;

        let settings = Parser::new().parse_config(yaml).unwrap();
        assert_eq!(settings.startup, vec!["api", "worker"]);
        assert_eq!(settings.container_params.network.as_deref(), Some("custom"));
        assert_eq!(settings.port_range.start, 9100);
        assert_eq!(settings.service_timeout, Duration::from_secs(60));
        assert_eq!(settings.tick_interval, Duration::from_secs(2));
        assert_eq!(settings.rpc.timeout, Duration::from_millis(500));
        assert_eq!(settings.frontier_name, "frontier");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let settings = Parser::new().parse_config("").unwrap();
        assert!(settings.startup.is_empty());
        assert_eq!(settings.base_image, "director-base");
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let err = Parser::new()
            .parse_config("tick_interval: soon\n")
            .unwrap_err();
        assert!(err.to_string().contains("invalid duration"));
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("director.yaml");
        fs::write(&path, "images_dir: images\nconfig_dir: state\n").unwrap();

        let settings = Parser::new().load_config(&path).unwrap();
        assert_eq!(settings.images_dir, dir.path().join("images"));
        assert_eq!(settings.config_dir, Some(dir.path().join("state")));
    }

    #[test]
    fn test_find_config_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("director.yml"), "").unwrap();
        let nested = dir.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();

        let found = Parser::find_config_in_dir(&nested).unwrap();
        assert_eq!(found, dir.path().join("director.yml"));
    }
}
