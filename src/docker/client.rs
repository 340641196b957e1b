//! Docker CLI implementation of [`ContainerRuntime`].
//!
//! All Docker CLI interactions go through `DockerClient`, which provides
//! consistent timeout handling, error mapping to [`DockerError`], and a single
//! point where `Command::new("docker")` is constructed.

use super::runtime::{
    BuildEvent, BuildSpec, BuildStream, ContainerInfo, ContainerRuntime, ContainerSpec, ImageInfo,
};
use super::DockerError;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Timeout for list/inspect calls.
const INSPECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for create/start/remove calls.
const LIFECYCLE_TIMEOUT: Duration = Duration::from_secs(30);
/// Stop and restart wait for the container's own grace period.
const STOP_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for the docker CLI.
///
/// The struct is cheap to clone; `close` only flips a flag so that calls made
/// during shutdown fail fast with [`DockerError::DaemonUnavailable`].
#[derive(Debug, Clone, Default)]
pub struct DockerClient {
    closed: std::sync::Arc<AtomicBool>,
}

impl DockerClient {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    /// Run a docker command with a timeout, returning raw Output.
    async fn run(&self, args: &[&str], timeout: Duration) -> Result<Output, DockerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DockerError::DaemonUnavailable);
        }

        let result = tokio::time::timeout(
            timeout,
            tokio::process::Command::new("docker").args(args).output(),
        )
        .await;

        let cmd_str = format!("docker {}", args.join(" "));

        match result {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(DockerError::exec_failed(cmd_str, e)),
            Err(_) => Err(DockerError::timeout(cmd_str, timeout)),
        }
    }

    /// Run a docker command with a timeout, returning Output only if exit 0.
    async fn run_success(&self, args: &[&str], timeout: Duration) -> Result<Output, DockerError> {
        let output = self.run(args, timeout).await?;
        if output.status.success() {
            Ok(output)
        } else {
            let cmd_str = format!("docker {}", args.join(" "));
            Err(DockerError::failed(cmd_str, &output))
        }
    }

    async fn inspect_many(&self, names: &[String]) -> Result<Vec<ContainerInfo>, DockerError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["inspect", "--type", "container"];
        args.extend(names.iter().map(String::as_str));
        let output = self.run(&args, INSPECT_TIMEOUT).await?;
        if output.status.success() {
            return parse_inspect(&output.stdout);
        }

        // Containers can vanish between `ps` and `inspect` (`--rm` ones do
        // on stop); docker still prints the ones it found.
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !only_missing_containers(&stderr) {
            let cmd_str = format!("docker {}", args.join(" "));
            return Err(DockerError::failed(cmd_str, &output));
        }
        tracing::debug!("Skipping vanished containers: {}", stderr.trim());
        parse_partial_inspect(&output.stdout)
    }

    /// Check if the Docker daemon is healthy.
    pub async fn daemon_healthy(&self, timeout: Duration) -> bool {
        match self
            .run(&["info", "--format", "{{.ServerVersion}}"], timeout)
            .await
        {
            Ok(o) => o.status.success(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl ContainerRuntime for DockerClient {
    async fn list(&self, label: &str) -> Result<Vec<ContainerInfo>, DockerError> {
        let filter = format!("label={}", label);
        let output = self
            .run_success(
                &["ps", "-a", "--filter", &filter, "--format", "{{.Names}}"],
                INSPECT_TIMEOUT,
            )
            .await?;
        let names: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        self.inspect_many(&names).await
    }

    async fn inspect(&self, name: &str) -> Result<ContainerInfo, DockerError> {
        self.inspect_many(&[name.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DockerError::ContainerNotFound {
                container: name.to_string(),
            })
    }

    async fn inspect_image(&self, tag: &str) -> Result<ImageInfo, DockerError> {
        let output = self
            .run_success(&["image", "inspect", tag], INSPECT_TIMEOUT)
            .await?;
        parse_image_inspect(&output.stdout)
    }

    async fn build(&self, spec: &BuildSpec) -> Result<BuildStream, DockerError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DockerError::DaemonUnavailable);
        }

        let iidfile = iid_path(&spec.tag);
        let mut args = vec![
            "build".to_string(),
            "--tag".to_string(),
            spec.tag.clone(),
            "--iidfile".to_string(),
            iidfile.display().to_string(),
        ];
        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{}={}", key, value));
        }
        if spec.nocache {
            args.push("--no-cache".to_string());
        }
        args.push(spec.context.display().to_string());

        let cmd_str = format!("docker {}", args.join(" "));
        let mut child = tokio::process::Command::new("docker")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DockerError::exec_failed(&cmd_str, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DockerError::malformed(&cmd_str, "stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DockerError::malformed(&cmd_str, "stderr not captured"))?;

        // BuildKit reports progress on stderr, the classic builder on stdout.
        let output = stream::select(line_stream(stdout), line_stream(stderr));

        let finish = stream::once(async move {
            let status = child
                .wait()
                .await
                .map_err(|e| DockerError::exec_failed(&cmd_str, e))?;
            if !status.success() {
                let _ = tokio::fs::remove_file(&iidfile).await;
                return Err(DockerError::cmd_failed(
                    cmd_str,
                    "build failed",
                    status.code(),
                ));
            }
            let id = tokio::fs::read_to_string(&iidfile)
                .await
                .map_err(|e| DockerError::malformed(&cmd_str, format!("no image id: {}", e)))?;
            let _ = tokio::fs::remove_file(&iidfile).await;
            Ok(BuildEvent::Image(id.trim().to_string()))
        });

        Ok(output.chain(finish).boxed())
    }

    async fn create_or_replace(&self, spec: &ContainerSpec) -> Result<String, DockerError> {
        // `rm -f` is atomic and succeeds whether or not the container exists,
        // which avoids an inspect-then-remove race.
        let output = self
            .run(&["rm", "-f", &spec.name], LIFECYCLE_TIMEOUT)
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.contains("No such container") {
                return Err(DockerError::failed("docker rm -f", &output));
            }
        }

        let args = create_args(spec);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run_success(&arg_refs, LIFECYCLE_TIMEOUT).await?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn start(&self, name: &str) -> Result<(), DockerError> {
        self.run_success(&["start", name], LIFECYCLE_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn stop(&self, name: &str) -> Result<(), DockerError> {
        self.run_success(&["stop", name], STOP_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn restart(&self, name: &str) -> Result<(), DockerError> {
        self.run_success(&["restart", name], STOP_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn remove(&self, name: &str) -> Result<(), DockerError> {
        self.run_success(&["rm", name], LIFECYCLE_TIMEOUT)
            .await
            .map(|_| ())
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Docker client closed");
        }
    }
}

/// Assemble `docker create` arguments for a container spec.
fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        spec.name.clone(),
        "--hostname".to_string(),
        spec.hostname.clone(),
        "--stop-signal".to_string(),
        spec.stop_signal.clone(),
    ];

    for (key, value) in &spec.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    for var in &spec.env {
        args.push("-e".to_string());
        args.push(var.clone());
    }

    // Docker refuses --rm together with a restart policy.
    if spec.auto_remove {
        args.push("--rm".to_string());
    } else {
        args.push("--restart".to_string());
        args.push(spec.restart_policy.as_str().to_string());
    }

    if let Some(ref network) = spec.network {
        args.push("--network".to_string());
        args.push(network.clone());
    }
    if let Some(ref memory) = spec.memory {
        args.push("--memory".to_string());
        args.push(memory.clone());
    }
    for binding in &spec.ports {
        args.push("-p".to_string());
        args.push(binding.to_publish_arg());
    }

    args.push(spec.image.clone());
    args.extend(spec.cmd.iter().cloned());
    args
}

fn line_stream<R>(reader: R) -> BoxStream<'static, Result<BuildEvent, DockerError>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let lines = BufReader::new(reader).lines();
    stream::unfold(lines, |mut lines| async move {
        match lines.next_line().await {
            Ok(Some(line)) => Some((Ok(BuildEvent::Log(line)), lines)),
            Ok(None) => None,
            Err(e) => {
                tracing::debug!("Build output stream ended: {}", e);
                None
            }
        }
    })
    .boxed()
}

fn iid_path(tag: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let safe: String = tag
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    std::env::temp_dir().join(format!(
        "director-{}-{}-{}.iid",
        std::process::id(),
        safe,
        n
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedContainer {
    id: String,
    name: String,
    state: InspectedState,
    config: InspectedConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedState {
    status: String,
    running: bool,
    #[serde(default)]
    started_at: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedConfig {
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedImage {
    id: String,
    config: Option<InspectedImageConfig>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectedImageConfig {
    #[serde(default)]
    exposed_ports: Option<HashMap<String, serde_json::Value>>,
}

fn parse_inspect(stdout: &[u8]) -> Result<Vec<ContainerInfo>, DockerError> {
    let raw: Vec<InspectedContainer> = serde_json::from_slice(stdout)
        .map_err(|e| DockerError::malformed("docker inspect", e.to_string()))?;
    Ok(raw
        .into_iter()
        .map(|c| ContainerInfo {
            id: c.id,
            name: c.name.trim_start_matches('/').to_string(),
            running: c.state.running,
            state: c.state.status,
            started_at: c.state.started_at.as_deref().and_then(parse_started_at),
            labels: c.config.labels.unwrap_or_default(),
        })
        .collect())
}

/// Whether every error line of a failed `docker inspect` names a missing
/// object.
fn only_missing_containers(stderr: &str) -> bool {
    let mut lines = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).peekable();
    lines.peek().is_some()
        && lines.all(|line| {
            let line = line.strip_prefix("Error:").unwrap_or(line).trim_start();
            line.starts_with("No such container:") || line.starts_with("No such object:")
        })
}

/// Output of an inspect where some names were missing; empty when none were
/// found.
fn parse_partial_inspect(stdout: &[u8]) -> Result<Vec<ContainerInfo>, DockerError> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }
    parse_inspect(stdout)
}

/// Docker reports `0001-01-01T00:00:00Z` for containers that never started.
fn parse_started_at(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
        .filter(|t| t.year() > 1)
}

fn parse_image_inspect(stdout: &[u8]) -> Result<ImageInfo, DockerError> {
    let raw: Vec<InspectedImage> = serde_json::from_slice(stdout)
        .map_err(|e| DockerError::malformed("docker image inspect", e.to_string()))?;
    let image = raw
        .into_iter()
        .next()
        .ok_or_else(|| DockerError::malformed("docker image inspect", "empty result"))?;
    let mut exposed_ports: Vec<String> = image
        .config
        .and_then(|c| c.exposed_ports)
        .map(|ports| ports.into_keys().collect())
        .unwrap_or_default();
    exposed_ports.sort();
    Ok(ImageInfo {
        id: image.id,
        exposed_ports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::docker::runtime::{managed_labels, PortBinding, RestartPolicy};

    #[test]
    fn test_parse_inspect() {
        let json = br#"[{
            "Id": "f00d",
            "Name": "/db",
            "State": {"Status": "running", "Running": true, "StartedAt": "2024-05-01T10:00:00.123456789Z"},
            "Config": {"Labels": {"director.managed": "true", "director.ports": "8901"}}
        }, {
            "Id": "beef",
            "Name": "/old",
            "State": {"Status": "created", "Running": false, "StartedAt": "0001-01-01T00:00:00Z"},
            "Config": {"Labels": null}
        }]"#;
        let parsed = parse_inspect(json).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].name, "db");
        assert!(parsed[0].running);
        assert_eq!(parsed[0].ports(), vec![8901]);
        assert!(parsed[0].started_at.is_some());
        assert_eq!(parsed[1].state, "created");
        assert!(parsed[1].started_at.is_none());
        assert!(parsed[1].labels.is_empty());
    }

    #[test]
    fn test_parse_inspect_rejects_garbage() {
        assert!(matches!(
            parse_inspect(b"not json"),
            Err(DockerError::Malformed { .. })
        ));
    }

    #[test]
    fn test_vanished_containers_are_skipped() {
        let stderr = "Error: No such container: job\nError: No such object: old\n";
        assert!(only_missing_containers(stderr));
        assert!(!only_missing_containers(""));
        assert!(!only_missing_containers(
            "Error: No such container: job\npermission denied while trying to connect"
        ));

        let stdout = br#"[{
            "Id": "f00d",
            "Name": "/db",
            "State": {"Status": "running", "Running": true, "StartedAt": "2024-05-01T10:00:00Z"},
            "Config": {"Labels": {"director.managed": "true"}}
        }]"#;
        let found = parse_partial_inspect(stdout).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "db");
        assert!(parse_partial_inspect(b"[]\n").unwrap().is_empty());
        assert!(parse_partial_inspect(b"\n").unwrap().is_empty());
    }

    #[test]
    fn test_parse_image_inspect() {
        let json = br#"[{"Id": "sha256:1234", "Config": {"ExposedPorts": {"9000/tcp": {}, "8080/tcp": {}}}}]"#;
        let image = parse_image_inspect(json).unwrap();
        assert_eq!(image.id, "sha256:1234");
        assert_eq!(image.exposed_ports, vec!["8080/tcp", "9000/tcp"]);

        let json = br#"[{"Id": "sha256:5678", "Config": {"ExposedPorts": null}}]"#;
        assert!(parse_image_inspect(json).unwrap().exposed_ports.is_empty());
    }

    #[test]
    fn test_create_args() {
        let spec = ContainerSpec {
            name: "api".into(),
            image: "sha256:1234".into(),
            hostname: "api".into(),
            cmd: vec!["api".into()],
            env: vec!["NAME=api".into()],
            labels: managed_labels(Some("api"), &[8900]),
            ports: vec![PortBinding {
                container_port: "8080/tcp".into(),
                host_ip: Some("0.0.0.0".into()),
                host_port: 8900,
            }],
            restart_policy: RestartPolicy::UnlessStopped,
            auto_remove: false,
            network: Some("custom".into()),
            memory: None,
            stop_signal: "SIGTERM".into(),
        };
        let args = create_args(&spec);
        let joined = args.join(" ");
        assert!(joined.starts_with("create --name api --hostname api"));
        assert!(joined.contains("--restart unless-stopped"));
        assert!(joined.contains("--label director.ports=8900"));
        assert!(joined.contains("-p 0.0.0.0:8900:8080/tcp"));
        assert!(joined.contains("--network custom"));
        assert!(!joined.contains("--memory"));
        assert!(joined.ends_with("sha256:1234 api"));

        let spec = ContainerSpec {
            auto_remove: true,
            ..spec
        };
        let joined = create_args(&spec).join(" ");
        assert!(joined.contains("--rm"));
        assert!(!joined.contains("--restart"));
    }

    #[tokio::test]
    async fn test_closed_client_fails_fast() {
        let client = DockerClient::new();
        client.close().await;
        client.close().await;
        assert!(matches!(
            client.list("director.managed").await,
            Err(DockerError::DaemonUnavailable)
        ));
    }
}
