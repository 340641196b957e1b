//! Container runtime access.
//!
//! [`ContainerRuntime`] is the contract the driver depends on;
//! [`DockerClient`] implements it on top of the docker CLI and
//! [`ContainerDriver`] builds the controller's operations on top of it.

pub mod client;
pub mod driver;
pub mod error;
pub mod runtime;

pub use client::DockerClient;
pub use driver::ContainerDriver;
pub use error::DockerError;
pub use runtime::*;

use std::time::Duration;

/// Check Docker daemon health with retry and exponential backoff.
///
/// Used once at startup: a daemon that is still coming up should not make
/// the controller refuse to start, but it is worth a warning.
pub async fn check_daemon_with_retry(
    client: &DockerClient,
    max_attempts: u32,
    total_timeout: Duration,
) -> bool {
    use tokio::time::{sleep, timeout};

    let start = std::time::Instant::now();
    let mut delay = Duration::from_millis(100);

    for attempt in 1..=max_attempts {
        if start.elapsed() >= total_timeout {
            tracing::debug!(
                "Docker daemon health check timeout after {:?}",
                start.elapsed()
            );
            return false;
        }

        let remaining = total_timeout.saturating_sub(start.elapsed());
        match timeout(remaining, client.daemon_healthy(Duration::from_secs(2))).await {
            Ok(true) => {
                if attempt > 1 {
                    tracing::info!(
                        "Docker daemon became healthy after {} attempts ({:?})",
                        attempt,
                        start.elapsed()
                    );
                }
                return true;
            }
            Ok(false) | Err(_) => {
                if attempt < max_attempts {
                    tracing::debug!(
                        "Docker daemon health check attempt {}/{} failed, retrying in {:?}",
                        attempt,
                        max_attempts,
                        delay
                    );
                    sleep(delay).await;
                    delay = (delay * 2).min(Duration::from_secs(2));
                } else {
                    tracing::warn!(
                        "Docker daemon unhealthy after {} attempts ({:?})",
                        max_attempts,
                        start.elapsed()
                    );
                }
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_daemon_retry_respects_timeout() {
        let client = DockerClient::new();
        let start = std::time::Instant::now();
        let _ = check_daemon_with_retry(&client, 10, Duration::from_millis(50)).await;
        // Generous bound: spawning `docker info` on a loaded CI box is slow.
        assert!(start.elapsed() < Duration::from_secs(3));
    }
}
