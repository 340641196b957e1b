use crate::output::UserOutput;
use director::docker::check_daemon_with_retry;
use director::{Director, DockerClient, Settings};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn run_serve(settings: Settings, out: &dyn UserOutput) -> anyhow::Result<()> {
    if !check_daemon_with_retry(&DockerClient::new(), 5, Duration::from_secs(10)).await {
        out.warning("Docker daemon is not responding yet; containers will be picked up once it is");
    }

    let director = Director::builder().settings(settings).build()?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => tracing::info!("Interrupt received, shutting down"),
            Err(e) => tracing::error!("Failed to listen for interrupt: {}", e),
        }
        signal_token.cancel();
    });

    director.serve(cancel).await;
    out.success("Director stopped");
    Ok(())
}
