use super::RpcClient;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use std::time::Duration;

/// Shared HTTP client; the connection pool is reused across all calls.
static SHARED_HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn shared_client() -> Result<Client> {
    if let Some(client) = SHARED_HTTP_CLIENT.get() {
        return Ok(client.clone());
    }
    let client = Client::builder()
        .timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(10)
        .build()
        .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;
    Ok(SHARED_HTTP_CLIENT.get_or_init(|| client).clone())
}

/// RPC client posting JSON to `{endpoint}/{service}/{method}`.
pub struct HttpRpcClient {
    endpoint: url::Url,
    client: Client,
    timeout: Duration,
}

impl HttpRpcClient {
    /// # Errors
    ///
    /// Returns error if the endpoint is malformed or not http/https.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let mut parsed = url::Url::parse(endpoint)
            .map_err(|e| Error::Config(format!("Invalid rpc endpoint '{}': {}", endpoint, e)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(Error::Config(format!(
                "Invalid rpc endpoint '{}': scheme must be http or https, got '{}'",
                endpoint,
                parsed.scheme()
            )));
        }
        if !parsed.path().ends_with('/') {
            let path = format!("{}/", parsed.path());
            parsed.set_path(&path);
        }

        Ok(Self {
            endpoint: parsed,
            client: shared_client()?,
            timeout,
        })
    }

    fn url_for(&self, service: &str, method: &str) -> Option<url::Url> {
        self.endpoint
            .join(&format!("{}/{}", service, method))
            .map_err(|e| tracing::warn!("Cannot build RPC url for {}.{}: {}", service, method, e))
            .ok()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl RpcClient for HttpRpcClient {
    async fn request(
        &self,
        service: &str,
        method: &str,
        payload: Map<String, Value>,
    ) -> Option<Value> {
        let url = self.url_for(service, method)?;
        let response = match self
            .client
            .post(url)
            .timeout(self.timeout)
            .json(&payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!("RPC {}.{} failed: {}", service, method, e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::debug!(
                "RPC {}.{} answered {}",
                service,
                method,
                response.status()
            );
            return None;
        }

        match response.json::<Value>().await {
            Ok(Value::Null) => None,
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!("RPC {}.{} returned unreadable body: {}", service, method, e);
                None
            }
        }
    }
}
