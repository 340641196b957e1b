//! RPC channel to fleet services.
//!
//! The controller only needs one primitive from the RPC layer: send a
//! method call to a named service and get back its JSON reply, or nothing.

mod http;

pub use http::HttpRpcClient;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Method a service calls on the controller to announce it is alive.
pub const NOTIFY_ALIVE: &str = "__status";
/// Method the controller calls on a service to pull its full status.
pub const REQUEST_STATUS: &str = "__status_request";

#[async_trait]
pub trait RpcClient: Send + Sync {
    /// Call `method` on `service`.
    ///
    /// Unreachable services, timeouts, error replies and empty bodies all
    /// come back as `None`; the caller treats silence as a signal.
    async fn request(&self, service: &str, method: &str, payload: Map<String, Value>)
        -> Option<Value>;
}
