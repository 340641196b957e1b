//! Heartbeat intake and registration fan-out.
//!
//! A service announces itself with [`NOTIFY_ALIVE`](crate::rpc::NOTIFY_ALIVE);
//! the controller answers by pulling the service's full status. The frontier
//! is special: its status request carries the aggregated registrations of
//! the whole fleet, so one round trip both pulls its status and pushes the
//! directory to it.

use crate::rpc::{RpcClient, REQUEST_STATUS};
use crate::state::{AppStatus, RegistrationRecord, ServiceRegistry};
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct StatusSync {
    registry: Arc<ServiceRegistry>,
    rpc: Arc<dyn RpcClient>,
    frontier: String,
}

impl StatusSync {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        rpc: Arc<dyn RpcClient>,
        frontier: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            rpc,
            frontier: frontier.into(),
        }
    }

    pub fn frontier(&self) -> &str {
        &self.frontier
    }

    /// Pull the status of `name` and record it.
    ///
    /// Never fails: a service that does not answer simply gains no fresh
    /// app status.
    pub async fn request_app_state(&self, name: &str) -> Option<AppStatus> {
        let reply = self.pull_status(name).await?;
        self.record_status(name, reply).await
    }

    async fn pull_status(&self, name: &str) -> Option<Value> {
        let mut payload = Map::new();
        if name == self.frontier {
            let records = self.registry.aggregate_registrations().await;
            match serde_json::to_value(&records) {
                Ok(register) => {
                    payload.insert("register".to_string(), register);
                }
                Err(e) => tracing::warn!("Cannot serialize registrations: {}", e),
            }
        }
        self.rpc.request(name, REQUEST_STATUS, payload).await
    }

    async fn record_status(&self, name: &str, reply: Value) -> Option<AppStatus> {
        let status = AppStatus::from_value(reply)?;
        self.registry.set_app_status(name, status.clone()).await;
        Some(status)
    }

    /// Handle an inbound alive notification.
    pub async fn notify_alive(&self, name: &str, _payload: &Map<String, Value>) {
        tracing::debug!("Alive notification from {}", name);
        if self.request_app_state(name).await.is_none() {
            tracing::debug!("No status from {}", name);
        }
    }

    /// Push the registrations to the frontier if they changed since the last
    /// delivered push. Returns whether the frontier took the push.
    ///
    /// The hash is only recorded once the frontier answers, so an
    /// unreachable frontier gets the push again on the next check.
    pub async fn check_registrations_changed(&self) -> bool {
        let records = self.registry.aggregate_registrations().await;
        let hash = registrations_hash(&records);
        if self.registry.pushed_registrations_hash() == Some(hash) {
            return false;
        }
        tracing::info!(
            "Registrations changed ({} methods), syncing {}",
            records.len(),
            self.frontier
        );
        let Some(reply) = self.pull_status(&self.frontier).await else {
            tracing::warn!(
                "{} did not answer the registration sync, retrying next tick",
                self.frontier
            );
            return false;
        };
        self.registry.record_registrations_hash(hash);
        self.record_status(&self.frontier, reply).await;
        true
    }
}

/// Content hash of a registration set, independent of the order services
/// and methods were registered in.
pub fn registrations_hash(records: &[RegistrationRecord]) -> u64 {
    let mut sorted: Vec<&RegistrationRecord> = records.iter().collect();
    sorted.sort_by(|a, b| {
        (&a.service, &a.registration.method, &a.registration.role).cmp(&(
            &b.service,
            &b.registration.method,
            &b.registration.role,
        ))
    });
    // serde_json maps are key-sorted, so option order does not leak in.
    let canonical = serde_json::to_vec(&sorted).unwrap_or_default();
    fnv1a_64(&canonical)
}

/// FNV-1a 64-bit hash, stable across Rust versions and platforms.
fn fnv1a_64(data: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0100_0000_01b3;
    let mut hash = FNV_OFFSET;
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MethodRegistration;

    fn record(service: &str, method: &str, role: &str) -> RegistrationRecord {
        RegistrationRecord {
            service: service.into(),
            registration: MethodRegistration {
                method: method.into(),
                role: role.into(),
                options: Map::new(),
            },
        }
    }

    #[test]
    fn test_fnv1a_64_known_values() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
        assert_eq!(fnv1a_64(b"a"), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn test_hash_ignores_order() {
        let a = vec![record("api", "get", ""), record("worker", "ping", "admin")];
        let b = vec![record("worker", "ping", "admin"), record("api", "get", "")];
        assert_eq!(registrations_hash(&a), registrations_hash(&b));
    }

    #[test]
    fn test_hash_sees_content_changes() {
        let a = vec![record("worker", "ping", "admin")];
        let b = vec![record("worker", "ping", "user")];
        assert_ne!(registrations_hash(&a), registrations_hash(&b));
        assert_ne!(registrations_hash(&a), registrations_hash(&[]));
    }
}
