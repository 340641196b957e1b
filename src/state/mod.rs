//! In-memory service state.
//!
//! Each service is tracked by a [`ServiceState`] fed by two independently
//! stale sources: the container runtime ("dock status") and the service's
//! own heartbeat ("app status"). [`ServiceRegistry`] owns all of them and
//! mediates every lifecycle operation; [`ConfigStore`] persists the part of
//! a service's state that must survive controller restarts.

mod registry;
mod store;
mod types;

pub use registry::{ServiceParams, ServiceRegistry, StateEntry};
pub use store::{ConfigStore, JsonConfigStore, MemoryConfigStore};
pub use types::*;
