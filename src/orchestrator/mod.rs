//! The control plane: the [`Director`] facade, its builder, the heartbeat
//! protocol and the reconciliation loop.

mod builder;
mod core;
mod reconcile;
mod sync;

pub use builder::DirectorBuilder;
pub use core::{Director, RunRequest};
pub use reconcile::{Reconciler, TickReport};
pub use sync::{registrations_hash, StatusSync};
