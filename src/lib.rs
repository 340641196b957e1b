//! # Director
//!
//! A lightweight controller for a fleet of long-running service containers.
//!
//! ## Features
//!
//! - **Image builds**: service images are built from a local catalog on top of a shared base image
//! - **Container lifecycle**: run, stop, restart, start and remove services by name
//! - **Port allocation**: host ports come from a fixed pool that is rebuilt from container labels after a restart
//! - **Dual-source liveness**: every service is tracked from the container runtime and from its own heartbeat, each going stale independently
//! - **Registration fan-out**: RPC method registrations of the whole fleet are pushed to the frontier service, only when they change
//!
//! ## Quick Start
//!
//! ```no_run
//! use director::{Director, Parser};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), director::Error> {
//! let parser = Parser::new();
//! let settings = parser.load_config("director.yaml")?;
//!
//! let director = Director::builder().settings(settings).build()?;
//!
//! let cancel = CancellationToken::new();
//! // Cancel from a signal handler; serve() closes the runtime on the way out.
//! director.serve(cancel).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency Model
//!
//! - The reconciliation loop runs on one task and its ticks never overlap
//! - Lifecycle commands and heartbeats run concurrently with it and with each other
//! - Every read-modify-write of a service's state happens under that service's lock

pub mod catalog;
pub mod config;
pub mod docker;
pub mod error;
pub mod orchestrator;
pub mod port;
pub mod rpc;
pub mod state;

// Re-export commonly used types
pub use catalog::{ImageCatalog, ImageCategory, ImageDef};
pub use config::{Parser, Settings};
pub use docker::{ContainerDriver, ContainerRuntime, DockerClient};
pub use error::{Error, Result};
pub use orchestrator::{Director, DirectorBuilder, Reconciler, StatusSync};
pub use port::PortAllocator;
pub use rpc::{HttpRpcClient, RpcClient};
pub use state::{ServiceRegistry, ServiceState};
