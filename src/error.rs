// Allow unused_assignments at module level because thiserror's generated code
// for struct variants triggers false positive warnings on the named fields.
#![allow(unused_assignments)]

use crate::docker::DockerError;
use miette::Diagnostic;
use std::io;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum Error {
    #[error("Service not found: {0}")]
    #[diagnostic(
        code(director::service::not_found),
        help("List known services with `director configs` or check the images directory")
    )]
    NotFound(String),

    #[error("Container runtime unavailable: {0}")]
    #[diagnostic(
        code(director::runtime::unavailable),
        help("Check that Docker is running with `docker ps`")
    )]
    RuntimeUnavailable(String),

    #[error("Container runtime rejected request: {0}")]
    #[diagnostic(code(director::runtime::rejected))]
    RuntimeRejected(String),

    #[error("Image build failed for '{image}': {reason}")]
    #[diagnostic(
        code(director::image::build_failed),
        help("Run `docker build` against the image directory to see the full output")
    )]
    BuildFailed { image: String, reason: String },

    #[error("Port pool exhausted ({capacity} ports)")]
    #[diagnostic(
        code(director::port::exhausted),
        help("Widen `port_range` in director.yaml or remove unused services")
    )]
    ExhaustedPool { capacity: usize },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config store error: {0}")]
    #[diagnostic(code(director::store::error))]
    Store(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Status code surfaced at the RPC boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            _ => 500,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<DockerError> for Error {
    fn from(err: DockerError) -> Self {
        match err {
            DockerError::ContainerNotFound { container } => Error::NotFound(container),
            DockerError::CommandFailed { .. } => Error::RuntimeRejected(err.to_string()),
            DockerError::Timeout { .. }
            | DockerError::ExecFailed { .. }
            | DockerError::DaemonUnavailable
            | DockerError::Malformed { .. } => Error::RuntimeUnavailable(err.to_string()),
        }
    }
}
