//! Configuration parsing and types.
//!
//! - `types` - Root settings structure (`Settings`, `ContainerParams`, ...)
//! - `duration` - Human-readable duration parsing
//! - `parser` - YAML settings loading

mod duration;
mod parser;
mod types;

pub use duration::*;
pub use parser::*;
pub use types::*;
