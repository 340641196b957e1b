mod inspect;
mod serve;

pub use inspect::{run_configs, run_containers, run_images};
pub use serve::run_serve;
