use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "director")]
#[command(about = "Director - build, run and track a fleet of service containers")]
pub struct Cli {
    /// Config file path (defaults to director.yaml, searched upward)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the controller until interrupted
    Serve,
    /// List buildable images
    Images {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List persisted service configurations
    Configs {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List containers owned by the controller
    Containers {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
