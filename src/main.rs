mod cli;
mod commands;
mod output;

use clap::Parser;
use cli::{Cli, Commands};
use director::{Error as DirectorError, Parser as ConfigParser, Settings};
use output::{CliOutput, UserOutput};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        match e.downcast::<DirectorError>() {
            Ok(director_error) => eprintln!("{:?}", miette::Report::new(director_error)),
            Err(e) => eprintln!("Error: {:#}", e),
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let out = CliOutput;
    let settings = load_settings(&cli, &out)?;

    match cli.command {
        Commands::Serve => commands::run_serve(settings, &out).await,
        Commands::Images { json } => commands::run_images(&settings, json, &out),
        Commands::Configs { json } => commands::run_configs(&settings, json, &out),
        Commands::Containers { json } => commands::run_containers(settings, json, &out).await,
    }
}

fn load_settings(cli: &Cli, out: &dyn UserOutput) -> anyhow::Result<Settings> {
    let parser = ConfigParser::new();
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => match parser.find_config_file() {
            Ok(path) => path,
            Err(_) => {
                out.warning("No director.yaml found, using defaults");
                return Ok(Settings::default());
            }
        },
    };
    tracing::debug!("Loading settings from {}", path.display());
    Ok(parser.load_config(&path)?)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}
