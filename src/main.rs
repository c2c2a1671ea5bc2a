pub mod colour;
pub mod config;
pub mod dashboard;
pub mod data;
pub mod groups;
pub mod mapsync;
pub mod plot;
pub mod prepare;
pub mod render;
pub mod scale;
pub mod scoring;
pub mod server;
pub mod svg;
pub mod swarm;
pub mod types;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the data bundle from the CSV master tables
    Prepare {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Write the plot, coloured boundaries, legend and map snapshot for a selection
    Render {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Support variables, comma separated
        #[arg(long, value_delimiter = ',')]
        supports: Vec<String>,
        /// Need variables, comma separated
        #[arg(long, value_delimiter = ',')]
        needs: Vec<String>,
    },
    /// Serve the dashboard API and static front end
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Prepare { config } => {
            info!("Preparing bundle with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(&config)?;
            prepare::run(&app_config)?;
        }
        Commands::Render { config, supports, needs } => {
            info!("Rendering with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(&config)?;
            // no flags keeps the page-load selection
            let selection = if supports.is_empty() && needs.is_empty() {
                None
            } else {
                Some((supports, needs))
            };
            tokio::task::spawn_blocking(move || render::run(&app_config, selection)).await??;
            info!("Render complete!");
        }
        Commands::Serve { config } => {
            info!("Serving dashboard with config: {:?}", config);
            let app_config = config::AppConfig::load_from_file(&config)?;
            server::start_server(app_config).await?;
        }
    }

    Ok(())
}
