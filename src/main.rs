use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use heartify::config::Settings;
use heartify::demo;
use heartify::server::{self, AppContext};

#[derive(Parser)]
#[command(name = "heartify")]
#[command(version = "0.1")]
#[command(about = "Heart disease prediction with explained charts and PDF reports", long_about = None)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load artifacts, precompute charts and serve the web application
    Serve,
    /// Print the resolved configuration
    Config,
    /// Write a seeded synthetic model and dataset split
    DemoArtifacts {
        #[arg(long, default_value = "artifacts")]
        out: PathBuf,
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "heartify=debug,tower_http=debug" } else { "heartify=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn serve_command(settings: Settings) -> Result<()> {
    let addr = settings.bind_address;
    let ctx = tokio::task::spawn_blocking(move || AppContext::from_settings(&settings)).await??;
    server::serve(Arc::new(ctx), addr).await
}

fn config_command(settings: &Settings) -> Result<()> {
    settings.print_config();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    match args.command {
        Commands::Serve => serve_command(Settings::load()?).await?,
        Commands::Config => config_command(&Settings::load()?)?,
        Commands::DemoArtifacts { out, seed } => {
            let (model, data) = demo::write_artifacts(&out, seed)?;
            println!("model_path={}", model.display());
            println!("data_path={}", data.display());
        }
    }
    Ok(())
}
