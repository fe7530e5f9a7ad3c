// FX Grid Bot - CLI entry point

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fx_grid_bot::{Config, ConfigError};

// Load command implementations from cli directory
#[path = "../cli/commands.rs"]
mod commands;

#[derive(Parser)]
#[command(name = "grid-bot")]
#[command(version)]
#[command(about = "Indicator-selected ATR grid trading on OANDA", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration and create the database
    Init,

    /// Mirror the account's instruments into the database
    Sync,

    /// Rank instruments into grid and trend candidates
    Evaluate,

    /// Run the trading loop
    Run {
        /// Stop after this many cycles
        #[arg(long)]
        cycles: Option<usize>,
    },

    /// Run the configured stream until interrupted
    Stream,

    /// Show account and database status
    Status,
}

fn init_logging(config: Option<&Config>, verbose: bool) {
    let level = config.map_or("info", |c| c.logging.level.as_str());
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if config.map_or(false, |c| c.logging.json) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(None, cli.verbose);
        commands::init_workspace(&cli.config)?;
        return Ok(());
    }

    // Setup logging from config when it loads, so config errors are still visible
    let loaded = Config::from_file(&cli.config);
    init_logging(loaded.as_ref().ok(), cli.verbose);

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            error!("❌ {}", e);
            if matches!(e, ConfigError::FileRead(_)) {
                error!("💡 Run `grid-bot init` to create {}", cli.config);
            }
            return Err(e.into());
        }
    };

    info!("🚀 FX Grid Bot v{}", env!("CARGO_PKG_VERSION"));
    info!("📁 Config: {} ({:?})", cli.config, config.venue.environment);

    match cli.command {
        Commands::Init => unreachable!("handled before config load"),
        Commands::Sync => commands::sync(&config).await?,
        Commands::Evaluate => commands::evaluate(&config).await?,
        Commands::Run { cycles } => commands::run(&config, cycles).await?,
        Commands::Stream => commands::stream(&config).await?,
        Commands::Status => commands::status(&config).await?,
    }

    Ok(())
}
