// Command implementations for the grid-bot binary

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info, warn};

use fx_grid_bot::clients::{ExecutionGateway, OandaClient};
use fx_grid_bot::core::selector::InstrumentReading;
use fx_grid_bot::core::stream_session::log_message;
use fx_grid_bot::{
    BarCache, BarService, Config, Database, InstrumentStore, Orchestrator, TradingError,
};

type CommandResult = Result<(), Box<dyn std::error::Error>>;

const DEFAULT_CONFIG: &str = include_str!("../../config.toml.example");

/// Everything a live command needs, wired once
struct App {
    config: Config,
    db: Database,
    store: InstrumentStore,
    client: Arc<OandaClient>,
}

impl App {
    async fn connect(config: &Config) -> Result<Self, Box<dyn std::error::Error>> {
        let db = Database::new(&config.database.path)?;
        db.run_migrations()?;
        let store = InstrumentStore::new(db.clone());

        let client = Arc::new(OandaClient::connect(&config.venue).await?);
        info!("🔌 Connected to account {}", client.account_id());

        Ok(Self {
            config: config.clone(),
            db,
            store,
            client,
        })
    }

    fn orchestrator(&self) -> Orchestrator {
        let gateway: Arc<dyn ExecutionGateway> = self.client.clone();
        let bars = Arc::new(BarService::new(BarCache::new(self.db.clone()), Arc::clone(&gateway)));

        Orchestrator::new(
            self.config.clone(),
            gateway,
            bars.clone(),
            bars,
            self.store.clone(),
        )
        .with_stream_connector(self.client.clone())
    }
}

/// Write a starter config and create the database
pub fn init_workspace(config_path: &str) -> CommandResult {
    info!("🔧 Initializing workspace");

    let path = Path::new(config_path);
    if path.exists() {
        info!("📁 Keeping existing config: {}", config_path);
    } else {
        std::fs::write(path, DEFAULT_CONFIG)?;
        info!("✅ Wrote config: {}", config_path);
    }

    let config = Config::from_file(path)?;
    let db = Database::new(&config.database.path)?;
    db.run_migrations()?;
    info!("✅ Database ready: {}", config.database.path);

    println!();
    println!("Next steps:");
    println!("  1. Put your API token in {} (or a .env file)", config.venue.token_env());
    println!("  2. grid-bot sync");
    println!("  3. grid-bot evaluate");
    println!("  4. grid-bot run");

    Ok(())
}

pub async fn sync(config: &Config) -> CommandResult {
    let app = App::connect(config).await?;
    let count = app.orchestrator().sync_instruments().await?;
    println!("Synced {} instruments into {}", count, config.database.path);
    Ok(())
}

fn print_readings(title: &str, readings: &[InstrumentReading]) {
    println!("{} ({}):", title, readings.len());
    if readings.is_empty() {
        println!("  (none)");
    }
    for reading in readings {
        println!(
            "  {:<10} chop {:>6.2} -> {:>6.2}   %B {:>6.3}",
            reading.instrument, reading.chop.prior, reading.chop.last, reading.percent_b
        );
    }
}

pub async fn evaluate(config: &Config) -> CommandResult {
    let app = App::connect(config).await?;
    let orchestrator = app.orchestrator();

    if app.store.count()? == 0 {
        info!("📭 Instrument store empty, syncing first");
        orchestrator.sync_instruments().await?;
    }

    let selection = orchestrator.evaluate_instruments().await?;
    print_readings("Grid candidates", &selection.grid);
    print_readings("Trend candidates", &selection.trend);
    println!("Skipped: {}", selection.skipped.len());
    Ok(())
}

pub async fn run(config: &Config, cycles: Option<usize>) -> CommandResult {
    let app = App::connect(config).await?;
    let mut orchestrator = app.orchestrator();

    orchestrator.sync_instruments().await?;
    if orchestrator.start_stream(log_message)? {
        info!("📡 Stream started");
    }

    info!(
        "🤖 Trading loop every {:?}{}",
        config.grid.poll_interval(),
        cycles.map(|n| format!(" for {} cycles", n)).unwrap_or_default()
    );
    info!("Press Ctrl+C to stop");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(config.grid.poll_interval());
    let mut completed = 0usize;
    let mut outcome: CommandResult = Ok(());

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("🛑 Shutdown requested");
                break;
            }
            _ = ticker.tick() => {
                match orchestrator.run_cycle().await {
                    Ok(report) => {
                        if !report.activated.is_empty() {
                            info!("✅ Activated grids: {:?}", report.activated);
                        }
                        for (symbol, reason) in &report.failed {
                            warn!("⚠️  {} not started: {}", symbol, reason);
                        }
                    }
                    Err(e @ (TradingError::ApiAuthentication(_) | TradingError::Configuration(_))) => {
                        error!("❌ Cycle failed: {}", e);
                        outcome = Err(e.into());
                        break;
                    }
                    Err(e) => warn!("⚠️  Cycle failed ({}), will retry: {}", e.category(), e),
                }

                completed += 1;
                if cycles.map_or(false, |n| completed >= n) {
                    info!("🏁 Completed {} cycles", completed);
                    break;
                }
            }
        }
    }

    orchestrator.stop_stream().await;
    info!(
        "👋 Stopped with {} grid(s) live: {:?}",
        orchestrator.engines().len(),
        orchestrator.engines().iter().map(|e| e.symbol()).collect::<Vec<_>>()
    );
    outcome
}

pub async fn stream(config: &Config) -> CommandResult {
    let app = App::connect(config).await?;
    let mut orchestrator = app.orchestrator();

    if !orchestrator.start_stream(log_message)? {
        println!("Streaming is disabled ([stream] kind = \"none\")");
        return Ok(());
    }

    info!("📡 Streaming; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    orchestrator.stop_stream().await;
    info!("👋 Stream stopped");
    Ok(())
}

pub async fn status(config: &Config) -> CommandResult {
    let app = App::connect(config).await?;

    let account = app.client.account_snapshot().await?;
    println!("Account:          {}", account.id);
    println!("Currency:         {}", account.currency);
    println!("Balance:          {:.2}", account.balance);
    println!("Margin available: {:.2}", account.margin_available);

    let healthy = app.db.health_check()?;
    println!("Database:         {} ({})", config.database.path, if healthy { "ok" } else { "unhealthy" });
    println!("Instruments:      {}", app.store.count()?);

    for instrument in &config.stream.instruments {
        let pending = app.client.pending_orders(instrument).await?;
        let positions = app.client.open_positions(instrument).await?;
        println!(
            "{:<17} {} pending, long {} / short {}",
            format!("{}:", instrument),
            pending.len(),
            positions.long_units,
            positions.short_units
        );
    }
    Ok(())
}
