//! Top-level control loop
//!
//! The [`Orchestrator`] owns every grid engine and the single stream session.
//! Each call to [`Orchestrator::run_cycle`] monitors the live grids, then runs
//! one selection and allocation pass; the caller decides the cadence.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::clients::{ExecutionGateway, StreamConnector};
use crate::config::{Config, StreamKind};
use crate::core::grid_engine::{GridEngine, MonitorOutcome};
use crate::core::market_data::{AtrSource, BarSource};
use crate::core::reconnect::ReconnectPolicy;
use crate::core::selector::{InstrumentSelector, Selection};
use crate::core::stream_session::StreamSession;
use crate::core::types::{GridState, StreamMessage, StreamTarget};
use crate::db::InstrumentStore;
use crate::error::{TradingError, TradingResult};

/// Per-strategy fund split taken from one margin read
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Allocation {
    pub margin_available: f64,
    pub grid_pool: f64,
    pub trend_pool: f64,
    pub per_grid: f64,
    pub per_trend: f64,
}

impl Allocation {
    pub fn compute(margin_available: f64, config: &crate::config::AllocationConfig) -> Self {
        let grid_pool = margin_available * config.grid_amount;
        let trend_pool = margin_available * config.trend_amount;
        Self {
            margin_available,
            grid_pool,
            trend_pool,
            per_grid: grid_pool / config.max_grids.max(1) as f64,
            per_trend: trend_pool / config.max_trenders.max(1) as f64,
        }
    }
}

/// What one selection pass did
#[derive(Debug, Clone, Default)]
pub struct SelectionReport {
    pub selection: Selection,
    pub activated: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct Orchestrator {
    config: Config,
    gateway: Arc<dyn ExecutionGateway>,
    bars: Arc<dyn BarSource>,
    atr: Arc<dyn AtrSource>,
    store: InstrumentStore,
    selector: InstrumentSelector,
    engines: Vec<GridEngine>,
    /// Fund split fixed by the first selection pass
    allocation: Option<Allocation>,
    connector: Option<Arc<dyn StreamConnector>>,
    stream: Option<StreamSession>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        gateway: Arc<dyn ExecutionGateway>,
        bars: Arc<dyn BarSource>,
        atr: Arc<dyn AtrSource>,
        store: InstrumentStore,
    ) -> Self {
        let selector = InstrumentSelector::new(&config.selection);
        Self {
            config,
            gateway,
            bars,
            atr,
            store,
            selector,
            engines: Vec::new(),
            allocation: None,
            connector: None,
            stream: None,
        }
    }

    pub fn with_stream_connector(mut self, connector: Arc<dyn StreamConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn engines(&self) -> &[GridEngine] {
        &self.engines
    }

    pub fn engine(&self, symbol: &str) -> Option<&GridEngine> {
        self.engines.iter().find(|e| e.symbol() == symbol)
    }

    /// The split every engine was sized from, once a selection pass has run
    pub fn allocation(&self) -> Option<Allocation> {
        self.allocation
    }

    /// Mirror the account's tradable instruments into the metadata store
    pub async fn sync_instruments(&self) -> TradingResult<usize> {
        let records = self.gateway.account_instruments().await?;
        let count = self.store.upsert_instruments(&records)?;
        info!("🔄 Synced {} instruments", count);
        Ok(count)
    }

    /// Split margin available into grid and trend pools
    pub async fn allocate_funds(&self) -> TradingResult<Allocation> {
        let margin = self.gateway.margin_available().await?;
        let allocation = Allocation::compute(margin, &self.config.allocation);
        info!(
            "💰 Margin {:.2}: grid pool {:.2} ({:.2} each), trend pool {:.2} ({:.2} each)",
            allocation.margin_available,
            allocation.grid_pool,
            allocation.per_grid,
            allocation.trend_pool,
            allocation.per_trend
        );
        Ok(allocation)
    }

    /// Rank the whole universe. Failures on one instrument are logged and skipped.
    pub async fn evaluate_instruments(&self) -> TradingResult<Selection> {
        let universe = self.store.list_symbols()?;
        let sel = &self.config.selection;
        let mut readings = Vec::with_capacity(universe.len());

        for symbol in &universe {
            let reading = match self.bars.fetch_bars(symbol, sel.granularity, sel.count).await {
                Ok(bars) => self.selector.read(symbol, &bars),
                Err(e) => Err(e),
            };
            match reading {
                Ok(reading) => readings.push(reading),
                Err(e) => warn!("⚠️  Skipping {} this cycle: {}", symbol, e),
            }
        }

        let selection = self.selector.classify(readings);
        info!(
            "🔍 Evaluated {} instruments: grid {:?}, trend {:?}",
            universe.len(),
            selection.grid_instruments(),
            selection.trend_instruments()
        );
        Ok(selection)
    }

    /// Start grids on the best grid-viable instruments until `max_grids` are live.
    ///
    /// Margin is read once, on the first pass. Later passes size new engines
    /// from the same split, so live allocations never sum past its grid pool.
    pub async fn select_and_run(&mut self) -> TradingResult<SelectionReport> {
        let selection = self.evaluate_instruments().await?;
        let allocation = match self.allocation {
            Some(allocation) => allocation,
            None => {
                let allocation = self.allocate_funds().await?;
                self.allocation = Some(allocation);
                allocation
            }
        };
        let max_grids = self.config.allocation.max_grids;

        if !selection.trend.is_empty() {
            info!(
                "📈 Trend candidates {:?} ({:.2} per trender, {} slots); no trend execution configured",
                selection.trend_instruments(),
                allocation.per_trend,
                self.config.allocation.max_trenders
            );
        }

        let mut report = SelectionReport {
            selection: selection.clone(),
            ..Default::default()
        };
        let mut candidates = selection.grid_instruments();
        candidates.retain(|symbol| self.engine(symbol).is_none());

        for symbol in candidates {
            if self.engines.len() >= max_grids {
                break;
            }

            let instrument = match self.store.instrument(&symbol) {
                Ok(instrument) => instrument,
                Err(e) => {
                    warn!("⚠️  Cannot trade {}: {}", symbol, e);
                    report.failed.push((symbol, e.to_string()));
                    continue;
                }
            };

            let mut engine = GridEngine::new(
                instrument,
                allocation.per_grid,
                self.config.grid.clone(),
                Arc::clone(&self.gateway),
                Arc::clone(&self.atr),
            );

            match engine.activate().await {
                Ok(_) => report.activated.push(symbol.clone()),
                Err(e) => {
                    error!("❌ Activation failed for {}: {}", symbol, e);
                    report.failed.push((symbol.clone(), e.to_string()));
                }
            }

            if engine.state() == GridState::Active {
                self.engines.push(engine);
            }
        }

        Ok(report)
    }

    /// Whether the instrument still looks range-bound enough to keep a grid
    async fn market_favorable(&self, symbol: &str) -> bool {
        let sel = &self.config.selection;
        let bars = match self.bars.fetch_bars(symbol, sel.granularity, sel.count).await {
            Ok(bars) => bars,
            Err(e) => {
                warn!("⚠️  No bars to judge {}: {}; assuming favorable", symbol, e);
                return true;
            }
        };

        match self.selector.read(symbol, &bars) {
            Ok(reading) => reading.chop.last >= sel.chop_low,
            Err(e) => {
                warn!("⚠️  Indicators unavailable for {}: {}; assuming favorable", symbol, e);
                true
            }
        }
    }

    /// Monitor every live grid. Errors stay with their engine.
    pub async fn monitor_grids(&mut self) -> Vec<(String, TradingResult<MonitorOutcome>)> {
        let mut outcomes = Vec::with_capacity(self.engines.len());
        let mut engines = std::mem::take(&mut self.engines);

        for engine in &mut engines {
            let symbol = engine.symbol().to_string();
            let favorable = self.market_favorable(&symbol).await;
            let outcome = engine.monitor(favorable).await;
            if let Err(e) = &outcome {
                warn!("⚠️  Monitoring {} failed: {}", symbol, e);
            }
            outcomes.push((symbol, outcome));
        }

        self.engines = engines;
        outcomes
    }

    /// One full pass: monitor live grids, then select and activate new ones
    pub async fn run_cycle(&mut self) -> TradingResult<SelectionReport> {
        self.monitor_grids().await;
        self.select_and_run().await
    }

    fn stream_target(&self) -> Option<StreamTarget> {
        match self.config.stream.kind {
            StreamKind::Pricing => Some(StreamTarget::Pricing {
                instruments: self.config.stream.instruments.clone(),
            }),
            StreamKind::Transactions => Some(StreamTarget::Transactions),
            StreamKind::Disabled => None,
        }
    }

    /// Start the configured stream. Returns false when streaming is disabled.
    pub fn start_stream<F>(&mut self, on_message: F) -> TradingResult<bool>
    where
        F: FnMut(StreamMessage) + Send + 'static,
    {
        let Some(target) = self.stream_target() else {
            info!("Streaming disabled");
            return Ok(false);
        };
        if self.stream.as_ref().map_or(false, |s| s.is_running()) {
            return Err(TradingError::Stream("stream already running".to_string()));
        }
        let connector = self
            .connector
            .clone()
            .ok_or_else(|| TradingError::Configuration("no stream connector configured".to_string()))?;

        let mut session = StreamSession::new(connector, target, ReconnectPolicy::from_config(&self.config.stream));
        session.start(on_message)?;
        self.stream = Some(session);
        Ok(true)
    }

    pub fn stream_running(&self) -> bool {
        self.stream.as_ref().map_or(false, |s| s.is_running())
    }

    pub async fn stop_stream(&mut self) {
        if let Some(mut session) = self.stream.take() {
            session.stop().await;
        }
    }
}
