// Common test utilities and helpers
#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures_util::stream::{self, StreamExt};
use tempfile::TempDir;

use fx_grid_bot::clients::{MessageStream, StreamConnector};
use fx_grid_bot::core::indicators::choppiness_series;
use fx_grid_bot::core::types::{
    AccountSnapshot, CandleQuery, ConversionFactors, Instrument, LimitOrder, OrderAck,
    PendingOrder, PositionSet, StreamMessage, StreamTarget,
};
use fx_grid_bot::{
    AtrSource, Bar, BarSource, Config, Database, ExecutionGateway, Granularity, InstrumentRecord,
    InstrumentStore, TradingError, TradingResult,
};

/// Create a temporary directory for test databases
pub fn create_temp_db_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let db_path = temp_dir.path().join("test.db");
    (temp_dir, db_path)
}

/// In-memory database with migrations applied
pub fn migrated_db() -> Database {
    let db = Database::new_in_memory().expect("Failed to create database");
    db.run_migrations().expect("Failed to run migrations");
    db
}

/// Config tuned for tests: no streaming, short backoff
pub fn create_test_config() -> Config {
    let mut config = Config::default();
    config.stream.kind = fx_grid_bot::StreamKind::Disabled;
    config.stream.backoff_secs = 1;
    config.stream.max_backoff_secs = 1;
    config
}

/// A five-decimal major with pip location -4
pub fn fx_record(name: &str) -> InstrumentRecord {
    let mut record = InstrumentRecord::named(name);
    record.kind = Some("CURRENCY".to_string());
    record.display_name = Some(name.replace('_', "/"));
    record.pip_location = Some(-4);
    record.display_precision = Some(5);
    record.trade_units_precision = Some(0);
    record.minimum_trade_size = Some(1.0);
    record.maximum_trailing_stop_distance = Some(1.0);
    record.minimum_trailing_stop_distance = Some(0.0005);
    record.maximum_order_units = Some(100_000_000.0);
    record.margin_rate = Some(0.0333);
    record
}

pub fn fx_instrument(name: &str) -> Instrument {
    Instrument::from_record(fx_record(name)).expect("record has a pip location")
}

pub fn bar_time(index: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::hours(index as i64)
}

pub fn bar(index: usize, close: f64, half_range: f64) -> Bar {
    Bar {
        time: bar_time(index),
        open: close,
        high: close + half_range,
        low: close - half_range,
        close,
        volume: 100,
        complete: true,
    }
}

/// Steady one-way move: low choppiness
pub fn trending_bars(count: usize, start: f64, step: f64) -> Vec<Bar> {
    (0..count).map(|i| bar(i, start + step * i as f64, 0.0002)).collect()
}

/// Alternating closes around `center`: high choppiness
pub fn zigzag_bars(count: usize, center: f64, amplitude: f64) -> Vec<Bar> {
    (0..count)
        .map(|i| {
            let close = if i % 2 == 0 { center + amplitude } else { center - amplitude };
            bar(i, close, 0.0002)
        })
        .collect()
}

/// Random walk, for tests that only need plausible bars
pub fn random_walk_bars(count: usize, start: f64, volatility: f64) -> Vec<Bar> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let mut close = start;

    (0..count)
        .map(|i| {
            close *= 1.0 + rng.gen_range(-volatility..volatility);
            bar(i, close, start * volatility)
        })
        .collect()
}

/// A downtrend that turns into a range, cut off on the first bar where
/// choppiness crosses above `threshold`, keeping the last `count` bars.
pub fn bars_entering_range(count: usize, chop_length: usize, threshold: f64) -> Vec<Bar> {
    let mut bars = trending_bars(40, 1.2000, -0.0010);
    let floor = bars.last().map(|b| b.close).unwrap_or(1.16);
    bars.extend(
        zigzag_bars(40, floor, 0.0008)
            .into_iter()
            .enumerate()
            .map(|(i, b)| Bar { time: bar_time(40 + i), ..b }),
    );

    let series = choppiness_series(&bars, chop_length).expect("series");
    let crossing = (1..series.len())
        .find(|&i| series[i - 1] <= threshold && series[i] > threshold)
        .expect("choppiness crosses into range");
    let end = crossing + chop_length - 1;
    bars[end + 1 - count..=end].to_vec()
}

/// Venue state shared by the mock gateway
#[derive(Debug)]
pub struct VenueState {
    pub margin_available: f64,
    pub balance: f64,
    pub prices: HashMap<String, f64>,
    pub default_price: f64,
    pub factors: ConversionFactors,
    pub instruments: Vec<InstrumentRecord>,
    pub candles: HashMap<String, Vec<Bar>>,
    pub pending: Vec<PendingOrder>,
    pub positions: HashMap<String, PositionSet>,
    pub placed: Vec<LimitOrder>,
    pub cancelled: Vec<String>,
    pub closed: Vec<String>,
    pub candle_queries: Vec<(String, CandleQuery)>,
    /// Reject every order once this many have been accepted
    pub reject_after: Option<usize>,
    pub reject_message: String,
    /// Order ids whose cancel fails with a venue error
    pub uncancellable: HashSet<String>,
    next_id: u64,
}

/// In-memory stand-in for the venue
pub struct MockGateway {
    state: Mutex<VenueState>,
}

impl MockGateway {
    pub fn new(price: f64) -> Self {
        Self {
            state: Mutex::new(VenueState {
                margin_available: 10_000.0,
                balance: 10_000.0,
                prices: HashMap::new(),
                default_price: price,
                factors: ConversionFactors { positive: 1.0, negative: 1.0 },
                instruments: Vec::new(),
                candles: HashMap::new(),
                pending: Vec::new(),
                positions: HashMap::new(),
                placed: Vec::new(),
                cancelled: Vec::new(),
                closed: Vec::new(),
                candle_queries: Vec::new(),
                reject_after: None,
                reject_message: "INSUFFICIENT_MARGIN".to_string(),
                uncancellable: HashSet::new(),
                next_id: 100,
            }),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, VenueState> {
        self.state.lock().expect("mock state poisoned")
    }

    /// Seed a resting order as if placed by an earlier run
    pub fn seed_pending(&self, instrument: &str, id: &str, units: i64, price: f64) {
        self.state().pending.push(PendingOrder {
            id: id.to_string(),
            instrument: instrument.to_string(),
            units,
            price: Some(price),
            kind: "LIMIT".to_string(),
        });
    }

    pub fn pending_ids(&self, instrument: &str) -> Vec<String> {
        self.state()
            .pending
            .iter()
            .filter(|o| o.instrument == instrument)
            .map(|o| o.id.clone())
            .collect()
    }

    pub fn placed_orders(&self) -> Vec<LimitOrder> {
        self.state().placed.clone()
    }

    /// Fill a pending order into a position
    pub fn fill(&self, order_id: &str) {
        let mut state = self.state();
        if let Some(pos) = state.pending.iter().position(|o| o.id == order_id) {
            let order = state.pending.remove(pos);
            let entry = state.positions.entry(order.instrument).or_default();
            if order.units > 0 {
                entry.long_units += order.units as f64;
            } else {
                entry.short_units += order.units as f64;
            }
        }
    }
}

#[async_trait]
impl ExecutionGateway for MockGateway {
    async fn account_snapshot(&self) -> TradingResult<AccountSnapshot> {
        let state = self.state();
        Ok(AccountSnapshot {
            id: "101-004-0000000-001".to_string(),
            currency: "USD".to_string(),
            balance: state.balance,
            margin_available: state.margin_available,
        })
    }

    async fn account_instruments(&self) -> TradingResult<Vec<InstrumentRecord>> {
        Ok(self.state().instruments.clone())
    }

    async fn conversion_factors(&self, _instrument: &str) -> TradingResult<ConversionFactors> {
        Ok(self.state().factors)
    }

    async fn candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        query: CandleQuery,
    ) -> TradingResult<Vec<Bar>> {
        let mut state = self.state();
        state.candle_queries.push((instrument.to_string(), query));

        if granularity == Granularity::S5 {
            let price = state.prices.get(instrument).copied().unwrap_or(state.default_price);
            return Ok(vec![bar(0, price, 0.0)]);
        }

        let all = state.candles.get(instrument).cloned().unwrap_or_default();
        Ok(match query {
            CandleQuery::Latest { count } => all[all.len().saturating_sub(count)..].to_vec(),
            CandleQuery::Since { from } => all.into_iter().filter(|b| b.time >= from).collect(),
            CandleQuery::Before { to, count } => {
                let older: Vec<Bar> = all.into_iter().filter(|b| b.time < to).collect();
                older[older.len().saturating_sub(count)..].to_vec()
            }
        })
    }

    async fn place_limit_order(&self, order: &LimitOrder) -> TradingResult<OrderAck> {
        let mut state = self.state();
        if let Some(limit) = state.reject_after {
            if state.placed.len() >= limit {
                return Err(TradingError::rejected(state.reject_message.clone()));
            }
        }

        state.next_id += 1;
        let order_id = state.next_id.to_string();
        state.placed.push(order.clone());
        state.pending.push(PendingOrder {
            id: order_id.clone(),
            instrument: order.instrument.clone(),
            units: order.units,
            price: Some(order.price),
            kind: "LIMIT".to_string(),
        });

        Ok(OrderAck {
            order_id,
            instrument: order.instrument.clone(),
            units: order.units,
            price: order.price,
        })
    }

    async fn pending_orders(&self, instrument: &str) -> TradingResult<Vec<PendingOrder>> {
        Ok(self
            .state()
            .pending
            .iter()
            .filter(|o| o.instrument == instrument)
            .cloned()
            .collect())
    }

    async fn cancel_order(&self, order_id: &str) -> TradingResult<()> {
        let mut state = self.state();
        if state.uncancellable.contains(order_id) {
            return Err(TradingError::ApiResponse(format!("503: cancel of {} failed", order_id)));
        }
        let before = state.pending.len();
        state.pending.retain(|o| o.id != order_id);
        if state.pending.len() == before {
            return Err(TradingError::ApiResponse(format!("404: order {} not found", order_id)));
        }
        state.cancelled.push(order_id.to_string());
        Ok(())
    }

    async fn open_positions(&self, instrument: &str) -> TradingResult<PositionSet> {
        Ok(self.state().positions.get(instrument).copied().unwrap_or_default())
    }

    async fn close_position(&self, instrument: &str, _positions: PositionSet) -> TradingResult<()> {
        let mut state = self.state();
        state.positions.remove(instrument);
        state.closed.push(instrument.to_string());
        Ok(())
    }
}

/// ATR source returning a fixed value
pub struct FixedAtr(pub f64);

#[async_trait]
impl AtrSource for FixedAtr {
    async fn recent_atr(&self, _: &str, _: Granularity, _: usize, _: usize) -> TradingResult<f64> {
        Ok(self.0)
    }
}

/// Bar source backed by fixed series; unknown instruments fail
#[derive(Default)]
pub struct StaticBars {
    series: HashMap<String, Vec<Bar>>,
}

impl StaticBars {
    pub fn with(mut self, instrument: &str, bars: Vec<Bar>) -> Self {
        self.series.insert(instrument.to_string(), bars);
        self
    }
}

#[async_trait]
impl BarSource for StaticBars {
    async fn fetch_bars(&self, instrument: &str, _: Granularity, count: usize) -> TradingResult<Vec<Bar>> {
        let bars = self
            .series
            .get(instrument)
            .ok_or_else(|| TradingError::MarketData(format!("no candles for {}", instrument)))?;
        Ok(bars[bars.len().saturating_sub(count)..].to_vec())
    }
}

/// Store seeded with the given records
pub fn seeded_store(records: &[InstrumentRecord]) -> InstrumentStore {
    let store = InstrumentStore::new(migrated_db());
    store.upsert_instruments(records).expect("seed instruments");
    store
}

pub fn price(instrument: &str, bid: f64, ask: f64) -> StreamMessage {
    StreamMessage::Price {
        instrument: instrument.to_string(),
        bid: Some(bid),
        ask: Some(ask),
        time: None,
    }
}

/// What one `open` call does
pub enum Script {
    Fail(String),
    /// Deliver these messages, then stay open without sending more
    Deliver(Vec<StreamMessage>),
    /// Deliver these messages, then end the stream
    DeliverAndClose(Vec<StreamMessage>),
    /// Send a price every `Duration` forever
    Ticking(Duration),
}

/// Connector that plays one script entry per `open`; the last entry repeats
pub struct MockConnector {
    scripts: Mutex<VecDeque<Script>>,
    opens: AtomicUsize,
}

impl MockConnector {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            opens: AtomicUsize::new(0),
        })
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

fn replay(script: &Script) -> Script {
    match script {
        Script::Fail(msg) => Script::Fail(msg.clone()),
        Script::Deliver(msgs) => Script::Deliver(msgs.clone()),
        Script::DeliverAndClose(msgs) => Script::DeliverAndClose(msgs.clone()),
        Script::Ticking(every) => Script::Ticking(*every),
    }
}

#[async_trait]
impl StreamConnector for MockConnector {
    async fn open(&self, _target: &StreamTarget) -> TradingResult<MessageStream> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let script = {
            let mut scripts = self.scripts.lock().expect("scripts poisoned");
            if scripts.len() > 1 {
                scripts.pop_front()
            } else {
                scripts.front().map(replay)
            }
        };

        match script {
            None => Ok(stream::pending().boxed()),
            Some(Script::Fail(msg)) => Err(TradingError::Stream(msg)),
            Some(Script::Deliver(msgs)) => {
                Ok(stream::iter(msgs.into_iter().map(Ok)).chain(stream::pending()).boxed())
            }
            Some(Script::DeliverAndClose(msgs)) => Ok(stream::iter(msgs.into_iter().map(Ok)).boxed()),
            Some(Script::Ticking(every)) => Ok(stream::unfold(0u64, move |n| async move {
                tokio::time::sleep(every).await;
                Some((Ok(price("EUR_USD", 1.1 + n as f64 * 1e-5, 1.1002)), n + 1))
            })
            .boxed()),
        }
    }
}
