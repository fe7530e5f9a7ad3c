// Common types used across the application

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{TradingError, TradingResult};

/// Candle granularities understood by the venue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Granularity {
    S5,
    S10,
    S15,
    S30,
    M1,
    M2,
    M4,
    M5,
    M10,
    M15,
    M30,
    H1,
    H2,
    H3,
    H4,
    H6,
    H8,
    H12,
    D,
    W,
    M,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::S5 => "S5",
            Granularity::S10 => "S10",
            Granularity::S15 => "S15",
            Granularity::S30 => "S30",
            Granularity::M1 => "M1",
            Granularity::M2 => "M2",
            Granularity::M4 => "M4",
            Granularity::M5 => "M5",
            Granularity::M10 => "M10",
            Granularity::M15 => "M15",
            Granularity::M30 => "M30",
            Granularity::H1 => "H1",
            Granularity::H2 => "H2",
            Granularity::H3 => "H3",
            Granularity::H4 => "H4",
            Granularity::H6 => "H6",
            Granularity::H8 => "H8",
            Granularity::H12 => "H12",
            Granularity::D => "D",
            Granularity::W => "W",
            Granularity::M => "M",
        }
    }

    /// Length of one bar. Monthly bars use the venue's 43800-minute average.
    pub fn duration(&self) -> chrono::Duration {
        let seconds = match self {
            Granularity::S5 => 5,
            Granularity::S10 => 10,
            Granularity::S15 => 15,
            Granularity::S30 => 30,
            Granularity::M1 => 60,
            Granularity::M2 => 120,
            Granularity::M4 => 240,
            Granularity::M5 => 300,
            Granularity::M10 => 600,
            Granularity::M15 => 900,
            Granularity::M30 => 1_800,
            Granularity::H1 => 3_600,
            Granularity::H2 => 7_200,
            Granularity::H3 => 10_800,
            Granularity::H4 => 14_400,
            Granularity::H6 => 21_600,
            Granularity::H8 => 28_800,
            Granularity::H12 => 43_200,
            Granularity::D => 86_400,
            Granularity::W => 604_800,
            Granularity::M => 2_628_000,
        };
        chrono::Duration::seconds(seconds)
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| format!("unknown granularity: {}", s))
    }
}

/// One mid-price candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub complete: bool,
}

impl ta::Open for Bar {
    fn open(&self) -> f64 {
        self.open
    }
}

impl ta::High for Bar {
    fn high(&self) -> f64 {
        self.high
    }
}

impl ta::Low for Bar {
    fn low(&self) -> f64 {
        self.low
    }
}

impl ta::Close for Bar {
    fn close(&self) -> f64 {
        self.close
    }
}

impl ta::Volume for Bar {
    fn volume(&self) -> f64 {
        self.volume as f64
    }
}

/// How to ask the venue for candles
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CandleQuery {
    /// The most recent `count` bars
    Latest { count: usize },
    /// Everything from `from` (inclusive) up to now
    Since { from: DateTime<Utc> },
    /// `count` bars ending at `to`
    Before { to: DateTime<Utc>, count: usize },
}

/// Venue-supplied instrument metadata, one row of the instruments table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentRecord {
    pub name: String,
    pub kind: Option<String>,
    pub display_name: Option<String>,
    pub pip_location: Option<i32>,
    pub display_precision: Option<u32>,
    pub trade_units_precision: Option<u32>,
    pub minimum_trade_size: Option<f64>,
    pub maximum_trailing_stop_distance: Option<f64>,
    pub minimum_trailing_stop_distance: Option<f64>,
    pub maximum_position_size: Option<f64>,
    pub maximum_order_units: Option<f64>,
    pub margin_rate: Option<f64>,
    pub guaranteed_stop_loss_order_mode: Option<String>,
}

impl InstrumentRecord {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            display_name: None,
            pip_location: None,
            display_precision: None,
            trade_units_precision: None,
            minimum_trade_size: None,
            maximum_trailing_stop_distance: None,
            minimum_trailing_stop_distance: None,
            maximum_position_size: None,
            maximum_order_units: None,
            margin_rate: None,
            guaranteed_stop_loss_order_mode: None,
        }
    }
}

/// Numeric instrument columns that may be looked up by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrumentAttribute {
    PipLocation,
    DisplayPrecision,
    TradeUnitsPrecision,
    MinimumTradeSize,
    MaximumTrailingStopDistance,
    MinimumTrailingStopDistance,
    MaximumPositionSize,
    MaximumOrderUnits,
    MarginRate,
}

impl InstrumentRecord {
    pub fn get(&self, attribute: InstrumentAttribute) -> Option<f64> {
        match attribute {
            InstrumentAttribute::PipLocation => self.pip_location.map(f64::from),
            InstrumentAttribute::DisplayPrecision => self.display_precision.map(f64::from),
            InstrumentAttribute::TradeUnitsPrecision => self.trade_units_precision.map(f64::from),
            InstrumentAttribute::MinimumTradeSize => self.minimum_trade_size,
            InstrumentAttribute::MaximumTrailingStopDistance => self.maximum_trailing_stop_distance,
            InstrumentAttribute::MinimumTrailingStopDistance => self.minimum_trailing_stop_distance,
            InstrumentAttribute::MaximumPositionSize => self.maximum_position_size,
            InstrumentAttribute::MaximumOrderUnits => self.maximum_order_units,
            InstrumentAttribute::MarginRate => self.margin_rate,
        }
    }
}

/// Pricing metadata a grid engine needs, resolved once per engine
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub symbol: String,
    pub pip_location: i32,
    pub display_precision: Option<u32>,
    pub record: InstrumentRecord,
}

impl Instrument {
    /// Fails when the venue never told us the pip location
    pub fn from_record(record: InstrumentRecord) -> TradingResult<Self> {
        let pip_location = record.pip_location.ok_or_else(|| {
            TradingError::Configuration(format!("no pip location for {}", record.name))
        })?;

        Ok(Self {
            symbol: record.name.clone(),
            pip_location,
            display_precision: record.display_precision,
            record,
        })
    }

    pub fn pip_value(&self) -> f64 {
        crate::clients::gateway::pip_value(self.pip_location)
    }

    /// Decimals for order prices: quote precision when known, else the pip position
    pub fn price_precision(&self) -> u32 {
        self.display_precision
            .unwrap_or_else(|| self.pip_location.unsigned_abs())
    }

    /// Decimals for price distances
    pub fn distance_precision(&self) -> u32 {
        self.pip_location.unsigned_abs()
    }
}

/// Quote-to-home multipliers for long and short exposure
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConversionFactors {
    pub positive: f64,
    pub negative: f64,
}

/// Fresh read of the account; never cached across computations
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub id: String,
    pub currency: String,
    pub balance: f64,
    pub margin_available: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Sign applied to unit counts sent to the venue
    pub fn sign(&self) -> i64 {
        match self {
            Side::Long => 1,
            Side::Short => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
    Rejected,
}

/// Limit order as submitted to the venue. `units` carries the direction.
#[derive(Debug, Clone, PartialEq)]
pub struct LimitOrder {
    pub instrument: String,
    pub units: i64,
    pub price: f64,
    pub price_precision: u32,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
    pub trailing_stop_distance: Option<f64>,
}

impl LimitOrder {
    pub fn side(&self) -> Side {
        if self.units >= 0 {
            Side::Long
        } else {
            Side::Short
        }
    }
}

/// Venue acknowledgement of an accepted order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: String,
    pub instrument: String,
    pub units: i64,
    pub price: f64,
}

/// An order still resting at the venue
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOrder {
    pub id: String,
    pub instrument: String,
    pub units: i64,
    pub price: Option<f64>,
    pub kind: String,
}

/// Net open units per side for one instrument
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionSet {
    pub long_units: f64,
    pub short_units: f64,
}

impl PositionSet {
    pub fn is_flat(&self) -> bool {
        self.long_units == 0.0 && self.short_units == 0.0
    }
}

/// One rung of a grid. Indices below the long/short boundary are long.
#[derive(Debug, Clone, PartialEq)]
pub struct GridLevel {
    pub index: usize,
    pub side: Side,
    pub entry: f64,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
    pub units: i64,
    pub order_id: Option<String>,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridState {
    Inactive,
    Active,
    Resetting,
}

/// What a stream session subscribes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTarget {
    Pricing { instruments: Vec<String> },
    Transactions,
}

impl std::fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamTarget::Pricing { instruments } => write!(f, "pricing[{}]", instruments.join(",")),
            StreamTarget::Transactions => f.write_str("transactions"),
        }
    }
}

/// Decoded line from a price or transaction stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Price {
        instrument: String,
        bid: Option<f64>,
        ask: Option<f64>,
        time: Option<DateTime<Utc>>,
    },
    Heartbeat {
        time: Option<DateTime<Utc>>,
    },
    Transaction {
        id: Option<String>,
        kind: String,
        payload: Value,
    },
}

impl StreamMessage {
    pub fn mid(&self) -> Option<f64> {
        match self {
            StreamMessage::Price { bid: Some(bid), ask: Some(ask), .. } => Some((bid + ask) / 2.0),
            _ => None,
        }
    }
}
