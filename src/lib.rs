// FX Grid Bot Library
//
// Indicator-driven instrument selection and ATR-spaced limit-order grids on OANDA,
// with a self-healing price/transaction stream

pub mod core;
pub mod clients;
pub mod config;
pub mod db;          // SQLite instrument and bar cache
pub mod error;       // Unified error handling

// Re-export core trading types
pub use crate::core::{
    ActivationReport, Allocation, Bar, Granularity, GridEngine, GridLevel, GridPlan, GridState,
    Instrument, InstrumentRecord, InstrumentSelector, MonitorOutcome, Orchestrator, ResetReason,
    Selection, Side, StreamSession,
};
pub use crate::core::{AtrSource, BarSource};

// Re-export error types
pub use error::{RejectReason, TradingError, TradingResult};

// Re-export client types
pub use clients::{ExecutionGateway, OandaClient, StreamConnector};

// Re-export configuration
pub use config::{Config, ConfigError, Environment, GridConfig, LoggingConfig, StreamKind};

// Re-export database types
pub use db::{BarCache, BarService, Database, InstrumentStore};
