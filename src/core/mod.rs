// Core trading logic modules

pub mod types;
pub mod indicators;
pub mod market_data;
pub mod selector;
pub mod grid_engine;
pub mod reconnect;
pub mod stream_session;
pub mod orchestrator;

// Re-export commonly used types
pub use types::{Bar, Granularity, GridLevel, GridState, Instrument, InstrumentRecord, Side};
pub use grid_engine::{ActivationReport, GridEngine, GridPlan, MonitorOutcome, ResetReason};
pub use market_data::{AtrSource, BarSource};
pub use selector::{InstrumentSelector, Selection};
pub use stream_session::StreamSession;
pub use orchestrator::{Allocation, Orchestrator};
