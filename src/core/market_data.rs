// Market data seams used by the selector and the grid engines

use async_trait::async_trait;

use crate::core::types::{Bar, Granularity};
use crate::error::TradingResult;

/// Bar windows for an (instrument, granularity) pair, oldest first
#[async_trait]
pub trait BarSource: Send + Sync {
    async fn fetch_bars(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
    ) -> TradingResult<Vec<Bar>>;
}

/// Most recent average true range for an instrument
#[async_trait]
pub trait AtrSource: Send + Sync {
    async fn recent_atr(
        &self,
        instrument: &str,
        granularity: Granularity,
        count: usize,
        length: usize,
    ) -> TradingResult<f64>;
}
