//! Execution gateway seam
//!
//! [`ExecutionGateway`] is the only way the strategy layer talks to the venue.
//! Implementors supply the raw primitives; the composite operations the grid
//! engine relies on (current price, best-effort cancel/close, fresh balance
//! reads) are provided on top of them so every venue behaves the same way.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::core::types::{
    AccountSnapshot, Bar, CandleQuery, ConversionFactors, Granularity, InstrumentRecord,
    LimitOrder, OrderAck, PendingOrder, PositionSet,
};
use crate::error::{TradingError, TradingResult};

#[async_trait]
pub trait ExecutionGateway: Send + Sync {
    /// Balance and margin, read fresh from the venue
    async fn account_snapshot(&self) -> TradingResult<AccountSnapshot>;

    /// Instruments tradable on the account
    async fn account_instruments(&self) -> TradingResult<Vec<InstrumentRecord>>;

    /// Quote-to-home conversion factors from live pricing
    async fn conversion_factors(&self, instrument: &str) -> TradingResult<ConversionFactors>;

    /// Mid-price candles, oldest first
    async fn candles(
        &self,
        instrument: &str,
        granularity: Granularity,
        query: CandleQuery,
    ) -> TradingResult<Vec<Bar>>;

    /// Submit a limit order. Rejections come back as a classified
    /// `TradingError::OrderRejected` and are never retried here.
    async fn place_limit_order(&self, order: &LimitOrder) -> TradingResult<OrderAck>;

    async fn pending_orders(&self, instrument: &str) -> TradingResult<Vec<PendingOrder>>;

    async fn cancel_order(&self, order_id: &str) -> TradingResult<()>;

    async fn open_positions(&self, instrument: &str) -> TradingResult<PositionSet>;

    /// Close every side of `positions` that holds units
    async fn close_position(&self, instrument: &str, positions: PositionSet) -> TradingResult<()>;

    /// Latest mid close from the shortest granularity
    async fn current_price(&self, instrument: &str) -> TradingResult<f64> {
        let bars = self
            .candles(instrument, Granularity::S5, CandleQuery::Latest { count: 1 })
            .await?;

        bars.last()
            .map(|bar| bar.close)
            .filter(|price| price.is_finite() && *price > 0.0)
            .ok_or_else(|| TradingError::MarketData(format!("no price returned for {}", instrument)))
    }

    async fn available_balance(&self) -> TradingResult<f64> {
        Ok(self.account_snapshot().await?.balance)
    }

    async fn margin_available(&self) -> TradingResult<f64> {
        Ok(self.account_snapshot().await?.margin_available)
    }

    /// Cancel every pending order on `instrument`. Skips the venue entirely when
    /// nothing is pending; a failed cancel is logged and the rest still go out.
    async fn cancel_all_pending(&self, instrument: &str) -> TradingResult<usize> {
        let pending = self.pending_orders(instrument).await?;
        if pending.is_empty() {
            debug!("No pending orders to cancel for {}", instrument);
            return Ok(0);
        }

        let mut cancelled = 0;
        for order in &pending {
            match self.cancel_order(&order.id).await {
                Ok(()) => cancelled += 1,
                Err(e) => warn!("⚠️  Failed to cancel order {} on {}: {}", order.id, instrument, e),
            }
        }

        info!("🧹 Cancelled {}/{} pending orders for {}", cancelled, pending.len(), instrument);
        Ok(cancelled)
    }

    /// Flatten `instrument`. Returns false when there was nothing to close.
    async fn close_all_positions(&self, instrument: &str) -> TradingResult<bool> {
        let positions = self.open_positions(instrument).await?;
        if positions.is_flat() {
            debug!("No open position to close for {}", instrument);
            return Ok(false);
        }

        self.close_position(instrument, positions).await?;
        info!(
            "📤 Closed {} position: long {} / short {}",
            instrument, positions.long_units, positions.short_units
        );
        Ok(true)
    }
}

/// Round to a fixed number of decimals
pub fn round_to_decimals(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    let scaled = value * factor;
    if !scaled.is_finite() {
        return value;
    }
    scaled.round() / factor
}

/// Round a price to the precision implied by the pip location
/// (`-4` keeps four decimals). Applying it twice changes nothing.
pub fn adjust_to_pip_location(price: f64, pip_location: i32) -> f64 {
    round_to_decimals(price, pip_location.unsigned_abs())
}

/// `10^|pip_location|`, the number of pips in one unit of price
pub fn pip_value(pip_location: i32) -> f64 {
    10f64.powi(pip_location.unsigned_abs() as i32)
}

/// Check a trailing stop distance against the instrument's bounds
pub fn validate_trailing_stop(record: &InstrumentRecord, distance: f64) -> TradingResult<f64> {
    if let Some(min) = record.minimum_trailing_stop_distance {
        if distance < min {
            return Err(TradingError::Configuration(format!(
                "trailing stop distance {} below minimum {} for {}",
                distance, min, record.name
            )));
        }
    }
    if let Some(max) = record.maximum_trailing_stop_distance {
        if distance > max {
            return Err(TradingError::Configuration(format!(
                "trailing stop distance {} above maximum {} for {}",
                distance, max, record.name
            )));
        }
    }
    Ok(distance)
}

/// Format a price for the venue with exactly `decimals` places
pub fn format_price(price: f64, decimals: u32) -> String {
    format!("{:.*}", decimals as usize, price)
}
