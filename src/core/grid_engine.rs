//! Grid lifecycle engine
//!
//! One [`GridEngine`] owns the grid for one instrument and moves it through
//! `Inactive -> Active -> Resetting -> Inactive`. Levels are recomputed from
//! live price and ATR on every activation; nothing survives a reset.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::clients::gateway::{
    adjust_to_pip_location, round_to_decimals, validate_trailing_stop, ExecutionGateway,
};
use crate::config::GridConfig;
use crate::core::market_data::AtrSource;
use crate::core::types::{GridLevel, GridState, Instrument, LimitOrder, OrderStatus, Side};
use crate::error::{TradingError, TradingResult};

/// Unrounded entry prices `step` offsets either side of `price`
pub fn entry_prices(price: f64, atr: f64, entry_factor: f64, step: usize) -> (f64, f64) {
    let offset = atr * entry_factor * step as f64;
    (price - offset, price + offset)
}

/// Prices and sizes for one activation
#[derive(Debug, Clone, PartialEq)]
pub struct GridPlan {
    pub center: f64,
    pub atr: f64,
    pub entry_offset: f64,
    pub sl_distance: f64,
    pub tp_distance: f64,
    /// Ascending by entry price
    pub levels: Vec<GridLevel>,
}

impl GridPlan {
    /// Derive the grid around `price`.
    ///
    /// Entries and exits are rounded to the instrument's quote precision,
    /// distances to its pip position. `long_units`/`short_units` are the
    /// per-side capacity, split evenly over the levels of that side.
    pub fn compute(
        instrument: &Instrument,
        settings: &GridConfig,
        price: f64,
        atr: f64,
        long_units: i64,
        short_units: i64,
    ) -> Self {
        let per_side = settings.levels_per_side.max(1);
        let price_dp = instrument.price_precision();
        let dist_dp = instrument.distance_precision();

        let sl_distance = round_to_decimals(atr * settings.sl_atr_factor, dist_dp);
        let tp_distance = round_to_decimals(atr * settings.tp_atr_factor, dist_dp);
        let long_per_level = long_units / per_side as i64;
        let short_per_level = short_units / per_side as i64;

        let exits = |entry: f64, side: Side| -> (Option<f64>, Option<f64>) {
            if !settings.attach_exits {
                return (None, None);
            }
            let (tp, sl) = match side {
                Side::Long => (entry + tp_distance, entry - sl_distance),
                Side::Short => (entry - tp_distance, entry + sl_distance),
            };
            (Some(round_to_decimals(tp, price_dp)), Some(round_to_decimals(sl, price_dp)))
        };

        let mut levels = Vec::with_capacity(per_side * 2);
        for step in (1..=per_side).rev() {
            let (long_entry, _) = entry_prices(price, atr, settings.entry_atr_factor, step);
            let entry = round_to_decimals(long_entry, price_dp);
            let (take_profit, stop_loss) = exits(entry, Side::Long);
            levels.push(GridLevel {
                index: levels.len(),
                side: Side::Long,
                entry,
                take_profit,
                stop_loss,
                units: Side::Long.sign() * long_per_level,
                order_id: None,
                status: OrderStatus::Pending,
            });
        }
        for step in 1..=per_side {
            let (_, short_entry) = entry_prices(price, atr, settings.entry_atr_factor, step);
            let entry = round_to_decimals(short_entry, price_dp);
            let (take_profit, stop_loss) = exits(entry, Side::Short);
            levels.push(GridLevel {
                index: levels.len(),
                side: Side::Short,
                entry,
                take_profit,
                stop_loss,
                units: Side::Short.sign() * short_per_level,
                order_id: None,
                status: OrderStatus::Pending,
            });
        }

        Self {
            center: price,
            atr,
            entry_offset: atr * settings.entry_atr_factor,
            sl_distance,
            tp_distance,
            levels,
        }
    }

    fn boundary(&self) -> usize {
        self.levels.iter().filter(|l| l.side == Side::Long).count()
    }

    /// Nearest long entry
    pub fn long_entry(&self) -> Option<f64> {
        self.boundary().checked_sub(1).map(|i| self.levels[i].entry)
    }

    /// Nearest short entry
    pub fn short_entry(&self) -> Option<f64> {
        self.levels.get(self.boundary()).map(|l| l.entry)
    }

    /// Level indices in submission order: nearest long, nearest short, then outward
    pub fn submission_order(&self) -> Vec<usize> {
        let boundary = self.boundary();
        let shorts = self.levels.len() - boundary;
        let mut order = Vec::with_capacity(self.levels.len());
        for step in 0..boundary.max(shorts) {
            if step < boundary {
                order.push(boundary - 1 - step);
            }
            if step < shorts {
                order.push(boundary + step);
            }
        }
        order
    }
}

/// Outcome of one activation attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationReport {
    pub generation: u64,
    pub placed: usize,
    pub expected: usize,
    pub long_units: i64,
    pub short_units: i64,
    pub plan: GridPlan,
}

impl ActivationReport {
    pub fn is_partial(&self) -> bool {
        self.placed > 0 && self.placed < self.expected
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    /// Market judged unfavorable while orders or positions were open
    Unfavorable,
    /// Neither a position nor a pending order is left
    Consumed,
    /// Grid outlived its maximum age
    Expired,
    /// A previous reset did not finish
    Retry,
    Manual,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MonitorOutcome {
    Holding,
    Activated(ActivationReport),
    Reset {
        reason: ResetReason,
        report: ActivationReport,
    },
}

pub struct GridEngine {
    instrument: Instrument,
    allocation: f64,
    settings: GridConfig,
    gateway: Arc<dyn ExecutionGateway>,
    atr_source: Arc<dyn AtrSource>,
    state: GridState,
    levels: Vec<GridLevel>,
    generation: u64,
    activated_at: Option<DateTime<Utc>>,
    last_report: Option<ActivationReport>,
}

impl GridEngine {
    pub fn new(
        instrument: Instrument,
        allocation: f64,
        settings: GridConfig,
        gateway: Arc<dyn ExecutionGateway>,
        atr_source: Arc<dyn AtrSource>,
    ) -> Self {
        Self {
            instrument,
            allocation,
            settings,
            gateway,
            atr_source,
            state: GridState::Inactive,
            levels: Vec::new(),
            generation: 0,
            activated_at: None,
            last_report: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.instrument.symbol
    }

    pub fn instrument(&self) -> &Instrument {
        &self.instrument
    }

    pub fn state(&self) -> GridState {
        self.state
    }

    pub fn allocation(&self) -> f64 {
        self.allocation
    }

    pub fn levels(&self) -> &[GridLevel] {
        &self.levels
    }

    /// Incremented on every activation attempt that reaches order submission
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn activated_at(&self) -> Option<DateTime<Utc>> {
        self.activated_at
    }

    pub fn last_report(&self) -> Option<&ActivationReport> {
        self.last_report.as_ref()
    }

    pub fn is_partial(&self) -> bool {
        self.last_report.as_ref().map_or(false, |r| r.is_partial())
    }

    /// Place a fresh grid. A no-op returning the current report when already active.
    ///
    /// Legs go out one at a time; the first rejection stops submission and is
    /// returned. If any leg was placed the engine still ends up `Active`, with
    /// the shortfall recorded in its report.
    pub async fn activate(&mut self) -> TradingResult<ActivationReport> {
        if self.state == GridState::Active {
            if let Some(report) = &self.last_report {
                debug!("Grid for {} already active (generation {})", self.symbol(), self.generation);
                return Ok(report.clone());
            }
        }

        let symbol = self.instrument.symbol.clone();
        info!("🎯 Activating grid for {}", symbol);

        let factors = self.gateway.conversion_factors(&symbol).await?;
        let long_units = (self.allocation * factors.positive / self.settings.order_limit).floor() as i64;
        let short_units = (self.allocation * factors.negative / self.settings.order_limit).floor() as i64;
        let per_side = self.settings.levels_per_side.max(1) as i64;
        info!(
            "💰 {} capacity: long {} / short {} units (allocation {:.2}, pip location {}, pip value {})",
            symbol,
            long_units,
            short_units,
            self.allocation,
            self.instrument.pip_location,
            self.instrument.pip_value()
        );
        if long_units / per_side < 1 || short_units / per_side < 1 {
            return Err(TradingError::InsufficientFunds {
                instrument: symbol,
                allocated: self.allocation,
            });
        }

        let price = self.gateway.current_price(&symbol).await?;
        let atr = self
            .atr_source
            .recent_atr(
                &symbol,
                self.settings.atr_granularity,
                self.settings.atr_count,
                self.settings.atr_length,
            )
            .await?;
        if !(atr.is_finite() && atr > 0.0) {
            warn!("⚠️  Skipping activation for {}: ATR unavailable ({})", symbol, atr);
            return Err(TradingError::MarketData(format!("ATR unavailable for {}: {}", symbol, atr)));
        }

        let plan = GridPlan::compute(&self.instrument, &self.settings, price, atr, long_units, short_units);
        info!(
            "📐 {} price {} ATR {:.6}: long entry {:?}, short entry {:?}, SL {} TP {}",
            symbol,
            price,
            atr,
            plan.long_entry(),
            plan.short_entry(),
            plan.sl_distance,
            plan.tp_distance
        );

        let trailing_stop_distance = self
            .settings
            .trailing_stop_atr_factor
            .map(|factor| {
                let distance = adjust_to_pip_location(atr * factor, self.instrument.pip_location);
                validate_trailing_stop(&self.instrument.record, distance)
            })
            .transpose()?;

        self.generation += 1;
        let mut levels = plan.levels.clone();
        let expected = levels.len();
        let mut placed = 0;
        let mut failure = None;

        for index in plan.submission_order() {
            let level = &mut levels[index];
            let order = LimitOrder {
                instrument: symbol.clone(),
                units: level.units,
                price: level.entry,
                price_precision: self.instrument.price_precision(),
                take_profit: level.take_profit,
                stop_loss: level.stop_loss,
                trailing_stop_distance,
            };

            match self.gateway.place_limit_order(&order).await {
                Ok(ack) => {
                    info!("📝 Placed {} order {} for {} @ {}", symbol, ack.order_id, order.units, order.price);
                    level.order_id = Some(ack.order_id);
                    placed += 1;
                }
                Err(e) => {
                    error!(
                        "❌ {} {:?} leg rejected: {} units @ {}: {}",
                        symbol, level.side, order.units, order.price, e
                    );
                    level.status = OrderStatus::Rejected;
                    failure = Some(e);
                    break;
                }
            }
        }

        for level in levels.iter_mut().filter(|l| l.order_id.is_none() && l.status == OrderStatus::Pending) {
            level.status = OrderStatus::Cancelled;
        }

        let report = ActivationReport {
            generation: self.generation,
            placed,
            expected,
            long_units,
            short_units,
            plan,
        };
        self.levels = levels;
        self.last_report = Some(report.clone());

        if placed > 0 {
            self.state = GridState::Active;
            self.activated_at = Some(Utc::now());
        } else {
            self.state = GridState::Inactive;
            self.activated_at = None;
        }

        match failure {
            Some(e) => {
                if placed > 0 {
                    warn!(
                        "⚠️  Partial activation for {}: {}/{} legs placed",
                        symbol, placed, expected
                    );
                }
                Err(e)
            }
            None => {
                info!("✅ Grid active for {} ({} orders, generation {})", symbol, placed, self.generation);
                Ok(report)
            }
        }
    }

    /// Cancel pending orders, optionally flatten, then activate again.
    ///
    /// If cleanup fails the engine stays `Resetting` and the next monitor pass
    /// retries it.
    pub async fn reset(&mut self, reason: ResetReason) -> TradingResult<ActivationReport> {
        let symbol = self.instrument.symbol.clone();
        info!("🔄 Resetting grid for {} ({:?})", symbol, reason);
        self.state = GridState::Resetting;

        self.gateway.cancel_all_pending(&symbol).await?;
        let remaining = self.gateway.pending_orders(&symbol).await?;
        if !remaining.is_empty() {
            warn!(
                "⚠️  {} pending orders still resting on {}; reset retries next pass",
                remaining.len(),
                symbol
            );
            return Err(TradingError::ApiResponse(format!(
                "{} pending orders on {} survived cancellation",
                remaining.len(),
                symbol
            )));
        }
        if self.settings.flatten_on_reset {
            self.gateway.close_all_positions(&symbol).await?;
        }

        self.levels.clear();
        self.activated_at = None;
        self.state = GridState::Inactive;

        self.activate().await
    }

    pub async fn monitor(&mut self, favorable: bool) -> TradingResult<MonitorOutcome> {
        self.monitor_at(Utc::now(), favorable).await
    }

    /// One monitoring pass evaluated at `now`
    pub async fn monitor_at(&mut self, now: DateTime<Utc>, favorable: bool) -> TradingResult<MonitorOutcome> {
        match self.state {
            GridState::Inactive => {
                debug!("Grid for {} inactive, attempting activation", self.symbol());
                return Ok(MonitorOutcome::Activated(self.activate().await?));
            }
            GridState::Resetting => {
                let report = self.reset(ResetReason::Retry).await?;
                return Ok(MonitorOutcome::Reset {
                    reason: ResetReason::Retry,
                    report,
                });
            }
            GridState::Active => {}
        }

        if let Some(activated_at) = self.activated_at {
            if now - activated_at >= self.settings.max_grid_age() {
                let report = self.reset(ResetReason::Expired).await?;
                return Ok(MonitorOutcome::Reset {
                    reason: ResetReason::Expired,
                    report,
                });
            }
        }

        let symbol = self.instrument.symbol.clone();
        let positions = self.gateway.open_positions(&symbol).await?;
        let pending = self.gateway.pending_orders(&symbol).await?;
        self.mark_fills(pending.iter().map(|o| o.id.as_str()).collect());

        let reason = if !positions.is_flat() {
            (!favorable).then_some(ResetReason::Unfavorable)
        } else if pending.is_empty() {
            Some(ResetReason::Consumed)
        } else {
            (!favorable).then_some(ResetReason::Unfavorable)
        };

        match reason {
            Some(reason) => {
                let report = self.reset(reason).await?;
                Ok(MonitorOutcome::Reset { reason, report })
            }
            None => {
                debug!(
                    "Grid for {} holding: {} pending, long {} short {}",
                    symbol,
                    pending.len(),
                    positions.long_units,
                    positions.short_units
                );
                Ok(MonitorOutcome::Holding)
            }
        }
    }

    /// Levels whose order is no longer pending at the venue were filled
    fn mark_fills(&mut self, pending_ids: HashSet<&str>) {
        for level in &mut self.levels {
            let gone = matches!(&level.order_id, Some(id) if !pending_ids.contains(id.as_str()));
            if level.status == OrderStatus::Pending && gone {
                level.status = OrderStatus::Filled;
            }
        }
    }
}
