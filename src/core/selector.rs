// Instrument selection: rank candidates into grid-viable and trend-viable lists

use tracing::debug;

use crate::config::SelectionConfig;
use crate::core::indicators::{bollinger_percent_b, choppiness, ChopReading};
use crate::core::types::Bar;
use crate::error::TradingResult;

/// Indicator values for one instrument at evaluation time
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentReading {
    pub instrument: String,
    pub chop: ChopReading,
    pub percent_b: f64,
}

/// Why an instrument was left out of both lists
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// %B above the high filter
    Extended,
    /// Choppiness did not cross either threshold on the last bar
    NoCrossing,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Ascending by %B
    pub grid: Vec<InstrumentReading>,
    /// Ascending by %B
    pub trend: Vec<InstrumentReading>,
    pub skipped: Vec<(String, SkipReason)>,
}

impl Selection {
    pub fn grid_instruments(&self) -> Vec<String> {
        self.grid.iter().map(|r| r.instrument.clone()).collect()
    }

    pub fn trend_instruments(&self) -> Vec<String> {
        self.trend.iter().map(|r| r.instrument.clone()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct InstrumentSelector {
    chop_length: usize,
    chop_high: f64,
    chop_low: f64,
    bb_length: usize,
    bb_std_dev: f64,
    bb_high: f64,
}

impl InstrumentSelector {
    pub fn new(config: &SelectionConfig) -> Self {
        Self {
            chop_length: config.chop_length,
            chop_high: config.chop_high,
            chop_low: config.chop_low,
            bb_length: config.bb_length,
            bb_std_dev: config.bb_std_dev,
            bb_high: config.bb_high,
        }
    }

    /// Compute the indicators the classifier needs for one instrument
    pub fn read(&self, instrument: &str, bars: &[Bar]) -> TradingResult<InstrumentReading> {
        let chop = choppiness(bars, self.chop_length)?;
        let percent_b = bollinger_percent_b(bars, self.bb_length, self.bb_std_dev)?;
        debug!(
            "📊 {}: chop {:.2} (prior {:.2}), %B {:.3}",
            instrument, chop.last, chop.prior, percent_b
        );

        Ok(InstrumentReading {
            instrument: instrument.to_string(),
            chop,
            percent_b,
        })
    }

    /// Split readings into grid and trend candidates.
    ///
    /// An instrument qualifies only on the bar where choppiness crosses a
    /// threshold, so one already flagged is not picked again while it stays
    /// beyond it. Ties keep universe order.
    pub fn classify(&self, readings: Vec<InstrumentReading>) -> Selection {
        let mut selection = Selection::default();

        for reading in readings {
            if reading.percent_b > self.bb_high {
                selection.skipped.push((reading.instrument, SkipReason::Extended));
            } else if reading.chop.crossed_above(self.chop_high) {
                selection.grid.push(reading);
            } else if reading.chop.crossed_below(self.chop_low) {
                selection.trend.push(reading);
            } else {
                selection.skipped.push((reading.instrument, SkipReason::NoCrossing));
            }
        }

        selection.grid.sort_by(|a, b| a.percent_b.total_cmp(&b.percent_b));
        selection.trend.sort_by(|a, b| a.percent_b.total_cmp(&b.percent_b));
        selection
    }
}
