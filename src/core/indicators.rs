// Indicator adapter: choppiness, Bollinger %B and ATR over a bar series
//
// Every function drops incomplete bars before computing anything.

use ta::indicators::{AverageTrueRange, BollingerBands};
use ta::Next;

use crate::core::types::Bar;
use crate::error::{TradingError, TradingResult};

/// Last two choppiness values, enough to detect a threshold crossing
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChopReading {
    pub last: f64,
    pub prior: f64,
}

impl ChopReading {
    /// Value moved above `threshold` on the last bar
    pub fn crossed_above(&self, threshold: f64) -> bool {
        self.last > threshold && self.prior <= threshold
    }

    /// Value moved below `threshold` on the last bar
    pub fn crossed_below(&self, threshold: f64) -> bool {
        self.last < threshold && self.prior >= threshold
    }
}

fn complete_bars(bars: &[Bar]) -> Vec<&Bar> {
    bars.iter().filter(|b| b.complete).collect()
}

fn indicator_error<E: std::fmt::Debug>(err: E) -> TradingError {
    TradingError::Indicator(format!("{:?}", err))
}

fn true_ranges(bars: &[&Bar]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let range = bar.high - bar.low;
            match i.checked_sub(1).map(|p| bars[p].close) {
                Some(prev_close) => range
                    .max((bar.high - prev_close).abs())
                    .max((bar.low - prev_close).abs()),
                None => range,
            }
        })
        .collect()
}

fn check_chop_inputs(bars: &[&Bar], length: usize, needed: usize) -> TradingResult<()> {
    if length < 2 {
        return Err(TradingError::Indicator("choppiness length must be at least 2".to_string()));
    }
    if bars.len() < needed {
        return Err(TradingError::Indicator(format!(
            "choppiness needs {} complete bars, got {}",
            needed,
            bars.len()
        )));
    }
    Ok(())
}

/// Choppiness of the `length` bars ending at `end`
fn chop_window(bars: &[&Bar], tr: &[f64], end: usize, length: usize) -> TradingResult<f64> {
    let window = &bars[end + 1 - length..=end];
    let highest = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
    let lowest = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
    let span = highest - lowest;
    if span <= 0.0 {
        return Err(TradingError::Indicator("flat window, choppiness undefined".to_string()));
    }
    let tr_sum: f64 = tr[end + 1 - length..=end].iter().sum();
    Ok(100.0 * (tr_sum / span).log10() / (length as f64).log10())
}

/// Choppiness index series, one value per bar from index `length - 1` onward.
/// Any flat window in the history is an error.
pub fn choppiness_series(bars: &[Bar], length: usize) -> TradingResult<Vec<f64>> {
    let bars = complete_bars(bars);
    check_chop_inputs(&bars, length, length)?;

    let tr = true_ranges(&bars);
    (length - 1..bars.len())
        .map(|end| chop_window(&bars, &tr, end, length))
        .collect()
}

/// Last and prior choppiness values. Only the two trailing windows are
/// evaluated, so flat stretches earlier in the history do not matter.
pub fn choppiness(bars: &[Bar], length: usize) -> TradingResult<ChopReading> {
    let bars = complete_bars(bars);
    // One extra bar for the prior reading
    check_chop_inputs(&bars, length, length + 1)?;

    let tr = true_ranges(&bars);
    let last_end = bars.len() - 1;
    Ok(ChopReading {
        last: chop_window(&bars, &tr, last_end, length)?,
        prior: chop_window(&bars, &tr, last_end - 1, length)?,
    })
}

/// Position of the last close within its Bollinger bands
pub fn bollinger_percent_b(bars: &[Bar], length: usize, std_dev: f64) -> TradingResult<f64> {
    let bars = complete_bars(bars);
    if bars.len() < length {
        return Err(TradingError::Indicator(format!(
            "Bollinger bands need {} complete bars, got {}",
            length,
            bars.len()
        )));
    }

    let mut bb = BollingerBands::new(length, std_dev).map_err(indicator_error)?;
    let mut last = None;
    for bar in &bars {
        last = Some((bar.close, bb.next(bar.close)));
    }

    let (close, bands) = last.ok_or_else(|| TradingError::Indicator("no bars".to_string()))?;
    let width = bands.upper - bands.lower;
    if width <= 0.0 {
        return Err(TradingError::Indicator("zero-width Bollinger bands".to_string()));
    }
    Ok((close - bands.lower) / width)
}

/// Most recent average true range
pub fn average_true_range(bars: &[Bar], length: usize) -> TradingResult<f64> {
    let bars = complete_bars(bars);
    if bars.is_empty() || bars.len() < length {
        return Err(TradingError::Indicator(format!(
            "ATR needs {} complete bars, got {}",
            length,
            bars.len()
        )));
    }

    let mut atr = AverageTrueRange::new(length).map_err(indicator_error)?;
    let mut value = 0.0;
    for bar in bars {
        value = atr.next(bar);
    }
    Ok(value)
}
