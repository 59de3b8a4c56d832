//! Technical indicators over candle closes.
//!
//! Every function returns one entry per input candle, `None` until enough
//! history exists.

use crate::candles::{Candle, TimeFrame};

/// Simple moving average. First value at `period - 1`.
pub fn sma(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; candles.len()];
    if period == 0 {
        return out;
    }
    let mut sum = 0.0;
    for (i, c) in candles.iter().enumerate() {
        sum += c.close;
        if i >= period {
            sum -= candles[i - period].close;
        }
        if i + 1 >= period {
            out[i] = Some(sum / period as f64);
        }
    }
    out
}

/// Exponential moving average seeded with the SMA of the first `period`
/// closes. Index 0 carries the first close as an internal seed; indices
/// between it and the seed are `None`.
pub fn ema(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; candles.len()];
    if period == 0 || candles.is_empty() {
        return out;
    }
    let k = 2.0 / (period as f64 + 1.0);
    out[0] = Some(candles[0].close);
    if period == 1 {
        for i in 1..candles.len() {
            out[i] = Some(candles[i].close);
        }
        return out;
    }
    let mut prev: Option<f64> = None;
    for i in 1..candles.len() {
        if i + 1 < period {
            continue;
        }
        let value = match prev {
            None => candles[..period].iter().map(|c| c.close).sum::<f64>() / period as f64,
            Some(p) => candles[i].close * k + p * (1.0 - k),
        };
        out[i] = Some(value);
        prev = Some(value);
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Band {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

/// Bollinger bands: SMA middle, `mult` population standard deviations wide.
pub fn bollinger(candles: &[Candle], period: usize, mult: f64) -> Vec<Option<Band>> {
    sma(candles, period)
        .into_iter()
        .enumerate()
        .map(|(i, middle)| {
            let middle = middle?;
            let window = &candles[i + 1 - period..=i];
            let variance = window
                .iter()
                .map(|c| (c.close - middle).powi(2))
                .sum::<f64>()
                / period as f64;
            let sd = variance.sqrt();
            Some(Band {
                upper: middle + mult * sd,
                middle,
                lower: middle - mult * sd,
            })
        })
        .collect()
}

/// Relative strength index over a trailing window of close-to-close changes.
/// A window with no losses reads exactly 100.
pub fn rsi(candles: &[Candle], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; candles.len()];
    if period == 0 {
        return out;
    }
    for i in period..candles.len() {
        let mut gain = 0.0;
        let mut loss = 0.0;
        for j in i + 1 - period..=i {
            let diff = candles[j].close - candles[j - 1].close;
            if diff > 0.0 {
                gain += diff;
            } else {
                loss -= diff;
            }
        }
        let avg_gain = gain / period as f64;
        let avg_loss = loss / period as f64;
        out[i] = Some(if avg_loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        });
    }
    out
}

pub const SMA_PERIOD: usize = 20;
pub const EMA_PERIOD: usize = 12;
pub const BOLLINGER_PERIOD: usize = 20;
pub const BOLLINGER_MULT: f64 = 2.0;
pub const RSI_PERIOD: usize = 14;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndicatorSet {
    pub sma: Vec<Option<f64>>,
    pub ema: Vec<Option<f64>>,
    pub bollinger: Vec<Option<Band>>,
    pub rsi: Vec<Option<f64>>,
}

impl IndicatorSet {
    pub fn compute(candles: &[Candle]) -> Self {
        Self {
            sma: sma(candles, SMA_PERIOD),
            ema: ema(candles, EMA_PERIOD),
            bollinger: bollinger(candles, BOLLINGER_PERIOD, BOLLINGER_MULT),
            rsi: rsi(candles, RSI_PERIOD),
        }
    }
}

/// Full-series indicators, recomputed only when `(timeframe, store revision,
/// length, last candle time)` changes.
///
/// An in-place update of the last candle keeps the key, so overlays can trail
/// the live price by one tick until the next candle opens. A bulk replace or a
/// symbol switch moves the revision and always recomputes.
#[derive(Debug, Default)]
pub struct IndicatorCache {
    key: Option<(TimeFrame, u64, usize, i64)>,
    set: IndicatorSet,
    computations: u64,
}

impl IndicatorCache {
    pub fn get(&mut self, tf: TimeFrame, revision: u64, series: &[Candle]) -> &IndicatorSet {
        let key = series.last().map(|c| (tf, revision, series.len(), c.time));
        if key != self.key {
            self.set = IndicatorSet::compute(series);
            self.key = key;
            self.computations += 1;
        }
        &self.set
    }

    pub fn computations(&self) -> u64 {
        self.computations
    }
}
