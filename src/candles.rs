use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::chart::Viewport;

pub const DEFAULT_CAPACITY: usize = 500;

static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

fn next_revision() -> u64 {
    NEXT_REVISION.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Period start, epoch milliseconds.
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Finite, `low <= min(open, close) <= max(open, close) <= high` and a
    /// non-negative volume.
    pub fn is_well_formed(&self) -> bool {
        let finite = self.open.is_finite()
            && self.high.is_finite()
            && self.low.is_finite()
            && self.close.is_finite()
            && self.volume.is_finite();
        finite
            && self.low <= self.open.min(self.close)
            && self.open.max(self.close) <= self.high
            && self.volume >= 0.0
    }

    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }
}

/// A streaming candle; `is_final` is set once its period has closed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandleUpdate {
    pub candle: Candle,
    pub is_final: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeFrame {
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[serde(rename = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    OneDay,
}

impl TimeFrame {
    pub const ALL: [TimeFrame; 6] = [
        TimeFrame::OneMinute,
        TimeFrame::FiveMinutes,
        TimeFrame::FifteenMinutes,
        TimeFrame::OneHour,
        TimeFrame::FourHours,
        TimeFrame::OneDay,
    ];

    pub fn to_api_string(&self) -> &'static str {
        match self {
            TimeFrame::OneMinute => "1m",
            TimeFrame::FiveMinutes => "5m",
            TimeFrame::FifteenMinutes => "15m",
            TimeFrame::OneHour => "1h",
            TimeFrame::FourHours => "4h",
            TimeFrame::OneDay => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tf| tf.to_api_string() == s)
    }

    pub fn display(&self) -> &'static str {
        match self {
            TimeFrame::OneMinute => "1 Min",
            TimeFrame::FiveMinutes => "5 Min",
            TimeFrame::FifteenMinutes => "15 Min",
            TimeFrame::OneHour => "1 Hour",
            TimeFrame::FourHours => "4 Hours",
            TimeFrame::OneDay => "1 Day",
        }
    }

    /// `(multiplier, span)` for aggregate-bar APIs.
    pub fn aggregate(&self) -> (u32, &'static str) {
        match self {
            TimeFrame::OneMinute => (1, "minute"),
            TimeFrame::FiveMinutes => (5, "minute"),
            TimeFrame::FifteenMinutes => (15, "minute"),
            TimeFrame::OneHour => (1, "hour"),
            TimeFrame::FourHours => (4, "hour"),
            TimeFrame::OneDay => (1, "day"),
        }
    }

    pub fn next(&self) -> Self {
        match self {
            TimeFrame::OneMinute => TimeFrame::FiveMinutes,
            TimeFrame::FiveMinutes => TimeFrame::FifteenMinutes,
            TimeFrame::FifteenMinutes => TimeFrame::OneHour,
            TimeFrame::OneHour => TimeFrame::FourHours,
            TimeFrame::FourHours => TimeFrame::OneDay,
            TimeFrame::OneDay => TimeFrame::OneMinute,
        }
    }

    pub fn prev(&self) -> Self {
        match self {
            TimeFrame::OneMinute => TimeFrame::OneDay,
            TimeFrame::FiveMinutes => TimeFrame::OneMinute,
            TimeFrame::FifteenMinutes => TimeFrame::FiveMinutes,
            TimeFrame::OneHour => TimeFrame::FifteenMinutes,
            TimeFrame::FourHours => TimeFrame::OneHour,
            TimeFrame::OneDay => TimeFrame::FourHours,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Replaced,
    Appended,
    Amended,
    Discarded,
}

/// Per-timeframe candle series for one symbol.
///
/// `generation` moves on every `clear`; bulk results stamped with an older
/// generation are dropped, which is how a late REST response for a previous
/// symbol is kept out.
///
/// `revision` is unique across all stores and moves on every `clear` and bulk
/// replace. Streaming upserts leave it alone.
#[derive(Debug)]
pub struct CandleStore {
    series: HashMap<TimeFrame, Vec<Candle>>,
    capacity: usize,
    generation: u64,
    revision: u64,
}

impl Default for CandleStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl CandleStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            series: HashMap::new(),
            capacity: capacity.max(1),
            generation: 0,
            revision: next_revision(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn clear(&mut self) {
        self.series.clear();
        self.generation += 1;
        self.revision = next_revision();
    }

    /// Forgets one timeframe so streaming updates wait for a fresh snapshot.
    pub fn drop_series(&mut self, tf: TimeFrame) {
        if self.series.remove(&tf).is_some() {
            self.revision = next_revision();
        }
    }

    pub fn series(&self, tf: TimeFrame) -> &[Candle] {
        self.series.get(&tf).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self, tf: TimeFrame) -> usize {
        self.series(tf).len()
    }

    pub fn last(&self, tf: TimeFrame) -> Option<&Candle> {
        self.series(tf).last()
    }

    /// Returns false when `generation` is stale.
    pub fn replace_series(&mut self, generation: u64, tf: TimeFrame, candles: Vec<Candle>) -> bool {
        if generation != self.generation {
            tracing::debug!(tf = tf.to_api_string(), generation, current = self.generation, "stale series dropped");
            return false;
        }
        let mut clean: Vec<Candle> = Vec::with_capacity(candles.len());
        for c in candles.into_iter().filter(Candle::is_well_formed) {
            if clean.last().is_some_and(|l| l.time >= c.time) {
                continue;
            }
            clean.push(c);
        }
        if clean.len() > self.capacity {
            clean.drain(..clean.len() - self.capacity);
        }
        self.series.insert(tf, clean);
        self.revision = next_revision();
        true
    }

    pub fn upsert(&mut self, tf: TimeFrame, update: CandleUpdate) -> UpsertOutcome {
        let incoming = update.candle;
        if !incoming.is_well_formed() {
            tracing::debug!(tf = tf.to_api_string(), time = incoming.time, "malformed candle discarded");
            return UpsertOutcome::Discarded;
        }
        let capacity = self.capacity;
        let series = self.series.entry(tf).or_default();

        match series.last_mut() {
            Some(last) if last.time == incoming.time => {
                *last = incoming;
                UpsertOutcome::Replaced
            }
            Some(last) if incoming.time < last.time => UpsertOutcome::Discarded,
            _ if update.is_final => {
                series.push(incoming);
                if series.len() > capacity {
                    let excess = series.len() - capacity;
                    series.drain(..excess);
                }
                UpsertOutcome::Appended
            }
            Some(last) => {
                let time = last.time;
                *last = Candle { time, ..incoming };
                UpsertOutcome::Amended
            }
            None => UpsertOutcome::Discarded,
        }
    }

    /// `[len - offset - count, len - offset)`, clamped; empty under two candles.
    pub fn visible_slice(&self, tf: TimeFrame, viewport: Viewport) -> &[Candle] {
        let series = self.series(tf);
        if series.len() < 2 {
            return &[];
        }
        let end = series.len().saturating_sub(viewport.scroll_offset);
        let start = end.saturating_sub(viewport.visible_count);
        &series[start..end]
    }
}
