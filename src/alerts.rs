//! Price threshold alerts.
//!
//! Each side latches when crossed and only re-arms once price has pulled
//! back 0.2% past the threshold, so a price hovering on the line fires once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::Instant;

use crate::error::ValidationError;
use crate::prefs::Preferences;

const HIGH_REARM: f64 = 0.998;
const LOW_REARM: f64 = 1.002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    High,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEntry {
    pub time: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FiredAlert {
    pub kind: AlertKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AlertEngine {
    high: f64,
    low: f64,
    high_latched: bool,
    low_latched: bool,
    history: Vec<AlertEntry>,
    history_limit: usize,
}

impl AlertEngine {
    pub fn new(history_limit: usize) -> Self {
        Self {
            high: 0.0,
            low: 0.0,
            high_latched: false,
            low_latched: false,
            history: Vec::new(),
            history_limit: history_limit.max(1),
        }
    }

    /// Thresholds and history from preferences. Latches always start clear.
    pub fn load(prefs: &dyn Preferences, history_limit: usize) -> Self {
        let mut engine = Self::new(history_limit);
        engine.high = sanitize(prefs.get_or("alertHigh", 0.0));
        engine.low = sanitize(prefs.get_or("alertLow", 0.0));
        engine.history = prefs.get_or("alertHistory", Vec::new());
        engine.history.truncate(engine.history_limit);
        engine
    }

    pub fn save(&self, prefs: &mut dyn Preferences) {
        prefs.put("alertHigh", &self.high);
        prefs.put("alertLow", &self.low);
        prefs.put("alertHistory", &self.history);
    }

    pub fn high(&self) -> f64 {
        self.high
    }

    pub fn low(&self) -> f64 {
        self.low
    }

    pub fn latched(&self) -> (bool, bool) {
        (self.high_latched, self.low_latched)
    }

    pub fn history(&self) -> &[AlertEntry] {
        &self.history
    }

    pub fn is_armed(&self) -> bool {
        self.high > 0.0 || self.low > 0.0
    }

    pub fn set_history_limit(&mut self, limit: usize) {
        self.history_limit = limit.max(1);
        self.history.truncate(self.history_limit);
    }

    /// New thresholds re-arm both sides.
    pub fn set_thresholds(&mut self, high: f64, low: f64) {
        self.high = sanitize(high);
        self.low = sanitize(low);
        self.high_latched = false;
        self.low_latched = false;
    }

    pub fn clear(&mut self) {
        self.set_thresholds(0.0, 0.0);
        self.history.clear();
    }

    pub fn check(&mut self, price: f64, now: DateTime<Utc>) -> Vec<FiredAlert> {
        let mut fired = Vec::new();
        if !price.is_finite() {
            return fired;
        }
        if self.high > 0.0 && price >= self.high && !self.high_latched {
            self.high_latched = true;
            fired.push(self.record(AlertKind::High, price, now));
        }
        if self.low > 0.0 && price <= self.low && !self.low_latched {
            self.low_latched = true;
            fired.push(self.record(AlertKind::Low, price, now));
        }
        if self.high <= 0.0 || price < self.high * HIGH_REARM {
            self.high_latched = false;
        }
        if self.low <= 0.0 || price > self.low * LOW_REARM {
            self.low_latched = false;
        }
        fired
    }

    fn record(&mut self, kind: AlertKind, price: f64, now: DateTime<Utc>) -> FiredAlert {
        let message = match kind {
            AlertKind::High => format!("High alert hit @ ${:.2}", price),
            AlertKind::Low => format!("Low alert hit @ ${:.2}", price),
        };
        self.history.insert(
            0,
            AlertEntry {
                time: now.format("%H:%M:%S UTC").to_string(),
                message: message.clone(),
            },
        );
        self.history.truncate(self.history_limit);
        tracing::info!(?kind, price, "price alert");
        FiredAlert { kind, message }
    }
}

fn sanitize(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 { v } else { 0.0 }
}

/// Parses one threshold field. Blank means disabled.
pub fn parse_threshold(text: &str) -> Result<f64, ValidationError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(0.0);
    }
    let value: f64 = text
        .replace(',', "")
        .parse()
        .map_err(|_| ValidationError::BadNumber(text.to_string()))?;
    if !value.is_finite() {
        return Err(ValidationError::BadNumber(text.to_string()));
    }
    if value < 0.0 {
        return Err(ValidationError::Negative);
    }
    Ok(value)
}

pub fn validate_pair(high: f64, low: f64) -> Result<(), ValidationError> {
    if high > 0.0 && low > 0.0 && high <= low {
        return Err(ValidationError::Inverted);
    }
    Ok(())
}

/// Side effects an alert may request. Implementations must swallow their
/// own failures.
pub trait Notifier {
    fn play_tone(&mut self);
    fn notify(&mut self, title: &str, body: &str);
}

/// Rings the terminal bell and keeps the latest notification for the UI.
#[derive(Debug, Default)]
pub struct TerminalNotifier {
    latest: Option<(String, Instant)>,
}

impl TerminalNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<&(String, Instant)> {
        self.latest.as_ref()
    }
}

impl Notifier for TerminalNotifier {
    fn play_tone(&mut self) {
        let mut out = std::io::stdout();
        if out.write_all(b"\x07").and_then(|_| out.flush()).is_err() {
            tracing::debug!("bell unavailable");
        }
    }

    fn notify(&mut self, title: &str, body: &str) {
        tracing::info!(title, body, "notification");
        self.latest = Some((format!("{}: {}", title, body), Instant::now()));
    }
}

#[cfg(test)]
pub mod testing {
    use super::Notifier;

    #[derive(Debug, Default)]
    pub struct CountingNotifier {
        pub tones: usize,
        pub notes: Vec<String>,
    }

    impl Notifier for CountingNotifier {
        fn play_tone(&mut self) {
            self.tones += 1;
        }

        fn notify(&mut self, title: &str, body: &str) {
            self.notes.push(format!("{}: {}", title, body));
        }
    }
}
