use serde_json::Value;

use super::num;
use crate::candles::Candle;
use crate::error::FetchError;

/// State of the stocks proxy as shown on the API chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiStatus {
    Checking,
    KeyMissing,
    RateLimited,
    InvalidKey,
    Issue,
    Offline,
    Detected,
}

impl ApiStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ApiStatus::Checking => "Checking API...",
            ApiStatus::KeyMissing => "API Key Missing",
            ApiStatus::RateLimited => "Rate Limited",
            ApiStatus::InvalidKey => "Invalid Key",
            ApiStatus::Issue => "API Issue",
            ApiStatus::Offline => "API Offline",
            ApiStatus::Detected => "API Key Detected",
        }
    }

    pub fn is_ok(&self) -> bool {
        *self == ApiStatus::Detected
    }

    /// Maps a proxy error code; unknown codes become `fallback`.
    pub fn from_code(code: Option<&str>, fallback: ApiStatus) -> ApiStatus {
        match code {
            Some("stocks_api_key_missing") => ApiStatus::KeyMissing,
            Some("stocks_rate_limited") => ApiStatus::RateLimited,
            _ => fallback,
        }
    }

    /// Status for a failed request. HTTP errors carrying a proxy error body
    /// are classified by code, transport failures mean the proxy is offline.
    pub fn from_fetch_error(err: &FetchError, fallback: ApiStatus) -> ApiStatus {
        match err {
            FetchError::Transport(_) => ApiStatus::Offline,
            FetchError::Status { .. } => ApiStatus::from_code(err.api_code().as_deref(), fallback),
            FetchError::Decode(_) => fallback,
        }
    }
}

/// `Some(status)` when the body is a proxy error envelope `{"ok": false, "error": ...}`.
pub fn envelope_error(value: &Value, fallback: ApiStatus) -> Option<ApiStatus> {
    (value["ok"] == Value::Bool(false))
        .then(|| ApiStatus::from_code(value["error"].as_str(), fallback))
}

/// `{"market": "open" | ...}`
pub fn parse_market_open(value: &Value) -> Result<bool, ApiStatus> {
    if let Some(status) = envelope_error(value, ApiStatus::Issue) {
        return Err(status);
    }
    Ok(value["market"].as_str() == Some("open"))
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Snapshot {
    pub last: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub open: Option<f64>,
    pub prev_close: Option<f64>,
    pub volume: Option<f64>,
}

impl Snapshot {
    /// Absolute and percent change against the previous close.
    pub fn change(&self) -> Option<(f64, f64)> {
        let last = self.last?;
        let prev = self.prev_close?;
        if prev == 0.0 {
            return None;
        }
        let diff = last - prev;
        Some((diff, diff / prev * 100.0))
    }
}

/// `{"snapshot": {"day": {o,h,l,c,v}, "prevDay": {c}}}`, or the snapshot
/// object at the top level.
pub fn parse_snapshot(value: &Value) -> Result<Snapshot, ApiStatus> {
    if value.is_null() {
        return Err(ApiStatus::InvalidKey);
    }
    if let Some(status) = envelope_error(value, ApiStatus::InvalidKey) {
        return Err(status);
    }
    let snap = value.get("snapshot").unwrap_or(value);
    let day = &snap["day"];
    Ok(Snapshot {
        last: num(&day["c"]),
        high: num(&day["h"]),
        low: num(&day["l"]),
        open: num(&day["o"]),
        prev_close: num(&snap["prevDay"]["c"]),
        volume: num(&day["v"]),
    })
}

/// `{"results": [{t,o,h,l,c,v}, ...]}`. Bars with a non-numeric price are
/// dropped; a missing volume counts as zero.
pub fn parse_bars(value: &Value) -> Vec<Candle> {
    let Some(results) = value["results"].as_array() else {
        return Vec::new();
    };
    results
        .iter()
        .filter_map(|b| {
            Some(Candle {
                time: b["t"].as_i64()?,
                open: num(&b["o"])?,
                high: num(&b["h"])?,
                low: num(&b["l"])?,
                close: num(&b["c"])?,
                volume: num(&b["v"]).unwrap_or(0.0),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct StockTile {
    pub ticker: String,
    pub change_pct: Option<f64>,
}

/// `{"items": [{"ticker": "AAPL", "changePct": 1.2}, ...]}`
pub fn parse_heatmap(value: &Value) -> Vec<StockTile> {
    let Some(items) = value["items"].as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|it| {
            Some(StockTile {
                ticker: it["ticker"].as_str()?.to_string(),
                change_pct: num(&it["changePct"]),
            })
        })
        .collect()
}

/// `1.2B`, `3.45M`, `12.3K`.
pub fn format_volume(v: f64) -> String {
    if !v.is_finite() {
        "--".to_string()
    } else if v >= 1e9 {
        format!("{:.2}B", v / 1e9)
    } else if v >= 1e6 {
        format!("{:.2}M", v / 1e6)
    } else if v >= 1e3 {
        format!("{:.1}K", v / 1e3)
    } else {
        format!("{:.0}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn error_envelopes_map_to_chip_states() {
        assert_eq!(
            parse_market_open(&json!({"ok": false, "error": "stocks_api_key_missing"})),
            Err(ApiStatus::KeyMissing)
        );
        assert_eq!(
            parse_market_open(&json!({"ok": false, "error": "stocks_rate_limited"})),
            Err(ApiStatus::RateLimited)
        );
        assert_eq!(
            parse_market_open(&json!({"ok": false, "error": "boom"})),
            Err(ApiStatus::Issue)
        );
        assert_eq!(parse_market_open(&json!({"market": "open"})), Ok(true));
        assert_eq!(parse_market_open(&json!({"market": "closed"})), Ok(false));
    }

    #[test]
    fn fetch_errors_classify() {
        let offline = FetchError::Transport("refused".into());
        assert_eq!(ApiStatus::from_fetch_error(&offline, ApiStatus::Issue), ApiStatus::Offline);
        let limited = FetchError::Status {
            code: 429,
            body: r#"{"ok":false,"error":"stocks_rate_limited"}"#.into(),
        };
        assert_eq!(
            ApiStatus::from_fetch_error(&limited, ApiStatus::Issue),
            ApiStatus::RateLimited
        );
    }

    #[test]
    fn snapshot_change_against_previous_close() {
        let v = json!({"snapshot": {"day": {"o": 190, "h": 195, "l": 188, "c": 194, "v": 5.2e7}, "prevDay": {"c": 200}}});
        let snap = parse_snapshot(&v).unwrap();
        let (diff, pct) = snap.change().unwrap();
        assert_eq!(diff, -6.0);
        assert!((pct + 3.0).abs() < 1e-9);

        let flat = parse_snapshot(&json!({"day": {"c": 10}})).unwrap();
        assert_eq!(flat.last, Some(10.0));
        assert_eq!(flat.change(), None);
        assert_eq!(
            parse_snapshot(&json!({"ok": false, "error": "nope"})),
            Err(ApiStatus::InvalidKey)
        );
    }

    #[test]
    fn bars_drop_non_numeric_prices() {
        let v = json!({"results": [
            {"t": 1, "o": 1, "h": 2, "l": 0.5, "c": 1.5, "v": 100},
            {"t": 2, "o": "x", "h": 2, "l": 0.5, "c": 1.5, "v": 100},
            {"t": 3, "o": 1, "h": 2, "l": 0.5, "c": 1.5}
        ]});
        let bars = parse_bars(&v);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[1].volume, 0.0);
        assert!(parse_bars(&json!({"ok": false})).is_empty());
    }

    #[test]
    fn heatmap_items() {
        let v = json!({"items": [{"ticker": "AAPL", "changePct": 1.25}, {"ticker": "MSFT"}, {"changePct": 3}]});
        let tiles = parse_heatmap(&v);
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[1].change_pct, None);
    }

    #[test]
    fn volume_units() {
        assert_eq!(format_volume(2_500_000_000.0), "2.50B");
        assert_eq!(format_volume(12_340.0), "12.3K");
        assert_eq!(format_volume(999.0), "999");
        assert_eq!(format_volume(f64::NAN), "--");
    }
}
