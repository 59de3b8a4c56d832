use serde_json::Value;

use super::num;
use crate::candles::{Candle, CandleUpdate};

/// Decoded combined-stream payload for the active symbol.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Trade(Trade),
    Ticker(Ticker),
    Depth { best_bid: f64, best_ask: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Trade {
    pub price: f64,
    pub quantity: f64,
    /// Taker was the buyer (`m == false`).
    pub is_buy: bool,
}

impl Trade {
    pub fn value(&self) -> f64 {
        self.price * self.quantity
    }
}

/// 24h rolling statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ticker {
    pub high: f64,
    pub low: f64,
    pub change_pct: f64,
    pub change_abs: f64,
    pub quote_volume: f64,
    pub trades: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FearGreed {
    pub value: u32,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeatTile {
    pub symbol: String,
    pub change_pct: f64,
}

/// `[[openTime, open, high, low, close, volume, ...], ...]`
pub fn parse_klines(value: &Value) -> Option<Vec<Candle>> {
    let rows = value.as_array()?;
    rows.iter().map(parse_kline_row).collect()
}

fn parse_kline_row(row: &Value) -> Option<Candle> {
    Some(Candle {
        time: row.get(0)?.as_i64()?,
        open: num(row.get(1)?)?,
        high: num(row.get(2)?)?,
        low: num(row.get(3)?)?,
        close: num(row.get(4)?)?,
        volume: num(row.get(5)?)?,
    })
}

/// `{"stream": "btcusdt@trade", "data": {...}}`; streams for other symbols
/// are ignored.
pub fn parse_stream(text: &str, symbol: &str) -> Option<StreamMessage> {
    let msg: Value = serde_json::from_str(text).ok()?;
    let stream = msg["stream"].as_str()?;
    let data = msg.get("data")?;
    let (sym, kind) = stream.split_once('@')?;
    if !sym.eq_ignore_ascii_case(symbol) {
        return None;
    }
    match kind {
        "trade" => Some(StreamMessage::Trade(Trade {
            price: num(&data["p"])?,
            quantity: num(&data["q"])?,
            is_buy: data["m"] == Value::Bool(false),
        })),
        "ticker" => Some(StreamMessage::Ticker(Ticker {
            high: num(&data["h"])?,
            low: num(&data["l"])?,
            change_pct: num(&data["P"])?,
            change_abs: num(&data["p"])?,
            quote_volume: num(&data["q"])?,
            trades: num(&data["n"]).map(|n| n.max(0.0) as u64).unwrap_or(0),
        })),
        kind if kind.starts_with("depth") => {
            let best_bid = num(&data["bids"][0][0])?;
            let best_ask = num(&data["asks"][0][0])?;
            Some(StreamMessage::Depth { best_bid, best_ask })
        }
        _ => None,
    }
}

/// `{"k": {"t", "o", "h", "l", "c", "v", "x"}}`
pub fn parse_kline_event(text: &str) -> Option<CandleUpdate> {
    let msg: Value = serde_json::from_str(text).ok()?;
    let k = msg.get("k")?;
    Some(CandleUpdate {
        candle: Candle {
            time: k["t"].as_i64()?,
            open: num(&k["o"])?,
            high: num(&k["h"])?,
            low: num(&k["l"])?,
            close: num(&k["c"])?,
            volume: num(&k["v"])?,
        },
        is_final: k["x"].as_bool().unwrap_or(false),
    })
    .filter(|u| u.candle.is_well_formed())
}

/// `{"data": [{"value": "54", "value_classification": "Neutral"}]}`
pub fn parse_fear_greed(value: &Value) -> Option<FearGreed> {
    let entry = &value["data"][0];
    let n = num(&entry["value"])?;
    Some(FearGreed {
        value: n.clamp(0.0, 100.0) as u32,
        label: entry["value_classification"].as_str().unwrap_or("").to_string(),
    })
}

/// BTC share of total market cap, percent.
pub fn parse_dominance(value: &Value) -> Option<f64> {
    num(&value["data"]["market_cap_percentage"]["btc"])
}

/// Opening price of the single daily kline returned for a `startTime` query.
pub fn parse_period_open(value: &Value) -> Option<f64> {
    num(&value[0][1])
}

/// `{"symbol": "BTCUSDT", "price": "..."}`
pub fn parse_spot_price(value: &Value) -> Option<f64> {
    num(&value["price"])
}

/// `{"symbol": "ETHUSDT", "priceChangePercent": "-1.2", ...}`
pub fn parse_heat_tile(value: &Value) -> Option<HeatTile> {
    Some(HeatTile {
        symbol: value["symbol"].as_str()?.to_string(),
        change_pct: num(&value["priceChangePercent"])?,
    })
}

/// Percent move from `from` to `to`.
pub fn percent_change(from: f64, to: f64) -> Option<f64> {
    (from != 0.0 && from.is_finite() && to.is_finite()).then(|| (to - from) / from * 100.0)
}
