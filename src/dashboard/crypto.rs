use chrono::{Datelike, TimeZone, Utc};
use crossterm::event::{KeyCode, KeyEvent, MouseEvent};
use ratatui::Frame;
use ratatui::layout::Rect;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

use super::{Context, Dashboard, KeyOutcome, Prompt, Resources, chart_pointer};
use crate::alerts::{AlertEngine, parse_threshold, validate_pair};
use crate::candles::{CandleStore, TimeFrame, UpsertOutcome};
use crate::chart::{ChartMode, ChartRenderer, Indicator, IndicatorFlags, RedrawScheduler};
use crate::config::{Config, CryptoConfig};
use crate::error::{FetchError, ValidationError};
use crate::feeds::binance::{self, FearGreed, HeatTile, StreamMessage, Ticker, Trade};
use crate::host::{HostEvent, ListenerKind, TimerId};
use crate::retry::RetryPolicy;
use crate::websocket::{ReconnectionPolicy, SessionNotice, SocketSession};

const STALE_WINDOW: Duration = Duration::from_secs(30);
const LIVE_WINDOW: Duration = Duration::from_secs(5);
const KLINE_RETRY: Duration = Duration::from_millis(3000);
const KLINE_LIMIT: &str = "500";
const PAN_STEP: i64 = 10;
const PRESSURE_DECAY: f64 = 0.95;
const CVD_DECAY: f64 = 0.98;
const HEATMAP_LIMIT: usize = 10;

/// Uppercases, strips anything but ASCII letters and digits, and appends
/// `USDT` when missing. The base must be 2 to 20 characters.
pub fn normalize_symbol(input: &str) -> Result<String, ValidationError> {
    let mut symbol: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_uppercase();
    if !symbol.ends_with("USDT") {
        symbol.push_str("USDT");
    }
    let base = symbol.len() - "USDT".len();
    if !(2..=20).contains(&base) {
        return Err(ValidationError::BadSymbol(input.trim().to_string()));
    }
    Ok(symbol)
}

/// What the stream URLs are built from; shared with the session closures.
#[derive(Debug, Clone)]
struct StreamTarget {
    ws_base: String,
    symbol: String,
    tf: TimeFrame,
}

impl StreamTarget {
    fn combined_url(&self) -> String {
        let s = self.symbol.to_lowercase();
        format!(
            "{}/stream?streams={s}@trade/{s}@ticker/{s}@depth5@100ms",
            self.ws_base.trim_end_matches('/')
        )
    }

    fn kline_url(&self) -> String {
        format!(
            "{}/ws/{}@kline_{}",
            self.ws_base.trim_end_matches('/'),
            self.symbol.to_lowercase(),
            self.tf.to_api_string()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Source {
    Klines,
    FearGreed,
    Dominance,
    Performance,
}

impl Source {
    fn label(&self) -> &'static str {
        match self {
            Source::Klines => "Klines",
            Source::FearGreed => "Fear & Greed",
            Source::Dominance => "BTC dominance",
            Source::Performance => "Performance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Req {
    Klines { generation: u64, tf: TimeFrame },
    FearGreed,
    Dominance,
    PeriodOpen { round: u64, slot: usize },
    Spot { round: u64 },
    Heat { round: u64, slot: usize },
}

struct Timers {
    watchdog: TimerId,
    live_badge: TimerId,
    decay: TimerId,
    fgi: TimerId,
    dominance: TimerId,
    performance: TimerId,
    heatmap: TimerId,
    surface: TimerId,
}

/// Live trade, 24h and order-book figures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Market {
    pub price: Option<f64>,
    pub prev_price: Option<f64>,
    pub ticker: Option<Ticker>,
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub cvd: f64,
}

impl Market {
    fn apply_trade(&mut self, trade: &Trade) {
        self.prev_price = self.price;
        self.price = Some(trade.price);
        let value = trade.value();
        if trade.is_buy {
            self.buy_volume += value;
            self.cvd += value;
        } else {
            self.sell_volume += value;
            self.cvd -= value;
        }
    }

    fn decay(&mut self) {
        self.buy_volume *= PRESSURE_DECAY;
        self.sell_volume *= PRESSURE_DECAY;
        self.cvd *= CVD_DECAY;
    }

    /// `Some(true)` when the last trade printed above the one before.
    pub fn direction(&self) -> Option<bool> {
        let (now, before) = (self.price?, self.prev_price?);
        (now != before).then_some(now > before)
    }

    /// Buy share of recent traded value, 0..100.
    pub fn buy_share(&self) -> Option<f64> {
        let total = self.buy_volume + self.sell_volume;
        (total > 0.0).then(|| self.buy_volume / total * 100.0)
    }

    pub fn spread(&self) -> Option<f64> {
        Some(self.best_ask? - self.best_bid?)
    }

    /// Distance of the last price from the 24h high and low, percent.
    pub fn range_distance(&self) -> Option<(f64, f64)> {
        let price = self.price?;
        let t = self.ticker?;
        Some((
            binance::percent_change(t.high, price)?,
            binance::percent_change(t.low, price)?,
        ))
    }
}

/// 7d, 30d and year-to-date change of the spot price.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Performance {
    pub week: Option<f64>,
    pub month: Option<f64>,
    pub ytd: Option<f64>,
}

#[derive(Debug, Default)]
struct PerfRound {
    id: u64,
    opens: [Option<f64>; 3],
    spot: Option<f64>,
    outstanding: usize,
    failed: bool,
}

#[derive(Debug, Default)]
struct HeatRound {
    id: u64,
    tiles: Vec<Option<HeatTile>>,
    outstanding: usize,
}

pub struct CryptoState {
    pub cfg: CryptoConfig,
    pub symbol: String,
    pub tf: TimeFrame,
    target: Rc<RefCell<StreamTarget>>,
    main: SocketSession,
    kline: SocketSession,
    res: Resources<Req>,
    timers: Timers,
    retry_timers: HashMap<TimerId, Source>,
    retries: HashMap<Source, RetryPolicy>,
    pub store: CandleStore,
    pub chart: ChartRenderer,
    pub redraw: RedrawScheduler,
    pub alerts: AlertEngine,
    pub market: Market,
    pub fgi: Option<FearGreed>,
    pub dominance: Option<f64>,
    pub performance: Performance,
    perf: PerfRound,
    pub heatmap: Vec<HeatTile>,
    heat: HeatRound,
    pub heat_selected: usize,
    /// Inner chart area from the last paint, in terminal cells.
    pub chart_area: Option<Rect>,
    last_message: Instant,
}

#[derive(Default)]
pub struct CryptoDashboard {
    state: Option<CryptoState>,
}

impl CryptoDashboard {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn state(&self) -> &CryptoState {
        self.state.as_ref().expect("crypto dashboard active")
    }
}

impl CryptoState {
    fn build(ctx: &mut Context) -> Self {
        let cfg = ctx.config.crypto.clone();
        let saved: String = ctx.prefs.get_or("btcSymbol", cfg.default_symbol.clone());
        let symbol = if cfg.is_known_symbol(&saved) {
            saved
        } else {
            tracing::info!(symbol = %saved, "unknown saved symbol, using default");
            cfg.default_symbol.clone()
        };
        let default_tf = TimeFrame::parse(&cfg.default_timeframe).unwrap_or(TimeFrame::OneMinute);
        let tf: TimeFrame = ctx.prefs.get_or("btcTf", default_tf);
        let mode: ChartMode = ctx.prefs.get_or("chartMode", ChartMode::Candle);
        let flags: IndicatorFlags = ctx.prefs.get_or("indicators", IndicatorFlags::default());
        let alerts = AlertEngine::load(&*ctx.prefs, cfg.alerts.history_limit);

        let target = Rc::new(RefCell::new(StreamTarget {
            ws_base: cfg.ws_base.clone(),
            symbol: symbol.clone(),
            tf,
        }));
        let t = target.clone();
        let main = SocketSession::new("binance", ReconnectionPolicy::exponential(), move || {
            t.borrow().combined_url()
        });
        let t = target.clone();
        let kline = SocketSession::new("kline", ReconnectionPolicy::fixed(KLINE_RETRY), move || {
            t.borrow().kline_url()
        });

        let mut res = Resources::default();
        let r = &cfg.refresh;
        let timers = Timers {
            watchdog: res.interval(ctx.host, r.ws_health_ms),
            live_badge: res.interval(ctx.host, r.live_badge_ms),
            decay: res.interval(ctx.host, r.pressure_decay_ms),
            fgi: res.interval(ctx.host, r.fgi_ms),
            dominance: res.interval(ctx.host, r.dominance_ms),
            performance: res.interval(ctx.host, r.performance_ms),
            heatmap: res.interval(ctx.host, r.heatmap_ms),
            surface: res.interval(ctx.host, r.surface_refresh_ms),
        };
        res.listen(ctx.host, ListenerKind::Visibility);
        res.listen(ctx.host, ListenerKind::Pointer);

        let mut redraw = RedrawScheduler::new();
        redraw.set_hidden(!ctx.visible);

        Self {
            cfg,
            symbol,
            tf,
            target,
            main,
            kline,
            res,
            timers,
            retry_timers: HashMap::new(),
            retries: HashMap::new(),
            store: CandleStore::default(),
            chart: ChartRenderer::new(mode, flags),
            redraw,
            alerts,
            market: Market::default(),
            fgi: None,
            dominance: None,
            performance: Performance::default(),
            perf: PerfRound::default(),
            heatmap: Vec::new(),
            heat: HeatRound::default(),
            heat_selected: 0,
            chart_area: None,
            last_message: ctx.now,
        }
    }

    fn start(&mut self, ctx: &mut Context) {
        self.fetch_klines(ctx);
        self.main.connect(ctx.host);
        self.kline.connect(ctx.host);
        self.refresh_side_sources(ctx);
        ctx.status.set_badge(false, "Connecting");
        tracing::info!(symbol = %self.symbol, tf = self.tf.to_api_string(), "crypto dashboard started");
    }

    fn stop(&mut self, ctx: &mut Context) {
        self.main.disconnect(ctx.host);
        self.kline.disconnect(ctx.host);
        self.res.release(ctx.host);
        self.retry_timers.clear();
        ctx.status.set_badge(false, "Offline");
    }

    fn refresh_side_sources(&mut self, ctx: &mut Context) {
        self.fetch_fear_greed(ctx);
        self.fetch_dominance(ctx);
        self.fetch_performance(ctx);
        self.fetch_heatmap(ctx);
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.cfg.api_base.trim_end_matches('/'), path)
    }

    fn fetch_klines(&mut self, ctx: &mut Context) {
        let tf = self.tf;
        let generation = self.store.generation();
        self.cancel_retry(ctx, Source::Klines);
        self.res
            .abort_where(ctx.host, |r| matches!(r, Req::Klines { tf: t, .. } if *t == tf));
        let url = self.api("/api/v3/klines");
        self.res.fetch(
            ctx.host,
            &url,
            &[
                ("symbol", self.symbol.as_str()),
                ("interval", tf.to_api_string()),
                ("limit", KLINE_LIMIT),
            ],
            Req::Klines { generation, tf },
        );
    }

    fn fetch_fear_greed(&mut self, ctx: &mut Context) {
        self.res.abort_where(ctx.host, |r| *r == Req::FearGreed);
        let url = self.cfg.fear_greed_api.clone();
        self.res.fetch(ctx.host, &url, &[], Req::FearGreed);
    }

    fn fetch_dominance(&mut self, ctx: &mut Context) {
        self.res.abort_where(ctx.host, |r| *r == Req::Dominance);
        let url = self.cfg.dominance_api.clone();
        self.res.fetch(ctx.host, &url, &[], Req::Dominance);
    }

    /// Daily opens 7 and 30 days back and on 1 January, plus the spot price.
    fn fetch_performance(&mut self, ctx: &mut Context) {
        self.res
            .abort_where(ctx.host, |r| matches!(r, Req::PeriodOpen { .. } | Req::Spot { .. }));
        let round = self.perf.id + 1;
        self.perf = PerfRound {
            id: round,
            outstanding: 4,
            ..PerfRound::default()
        };

        let now = ctx.wall;
        let year_start = Utc
            .with_ymd_and_hms(now.year(), 1, 1, 0, 0, 0)
            .single()
            .unwrap_or(now);
        let starts = [
            now - chrono::Duration::days(7),
            now - chrono::Duration::days(30),
            year_start,
        ];
        let klines = self.api("/api/v3/klines");
        for (slot, start) in starts.iter().enumerate() {
            let ms = start.timestamp_millis().to_string();
            self.res.fetch(
                ctx.host,
                &klines,
                &[
                    ("symbol", self.symbol.as_str()),
                    ("interval", "1d"),
                    ("startTime", ms.as_str()),
                    ("limit", "1"),
                ],
                Req::PeriodOpen { round, slot },
            );
        }
        let price = self.api("/api/v3/ticker/price");
        self.res
            .fetch(ctx.host, &price, &[("symbol", self.symbol.as_str())], Req::Spot { round });
    }

    fn fetch_heatmap(&mut self, ctx: &mut Context) {
        self.res.abort_where(ctx.host, |r| matches!(r, Req::Heat { .. }));
        let coins: Vec<String> = self
            .cfg
            .heatmap_coins
            .iter()
            .take(HEATMAP_LIMIT)
            .cloned()
            .collect();
        let round = self.heat.id + 1;
        self.heat = HeatRound {
            id: round,
            tiles: vec![None; coins.len()],
            outstanding: coins.len(),
        };
        let url = self.api("/api/v3/ticker/24hr");
        for (slot, coin) in coins.iter().enumerate() {
            self.res
                .fetch(ctx.host, &url, &[("symbol", coin.as_str())], Req::Heat { round, slot });
        }
    }

    fn handle(&mut self, ctx: &mut Context, event: &HostEvent) {
        if self.main.owns(event) {
            if let Some(notice) = self.main.handle(ctx.host, event, ctx.now) {
                self.on_stream(ctx, notice);
            }
            return;
        }
        if self.kline.owns(event) {
            if let Some(notice) = self.kline.handle(ctx.host, event, ctx.now) {
                self.on_kline(ctx, notice);
            }
            return;
        }
        match event {
            HostEvent::Timer { id } => self.on_timer(ctx, *id),
            HostEvent::Fetched { id, result } => {
                if let Some(req) = self.res.complete(*id) {
                    self.on_fetched(ctx, req, result);
                }
            }
            HostEvent::Socket { .. } => {}
        }
    }

    fn on_stream(&mut self, ctx: &mut Context, notice: SessionNotice) {
        match notice {
            SessionNotice::Connected => {
                self.last_message = ctx.now;
                ctx.status.set_badge(true, "Live");
            }
            SessionNotice::Disconnected { retry_in } => {
                ctx.status.set_badge(false, "Offline");
                if let Some(delay) = retry_in {
                    ctx.status.add_error_to_log(
                        format!("Market stream closed, retrying in {}s", delay.as_secs()),
                        ctx.wall,
                    );
                }
            }
            SessionNotice::Message(text) => {
                self.last_message = ctx.now;
                ctx.status.count_message();
                match binance::parse_stream(&text, &self.symbol) {
                    Some(msg) => {
                        self.apply(ctx, msg);
                        ctx.status.touch("market", ctx.wall);
                    }
                    None => tracing::debug!(len = text.len(), "discarded stream payload"),
                }
            }
        }
    }

    fn apply(&mut self, ctx: &mut Context, msg: StreamMessage) {
        match msg {
            StreamMessage::Trade(trade) => {
                self.market.apply_trade(&trade);
                let fired = self.alerts.check(trade.price, ctx.wall);
                if fired.is_empty() {
                    return;
                }
                for alert in &fired {
                    tracing::info!(kind = ?alert.kind, message = %alert.message, "alert fired");
                    if self.cfg.alerts.audio {
                        ctx.notifier.play_tone();
                    }
                    if self.cfg.alerts.desktop {
                        ctx.notifier.notify("Price Alert", &alert.message);
                        ctx.status.toast(alert.message.clone(), ctx.now);
                    }
                }
                self.alerts.save(ctx.prefs);
            }
            StreamMessage::Ticker(ticker) => self.market.ticker = Some(ticker),
            StreamMessage::Depth { best_bid, best_ask } => {
                self.market.best_bid = Some(best_bid);
                self.market.best_ask = Some(best_ask);
            }
        }
    }

    fn on_kline(&mut self, ctx: &mut Context, notice: SessionNotice) {
        let SessionNotice::Message(text) = notice else {
            return;
        };
        self.last_message = ctx.now;
        ctx.status.count_message();
        let Some(update) = binance::parse_kline_event(&text) else {
            tracing::debug!("discarded kline payload");
            return;
        };
        if self.store.len(self.tf) == 0 {
            tracing::debug!("kline before snapshot, skipped");
            return;
        }
        match self.store.upsert(self.tf, update) {
            UpsertOutcome::Discarded => tracing::debug!(time = update.candle.time, "kline discarded"),
            _ => self.redraw.request(),
        }
    }

    fn on_timer(&mut self, ctx: &mut Context, id: TimerId) {
        let t = &self.timers;
        if id == t.watchdog {
            self.watchdog(ctx);
        } else if id == t.live_badge {
            if self.main.is_open() && ctx.now.saturating_duration_since(self.last_message) < LIVE_WINDOW {
                ctx.status.set_badge(true, "Live");
            }
        } else if id == t.decay {
            self.market.decay();
        } else if id == t.fgi {
            if ctx.visible {
                self.fetch_fear_greed(ctx);
            }
        } else if id == t.dominance {
            if ctx.visible {
                self.fetch_dominance(ctx);
            }
        } else if id == t.performance {
            if ctx.visible {
                self.fetch_performance(ctx);
            }
        } else if id == t.heatmap {
            if ctx.visible {
                self.fetch_heatmap(ctx);
            }
        } else if id == t.surface {
            self.chart.replace_surface();
            self.redraw.request();
        } else if let Some(source) = self.retry_timers.remove(&id) {
            self.res.timeout_fired(id);
            tracing::info!(source = source.label(), "retrying");
            match source {
                Source::Klines => self.fetch_klines(ctx),
                Source::FearGreed => self.fetch_fear_greed(ctx),
                Source::Dominance => self.fetch_dominance(ctx),
                Source::Performance => self.fetch_performance(ctx),
            }
        }
    }

    fn watchdog(&mut self, ctx: &mut Context) {
        let silent = ctx.now.saturating_duration_since(self.last_message);
        if silent <= STALE_WINDOW || !(self.main.is_open() || self.kline.is_open()) {
            return;
        }
        tracing::warn!(silent_secs = silent.as_secs(), "stream stale, forcing reconnect");
        ctx.status.set_badge(false, "Reconnecting");
        ctx.status
            .add_error_to_log(format!("No data for {}s, reconnecting", silent.as_secs()), ctx.wall);
        if self.main.is_open() {
            self.main.force_close(ctx.host);
        }
        if self.kline.is_open() {
            self.kline.force_close(ctx.host);
        }
        self.last_message = ctx.now;
    }

    fn on_fetched(
        &mut self,
        ctx: &mut Context,
        req: Req,
        result: &Result<serde_json::Value, FetchError>,
    ) {
        match req {
            Req::Klines { generation, tf } => {
                if generation != self.store.generation() || tf != self.tf {
                    tracing::debug!(tf = tf.to_api_string(), "stale klines dropped");
                    return;
                }
                match result.as_ref().ok().and_then(binance::parse_klines) {
                    Some(candles) => {
                        self.store.replace_series(generation, tf, candles);
                        self.chart.reset_viewport(self.store.len(tf));
                        self.redraw.request();
                        self.source_ok(ctx, Source::Klines);
                    }
                    None => self.source_failed(ctx, Source::Klines, result),
                }
            }
            Req::FearGreed => {
                match result.as_ref().ok().and_then(binance::parse_fear_greed) {
                    Some(fgi) => {
                        self.fgi = Some(fgi);
                        self.source_ok(ctx, Source::FearGreed);
                    }
                    None => self.source_failed(ctx, Source::FearGreed, result),
                }
            }
            Req::Dominance => {
                match result.as_ref().ok().and_then(binance::parse_dominance) {
                    Some(d) => {
                        self.dominance = Some(d);
                        self.source_ok(ctx, Source::Dominance);
                    }
                    None => self.source_failed(ctx, Source::Dominance, result),
                }
            }
            Req::PeriodOpen { round, slot } => {
                if round != self.perf.id {
                    return;
                }
                match result.as_ref().ok().and_then(binance::parse_period_open) {
                    Some(open) => self.perf.opens[slot] = Some(open),
                    None => self.perf.failed = true,
                }
                self.perf_step(ctx, result);
            }
            Req::Spot { round } => {
                if round != self.perf.id {
                    return;
                }
                match result.as_ref().ok().and_then(binance::parse_spot_price) {
                    Some(price) => self.perf.spot = Some(price),
                    None => self.perf.failed = true,
                }
                self.perf_step(ctx, result);
            }
            Req::Heat { round, slot } => {
                if round != self.heat.id {
                    return;
                }
                if let Some(tile) = result.as_ref().ok().and_then(binance::parse_heat_tile) {
                    self.heat.tiles[slot] = Some(tile);
                }
                self.heat.outstanding = self.heat.outstanding.saturating_sub(1);
                if self.heat.outstanding == 0 {
                    self.heatmap = self.heat.tiles.iter().flatten().cloned().collect();
                    self.heat_selected = self.heat_selected.min(self.heatmap.len().saturating_sub(1));
                    ctx.status.touch("heatmap", ctx.wall);
                }
            }
        }
    }

    fn perf_step(&mut self, ctx: &mut Context, last: &Result<serde_json::Value, FetchError>) {
        self.perf.outstanding = self.perf.outstanding.saturating_sub(1);
        if self.perf.outstanding > 0 {
            return;
        }
        let spot = self.perf.spot;
        let change = |open: Option<f64>| binance::percent_change(open?, spot?);
        if self.perf.failed || spot.is_none() {
            self.source_failed(ctx, Source::Performance, last);
            return;
        }
        self.performance = Performance {
            week: change(self.perf.opens[0]),
            month: change(self.perf.opens[1]),
            ytd: change(self.perf.opens[2]),
        };
        self.source_ok(ctx, Source::Performance);
    }

    fn source_ok(&mut self, ctx: &mut Context, source: Source) {
        self.retries.entry(source).or_default().on_success();
        let section = match source {
            Source::Klines => "klines",
            Source::FearGreed => "fgi",
            Source::Dominance => "dominance",
            Source::Performance => "performance",
        };
        ctx.status.touch(section, ctx.wall);
    }

    fn source_failed(
        &mut self,
        ctx: &mut Context,
        source: Source,
        result: &Result<serde_json::Value, FetchError>,
    ) {
        let reason = match result {
            Err(e) => e.to_string(),
            Ok(_) => "unexpected response".to_string(),
        };
        ctx.status
            .add_error_to_log(format!("{}: {}", source.label(), reason), ctx.wall);
        if self.retry_timers.values().any(|s| *s == source) {
            return;
        }
        match self.retries.entry(source).or_default().on_failure() {
            Some(delay) => {
                let id = self.res.timeout(ctx.host, delay);
                self.retry_timers.insert(id, source);
                tracing::warn!(source = source.label(), ?delay, "source failed, retry scheduled");
            }
            None => {
                tracing::warn!(source = source.label(), "source failed, giving up");
                match source {
                    Source::Klines => {}
                    Source::FearGreed => self.fgi = None,
                    Source::Dominance => self.dominance = None,
                    Source::Performance => self.performance = Performance::default(),
                }
            }
        }
    }

    fn cancel_retry(&mut self, ctx: &mut Context, source: Source) {
        let pending: Vec<TimerId> = self
            .retry_timers
            .iter()
            .filter(|(_, s)| **s == source)
            .map(|(id, _)| *id)
            .collect();
        for id in pending {
            self.retry_timers.remove(&id);
            self.res.cancel_timer(ctx.host, id);
        }
    }

    fn switch_symbol(&mut self, ctx: &mut Context, symbol: String) {
        if symbol == self.symbol {
            return;
        }
        tracing::info!(from = %self.symbol, to = %symbol, "switching symbol");
        self.symbol = symbol.clone();
        self.target.borrow_mut().symbol = symbol;
        ctx.prefs.put("btcSymbol", &self.symbol);

        self.market = Market::default();
        self.store.clear();
        self.res.abort_where(ctx.host, |r| matches!(r, Req::Klines { .. }));
        self.retries.remove(&Source::Klines);
        self.chart.reset_viewport(0);
        self.chart.hover(None);
        self.redraw.request();

        self.main.reconnect(ctx.host);
        self.kline.reconnect(ctx.host);
        ctx.status.set_badge(false, "Connecting");
        self.fetch_klines(ctx);
        self.fetch_performance(ctx);
        self.fetch_heatmap(ctx);
    }

    fn set_timeframe(&mut self, ctx: &mut Context, tf: TimeFrame) {
        if tf == self.tf {
            return;
        }
        self.tf = tf;
        self.target.borrow_mut().tf = tf;
        ctx.prefs.put("btcTf", &tf);
        // The stream was on another interval meanwhile, so any kept series has a gap.
        self.store.drop_series(tf);
        self.res.abort_where(ctx.host, |r| matches!(r, Req::Klines { .. }));
        self.retries.remove(&Source::Klines);
        self.chart.reset_viewport(0);
        self.chart.hover(None);
        self.fetch_klines(ctx);
        self.kline.reconnect(ctx.host);
        self.redraw.request();
    }

    fn set_alert(&mut self, ctx: &mut Context, high: f64, low: f64) -> Result<(), ValidationError> {
        validate_pair(high, low)?;
        self.alerts.set_thresholds(high, low);
        self.alerts.save(ctx.prefs);
        tracing::info!(high, low, "alert thresholds set");
        Ok(())
    }

    fn on_key(&mut self, ctx: &mut Context, key: KeyEvent) -> KeyOutcome {
        let len = self.store.len(self.tf);
        match key.code {
            KeyCode::Left => self.set_timeframe(ctx, self.tf.prev()),
            KeyCode::Right => self.set_timeframe(ctx, self.tf.next()),
            KeyCode::Char('c') => {
                self.chart.mode = self.chart.mode.toggle();
                ctx.prefs.put("chartMode", &self.chart.mode);
            }
            KeyCode::Char(c @ '1'..='4') => {
                let which = match c {
                    '1' => Indicator::Sma,
                    '2' => Indicator::Ema,
                    '3' => Indicator::Bollinger,
                    _ => Indicator::Rsi,
                };
                self.chart.flags.toggle(which);
                ctx.prefs.put("indicators", &self.chart.flags);
            }
            KeyCode::Char('+') | KeyCode::Char('=') => self.chart.zoom(false, len),
            KeyCode::Char('-') => self.chart.zoom(true, len),
            KeyCode::Char('[') => self.chart.pan(PAN_STEP, len),
            KeyCode::Char(']') => self.chart.pan(-PAN_STEP, len),
            KeyCode::Char('0') => self.chart.reset_viewport(len),
            KeyCode::Up => self.heat_selected = self.heat_selected.saturating_sub(1),
            KeyCode::Down => {
                if self.heat_selected + 1 < self.heatmap.len() {
                    self.heat_selected += 1;
                }
            }
            KeyCode::Enter => {
                if let Some(tile) = self.heatmap.get(self.heat_selected) {
                    let symbol = tile.symbol.clone();
                    self.switch_symbol(ctx, symbol);
                }
            }
            KeyCode::Char('r') => {
                self.main.reconnect(ctx.host);
                self.kline.reconnect(ctx.host);
                ctx.status.set_badge(false, "Connecting");
                self.fetch_klines(ctx);
            }
            KeyCode::Char('x') => {
                self.alerts.clear();
                self.alerts.save(ctx.prefs);
                ctx.status.toast("Alerts cleared".to_string(), ctx.now);
            }
            KeyCode::Char('s') => {
                return KeyOutcome::Prompt(Prompt {
                    field: "symbol",
                    title: "Symbol (BTC, ETHUSDT, ...)".to_string(),
                    initial: String::new(),
                });
            }
            KeyCode::Char('h') => return KeyOutcome::Prompt(threshold_prompt("high", self.alerts.high())),
            KeyCode::Char('l') => return KeyOutcome::Prompt(threshold_prompt("low", self.alerts.low())),
            _ => return KeyOutcome::Ignored,
        }
        self.redraw.request();
        KeyOutcome::Handled
    }

    fn on_mouse(&mut self, mouse: MouseEvent) {
        let Some(area) = self.chart_area else {
            return;
        };
        let len = self.store.len(self.tf);
        if chart_pointer(&mut self.chart, area, mouse, len) {
            self.redraw.request();
        }
    }

    /// Renders into the retained surface when a redraw is due or the size moved.
    pub fn paint_chart(&mut self, size: (u32, u32)) {
        if self.redraw.take() || self.chart.needs_resize(size) {
            self.chart.render(size, &self.store, self.tf);
        }
    }
}

fn threshold_prompt(field: &'static str, current: f64) -> Prompt {
    Prompt {
        field,
        title: format!("{} alert price (0 disables)", if field == "high" { "High" } else { "Low" }),
        initial: if current > 0.0 {
            format!("{:.2}", current)
        } else {
            String::new()
        },
    }
}

impl Dashboard for CryptoDashboard {
    fn id(&self) -> &'static str {
        "crypto"
    }

    fn title(&self) -> &'static str {
        "Crypto"
    }

    fn help(&self) -> &'static str {
        "'←/→': Timeframe | 'c': Chart | '1-4': SMA/EMA/BB/RSI | '+/-' '[/]': Zoom/Pan | 's': Symbol | 'h/l/x': Alerts | '↑/↓ Enter': Heatmap"
    }

    fn init(&mut self, ctx: &mut Context) {
        if let Some(mut old) = self.state.take() {
            old.stop(ctx);
        }
        let mut state = CryptoState::build(ctx);
        state.start(ctx);
        self.state = Some(state);
    }

    fn destroy(&mut self, ctx: &mut Context) {
        if let Some(mut state) = self.state.take() {
            state.stop(ctx);
            tracing::info!("crypto dashboard stopped");
        }
    }

    /// Alert delivery settings apply at once; feeds and periods need a reload.
    fn sync_config(&mut self, config: &Config) {
        if let Some(state) = self.state.as_mut() {
            state.cfg.alerts = config.crypto.alerts.clone();
            state.alerts.set_history_limit(config.crypto.alerts.history_limit);
        }
    }

    fn on_event(&mut self, ctx: &mut Context, event: &HostEvent) {
        if let Some(state) = self.state.as_mut() {
            state.handle(ctx, event);
        }
    }

    fn on_visibility(&mut self, ctx: &mut Context, visible: bool) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.redraw.set_hidden(!visible);
        if visible {
            state.refresh_side_sources(ctx);
            state.redraw.request();
        }
    }

    fn on_key(&mut self, ctx: &mut Context, key: KeyEvent) -> KeyOutcome {
        match self.state.as_mut() {
            Some(state) => state.on_key(ctx, key),
            None => KeyOutcome::Ignored,
        }
    }

    fn on_submit(&mut self, ctx: &mut Context, field: &str, text: &str) -> Result<(), ValidationError> {
        let Some(state) = self.state.as_mut() else {
            return Ok(());
        };
        match field {
            "symbol" => {
                let symbol = normalize_symbol(text)?;
                if !state.cfg.is_known_symbol(&symbol) {
                    return Err(ValidationError::BadSymbol(text.trim().to_string()));
                }
                state.switch_symbol(ctx, symbol);
                Ok(())
            }
            "high" => {
                let high = parse_threshold(text)?;
                let low = state.alerts.low();
                state.set_alert(ctx, high, low)
            }
            "low" => {
                let low = parse_threshold(text)?;
                let high = state.alerts.high();
                state.set_alert(ctx, high, low)
            }
            _ => Ok(()),
        }
    }

    fn on_mouse(&mut self, _ctx: &mut Context, mouse: MouseEvent) {
        if let Some(state) = self.state.as_mut() {
            state.on_mouse(mouse);
        }
    }

    fn frame_pending(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.redraw.is_pending())
    }

    fn draw(&mut self, f: &mut Frame, area: Rect, now: Instant) {
        if let Some(state) = self.state.as_mut() {
            crate::ui::crypto::render(f, area, state, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use super::*;
    use crate::chart::{Shape, Tone};
    use crate::host::{Host, RequestId, SocketEvent, SocketId};
    use crossterm::event::KeyModifiers;
    use serde_json::{Value, json};

    fn deliver(h: &mut Harness, d: &mut CryptoDashboard, event: HostEvent) {
        h.host.settle(&event);
        d.on_event(&mut h.ctx(), &event);
    }

    fn respond(h: &mut Harness, d: &mut CryptoDashboard, id: RequestId, body: Value) {
        deliver(h, d, HostEvent::Fetched { id, result: Ok(body) });
    }

    fn socket_event(h: &mut Harness, d: &mut CryptoDashboard, id: SocketId, event: SocketEvent) {
        deliver(h, d, HostEvent::Socket { id, event });
    }

    fn main_socket(h: &Harness) -> SocketId {
        h.host.socket_for("/stream?streams=").expect("market stream open")
    }

    fn kline_socket(h: &Harness) -> SocketId {
        h.host.socket_for("@kline_").expect("kline stream open")
    }

    fn klines_body(times: &[i64]) -> Value {
        Value::Array(
            times
                .iter()
                .map(|t| json!([t, "100", "110", "90", "105", "5"]))
                .collect(),
        )
    }

    fn started() -> (Harness, CryptoDashboard) {
        let mut h = Harness::new();
        let mut d = CryptoDashboard::new();
        d.init(&mut h.ctx());
        (h, d)
    }

    fn key(d: &mut CryptoDashboard, h: &mut Harness, code: KeyCode) -> KeyOutcome {
        d.on_key(&mut h.ctx(), KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn init_wires_streams_and_sources_and_destroy_releases_them() {
        let (mut h, mut d) = started();
        let main = h.host.sockets[&main_socket(&h)].clone();
        assert_eq!(
            main,
            "wss://stream.binance.com:9443/stream?streams=btcusdt@trade/btcusdt@ticker/btcusdt@depth5@100ms"
        );
        assert!(h.host.sockets[&kline_socket(&h)].ends_with("/ws/btcusdt@kline_1m"));
        assert!(h.host.request_for("klines?symbol=BTCUSDT&interval=1m&limit=500").is_some());
        assert!(h.host.request_for("fng").is_some());
        assert!(h.host.request_for("coingecko").is_some());
        assert!(h.host.request_for("ticker/price?symbol=BTCUSDT").is_some());
        assert_eq!(
            h.host.fetched.iter().filter(|u| u.contains("ticker/24hr")).count(),
            10
        );
        assert_eq!(h.host.counts().timers, 8);
        assert_eq!(h.host.counts().listeners, 2);
        assert_eq!(h.status.badge.label, "Connecting");

        d.destroy(&mut h.ctx());
        assert!(h.host.counts().is_empty(), "{:?}", h.host.counts());
        assert_eq!(h.status.badge.label, "Offline");
        d.destroy(&mut h.ctx());
    }

    #[test]
    fn unknown_saved_symbol_falls_back_to_default() {
        let mut h = Harness::new();
        h.ctx().prefs.put("btcSymbol", &"NOPEUSDT");
        h.ctx().prefs.put("btcTf", &TimeFrame::OneHour);
        let mut d = CryptoDashboard::new();
        d.init(&mut h.ctx());
        assert_eq!(d.state().symbol, "BTCUSDT");
        assert_eq!(d.state().tf, TimeFrame::OneHour);
        assert!(h.host.sockets[&kline_socket(&h)].ends_with("btcusdt@kline_1h"));
    }

    #[test]
    fn klines_snapshot_then_stream_updates() {
        let (mut h, mut d) = started();
        let id = h.host.request_for("interval=1m").unwrap();
        respond(&mut h, &mut d, id, klines_body(&[0, 60_000, 120_000]));
        assert_eq!(d.state().store.len(TimeFrame::OneMinute), 3);
        assert!(d.frame_pending());

        let k = kline_socket(&h);
        socket_event(&mut h, &mut d, k, SocketEvent::Opened);
        let msg = r#"{"k":{"t":180000,"o":"105","h":"106","l":"104","c":"105.5","v":"1","x":true}}"#;
        socket_event(&mut h, &mut d, k, SocketEvent::Message(msg.into()));
        assert_eq!(d.state().store.len(TimeFrame::OneMinute), 4);
        socket_event(&mut h, &mut d, k, SocketEvent::Message("garbage".into()));
        assert_eq!(d.state().store.len(TimeFrame::OneMinute), 4);
    }

    #[test]
    fn late_klines_for_previous_symbol_are_dropped() {
        let (mut h, mut d) = started();
        let old = h.host.request_for("symbol=BTCUSDT&interval=1m").unwrap();
        d.on_submit(&mut h.ctx(), "symbol", "eth").unwrap();
        assert_eq!(d.state().symbol, "ETHUSDT");
        assert!(!h.host.requests.contains_key(&old));
        let saved: String = h.ctx().prefs.get_or("btcSymbol", String::new());
        assert_eq!(saved, "ETHUSDT");
        assert!(h.host.socket_for("ethusdt@trade").is_some());
        assert!(h.host.socket_for("btcusdt").is_none());

        respond(&mut h, &mut d, old, klines_body(&[0, 60_000]));
        assert_eq!(d.state().store.len(TimeFrame::OneMinute), 0);

        let new = h.host.request_for("symbol=ETHUSDT&interval=1m").unwrap();
        respond(&mut h, &mut d, new, klines_body(&[0, 60_000]));
        assert_eq!(d.state().store.len(TimeFrame::OneMinute), 2);
    }

    #[test]
    fn symbol_input_is_validated() {
        let (mut h, mut d) = started();
        assert_eq!(
            d.on_submit(&mut h.ctx(), "symbol", "x"),
            Err(ValidationError::BadSymbol("x".into()))
        );
        assert_eq!(
            d.on_submit(&mut h.ctx(), "symbol", "zzzz"),
            Err(ValidationError::BadSymbol("zzzz".into()))
        );
        assert_eq!(d.state().symbol, "BTCUSDT");
        assert_eq!(normalize_symbol(" sol-usdt "), Ok("SOLUSDT".into()));
        assert_eq!(normalize_symbol("doge"), Ok("DOGEUSDT".into()));
        assert!(normalize_symbol("USDT").is_err());
        assert!(normalize_symbol(&"A".repeat(21)).is_err());
    }

    #[test]
    fn trades_drive_pressure_and_alerts_fire_once() {
        let (mut h, mut d) = started();
        d.on_submit(&mut h.ctx(), "high", "65,000").unwrap();
        assert_eq!(
            d.on_submit(&mut h.ctx(), "low", "70000"),
            Err(ValidationError::Inverted)
        );
        let s = main_socket(&h);
        socket_event(&mut h, &mut d, s, SocketEvent::Opened);
        assert_eq!(h.status.badge.label, "Live");

        for price in ["64990", "65010", "65100", "65050"] {
            let msg = format!(
                r#"{{"stream":"btcusdt@trade","data":{{"p":"{}","q":"1","m":false}}}}"#,
                price
            );
            socket_event(&mut h, &mut d, s, SocketEvent::Message(msg));
        }
        assert_eq!(h.notifier.tones, 1);
        assert_eq!(h.notifier.notes, vec!["Price Alert: High alert hit @ $65010.00"]);
        assert_eq!(d.state().market.price, Some(65_050.0));
        assert_eq!(d.state().market.direction(), Some(false));
        assert!(d.state().market.buy_share().unwrap() > 99.9);
        let history: Value = h.ctx().prefs.get_or("alertHistory", Value::Null);
        assert_eq!(history.as_array().unwrap().len(), 1);
    }

    #[test]
    fn stale_stream_is_forced_to_reconnect() {
        let (mut h, mut d) = started();
        let s = main_socket(&h);
        socket_event(&mut h, &mut d, s, SocketEvent::Opened);
        let watchdog = h.host.timer_with(Duration::from_millis(15_000), true).unwrap();

        h.advance(Duration::from_secs(20));
        deliver(&mut h, &mut d, HostEvent::Timer { id: watchdog });
        assert!(h.host.sockets.contains_key(&s));

        h.advance(Duration::from_secs(15));
        deliver(&mut h, &mut d, HostEvent::Timer { id: watchdog });
        assert!(h.host.closed.contains(&s));
        assert_eq!(h.status.badge.label, "Reconnecting");
        assert_eq!(h.host.timeouts().len(), 1);
        assert_eq!(h.host.timeouts()[0].1, Duration::from_millis(1000));
    }

    #[test]
    fn hidden_skips_refresh_and_visible_refetches_once() {
        let (mut h, mut d) = started();
        let heat = h.host.timer_with(Duration::from_millis(30_000), true).unwrap();
        let before = h.host.fetched.len();

        h.visible = false;
        d.on_visibility(&mut h.ctx(), false);
        deliver(&mut h, &mut d, HostEvent::Timer { id: heat });
        assert_eq!(h.host.fetched.len(), before);
        key(&mut d, &mut h, KeyCode::Char('c'));
        assert!(!d.frame_pending());

        h.visible = true;
        d.on_visibility(&mut h.ctx(), true);
        let refetched = &h.host.fetched[before..];
        assert!(refetched.iter().any(|u| u.contains("fng")));
        assert!(refetched.iter().any(|u| u.contains("coingecko")));
        assert!(refetched.iter().any(|u| u.contains("ticker/price")));
        assert_eq!(refetched.iter().filter(|u| u.contains("ticker/24hr")).count(), 10);
        assert!(d.frame_pending());
    }

    #[test]
    fn failed_source_retries_with_growing_delay() {
        let (mut h, mut d) = started();
        for expected in [60, 120] {
            let id = h.host.request_for("fng").unwrap();
            deliver(
                &mut h,
                &mut d,
                HostEvent::Fetched {
                    id,
                    result: Err(FetchError::Transport("down".into())),
                },
            );
            let (timer, delay) = *h.host.timeouts().last().unwrap();
            assert_eq!(delay, Duration::from_secs(expected));
            deliver(&mut h, &mut d, HostEvent::Timer { id: timer });
        }
        let id = h.host.request_for("fng").unwrap();
        respond(
            &mut h,
            &mut d,
            id,
            json!({"data":[{"value":"20","value_classification":"Extreme Fear"}]}),
        );
        assert_eq!(d.state().fgi.as_ref().map(|f| f.value), Some(20));
        assert!(h.host.timeouts().is_empty());
        assert!(h.status.error_log.len() >= 2);
    }

    #[test]
    fn performance_and_heatmap_rounds() {
        let (mut h, mut d) = started();
        let opens: Vec<RequestId> = {
            let mut ids: Vec<_> = h
                .host
                .requests
                .iter()
                .filter(|(_, u)| u.contains("startTime"))
                .map(|(id, _)| *id)
                .collect();
            ids.sort_by_key(|id| id.0);
            ids
        };
        assert_eq!(opens.len(), 3);
        for (id, open) in opens.into_iter().zip(["100", "50", "200"]) {
            respond(&mut h, &mut d, id, json!([[0, open, "0", "0", "0", "0"]]));
        }
        let spot = h.host.request_for("ticker/price").unwrap();
        respond(&mut h, &mut d, spot, json!({"price": "110"}));
        let perf = d.state().performance;
        assert!((perf.week.unwrap() - 10.0).abs() < 1e-9);
        assert!((perf.month.unwrap() - 120.0).abs() < 1e-9);
        assert!((perf.ytd.unwrap() + 45.0).abs() < 1e-9);

        let mut heat: Vec<(RequestId, String)> = h
            .host
            .requests
            .iter()
            .filter(|(_, u)| u.contains("ticker/24hr"))
            .map(|(id, u)| (*id, u.clone()))
            .collect();
        heat.sort_by_key(|(id, _)| id.0);
        for (i, (id, url)) in heat.into_iter().enumerate() {
            let symbol = url.rsplit('=').next().unwrap().to_string();
            let body = if i == 3 {
                json!({"code": -1121})
            } else {
                json!({"symbol": symbol, "priceChangePercent": format!("{}", i)})
            };
            respond(&mut h, &mut d, id, body);
        }
        assert_eq!(d.state().heatmap.len(), 9);
        assert_eq!(d.state().heatmap[0].symbol, "BTCUSDT");

        key(&mut d, &mut h, KeyCode::Down);
        key(&mut d, &mut h, KeyCode::Enter);
        assert_eq!(d.state().symbol, "ETHUSDT");
    }

    #[test]
    fn chart_preferences_persist() {
        let (mut h, mut d) = started();
        key(&mut d, &mut h, KeyCode::Char('c'));
        key(&mut d, &mut h, KeyCode::Char('4'));
        key(&mut d, &mut h, KeyCode::Right);
        d.destroy(&mut h.ctx());

        let mut again = CryptoDashboard::new();
        again.init(&mut h.ctx());
        let s = again.state();
        assert_eq!(s.chart.mode, ChartMode::Line);
        assert!(s.chart.flags.rsi);
        assert_eq!(s.tf, TimeFrame::FiveMinutes);
    }

    #[test]
    fn alert_keys_open_prompts() {
        let (mut h, mut d) = started();
        match key(&mut d, &mut h, KeyCode::Char('h')) {
            KeyOutcome::Prompt(p) => {
                assert_eq!(p.field, "high");
                assert!(p.initial.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
        d.on_submit(&mut h.ctx(), "high", "100").unwrap();
        match key(&mut d, &mut h, KeyCode::Char('h')) {
            KeyOutcome::Prompt(p) => assert_eq!(p.initial, "100.00"),
            other => panic!("unexpected {:?}", other),
        }
        key(&mut d, &mut h, KeyCode::Char('x'));
        assert_eq!(d.state().alerts.high(), 0.0);
        assert_eq!(key(&mut d, &mut h, KeyCode::Char('?')), KeyOutcome::Ignored);
    }

    fn priced_klines(n: i64, base: f64) -> Value {
        Value::Array(
            (0..n)
                .map(|i| {
                    let close = base * (1.0 + (i as f64 * 0.4).sin() * 0.02);
                    json!([
                        i * 60_000,
                        close.to_string(),
                        (close * 1.01).to_string(),
                        (close * 0.99).to_string(),
                        close.to_string(),
                        "3"
                    ])
                })
                .collect(),
        )
    }

    #[test]
    fn overlays_recompute_after_symbol_switch() {
        let (mut h, mut d) = started();
        key(&mut d, &mut h, KeyCode::Char('1'));
        let btc = h.host.request_for("symbol=BTCUSDT&interval=1m").unwrap();
        respond(&mut h, &mut d, btc, priced_klines(60, 30_000.0));
        d.state.as_mut().unwrap().paint_chart((200, 120));

        d.on_submit(&mut h.ctx(), "symbol", "eth").unwrap();
        let eth = h.host.request_for("symbol=ETHUSDT&interval=1m").unwrap();
        respond(&mut h, &mut d, eth, priced_klines(60, 1_000.0));
        let state = d.state.as_mut().unwrap();
        state.paint_chart((200, 120));

        let ys: Vec<f64> = state
            .chart
            .surface()
            .shapes()
            .iter()
            .filter_map(|s| match s {
                Shape::Line { y1, y2, tone: Tone::Sma, .. } => Some([*y1, *y2]),
                _ => None,
            })
            .flatten()
            .collect();
        assert!(!ys.is_empty());
        assert!(ys.iter().all(|y| (0.0..=120.0).contains(y)));
    }

    #[test]
    fn returning_to_a_timeframe_refetches_it() {
        let (mut h, mut d) = started();
        let first = h.host.request_for("interval=1m").unwrap();
        respond(&mut h, &mut d, first, klines_body(&[0, 60_000, 120_000]));
        let one_minute = |h: &Harness| h.host.fetched.iter().filter(|u| u.contains("interval=1m&")).count();
        assert_eq!(one_minute(&h), 1);

        key(&mut d, &mut h, KeyCode::Right);
        let five = h.host.request_for("interval=5m").unwrap();
        key(&mut d, &mut h, KeyCode::Left);
        assert_eq!(d.state().tf, TimeFrame::OneMinute);
        assert_eq!(one_minute(&h), 2);
        assert!(!h.host.requests.contains_key(&five));

        // The old series is gone until the new snapshot lands.
        assert_eq!(d.state().store.len(TimeFrame::OneMinute), 0);
        let k = kline_socket(&h);
        socket_event(&mut h, &mut d, k, SocketEvent::Opened);
        let msg = r#"{"k":{"t":600000,"o":"105","h":"106","l":"104","c":"105.5","v":"1","x":true}}"#;
        socket_event(&mut h, &mut d, k, SocketEvent::Message(msg.into()));
        assert_eq!(d.state().store.len(TimeFrame::OneMinute), 0);

        let again = h.host.request_for("interval=1m").unwrap();
        respond(&mut h, &mut d, again, klines_body(&[0, 60_000, 120_000, 180_000]));
        assert_eq!(d.state().store.len(TimeFrame::OneMinute), 4);
    }

    #[test]
    fn failed_klines_are_retried() {
        let (mut h, mut d) = started();
        let id = h.host.request_for("interval=1m").unwrap();
        deliver(
            &mut h,
            &mut d,
            HostEvent::Fetched {
                id,
                result: Err(FetchError::Transport("down".into())),
            },
        );
        assert!(h.status.error_log.iter().any(|e| e.contains("Klines")));
        let (timer, delay) = *h.host.timeouts().last().unwrap();
        assert_eq!(delay, Duration::from_secs(60));

        deliver(&mut h, &mut d, HostEvent::Timer { id: timer });
        let retry = h.host.request_for("interval=1m").unwrap();
        assert_ne!(retry, id);
        respond(&mut h, &mut d, retry, klines_body(&[0, 60_000]));
        assert_eq!(d.state().store.len(TimeFrame::OneMinute), 2);
        assert!(h.host.timeouts().is_empty());
    }

    #[test]
    fn pending_klines_retry_is_dropped_on_symbol_switch() {
        let (mut h, mut d) = started();
        let id = h.host.request_for("interval=1m").unwrap();
        deliver(
            &mut h,
            &mut d,
            HostEvent::Fetched {
                id,
                result: Err(FetchError::Transport("down".into())),
            },
        );
        let (timer, _) = *h.host.timeouts().last().unwrap();
        d.on_submit(&mut h.ctx(), "symbol", "eth").unwrap();
        assert!(!h.host.timers.contains_key(&timer));

        let eth = h.host.request_for("symbol=ETHUSDT&interval=1m").unwrap();
        respond(&mut h, &mut d, eth, klines_body(&[0, 60_000]));
        assert_eq!(d.state().store.len(TimeFrame::OneMinute), 2);
    }

    #[test]
    fn config_reload_applies_alert_settings() {
        let (mut h, mut d) = started();
        assert!(!d.state().alerts.is_armed());
        d.on_submit(&mut h.ctx(), "low", "10").unwrap();
        assert!(d.state().alerts.is_armed());

        let mut config = Config::default();
        config.crypto.alerts.history_limit = 3;
        config.crypto.alerts.audio = false;
        d.sync_config(&config);
        assert!(!d.state().cfg.alerts.audio);
        assert_eq!(d.state().cfg.alerts.history_limit, 3);
    }
}
