use crossterm::event::{KeyCode, KeyEvent, MouseEvent};
use ratatui::Frame;
use ratatui::layout::Rect;
use serde_json::Value;
use std::time::Instant;

use super::{Context, Dashboard, KeyOutcome, Prompt, Resources, chart_pointer};
use crate::candles::{CandleStore, TimeFrame};
use crate::chart::{ChartMode, ChartRenderer, IndicatorFlags, RedrawScheduler};
use crate::config::StocksConfig;
use crate::error::{FetchError, ValidationError};
use crate::feeds::stocks::{self, ApiStatus, Snapshot, StockTile};
use crate::host::{HostEvent, ListenerKind, TimerId};

pub const API_KEY_ENV: &str = "STOCKS_API_KEY";
const MAX_BARS: &str = "500";
const DEFAULT_VISIBLE: usize = 120;
const PAN_STEP: i64 = 10;

/// Trimmed, upper-cased ticker of 1 to 10 letters, digits, `.`, `-` or `^`.
pub fn normalize_ticker(input: &str) -> Result<String, ValidationError> {
    let ticker = input.trim().to_uppercase();
    let valid = (1..=10).contains(&ticker.len())
        && ticker
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^'));
    if valid {
        Ok(ticker)
    } else {
        Err(ValidationError::BadSymbol(input.trim().to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Req {
    MarketStatus,
    Snapshot,
    Bars {
        generation: u64,
        tf: TimeFrame,
        reset_view: bool,
    },
    Heatmap,
}

struct Timers {
    snapshot: TimerId,
    market: TimerId,
    heatmap: TimerId,
    bars: TimerId,
}

pub struct StocksState {
    pub cfg: StocksConfig,
    pub ticker: String,
    pub tf: TimeFrame,
    api_key: Option<String>,
    res: Resources<Req>,
    timers: Timers,
    pub store: CandleStore,
    pub chart: ChartRenderer,
    pub redraw: RedrawScheduler,
    pub api: ApiStatus,
    pub market_open: Option<bool>,
    pub snapshot: Option<Snapshot>,
    pub heatmap: Vec<StockTile>,
    pub heat_selected: usize,
    pub chart_area: Option<Rect>,
}

#[derive(Default)]
pub struct StocksDashboard {
    state: Option<StocksState>,
}

impl StocksDashboard {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn state(&self) -> &StocksState {
        self.state.as_ref().expect("stocks dashboard active")
    }
}

impl StocksState {
    fn build(ctx: &mut Context) -> Self {
        let cfg = ctx.config.stocks.clone();
        let saved: String = ctx.prefs.get_or("stocksTicker", cfg.default_ticker.clone());
        let ticker = normalize_ticker(&saved).unwrap_or_else(|_| cfg.default_ticker.clone());
        let tf: TimeFrame = ctx.prefs.get_or("stocksTf", TimeFrame::OneMinute);
        let mode: ChartMode = ctx.prefs.get_or("stocksChartMode", ChartMode::Candle);

        let api_key = if cfg.allow_client_api_key {
            Some(cfg.api_key.trim().to_string())
                .filter(|k| !k.is_empty())
                .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()))
        } else {
            None
        };

        let mut res = Resources::default();
        let r = &cfg.refresh;
        let timers = Timers {
            snapshot: res.interval(ctx.host, r.snapshot_ms),
            market: res.interval(ctx.host, r.market_status_ms),
            heatmap: res.interval(ctx.host, r.heatmap_ms),
            bars: res.interval(ctx.host, r.bars_ms),
        };
        res.listen(ctx.host, ListenerKind::Visibility);
        res.listen(ctx.host, ListenerKind::Pointer);

        let mut redraw = RedrawScheduler::new();
        redraw.set_hidden(!ctx.visible);
        let api = if api_key.is_some() {
            ApiStatus::Checking
        } else {
            ApiStatus::KeyMissing
        };

        Self {
            cfg,
            ticker,
            tf,
            api_key,
            res,
            timers,
            store: CandleStore::default(),
            chart: ChartRenderer::new(mode, IndicatorFlags::default()),
            redraw,
            api,
            market_open: None,
            snapshot: None,
            heatmap: Vec::new(),
            heat_selected: 0,
            chart_area: None,
        }
    }

    fn refresh_all(&mut self, ctx: &mut Context, reset_view: bool) {
        self.fetch_market_status(ctx);
        self.fetch_snapshot(ctx);
        self.fetch_bars(ctx, reset_view);
        self.fetch_heatmap(ctx);
    }

    /// GET `<api_base><path>` with the client key appended when allowed.
    fn get(&mut self, ctx: &mut Context, path: &str, mut params: Vec<(&'static str, String)>, req: Req) {
        if let Some(key) = &self.api_key {
            params.push(("apiKey", key.clone()));
        }
        let url = format!("{}{}", self.cfg.api_base.trim_end_matches('/'), path);
        let query: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        self.res.fetch(ctx.host, &url, &query, req);
    }

    fn fetch_market_status(&mut self, ctx: &mut Context) {
        self.res.abort_where(ctx.host, |r| *r == Req::MarketStatus);
        self.get(ctx, "/marketstatus", Vec::new(), Req::MarketStatus);
    }

    fn fetch_snapshot(&mut self, ctx: &mut Context) {
        self.res.abort_where(ctx.host, |r| *r == Req::Snapshot);
        let params = vec![("ticker", self.ticker.clone())];
        self.get(ctx, "/snapshot", params, Req::Snapshot);
    }

    fn fetch_bars(&mut self, ctx: &mut Context, reset_view: bool) {
        let tf = self.tf;
        let mut reset_view = reset_view;
        self.res.abort_where(ctx.host, |r| match r {
            Req::Bars { tf: t, reset_view: pending, .. } if *t == tf => {
                reset_view |= *pending;
                true
            }
            _ => false,
        });
        let (mult, span) = tf.aggregate();
        let params = vec![
            ("ticker", self.ticker.clone()),
            ("mult", mult.to_string()),
            ("span", span.to_string()),
            ("limit", MAX_BARS.to_string()),
        ];
        let generation = self.store.generation();
        self.get(ctx, "/aggs", params, Req::Bars { generation, tf, reset_view });
    }

    fn fetch_heatmap(&mut self, ctx: &mut Context) {
        self.res.abort_where(ctx.host, |r| *r == Req::Heatmap);
        let params = vec![("tickers", self.cfg.heatmap_list().join(","))];
        self.get(ctx, "/heatmap", params, Req::Heatmap);
    }

    fn handle(&mut self, ctx: &mut Context, event: &HostEvent) {
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

    fn on_timer(&mut self, ctx: &mut Context, id: TimerId) {
        if !ctx.visible {
            return;
        }
        if id == self.timers.snapshot {
            self.fetch_snapshot(ctx);
        } else if id == self.timers.market {
            self.fetch_market_status(ctx);
        } else if id == self.timers.heatmap {
            self.fetch_heatmap(ctx);
        } else if id == self.timers.bars {
            self.fetch_bars(ctx, false);
        }
    }

    fn on_fetched(&mut self, ctx: &mut Context, req: Req, result: &Result<Value, FetchError>) {
        match req {
            Req::MarketStatus => match result {
                Ok(body) => match stocks::parse_market_open(body) {
                    Ok(open) => {
                        self.api = ApiStatus::Detected;
                        self.market_open = Some(open);
                        ctx.status.touch("market", ctx.wall);
                    }
                    Err(status) => self.api = status,
                },
                Err(e) => self.api = ApiStatus::from_fetch_error(e, ApiStatus::Issue),
            },
            Req::Snapshot => {
                let parsed = match result {
                    Ok(body) => stocks::parse_snapshot(body),
                    Err(e) => Err(ApiStatus::from_fetch_error(e, ApiStatus::InvalidKey)),
                };
                match parsed {
                    Ok(snapshot) => {
                        self.api = ApiStatus::Detected;
                        self.snapshot = Some(snapshot);
                        ctx.status.set_badge(true, "Stocks");
                        ctx.status.touch("snapshot", ctx.wall);
                    }
                    Err(status) => {
                        self.api = status;
                        ctx.status.set_badge(false, "Stocks Offline");
                        ctx.status.add_error_to_log(
                            format!("Snapshot {}: {}", self.ticker, status.label()),
                            ctx.wall,
                        );
                    }
                }
            }
            Req::Bars {
                generation,
                tf,
                reset_view,
            } => match result {
                Ok(body) => {
                    let bars = stocks::parse_bars(body);
                    if !self.store.replace_series(generation, tf, bars) {
                        tracing::debug!(tf = tf.to_api_string(), "stale bars dropped");
                        return;
                    }
                    if reset_view && tf == self.tf {
                        self.chart
                            .reset_viewport_to(DEFAULT_VISIBLE, self.store.len(tf));
                    }
                    self.redraw.request();
                    ctx.status.touch("bars", ctx.wall);
                }
                Err(e) => ctx
                    .status
                    .add_error_to_log(format!("Bars {}: {}", self.ticker, e), ctx.wall),
            },
            Req::Heatmap => match result {
                Ok(body) => {
                    self.heatmap = stocks::parse_heatmap(body);
                    self.heat_selected = self.heat_selected.min(self.heatmap.len().saturating_sub(1));
                    ctx.status.touch("heatmap", ctx.wall);
                }
                Err(e) => tracing::debug!(error = %e, "heatmap fetch failed"),
            },
        }
    }

    fn switch_ticker(&mut self, ctx: &mut Context, ticker: String) {
        if ticker == self.ticker {
            return;
        }
        tracing::info!(from = %self.ticker, to = %ticker, "switching ticker");
        self.ticker = ticker;
        ctx.prefs.put("stocksTicker", &self.ticker);
        self.store.clear();
        self.snapshot = None;
        self.res.abort_where(ctx.host, |r| matches!(r, Req::Bars { .. }));
        self.chart.reset_viewport(0);
        self.chart.hover(None);
        self.redraw.request();
        self.fetch_snapshot(ctx);
        self.fetch_bars(ctx, true);
        self.fetch_heatmap(ctx);
    }

    fn set_timeframe(&mut self, ctx: &mut Context, tf: TimeFrame) {
        if tf == self.tf {
            return;
        }
        self.tf = tf;
        ctx.prefs.put("stocksTf", &tf);
        let len = self.store.len(tf);
        self.chart.reset_viewport_to(DEFAULT_VISIBLE, len);
        self.chart.hover(None);
        self.res
            .abort_where(ctx.host, |r| matches!(r, Req::Bars { tf: t, .. } if *t != tf));
        self.fetch_bars(ctx, true);
        self.redraw.request();
    }

    fn on_key(&mut self, ctx: &mut Context, key: KeyEvent) -> KeyOutcome {
        let len = self.store.len(self.tf);
        match key.code {
            KeyCode::Left => self.set_timeframe(ctx, self.tf.prev()),
            KeyCode::Right => self.set_timeframe(ctx, self.tf.next()),
            KeyCode::Char('c') => {
                self.chart.mode = self.chart.mode.toggle();
                ctx.prefs.put("stocksChartMode", &self.chart.mode);
            }
            KeyCode::Char('+') | KeyCode::Char('=') => self.chart.zoom(false, len),
            KeyCode::Char('-') => self.chart.zoom(true, len),
            KeyCode::Char('[') => self.chart.pan(PAN_STEP, len),
            KeyCode::Char(']') => self.chart.pan(-PAN_STEP, len),
            KeyCode::Char('0') => self.chart.reset_viewport_to(DEFAULT_VISIBLE, len),
            KeyCode::Up => self.heat_selected = self.heat_selected.saturating_sub(1),
            KeyCode::Down => {
                if self.heat_selected + 1 < self.heatmap.len() {
                    self.heat_selected += 1;
                }
            }
            KeyCode::Enter => {
                if let Some(tile) = self.heatmap.get(self.heat_selected) {
                    let ticker = tile.ticker.clone();
                    self.switch_ticker(ctx, ticker);
                }
            }
            KeyCode::Char('r') => self.refresh_all(ctx, false),
            KeyCode::Char('s') => {
                return KeyOutcome::Prompt(Prompt {
                    field: "ticker",
                    title: "Ticker (AAPL, MSFT, ...)".to_string(),
                    initial: String::new(),
                });
            }
            _ => return KeyOutcome::Ignored,
        }
        self.redraw.request();
        KeyOutcome::Handled
    }

    pub fn paint_chart(&mut self, size: (u32, u32)) {
        if self.redraw.take() || self.chart.needs_resize(size) {
            self.chart.render(size, &self.store, self.tf);
        }
    }
}

impl Dashboard for StocksDashboard {
    fn id(&self) -> &'static str {
        "stocks"
    }

    fn title(&self) -> &'static str {
        "Stocks"
    }

    fn help(&self) -> &'static str {
        "'←/→': Timeframe | 'c': Chart | '+/-' '[/]': Zoom/Pan | 's': Ticker | '↑/↓ Enter': Heatmap | 'r': Refresh"
    }

    fn init(&mut self, ctx: &mut Context) {
        if let Some(mut old) = self.state.take() {
            old.res.release(ctx.host);
        }
        let mut state = StocksState::build(ctx);
        ctx.status.set_badge(false, "Stocks");
        state.refresh_all(ctx, true);
        tracing::info!(ticker = %state.ticker, "stocks dashboard started");
        self.state = Some(state);
    }

    fn destroy(&mut self, ctx: &mut Context) {
        if let Some(mut state) = self.state.take() {
            state.res.release(ctx.host);
            ctx.status.set_badge(false, "Offline");
            tracing::info!("stocks dashboard stopped");
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
            state.refresh_all(ctx, false);
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
        if let (Some(state), "ticker") = (self.state.as_mut(), field) {
            let ticker = normalize_ticker(text)?;
            state.switch_ticker(ctx, ticker);
        }
        Ok(())
    }

    fn on_mouse(&mut self, _ctx: &mut Context, mouse: MouseEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        let Some(area) = state.chart_area else {
            return;
        };
        let len = state.store.len(state.tf);
        if chart_pointer(&mut state.chart, area, mouse, len) {
            state.redraw.request();
        }
    }

    fn frame_pending(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.redraw.is_pending())
    }

    fn draw(&mut self, f: &mut Frame, area: Rect, now: Instant) {
        if let Some(state) = self.state.as_mut() {
            crate::ui::stocks::render(f, area, state, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use super::*;
    use crate::host::{Host, RequestId};
    use crossterm::event::KeyModifiers;
    use serde_json::json;
    use std::time::Duration;

    fn deliver(h: &mut Harness, d: &mut StocksDashboard, id: RequestId, result: Result<Value, FetchError>) {
        let event = HostEvent::Fetched { id, result };
        h.host.settle(&event);
        d.on_event(&mut h.ctx(), &event);
    }

    fn bars(n: i64) -> Value {
        let results: Vec<Value> = (0..n)
            .map(|i| json!({"t": i * 60_000, "o": 10, "h": 12, "l": 9, "c": 11, "v": 1000}))
            .collect();
        json!({ "results": results })
    }

    fn started() -> (Harness, StocksDashboard) {
        let mut h = Harness::new();
        let mut d = StocksDashboard::new();
        d.init(&mut h.ctx());
        (h, d)
    }

    #[test]
    fn init_polls_the_proxy_and_destroy_releases() {
        let (mut h, mut d) = started();
        let base = "http://127.0.0.1:8888/api/stocks";
        assert!(h.host.fetched.contains(&format!("{}/marketstatus", base)));
        assert!(h.host.fetched.contains(&format!("{}/snapshot?ticker=AAPL", base)));
        assert!(h
            .host
            .fetched
            .contains(&format!("{}/aggs?ticker=AAPL&mult=1&span=minute&limit=500", base)));
        assert!(h.host.fetched.iter().any(|u| u.starts_with(&format!(
            "{}/heatmap?tickers=AAPL,MSFT,NVDA",
            base
        ))));
        assert_eq!(d.state().api, ApiStatus::KeyMissing);
        assert_eq!(h.host.counts().timers, 4);

        d.destroy(&mut h.ctx());
        assert!(h.host.counts().is_empty());
    }

    #[test]
    fn client_key_is_sent_only_when_allowed() {
        let mut h = Harness::new();
        h.config.stocks.api_key = "secret".into();
        let mut d = StocksDashboard::new();
        d.init(&mut h.ctx());
        assert!(h.host.fetched.iter().all(|u| !u.contains("apiKey")));
        d.destroy(&mut h.ctx());

        h.config.stocks.allow_client_api_key = true;
        d.init(&mut h.ctx());
        assert_eq!(d.state().api, ApiStatus::Checking);
        assert!(h.host.request_for("/marketstatus?apiKey=secret").is_some());
        assert!(h.host.request_for("snapshot?ticker=AAPL&apiKey=secret").is_some());
    }

    #[test]
    fn chip_and_badge_follow_responses() {
        let (mut h, mut d) = started();
        let status = h.host.request_for("/marketstatus").unwrap();
        deliver(
            &mut h,
            &mut d,
            status,
            Ok(json!({"ok": false, "error": "stocks_rate_limited"})),
        );
        assert_eq!(d.state().api, ApiStatus::RateLimited);

        let snap = h.host.request_for("/snapshot").unwrap();
        deliver(&mut h, &mut d, snap, Err(FetchError::Transport("refused".into())));
        assert_eq!(d.state().api, ApiStatus::Offline);
        assert_eq!(h.status.badge.label, "Stocks Offline");

        d.on_key(&mut h.ctx(), KeyEvent::new(KeyCode::Char('r'), KeyModifiers::NONE));
        let snap = h.host.request_for("/snapshot").unwrap();
        deliver(
            &mut h,
            &mut d,
            snap,
            Ok(json!({"snapshot": {"day": {"c": 190, "h": 191, "l": 180, "o": 181, "v": 1e6}, "prevDay": {"c": 200}}})),
        );
        assert_eq!(d.state().api, ApiStatus::Detected);
        assert!(h.status.badge.live);
        assert_eq!(h.status.badge.label, "Stocks");
        assert_eq!(d.state().snapshot.unwrap().last, Some(190.0));
    }

    #[test]
    fn periodic_bars_keep_the_users_view() {
        let (mut h, mut d) = started();
        let first = h.host.request_for("/aggs").unwrap();
        deliver(&mut h, &mut d, first, Ok(bars(300)));
        assert_eq!(d.state().chart.viewport().visible_count, 120);

        d.on_key(&mut h.ctx(), KeyEvent::new(KeyCode::Char('-'), KeyModifiers::NONE));
        let zoomed = d.state().chart.viewport().visible_count;
        assert!(zoomed > 120);

        let timer = h.host.timer_with(Duration::from_millis(20_000), true).unwrap();
        let event = HostEvent::Timer { id: timer };
        d.on_event(&mut h.ctx(), &event);
        let again = h.host.request_for("/aggs").unwrap();
        assert_ne!(again, first);
        deliver(&mut h, &mut d, again, Ok(bars(301)));
        assert_eq!(d.state().chart.viewport().visible_count, zoomed);
        assert_eq!(d.state().store.len(TimeFrame::OneMinute), 301);
    }

    #[test]
    fn ticker_switch_clears_and_drops_late_bars() {
        let (mut h, mut d) = started();
        let old = h.host.request_for("aggs?ticker=AAPL").unwrap();
        assert_eq!(
            d.on_submit(&mut h.ctx(), "ticker", "not a ticker"),
            Err(ValidationError::BadSymbol("not a ticker".into()))
        );
        d.on_submit(&mut h.ctx(), "ticker", " msft ").unwrap();
        assert_eq!(d.state().ticker, "MSFT");
        let saved: String = h.ctx().prefs.get_or("stocksTicker", String::new());
        assert_eq!(saved, "MSFT");

        deliver(&mut h, &mut d, old, Ok(bars(50)));
        assert_eq!(d.state().store.len(TimeFrame::OneMinute), 0);
        let new = h.host.request_for("aggs?ticker=MSFT").unwrap();
        deliver(&mut h, &mut d, new, Ok(bars(50)));
        assert_eq!(d.state().store.len(TimeFrame::OneMinute), 50);
    }

    #[test]
    fn timeframe_maps_to_aggregate_query() {
        let (mut h, mut d) = started();
        for _ in 0..4 {
            d.on_key(&mut h.ctx(), KeyEvent::new(KeyCode::Right, KeyModifiers::NONE));
        }
        assert_eq!(d.state().tf, TimeFrame::FourHours);
        assert!(h.host.request_for("mult=4&span=hour").is_some());
        let saved: TimeFrame = h.ctx().prefs.get_or("stocksTf", TimeFrame::OneMinute);
        assert_eq!(saved, TimeFrame::FourHours);
    }

    #[test]
    fn returning_to_a_timeframe_refetches_it() {
        let (mut h, mut d) = started();
        let first = h.host.request_for("/aggs").unwrap();
        deliver(&mut h, &mut d, first, Ok(bars(30)));
        let minute = |h: &Harness| {
            h.host
                .fetched
                .iter()
                .filter(|u| u.contains("mult=1&span=minute"))
                .count()
        };
        assert_eq!(minute(&h), 1);

        d.on_key(&mut h.ctx(), KeyEvent::new(KeyCode::Right, KeyModifiers::NONE));
        let five = h.host.request_for("mult=5&span=minute").unwrap();
        d.on_key(&mut h.ctx(), KeyEvent::new(KeyCode::Left, KeyModifiers::NONE));
        assert_eq!(minute(&h), 2);
        assert!(!h.host.requests.contains_key(&five));

        let again = h.host.request_for("mult=1&span=minute").unwrap();
        deliver(&mut h, &mut d, again, Ok(bars(31)));
        assert_eq!(d.state().store.len(TimeFrame::OneMinute), 31);
    }

    #[test]
    fn hidden_skips_polls() {
        let (mut h, mut d) = started();
        let before = h.host.fetched.len();
        h.visible = false;
        d.on_visibility(&mut h.ctx(), false);
        let timer = h.host.timer_with(Duration::from_millis(10_000), true).unwrap();
        d.on_event(&mut h.ctx(), &HostEvent::Timer { id: timer });
        assert_eq!(h.host.fetched.len(), before);

        h.visible = true;
        d.on_visibility(&mut h.ctx(), true);
        assert_eq!(h.host.fetched.len(), before + 4);
    }

    #[test]
    fn ticker_rules() {
        assert_eq!(normalize_ticker("brk.b"), Ok("BRK.B".into()));
        assert_eq!(normalize_ticker("^gspc"), Ok("^GSPC".into()));
        assert!(normalize_ticker("").is_err());
        assert!(normalize_ticker("ABCDEFGHIJK").is_err());
    }
}
