use crossterm::event::{KeyCode, KeyEvent};
use ratatui::Frame;
use ratatui::layout::Rect;
use serde_json::Value;
use std::time::Instant;

use super::{Context, Dashboard, KeyOutcome, Resources};
use crate::config::WeatherConfig;
use crate::error::FetchError;
use crate::feeds::weather::{self, Forecast, WeatherCache};
use crate::host::{HostEvent, ListenerKind, TimerId};

const CACHE_KEY: &str = "weatherCache";
const FORECAST_DAYS: usize = 7;

/// Which base of the fallback chain a request went to.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Attempt(usize);

pub struct WeatherState {
    pub cfg: WeatherConfig,
    bases: Vec<String>,
    res: Resources<Attempt>,
    refresh: TimerId,
    pub forecast: Option<Forecast>,
    pub cached: Option<WeatherCache>,
    pub selected_day: usize,
    pub failed: bool,
}

#[derive(Default)]
pub struct WeatherDashboard {
    state: Option<WeatherState>,
}

impl WeatherDashboard {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn state(&self) -> &WeatherState {
        self.state.as_ref().expect("weather dashboard active")
    }
}

impl WeatherState {
    /// Starts a fresh pass over the base list, dropping any pass in flight.
    fn fetch(&mut self, ctx: &mut Context) {
        if !ctx.visible {
            return;
        }
        self.res.abort_where(ctx.host, |_| true);
        self.try_base(ctx, 0);
    }

    fn try_base(&mut self, ctx: &mut Context, index: usize) {
        let Some(base) = self.bases.get(index) else {
            self.on_exhausted(ctx);
            return;
        };
        let params = weather::forecast_query(self.cfg.lat, self.cfg.lon);
        let query: Vec<(&str, &str)> = params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let base = base.clone();
        self.res.fetch(ctx.host, &base, &query, Attempt(index));
    }

    fn on_exhausted(&mut self, ctx: &mut Context) {
        self.failed = true;
        tracing::warn!(sources = self.bases.len(), "{}", weather::ALL_SOURCES_FAILED);
        ctx.status
            .add_error_to_log(format!("Weather: {}", weather::ALL_SOURCES_FAILED), ctx.wall);
    }

    fn on_fetched(&mut self, ctx: &mut Context, attempt: Attempt, result: &Result<Value, FetchError>) {
        let parsed = match result {
            Ok(body) => weather::parse_forecast(body).ok_or_else(|| "weather_decode".to_string()),
            Err(e) => Err(weather::failure_tag(e)),
        };
        match parsed {
            Ok(forecast) => {
                let cache = WeatherCache::from_current(
                    &forecast.current,
                    self.cfg.lat,
                    self.cfg.lon,
                    ctx.wall.timestamp_millis(),
                );
                ctx.prefs.put(CACHE_KEY, &cache);
                self.cached = Some(cache);
                self.selected_day = self.selected_day.min(forecast.daily.len().saturating_sub(1));
                self.forecast = Some(forecast);
                self.failed = false;
                ctx.status.set_badge(true, "Updated");
                ctx.status.touch("weather", ctx.wall);
            }
            Err(tag) => {
                tracing::debug!(base = %self.bases[attempt.0], %tag, "weather source failed");
                self.try_base(ctx, attempt.0 + 1);
            }
        }
    }

    fn handle(&mut self, ctx: &mut Context, event: &HostEvent) {
        match event {
            HostEvent::Timer { id } if *id == self.refresh => self.fetch(ctx),
            HostEvent::Fetched { id, result } => {
                if let Some(attempt) = self.res.complete(*id) {
                    self.on_fetched(ctx, attempt, result);
                }
            }
            _ => {}
        }
    }

    fn day_count(&self) -> usize {
        self.forecast
            .as_ref()
            .map_or(0, |f| f.daily.len().min(FORECAST_DAYS))
    }
}

impl Dashboard for WeatherDashboard {
    fn id(&self) -> &'static str {
        "weather"
    }

    fn title(&self) -> &'static str {
        "Weather"
    }

    fn help(&self) -> &'static str {
        "'←/→': Select Day | 'r': Refresh"
    }

    fn init(&mut self, ctx: &mut Context) {
        if let Some(mut old) = self.state.take() {
            old.res.release(ctx.host);
        }
        let cfg = ctx.config.weather.clone();
        let mut res = Resources::default();
        let refresh = res.interval(ctx.host, cfg.refresh_ms);
        res.listen(ctx.host, ListenerKind::Visibility);

        let now_ms = ctx.wall.timestamp_millis();
        let cached = ctx
            .prefs
            .get_or::<Option<WeatherCache>>(CACHE_KEY, None)
            .filter(|c| c.is_usable(now_ms, cfg.lat, cfg.lon));

        let mut state = WeatherState {
            bases: cfg.bases(),
            cfg,
            res,
            refresh,
            forecast: None,
            cached,
            selected_day: 0,
            failed: false,
        };
        state.fetch(ctx);
        ctx.status.set_badge(true, "Weather");
        tracing::info!(location = %state.cfg.name, "weather dashboard started");
        self.state = Some(state);
    }

    fn destroy(&mut self, ctx: &mut Context) {
        if let Some(mut state) = self.state.take() {
            state.res.release(ctx.host);
            tracing::info!("weather dashboard stopped");
        }
    }

    fn on_event(&mut self, ctx: &mut Context, event: &HostEvent) {
        if let Some(state) = self.state.as_mut() {
            state.handle(ctx, event);
        }
    }

    fn on_visibility(&mut self, ctx: &mut Context, visible: bool) {
        if let (Some(state), true) = (self.state.as_mut(), visible) {
            state.fetch(ctx);
        }
    }

    fn on_key(&mut self, ctx: &mut Context, key: KeyEvent) -> KeyOutcome {
        let Some(state) = self.state.as_mut() else {
            return KeyOutcome::Ignored;
        };
        match key.code {
            KeyCode::Left => state.selected_day = state.selected_day.saturating_sub(1),
            KeyCode::Right => {
                if state.selected_day + 1 < state.day_count() {
                    state.selected_day += 1;
                }
            }
            KeyCode::Char('r') => state.fetch(ctx),
            _ => return KeyOutcome::Ignored,
        }
        KeyOutcome::Handled
    }

    fn draw(&mut self, f: &mut Frame, area: Rect, now: Instant) {
        if let Some(state) = self.state.as_ref() {
            crate::ui::weather::render(f, area, state, now);
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

    fn body() -> Value {
        json!({
            "current": {
                "time": "2024-05-01T14:15",
                "temperature_2m": 12.6,
                "apparent_temperature": 10.2,
                "relative_humidity_2m": 81,
                "weather_code": 61,
                "wind_speed_10m": 23.4,
                "wind_direction_10m": 250,
                "surface_pressure": 1008.7
            },
            "hourly": {"time": [], "temperature_2m": [], "weather_code": [], "precipitation_probability": []},
            "daily": {
                "time": ["2024-05-01", "2024-05-02", "2024-05-03"],
                "weather_code": [61, 0, 3],
                "temperature_2m_max": [14.2, 18.0, 16.0],
                "temperature_2m_min": [7.9, 6.1, 8.0]
            }
        })
    }

    fn deliver(h: &mut Harness, d: &mut WeatherDashboard, id: RequestId, result: Result<Value, FetchError>) {
        let event = HostEvent::Fetched { id, result };
        h.host.settle(&event);
        d.on_event(&mut h.ctx(), &event);
    }

    fn with_fallbacks() -> Harness {
        let mut h = Harness::new();
        h.config.weather.api_base = "https://primary.test/v1/forecast".into();
        h.config.weather.api_fallback_bases = vec![
            "https://backup.test/v1/forecast".into(),
            " ".into(),
            "https://primary.test/v1/forecast".into(),
        ];
        h
    }

    #[test]
    fn walks_the_fallback_chain_in_order() {
        let mut h = with_fallbacks();
        let mut d = WeatherDashboard::new();
        d.init(&mut h.ctx());
        assert_eq!(h.status.badge.label, "Weather");

        let first = h.host.request_for("primary.test").unwrap();
        assert!(h.host.requests[&first].contains("latitude=56.462&longitude=-2.9707"));
        deliver(
            &mut h,
            &mut d,
            first,
            Err(FetchError::Status { code: 502, body: String::new() }),
        );
        let second = h.host.request_for("backup.test").unwrap();
        deliver(&mut h, &mut d, second, Ok(body()));

        let state = d.state();
        assert!(!state.failed);
        assert_eq!(state.forecast.as_ref().unwrap().current.code, 61);
        assert_eq!(h.status.badge.label, "Updated");
        assert!(h.status.stamps().any(|(s, _)| s == "weather"));
        assert_eq!(h.host.fetched.len(), 2);
    }

    #[test]
    fn every_source_failing_is_reported_once() {
        let mut h = with_fallbacks();
        let mut d = WeatherDashboard::new();
        d.init(&mut h.ctx());
        let first = h.host.request_for("primary.test").unwrap();
        deliver(&mut h, &mut d, first, Err(FetchError::Transport("dns".into())));
        let second = h.host.request_for("backup.test").unwrap();
        deliver(&mut h, &mut d, second, Ok(json!({"error": true})));

        assert!(d.state().failed);
        assert_eq!(h.status.error_log.len(), 1);
        assert!(h.status.error_log[0].contains(weather::ALL_SOURCES_FAILED));
        assert!(h.host.counts().requests == 0);
    }

    #[test]
    fn cache_restores_only_when_fresh_and_local() {
        let mut h = Harness::new();
        let mut d = WeatherDashboard::new();
        d.init(&mut h.ctx());
        let id = h.host.request_for("open-meteo").unwrap();
        deliver(&mut h, &mut d, id, Ok(body()));
        d.destroy(&mut h.ctx());
        assert!(h.host.counts().is_empty());

        d.init(&mut h.ctx());
        assert_eq!(d.state().cached.as_ref().unwrap().cur_temp, 13);
        d.destroy(&mut h.ctx());

        h.advance(std::time::Duration::from_secs(3_601));
        d.init(&mut h.ctx());
        assert!(d.state().cached.is_none());
        d.destroy(&mut h.ctx());

        h.config.weather.lat = 51.5;
        d.init(&mut h.ctx());
        assert!(d.state().cached.is_none());
    }

    #[test]
    fn day_selection_is_bounded() {
        let mut h = Harness::new();
        let mut d = WeatherDashboard::new();
        d.init(&mut h.ctx());
        let right = KeyEvent::new(KeyCode::Right, KeyModifiers::NONE);
        d.on_key(&mut h.ctx(), right);
        assert_eq!(d.state().selected_day, 0);

        let id = h.host.request_for("open-meteo").unwrap();
        deliver(&mut h, &mut d, id, Ok(body()));
        for _ in 0..5 {
            d.on_key(&mut h.ctx(), right);
        }
        assert_eq!(d.state().selected_day, 2);
        d.on_key(&mut h.ctx(), KeyEvent::new(KeyCode::Left, KeyModifiers::NONE));
        assert_eq!(d.state().selected_day, 1);
    }

    #[test]
    fn hidden_refresh_is_skipped() {
        let mut h = Harness::new();
        let mut d = WeatherDashboard::new();
        d.init(&mut h.ctx());
        let timer = h
            .host
            .timer_with(std::time::Duration::from_millis(600_000), true)
            .unwrap();
        h.visible = false;
        d.on_event(&mut h.ctx(), &HostEvent::Timer { id: timer });
        assert_eq!(h.host.fetched.len(), 1);

        h.visible = true;
        d.on_visibility(&mut h.ctx(), true);
        assert_eq!(h.host.fetched.len(), 2);
        assert_eq!(h.host.counts().requests, 1);
    }
}
