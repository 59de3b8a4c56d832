use crossterm::event::{KeyCode, KeyEvent};
use ratatui::Frame;
use ratatui::layout::Rect;
use serde_json::Value;
use std::time::{Duration, Instant};

use super::{Context, Dashboard, KeyOutcome, Resources};
use crate::config::{Config, PcConfig};
use crate::error::FetchError;
use crate::feeds::sensors::{self, PcReadings};
use crate::host::{HostEvent, ListenerKind, TimerId};

const SAMPLE_LOG_EVERY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcLink {
    Waiting,
    Online,
    CheckSensors,
    Offline,
}

impl PcLink {
    pub fn label(&self) -> &'static str {
        match self {
            PcLink::Waiting => "CONNECTING...",
            PcLink::Online => "PC ONLINE",
            PcLink::CheckSensors => "PC ONLINE (CHECK SENSOR NAMES)",
            PcLink::Offline => "PC OFFLINE",
        }
    }
}

pub struct PcState {
    pub cfg: PcConfig,
    res: Resources<()>,
    poll: TimerId,
    pub readings: Option<PcReadings>,
    pub link: PcLink,
    last_sample_log: Option<Instant>,
}

#[derive(Default)]
pub struct PcDashboard {
    state: Option<PcState>,
}

impl PcDashboard {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn state(&self) -> &PcState {
        self.state.as_ref().expect("pc dashboard active")
    }
}

impl PcState {
    fn fetch(&mut self, ctx: &mut Context) {
        if !ctx.visible {
            return;
        }
        self.res.abort_where(ctx.host, |_| true);
        let endpoint = self.cfg.endpoint.clone();
        self.res.fetch(ctx.host, &endpoint, &[], ());
    }

    fn on_fetched(&mut self, ctx: &mut Context, result: &Result<Value, FetchError>) {
        let tree = match result {
            Ok(tree) => tree,
            Err(e) => {
                tracing::debug!(error = %e, endpoint = %self.cfg.endpoint, "sensor poll failed");
                self.link = PcLink::Offline;
                self.readings = None;
                return;
            }
        };
        let readings = PcReadings::from_tree(tree);
        self.link = if readings.sensors_missing() {
            self.log_sample(ctx.now, tree);
            PcLink::CheckSensors
        } else {
            PcLink::Online
        };
        self.readings = Some(readings);
        ctx.status.touch("pc", ctx.wall);
    }

    fn log_sample(&mut self, now: Instant, tree: &Value) {
        if !self.cfg.debug {
            return;
        }
        if self
            .last_sample_log
            .is_some_and(|at| now.duration_since(at) < SAMPLE_LOG_EVERY)
        {
            return;
        }
        self.last_sample_log = Some(now);
        tracing::warn!(
            sample = ?sensors::sample_labels(tree),
            "expected CPU/GPU sensor labels not found"
        );
    }
}

impl Dashboard for PcDashboard {
    fn id(&self) -> &'static str {
        "pc"
    }

    fn title(&self) -> &'static str {
        "PC Monitor"
    }

    fn help(&self) -> &'static str {
        "'r': Poll Now"
    }

    fn init(&mut self, ctx: &mut Context) {
        if let Some(mut old) = self.state.take() {
            old.res.release(ctx.host);
        }
        let cfg = ctx.config.pc.clone();
        let mut res = Resources::default();
        let poll = res.interval(ctx.host, cfg.poll_ms);
        res.listen(ctx.host, ListenerKind::Visibility);
        let mut state = PcState {
            cfg,
            res,
            poll,
            readings: None,
            link: PcLink::Waiting,
            last_sample_log: None,
        };
        state.fetch(ctx);
        ctx.status.set_badge(true, "Polling");
        tracing::info!(endpoint = %state.cfg.endpoint, "pc dashboard started");
        self.state = Some(state);
    }

    fn destroy(&mut self, ctx: &mut Context) {
        if let Some(mut state) = self.state.take() {
            state.res.release(ctx.host);
            tracing::info!("pc dashboard stopped");
        }
    }

    /// Endpoint and debug flag apply to the next poll; a new period needs a reload.
    fn sync_config(&mut self, config: &Config) {
        if let Some(state) = self.state.as_mut() {
            state.cfg.endpoint = config.pc.endpoint.clone();
            state.cfg.debug = config.pc.debug;
        }
    }

    fn on_event(&mut self, ctx: &mut Context, event: &HostEvent) {
        let Some(state) = self.state.as_mut() else {
            return;
        };
        match event {
            HostEvent::Timer { id } if *id == state.poll => state.fetch(ctx),
            HostEvent::Fetched { id, result } => {
                if state.res.complete(*id).is_some() {
                    state.on_fetched(ctx, result);
                }
            }
            _ => {}
        }
    }

    fn on_visibility(&mut self, ctx: &mut Context, visible: bool) {
        if let (Some(state), true) = (self.state.as_mut(), visible) {
            state.fetch(ctx);
        }
    }

    fn on_key(&mut self, ctx: &mut Context, key: KeyEvent) -> KeyOutcome {
        match (self.state.as_mut(), key.code) {
            (Some(state), KeyCode::Char('r')) => {
                state.fetch(ctx);
                KeyOutcome::Handled
            }
            _ => KeyOutcome::Ignored,
        }
    }

    fn draw(&mut self, f: &mut Frame, area: Rect, now: Instant) {
        if let Some(state) = self.state.as_ref() {
            crate::ui::pc::render(f, area, state, now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::Harness;
    use super::*;
    use crate::host::{Host, RequestId};
    use serde_json::json;

    fn tree(cpu: &str) -> Value {
        json!({"Text": "Sensor", "Children": [
            {"Text": "CPU Package", "Type": "Temperature", "Value": cpu, "Children": []},
            {"Text": "GPU Core", "Type": "Temperature", "Value": "48,0 °C", "Children": []},
            {"Text": "CPU Total", "Type": "Load", "Value": "12 %", "Children": []}
        ]})
    }

    fn deliver(h: &mut Harness, d: &mut PcDashboard, id: RequestId, result: Result<Value, FetchError>) {
        let event = HostEvent::Fetched { id, result };
        h.host.settle(&event);
        d.on_event(&mut h.ctx(), &event);
    }

    fn poll(h: &mut Harness, d: &mut PcDashboard) -> RequestId {
        let timer = h.host.timer_with(Duration::from_millis(2_000), true).unwrap();
        d.on_event(&mut h.ctx(), &HostEvent::Timer { id: timer });
        h.host.request_for("data.json").unwrap()
    }

    #[test]
    fn status_follows_each_poll() {
        let mut h = Harness::new();
        let mut d = PcDashboard::new();
        d.init(&mut h.ctx());
        assert_eq!(h.status.badge.label, "Polling");
        assert_eq!(d.state().link, PcLink::Waiting);

        let id = h.host.request_for("data.json").unwrap();
        deliver(&mut h, &mut d, id, Ok(tree("72,5 °C")));
        assert_eq!(d.state().link, PcLink::Online);
        let readings = d.state().readings.unwrap();
        assert_eq!(readings.cpu_temp, Some(73));
        assert!(readings.is_gaming());

        let id = poll(&mut h, &mut d);
        deliver(&mut h, &mut d, id, Err(FetchError::Transport("refused".into())));
        assert_eq!(d.state().link, PcLink::Offline);
        assert!(d.state().readings.is_none());

        let id = poll(&mut h, &mut d);
        deliver(&mut h, &mut d, id, Ok(json!({"Text": "Sensor", "Children": []})));
        assert_eq!(d.state().link.label(), "PC ONLINE (CHECK SENSOR NAMES)");

        d.destroy(&mut h.ctx());
        assert!(h.host.counts().is_empty());
    }

    #[test]
    fn sample_log_is_throttled() {
        let mut h = Harness::new();
        h.config.pc.debug = true;
        let mut d = PcDashboard::new();
        d.init(&mut h.ctx());
        let empty = json!({"Text": "Sensor", "Children": []});

        let id = h.host.request_for("data.json").unwrap();
        deliver(&mut h, &mut d, id, Ok(empty.clone()));
        let first = d.state().last_sample_log.unwrap();

        h.advance(Duration::from_secs(30));
        let id = poll(&mut h, &mut d);
        deliver(&mut h, &mut d, id, Ok(empty.clone()));
        assert_eq!(d.state().last_sample_log, Some(first));

        h.advance(Duration::from_secs(31));
        let id = poll(&mut h, &mut d);
        deliver(&mut h, &mut d, id, Ok(empty));
        assert!(d.state().last_sample_log.unwrap() > first);
    }

    #[test]
    fn hidden_polls_are_skipped_and_config_follows() {
        let mut h = Harness::new();
        let mut d = PcDashboard::new();
        d.init(&mut h.ctx());
        h.visible = false;
        let before = h.host.fetched.len();
        let timer = h.host.timer_with(Duration::from_millis(2_000), true).unwrap();
        d.on_event(&mut h.ctx(), &HostEvent::Timer { id: timer });
        assert_eq!(h.host.fetched.len(), before);

        h.config.pc.endpoint = "http://10.0.0.5:8085/data.json".into();
        let config = h.config.clone();
        d.sync_config(&config);
        h.visible = true;
        d.on_visibility(&mut h.ctx(), true);
        assert!(h.host.fetched.last().unwrap().starts_with("http://10.0.0.5"));
    }
}
