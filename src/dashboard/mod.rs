//! Dashboard lifecycle.
//!
//! Each dashboard keeps its live state in an instance struct that `init`
//! builds from scratch and `destroy` tears down. Everything a dashboard holds
//! on the host (sockets, timers, fetches, listeners) is released in `destroy`,
//! so no event can reach state that no longer exists.

pub mod crypto;
pub mod pc;
pub mod stocks;
pub mod weather;

use chrono::{DateTime, Utc};
use crossterm::event::{KeyEvent, MouseButton, MouseEvent, MouseEventKind};
use ratatui::Frame;
use ratatui::layout::Rect;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::alerts::Notifier;
use crate::app::ShellStatus;
use crate::chart::ChartRenderer;
use crate::config::Config;
use crate::error::ValidationError;
use crate::host::{Host, HostEvent, ListenerId, ListenerKind, RequestId, TimerId};
use crate::prefs::Preferences;

/// Everything a dashboard may touch while handling one event.
pub struct Context<'a> {
    pub host: &'a mut dyn Host,
    pub prefs: &'a mut dyn Preferences,
    pub notifier: &'a mut dyn Notifier,
    pub config: &'a Config,
    pub status: &'a mut ShellStatus,
    pub visible: bool,
    pub now: Instant,
    pub wall: DateTime<Utc>,
}

/// Free-text input a dashboard asks the shell to collect.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub field: &'static str,
    pub title: String,
    pub initial: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeyOutcome {
    Ignored,
    Handled,
    Prompt(Prompt),
}

pub trait Dashboard {
    fn id(&self) -> &'static str;
    fn title(&self) -> &'static str;
    /// Footer key hints.
    fn help(&self) -> &'static str;

    fn init(&mut self, ctx: &mut Context);
    fn destroy(&mut self, ctx: &mut Context);
    /// Config changed while registered. Active dashboards are reloaded
    /// afterwards, so this only needs to refresh cached copies.
    fn sync_config(&mut self, _config: &Config) {}

    fn on_event(&mut self, ctx: &mut Context, event: &HostEvent);
    fn on_visibility(&mut self, _ctx: &mut Context, _visible: bool) {}
    fn on_key(&mut self, _ctx: &mut Context, _key: KeyEvent) -> KeyOutcome {
        KeyOutcome::Ignored
    }
    fn on_submit(
        &mut self,
        _ctx: &mut Context,
        _field: &str,
        _text: &str,
    ) -> Result<(), ValidationError> {
        Ok(())
    }
    fn on_mouse(&mut self, _ctx: &mut Context, _mouse: MouseEvent) {}

    /// A redraw was requested since the last frame.
    fn frame_pending(&self) -> bool {
        false
    }
    fn draw(&mut self, f: &mut Frame, area: Rect, now: Instant);
}

/// Host resources owned by one active dashboard, released together.
///
/// `T` tags each in-flight fetch so the response can be routed.
#[derive(Debug)]
pub struct Resources<T> {
    timers: Vec<TimerId>,
    requests: HashMap<RequestId, T>,
    listeners: Vec<ListenerId>,
}

impl<T> Default for Resources<T> {
    fn default() -> Self {
        Self {
            timers: Vec::new(),
            requests: HashMap::new(),
            listeners: Vec::new(),
        }
    }
}

impl<T> Resources<T> {
    pub fn interval(&mut self, host: &mut dyn Host, every_ms: u64) -> TimerId {
        let id = host.set_interval(Duration::from_millis(every_ms.max(1)));
        self.timers.push(id);
        id
    }

    pub fn timeout(&mut self, host: &mut dyn Host, after: Duration) -> TimerId {
        let id = host.set_timeout(after);
        self.timers.push(id);
        id
    }

    pub fn cancel_timer(&mut self, host: &mut dyn Host, id: TimerId) {
        if let Some(pos) = self.timers.iter().position(|t| *t == id) {
            self.timers.remove(pos);
            host.clear_timer(id);
        }
    }

    /// A timeout fired; the host already forgot it.
    pub fn timeout_fired(&mut self, id: TimerId) {
        self.timers.retain(|t| *t != id);
    }

    pub fn fetch(&mut self, host: &mut dyn Host, url: &str, query: &[(&str, &str)], tag: T) -> RequestId {
        let id = host.fetch(url, query);
        self.requests.insert(id, tag);
        id
    }

    /// Claims the tag of a completed fetch, `None` if it was not ours.
    pub fn complete(&mut self, id: RequestId) -> Option<T> {
        self.requests.remove(&id)
    }

    /// Aborts every in-flight fetch whose tag matches.
    pub fn abort_where(&mut self, host: &mut dyn Host, mut pred: impl FnMut(&T) -> bool) {
        let doomed: Vec<RequestId> = self
            .requests
            .iter()
            .filter(|(_, tag)| pred(tag))
            .map(|(id, _)| *id)
            .collect();
        for id in doomed {
            self.requests.remove(&id);
            host.abort_fetch(id);
        }
    }

    pub fn listen(&mut self, host: &mut dyn Host, kind: ListenerKind) -> ListenerId {
        let id = host.add_listener(kind);
        self.listeners.push(id);
        id
    }

    pub fn release(&mut self, host: &mut dyn Host) {
        for id in self.timers.drain(..) {
            host.clear_timer(id);
        }
        for (id, _) in self.requests.drain() {
            host.abort_fetch(id);
        }
        for id in self.listeners.drain(..) {
            host.remove_listener(id);
        }
    }
}

/// Applies a pointer event to a chart drawn in `area` (inner cells).
/// Returns whether anything changed.
pub fn chart_pointer(chart: &mut ChartRenderer, area: Rect, mouse: MouseEvent, len: usize) -> bool {
    let inside = mouse.column >= area.x
        && mouse.column < area.x + area.width
        && mouse.row >= area.y
        && mouse.row < area.y + area.height;
    // Braille cells are two dots wide; aim at the cell centre.
    let x = f64::from(mouse.column.saturating_sub(area.x)) * 2.0 + 1.0;
    match mouse.kind {
        MouseEventKind::ScrollUp if inside => chart.zoom(false, len),
        MouseEventKind::ScrollDown if inside => chart.zoom(true, len),
        MouseEventKind::Down(MouseButton::Left) if inside => chart.begin_drag(x),
        MouseEventKind::Drag(MouseButton::Left) if chart.is_dragging() => {
            chart.drag_to(x, len);
            chart.hover(Some(x));
        }
        MouseEventKind::Up(MouseButton::Left) => chart.end_drag(),
        MouseEventKind::Moved => chart.hover(inside.then_some(x)),
        _ => return false,
    }
    true
}

/// Owns every registered dashboard and activates at most one.
#[derive(Default)]
pub struct LifecycleController {
    dashboards: Vec<Box<dyn Dashboard>>,
    current: Option<usize>,
}

impl LifecycleController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, dashboard: Box<dyn Dashboard>) {
        self.dashboards.push(dashboard);
    }

    pub fn ids(&self) -> Vec<(&'static str, &'static str)> {
        self.dashboards.iter().map(|d| (d.id(), d.title())).collect()
    }

    pub fn current_id(&self) -> Option<&'static str> {
        self.current.map(|i| self.dashboards[i].id())
    }

    pub fn current(&mut self) -> Option<&mut (dyn Dashboard + 'static)> {
        let i = self.current?;
        Some(self.dashboards[i].as_mut())
    }

    /// Deactivates the current dashboard and activates `id`. Unknown ids and
    /// the already active id are ignored.
    pub fn switch_mode(&mut self, ctx: &mut Context, id: &str) -> bool {
        let Some(next) = self.dashboards.iter().position(|d| d.id() == id) else {
            tracing::warn!(id, "unknown dashboard");
            return false;
        };
        if self.current == Some(next) {
            return false;
        }
        if let Some(prev) = self.current.take() {
            self.dashboards[prev].destroy(ctx);
            tracing::info!(dashboard = self.dashboards[prev].id(), "deactivated");
        }
        self.dashboards[next].init(ctx);
        self.current = Some(next);
        ctx.prefs.put("mode", &id);
        tracing::info!(dashboard = id, "activated");
        true
    }

    /// Activates the dashboard saved under `mode`, else the first one.
    pub fn restore(&mut self, ctx: &mut Context) {
        let saved: Option<String> = ctx.prefs.get_or("mode", None);
        let id = saved
            .filter(|m| self.dashboards.iter().any(|d| d.id() == m))
            .or_else(|| self.dashboards.first().map(|d| d.id().to_string()));
        if let Some(id) = id {
            self.switch_mode(ctx, &id);
        }
    }

    /// Cycles to the next registered dashboard.
    pub fn cycle(&mut self, ctx: &mut Context, forward: bool) {
        let n = self.dashboards.len();
        if n == 0 {
            return;
        }
        let next = match self.current {
            Some(i) if forward => (i + 1) % n,
            Some(i) => (i + n - 1) % n,
            None => 0,
        };
        let id = self.dashboards[next].id();
        self.switch_mode(ctx, id);
    }

    /// Destroy and init the active dashboard in place.
    pub fn reload_current(&mut self, ctx: &mut Context) {
        if let Some(i) = self.current {
            self.dashboards[i].destroy(ctx);
            self.dashboards[i].init(ctx);
            tracing::info!(dashboard = self.dashboards[i].id(), "reloaded");
        }
    }

    pub fn sync_config_all(&mut self, config: &Config) {
        for d in &mut self.dashboards {
            d.sync_config(config);
        }
    }

    pub fn dispatch(&mut self, ctx: &mut Context, event: &HostEvent) {
        if let Some(d) = self.current() {
            d.on_event(ctx, event);
        }
    }

    pub fn set_visible(&mut self, ctx: &mut Context, visible: bool) {
        if let Some(d) = self.current() {
            d.on_visibility(ctx, visible);
        }
    }

    pub fn teardown(&mut self, ctx: &mut Context) {
        if let Some(i) = self.current.take() {
            self.dashboards[i].destroy(ctx);
            tracing::info!(dashboard = self.dashboards[i].id(), "torn down");
        }
    }
}

/// Registry with every dashboard this app ships.
pub fn all_dashboards() -> LifecycleController {
    let mut controller = LifecycleController::new();
    controller.register(Box::new(crypto::CryptoDashboard::new()));
    controller.register(Box::new(weather::WeatherDashboard::new()));
    controller.register(Box::new(pc::PcDashboard::new()));
    controller.register(Box::new(stocks::StocksDashboard::new()));
    controller
}

#[cfg(test)]
pub mod testing {
    //! Shared fixture for driving dashboards without a terminal.

    use super::*;
    use crate::alerts::testing::CountingNotifier;
    use crate::host::testing::RecordingHost;
    use crate::prefs::MemoryPreferences;

    pub struct Harness {
        pub host: RecordingHost,
        pub prefs: MemoryPreferences,
        pub notifier: CountingNotifier,
        pub config: Config,
        pub status: ShellStatus,
        pub visible: bool,
        pub now: Instant,
        pub wall: DateTime<Utc>,
    }

    impl Harness {
        pub fn new() -> Self {
            Self {
                host: RecordingHost::new(),
                prefs: MemoryPreferences::new(),
                notifier: CountingNotifier::default(),
                config: Config::default(),
                status: ShellStatus::new(Instant::now()),
                visible: true,
                now: Instant::now(),
                wall: DateTime::from_timestamp(1_700_000_000, 0).unwrap_or_default(),
            }
        }

        pub fn ctx(&mut self) -> Context<'_> {
            Context {
                host: &mut self.host,
                prefs: &mut self.prefs,
                notifier: &mut self.notifier,
                config: &self.config,
                status: &mut self.status,
                visible: self.visible,
                now: self.now,
                wall: self.wall,
            }
        }

        pub fn advance(&mut self, by: Duration) {
            self.now += by;
            self.wall += chrono::Duration::from_std(by).unwrap_or_default();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::Harness;
    use super::*;
    use crate::host::{SocketEvent, SocketId};

    struct Probe {
        id: &'static str,
        inits: usize,
        destroys: usize,
        res: Resources<()>,
    }

    impl Probe {
        fn new(id: &'static str) -> Self {
            Self {
                id,
                inits: 0,
                destroys: 0,
                res: Resources::default(),
            }
        }
    }

    impl Dashboard for Probe {
        fn id(&self) -> &'static str {
            self.id
        }
        fn title(&self) -> &'static str {
            "probe"
        }
        fn help(&self) -> &'static str {
            ""
        }
        fn init(&mut self, ctx: &mut Context) {
            self.inits += 1;
            self.res.interval(ctx.host, 1000);
            self.res.fetch(ctx.host, "http://x", &[], ());
            self.res.listen(ctx.host, ListenerKind::Visibility);
        }
        fn destroy(&mut self, ctx: &mut Context) {
            self.destroys += 1;
            self.res.release(ctx.host);
        }
        fn on_event(&mut self, _ctx: &mut Context, _event: &HostEvent) {}
        fn draw(&mut self, _f: &mut Frame, _area: Rect, _now: Instant) {}
    }

    #[test]
    fn switching_is_exclusive_and_idempotent() {
        let mut h = Harness::new();
        let mut c = LifecycleController::new();
        c.register(Box::new(Probe::new("a")));
        c.register(Box::new(Probe::new("b")));

        assert!(c.switch_mode(&mut h.ctx(), "a"));
        assert!(!c.switch_mode(&mut h.ctx(), "a"));
        assert!(!c.switch_mode(&mut h.ctx(), "nope"));
        assert_eq!(c.current_id(), Some("a"));
        assert_eq!(h.host.counts().timers, 1);

        assert!(c.switch_mode(&mut h.ctx(), "b"));
        assert_eq!(c.current_id(), Some("b"));
        assert_eq!(h.host.counts().timers, 1);
        assert_eq!(h.host.counts().listeners, 1);

        let mut ctx = h.ctx();
        let saved: Option<String> = ctx.prefs.get_or("mode", None);
        assert_eq!(saved.as_deref(), Some("b"));
        c.teardown(&mut ctx);
        assert!(h.host.counts().is_empty());
    }

    #[test]
    fn restore_falls_back_to_first() {
        let mut h = Harness::new();
        let mut c = LifecycleController::new();
        c.register(Box::new(Probe::new("a")));
        c.register(Box::new(Probe::new("b")));
        h.ctx().prefs.put("mode", &"gone");
        c.restore(&mut h.ctx());
        assert_eq!(c.current_id(), Some("a"));

        c.switch_mode(&mut h.ctx(), "b");
        c.teardown(&mut h.ctx());
        c.restore(&mut h.ctx());
        assert_eq!(c.current_id(), Some("b"));
    }

    #[test]
    fn reload_runs_destroy_then_init() {
        let mut h = Harness::new();
        let mut c = LifecycleController::new();
        c.register(Box::new(Probe::new("a")));
        c.switch_mode(&mut h.ctx(), "a");
        c.reload_current(&mut h.ctx());
        assert_eq!(h.host.counts().timers, 1);
        assert_eq!(h.host.counts().requests, 1);
    }

    #[test]
    fn real_dashboards_leak_nothing_over_many_cycles() {
        let mut h = Harness::new();
        let mut c = all_dashboards();
        let ids: Vec<&str> = c.ids().into_iter().map(|(id, _)| id).collect();

        for round in 0..25 {
            for id in &ids {
                c.switch_mode(&mut h.ctx(), id);
                // Remote closes and late timer events must not leave anything behind.
                let sockets: Vec<SocketId> = h.host.sockets.keys().copied().collect();
                for id in sockets.into_iter().take(round % 2) {
                    let event = HostEvent::Socket {
                        id,
                        event: SocketEvent::Closed {
                            reason: "test".into(),
                        },
                    };
                    h.host.settle(&event);
                    c.dispatch(&mut h.ctx(), &event);
                }
            }
        }
        c.teardown(&mut h.ctx());
        assert!(h.host.counts().is_empty(), "leaked {:?}", h.host.counts());
    }
}
