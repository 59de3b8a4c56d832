use chrono::{DateTime, Utc};
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent};
use std::collections::{BTreeMap, VecDeque};
use std::time::{Duration, Instant};

use crate::alerts::Notifier;
use crate::config::Config;
use crate::dashboard::{Context, KeyOutcome, LifecycleController, Prompt};
use crate::host::{Host, HostEvent};
use crate::prefs::Preferences;

const ERROR_LOG_LIMIT: usize = 10;
const TOAST_TTL: Duration = Duration::from_secs(5);
const RATE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveBadge {
    pub live: bool,
    pub label: String,
}

/// Header and footer state that dashboards write through their `Context`.
#[derive(Debug)]
pub struct ShellStatus {
    pub badge: LiveBadge,
    pub error_log: VecDeque<String>,
    toast: Option<(String, Instant)>,
    stamps: BTreeMap<&'static str, DateTime<Utc>>,
    window_start: Instant,
    window_count: u64,
    rate: f64,
}

impl ShellStatus {
    pub fn new(now: Instant) -> Self {
        Self {
            badge: LiveBadge {
                live: false,
                label: "Offline".to_string(),
            },
            error_log: VecDeque::new(),
            toast: None,
            stamps: BTreeMap::new(),
            window_start: now,
            window_count: 0,
            rate: 0.0,
        }
    }

    pub fn set_badge(&mut self, live: bool, label: &str) {
        if self.badge.live != live || self.badge.label != label {
            self.badge = LiveBadge {
                live,
                label: label.to_string(),
            };
        }
    }

    pub fn add_error_to_log(&mut self, error: String, wall: DateTime<Utc>) {
        let entry = format!("[{}] {}", wall.format("%H:%M:%S"), error);
        self.error_log.push_back(entry);
        while self.error_log.len() > ERROR_LOG_LIMIT {
            self.error_log.pop_front();
        }
    }

    pub fn toast(&mut self, message: String, now: Instant) {
        self.toast = Some((message, now));
    }

    pub fn active_toast(&self, now: Instant) -> Option<&str> {
        self.toast
            .as_ref()
            .filter(|(_, at)| now.saturating_duration_since(*at) < TOAST_TTL)
            .map(|(m, _)| m.as_str())
    }

    /// Records that `section` just received fresh data.
    pub fn touch(&mut self, section: &'static str, wall: DateTime<Utc>) {
        self.stamps.insert(section, wall);
    }

    pub fn stamps(&self) -> impl Iterator<Item = (&'static str, &DateTime<Utc>)> {
        self.stamps.iter().map(|(k, v)| (*k, v))
    }

    pub fn forget_stamps(&mut self) {
        self.stamps.clear();
    }

    pub fn count_message(&mut self) {
        self.window_count += 1;
    }

    /// Rolls the rate window once a second has passed.
    pub fn tick(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed >= RATE_WINDOW {
            self.rate = self.window_count as f64 / elapsed.as_secs_f64();
            self.window_count = 0;
            self.window_start = now;
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }
}

/// Text being collected for a dashboard prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct InputState {
    pub prompt: Prompt,
    pub buffer: String,
    pub error: Option<String>,
}

pub struct App {
    pub host: Box<dyn Host>,
    pub prefs: Box<dyn Preferences>,
    pub notifier: Box<dyn Notifier>,
    pub config: Config,
    pub status: ShellStatus,
    pub controller: LifecycleController,
    pub input: Option<InputState>,
    pub show_error_log: bool,
    pub visible: bool,
    pub should_quit: bool,
    dirty: bool,
}

impl App {
    pub fn new(
        host: Box<dyn Host>,
        prefs: Box<dyn Preferences>,
        notifier: Box<dyn Notifier>,
        config: Config,
        controller: LifecycleController,
    ) -> Self {
        Self {
            host,
            prefs,
            notifier,
            config,
            status: ShellStatus::new(Instant::now()),
            controller,
            input: None,
            show_error_log: false,
            visible: true,
            should_quit: false,
            dirty: true,
        }
    }

    fn split(&mut self, now: Instant) -> (&mut LifecycleController, Context<'_>) {
        let ctx = Context {
            host: self.host.as_mut(),
            prefs: self.prefs.as_mut(),
            notifier: self.notifier.as_mut(),
            config: &self.config,
            status: &mut self.status,
            visible: self.visible,
            now,
            wall: Utc::now(),
        };
        (&mut self.controller, ctx)
    }

    /// Restores the last dashboard.
    pub fn start(&mut self) {
        let (controller, mut ctx) = self.split(Instant::now());
        controller.restore(&mut ctx);
    }

    pub fn switch_to(&mut self, id: &str) {
        let (controller, mut ctx) = self.split(Instant::now());
        if controller.switch_mode(&mut ctx, id) {
            self.status.forget_stamps();
            self.input = None;
        }
        self.dirty = true;
    }

    fn cycle(&mut self, forward: bool) {
        let (controller, mut ctx) = self.split(Instant::now());
        controller.cycle(&mut ctx, forward);
        self.status.forget_stamps();
        self.input = None;
        self.dirty = true;
    }

    pub fn on_host_event(&mut self, event: HostEvent) {
        self.host.settle(&event);
        let (controller, mut ctx) = self.split(Instant::now());
        controller.dispatch(&mut ctx, &event);
        self.dirty = true;
    }

    pub fn on_focus(&mut self, visible: bool) {
        if self.visible == visible {
            return;
        }
        self.visible = visible;
        tracing::info!(visible, "visibility changed");
        let (controller, mut ctx) = self.split(Instant::now());
        controller.set_visible(&mut ctx, visible);
        self.dirty = true;
    }

    pub fn on_config(&mut self, config: Config) {
        self.config = config;
        self.controller.sync_config_all(&self.config);
        let (controller, mut ctx) = self.split(Instant::now());
        controller.reload_current(&mut ctx);
        self.dirty = true;
    }

    pub fn on_mouse(&mut self, mouse: MouseEvent) {
        if self.input.is_some() || self.show_error_log {
            return;
        }
        let (controller, mut ctx) = self.split(Instant::now());
        if let Some(d) = controller.current() {
            d.on_mouse(&mut ctx, mouse);
        }
        self.dirty = true;
    }

    pub fn tick(&mut self, now: Instant) {
        self.status.tick(now);
        self.dirty = true;
    }

    pub fn on_key(&mut self, key: KeyEvent) {
        self.dirty = true;
        if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
            self.should_quit = true;
            return;
        }
        if self.show_error_log {
            if matches!(key.code, KeyCode::Esc | KeyCode::Char('e')) {
                self.show_error_log = false;
            }
            return;
        }
        if self.input.is_some() {
            self.handle_input(key.code);
            return;
        }

        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('e') => self.show_error_log = true,
            KeyCode::Tab => self.cycle(true),
            KeyCode::BackTab => self.cycle(false),
            KeyCode::F(n) => {
                let ids = self.controller.ids();
                if let Some((id, _)) = ids.get(usize::from(n.saturating_sub(1))) {
                    self.switch_to(id);
                }
            }
            _ => {
                let (controller, mut ctx) = self.split(Instant::now());
                let outcome = match controller.current() {
                    Some(d) => d.on_key(&mut ctx, key),
                    None => KeyOutcome::Ignored,
                };
                if let KeyOutcome::Prompt(prompt) = outcome {
                    self.input = Some(InputState {
                        buffer: prompt.initial.clone(),
                        prompt,
                        error: None,
                    });
                }
            }
        }
    }

    fn handle_input(&mut self, key: KeyCode) {
        let Some(input) = self.input.as_mut() else {
            return;
        };
        match key {
            KeyCode::Esc => self.input = None,
            KeyCode::Backspace => {
                input.buffer.pop();
                input.error = None;
            }
            KeyCode::Char(c) => {
                input.buffer.push(c);
                input.error = None;
            }
            KeyCode::Enter => {
                let field = input.prompt.field;
                let text = input.buffer.clone();
                let (controller, mut ctx) = self.split(Instant::now());
                let result = match controller.current() {
                    Some(d) => d.on_submit(&mut ctx, field, &text),
                    None => Ok(()),
                };
                match result {
                    Ok(()) => self.input = None,
                    Err(e) => {
                        tracing::debug!(field, error = %e, "input rejected");
                        if let Some(input) = self.input.as_mut() {
                            input.error = Some(e.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }

    /// Something changed since the last frame, or a chart asked for one.
    pub fn wants_frame(&mut self) -> bool {
        let chart = self
            .controller
            .current()
            .is_some_and(|d| d.frame_pending());
        self.dirty || chart
    }

    pub fn frame_drawn(&mut self) {
        self.dirty = false;
    }

    pub fn shutdown(&mut self) {
        let (controller, mut ctx) = self.split(Instant::now());
        controller.teardown(&mut ctx);
        tracing::info!(leftover = ?self.host.counts(), "shut down");
    }
}
