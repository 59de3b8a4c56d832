use std::time::{Duration, Instant};

use crate::host::{Host, HostEvent, SocketEvent, SocketId, TimerId};

// Reconnection defaults
const BASE_DELAY_MS: u64 = 1_000;
const MAX_DELAY_MS: u64 = 30_000;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionPolicy {
    base_delay: Duration,
    max_delay: Duration,
    backoff: bool,
    current_delay: Duration,
    pub current_attempt: u32,
}

impl ReconnectionPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, backoff: bool) -> Self {
        Self {
            base_delay,
            max_delay,
            backoff,
            current_delay: base_delay,
            current_attempt: 0,
        }
    }

    /// Exponential 1s..30s.
    pub fn exponential() -> Self {
        Self::new(
            Duration::from_millis(BASE_DELAY_MS),
            Duration::from_millis(MAX_DELAY_MS),
            true,
        )
    }

    /// Constant retry interval.
    pub fn fixed(delay: Duration) -> Self {
        Self::new(delay, delay, false)
    }

    pub fn calculate_delay(&self) -> Duration {
        self.current_delay
    }

    /// Records a failed attempt and advances the delay for the next one.
    pub fn increment(&mut self) {
        self.current_attempt += 1;
        if self.backoff {
            self.current_delay = (self.current_delay * 2).min(self.max_delay);
        }
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
        self.current_delay = self.base_delay;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    ClosedPendingReconnect,
}

/// What a session tells its owner after handling an event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    Connected,
    Message(String),
    Disconnected { retry_in: Option<Duration> },
}

/// One logical streaming connection with its own reconnect schedule.
///
/// The URL closure is evaluated on every connect, so it can follow the
/// owner's current symbol or timeframe. The session never parses payloads.
pub struct SocketSession {
    name: &'static str,
    url: Box<dyn Fn() -> String>,
    policy: ReconnectionPolicy,
    state: SessionState,
    active: bool,
    socket: Option<SocketId>,
    retry_timer: Option<TimerId>,
    last_message: Option<Instant>,
}

impl SocketSession {
    pub fn new(
        name: &'static str,
        policy: ReconnectionPolicy,
        url: impl Fn() -> String + 'static,
    ) -> Self {
        Self {
            name,
            url: Box::new(url),
            policy,
            state: SessionState::Idle,
            active: false,
            socket: None,
            retry_timer: None,
            last_message: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn last_message(&self) -> Option<Instant> {
        self.last_message
    }

    pub fn current_delay(&self) -> Duration {
        self.policy.calculate_delay()
    }

    pub fn connect(&mut self, host: &mut dyn Host) {
        self.active = true;
        self.policy.reset();
        self.open(host);
    }

    /// Safe to call in any state.
    pub fn disconnect(&mut self, host: &mut dyn Host) {
        self.active = false;
        if let Some(timer) = self.retry_timer.take() {
            host.clear_timer(timer);
        }
        if let Some(id) = self.socket.take() {
            host.close_socket(id);
            tracing::info!(session = self.name, "disconnected");
        }
        self.state = SessionState::Idle;
    }

    pub fn reconnect(&mut self, host: &mut dyn Host) {
        self.disconnect(host);
        self.connect(host);
    }

    /// Dropped unless the connection is open.
    pub fn send(&mut self, host: &mut dyn Host, text: String) {
        if let (SessionState::Open, Some(id)) = (self.state, self.socket) {
            host.send_socket(id, text);
        }
    }

    /// Whether an event belongs to this session's socket or retry timer.
    pub fn owns(&self, event: &HostEvent) -> bool {
        match event {
            HostEvent::Socket { id, .. } => self.socket == Some(*id),
            HostEvent::Timer { id } => self.retry_timer == Some(*id),
            HostEvent::Fetched { .. } => false,
        }
    }

    pub fn handle(
        &mut self,
        host: &mut dyn Host,
        event: &HostEvent,
        now: Instant,
    ) -> Option<SessionNotice> {
        if !self.owns(event) {
            return None;
        }
        match event {
            HostEvent::Timer { .. } => {
                self.retry_timer = None;
                if self.active {
                    self.open(host);
                }
                None
            }
            HostEvent::Socket { event, .. } => match event {
                SocketEvent::Opened => {
                    self.state = SessionState::Open;
                    self.policy.reset();
                    self.last_message = Some(now);
                    tracing::info!(session = self.name, "connected");
                    Some(SessionNotice::Connected)
                }
                SocketEvent::Message(text) => {
                    self.last_message = Some(now);
                    Some(SessionNotice::Message(text.clone()))
                }
                SocketEvent::Closed { reason } => {
                    tracing::warn!(session = self.name, %reason, "connection closed");
                    self.socket = None;
                    Some(self.after_close(host))
                }
            },
            HostEvent::Fetched { .. } => None,
        }
    }

    /// Drops the live connection as if the remote had closed it, which runs
    /// the normal reconnect schedule.
    pub fn force_close(&mut self, host: &mut dyn Host) -> Option<SessionNotice> {
        let id = self.socket.take()?;
        host.close_socket(id);
        tracing::warn!(session = self.name, "forcing reconnect");
        Some(self.after_close(host))
    }

    fn open(&mut self, host: &mut dyn Host) {
        let url = (self.url)();
        tracing::info!(session = self.name, %url, attempt = self.policy.current_attempt, "connecting");
        self.state = SessionState::Connecting;
        self.socket = Some(host.open_socket(&url));
    }

    fn after_close(&mut self, host: &mut dyn Host) -> SessionNotice {
        if !self.active {
            self.state = SessionState::Idle;
            return SessionNotice::Disconnected { retry_in: None };
        }
        let delay = self.policy.calculate_delay();
        self.policy.increment();
        self.state = SessionState::ClosedPendingReconnect;
        if let Some(old) = self.retry_timer.replace(host.set_timeout(delay)) {
            host.clear_timer(old);
        }
        tracing::info!(session = self.name, ?delay, "reconnect scheduled");
        SessionNotice::Disconnected {
            retry_in: Some(delay),
        }
    }
}
