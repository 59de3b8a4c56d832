//! The runtime seam between dashboards and the outside world.
//!
//! Dashboards never spawn tasks themselves. They ask the [`Host`] for a socket,
//! a timer, a fetch or a listener and get back a typed handle. Everything the
//! host produces comes back to the single UI loop as a [`HostEvent`] tagged
//! with that handle, so cancelling means dropping the handle and ignoring any
//! event still in flight for it.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::FetchError;

const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerKind {
    Visibility,
    Pointer,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Opened,
    Message(String),
    Closed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Socket { id: SocketId, event: SocketEvent },
    Timer { id: TimerId },
    Fetched { id: RequestId, result: Result<Value, FetchError> },
}

/// Live resources currently held through a host.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResourceCounts {
    pub sockets: usize,
    pub timers: usize,
    pub requests: usize,
    pub listeners: usize,
}

impl ResourceCounts {
    pub fn is_empty(&self) -> bool {
        self.sockets == 0 && self.timers == 0 && self.requests == 0 && self.listeners == 0
    }
}

pub trait Host {
    fn open_socket(&mut self, url: &str) -> SocketId;
    fn send_socket(&mut self, id: SocketId, text: String);
    /// Closes without producing a `Closed` event.
    fn close_socket(&mut self, id: SocketId);

    fn set_timeout(&mut self, after: Duration) -> TimerId;
    fn set_interval(&mut self, every: Duration) -> TimerId;
    fn clear_timer(&mut self, id: TimerId);

    /// GET `url` with `query` appended and encoded by the HTTP client.
    fn fetch(&mut self, url: &str, query: &[(&str, &str)]) -> RequestId;
    fn abort_fetch(&mut self, id: RequestId);

    fn add_listener(&mut self, kind: ListenerKind) -> ListenerId;
    fn remove_listener(&mut self, id: ListenerId);

    fn counts(&self) -> ResourceCounts;

    /// Drops bookkeeping for resources the event finished: a fired timeout, a
    /// completed fetch, a remotely closed socket.
    fn settle(&mut self, event: &HostEvent);
}

struct SocketHandle {
    task: JoinHandle<()>,
    outbound: mpsc::UnboundedSender<String>,
}

struct TimerHandle {
    task: JoinHandle<()>,
    repeating: bool,
}

/// Tokio-backed host. Sockets run on tokio-tungstenite, HTTP runs ureq on the
/// blocking pool.
pub struct TokioHost {
    tx: mpsc::UnboundedSender<HostEvent>,
    next_id: u64,
    sockets: HashMap<SocketId, SocketHandle>,
    timers: HashMap<TimerId, TimerHandle>,
    requests: HashMap<RequestId, JoinHandle<()>>,
    listeners: HashMap<ListenerId, ListenerKind>,
}

impl TokioHost {
    pub fn new(tx: mpsc::UnboundedSender<HostEvent>) -> Self {
        Self {
            tx,
            next_id: 0,
            sockets: HashMap::new(),
            timers: HashMap::new(),
            requests: HashMap::new(),
            listeners: HashMap::new(),
        }
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

impl Host for TokioHost {
    fn open_socket(&mut self, url: &str) -> SocketId {
        let id = SocketId(self.next());
        let (outbound, out_rx) = mpsc::unbounded_channel();
        let tx = self.tx.clone();
        let url = url.to_string();
        tracing::debug!(socket = id.0, %url, "opening socket");

        let task = tokio::spawn(async move {
            let reason = run_socket(id, &url, &tx, out_rx).await;
            let _ = tx.send(HostEvent::Socket {
                id,
                event: SocketEvent::Closed { reason },
            });
        });
        self.sockets.insert(id, SocketHandle { task, outbound });
        id
    }

    fn send_socket(&mut self, id: SocketId, text: String) {
        if let Some(handle) = self.sockets.get(&id) {
            let _ = handle.outbound.send(text);
        }
    }

    fn close_socket(&mut self, id: SocketId) {
        if let Some(handle) = self.sockets.remove(&id) {
            handle.task.abort();
            tracing::debug!(socket = id.0, "socket closed locally");
        }
    }

    fn set_timeout(&mut self, after: Duration) -> TimerId {
        let id = TimerId(self.next());
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(HostEvent::Timer { id });
        });
        self.timers.insert(
            id,
            TimerHandle {
                task,
                repeating: false,
            },
        );
        id
    }

    fn set_interval(&mut self, every: Duration) -> TimerId {
        let id = TimerId(self.next());
        let tx = self.tx.clone();
        let every = every.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + every;
            let mut ticker = tokio::time::interval_at(start, every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(HostEvent::Timer { id }).is_err() {
                    break;
                }
            }
        });
        self.timers.insert(
            id,
            TimerHandle {
                task,
                repeating: true,
            },
        );
        id
    }

    fn clear_timer(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.task.abort();
        }
    }

    fn fetch(&mut self, url: &str, query: &[(&str, &str)]) -> RequestId {
        let id = RequestId(self.next());
        let tx = self.tx.clone();
        let url = url.to_string();
        let query: Vec<(String, String)> = query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let task = tokio::spawn(async move {
            let target = url.clone();
            let result = tokio::task::spawn_blocking(move || fetch_json(&target, &query))
                .await
                .unwrap_or_else(|e| Err(FetchError::Transport(e.to_string())));
            if let Err(ref e) = result {
                tracing::warn!(%url, error = %e, "fetch failed");
            }
            let _ = tx.send(HostEvent::Fetched { id, result });
        });
        self.requests.insert(id, task);
        id
    }

    fn abort_fetch(&mut self, id: RequestId) {
        if let Some(task) = self.requests.remove(&id) {
            task.abort();
        }
    }

    fn add_listener(&mut self, kind: ListenerKind) -> ListenerId {
        let id = ListenerId(self.next());
        self.listeners.insert(id, kind);
        id
    }

    fn remove_listener(&mut self, id: ListenerId) {
        self.listeners.remove(&id);
    }

    fn counts(&self) -> ResourceCounts {
        ResourceCounts {
            sockets: self.sockets.len(),
            timers: self.timers.len(),
            requests: self.requests.len(),
            listeners: self.listeners.len(),
        }
    }

    fn settle(&mut self, event: &HostEvent) {
        match event {
            HostEvent::Timer { id } => {
                if self.timers.get(id).is_some_and(|t| !t.repeating) {
                    self.timers.remove(id);
                }
            }
            HostEvent::Fetched { id, .. } => {
                self.requests.remove(id);
            }
            HostEvent::Socket {
                id,
                event: SocketEvent::Closed { .. },
            } => {
                self.sockets.remove(id);
            }
            HostEvent::Socket { .. } => {}
        }
    }
}

impl Drop for TokioHost {
    fn drop(&mut self) {
        for (_, s) in self.sockets.drain() {
            s.task.abort();
        }
        for (_, t) in self.timers.drain() {
            t.task.abort();
        }
        for (_, r) in self.requests.drain() {
            r.abort();
        }
    }
}

/// Drives one connection until it ends; returns the close reason.
async fn run_socket(
    id: SocketId,
    url: &str,
    tx: &mpsc::UnboundedSender<HostEvent>,
    mut out_rx: mpsc::UnboundedReceiver<String>,
) -> String {
    let ws_stream = match connect_async(url).await {
        Ok((stream, _)) => stream,
        Err(e) => return format!("connect failed: {}", e),
    };
    if tx
        .send(HostEvent::Socket {
            id,
            event: SocketEvent::Opened,
        })
        .is_err()
    {
        return "host gone".to_string();
    }

    let (mut write, mut read) = ws_stream.split();
    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let event = SocketEvent::Message(text);
                        if tx.send(HostEvent::Socket { id, event }).is_err() {
                            return "host gone".to_string();
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return frame
                            .map(|f| format!("closed by server: {}", f.reason))
                            .unwrap_or_else(|| "closed by server".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return format!("socket error: {}", e),
                    None => return "stream ended".to_string(),
                }
            }
            out = out_rx.recv() => {
                match out {
                    Some(text) => {
                        if let Err(e) = write.send(Message::Text(text)).await {
                            return format!("send failed: {}", e);
                        }
                    }
                    None => return "closed".to_string(),
                }
            }
        }
    }
}

fn fetch_json(url: &str, query: &[(String, String)]) -> Result<Value, FetchError> {
    let mut request = ureq::get(url).timeout(FETCH_TIMEOUT);
    for (k, v) in query {
        request = request.query(k, v);
    }
    match request.call() {
        Ok(response) => response
            .into_json::<Value>()
            .map_err(|e| FetchError::Decode(e.to_string())),
        Err(ureq::Error::Status(code, response)) => Err(FetchError::Status {
            code,
            body: response.into_string().unwrap_or_default(),
        }),
        Err(ureq::Error::Transport(t)) => Err(FetchError::Transport(t.to_string())),
    }
}
