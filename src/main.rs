use anyhow::Context as _;
use crossterm::{
    event::{
        DisableFocusChange, DisableMouseCapture, EnableFocusChange, EnableMouseCapture, Event,
        EventStream, KeyEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use futures_util::StreamExt;
use ratatui::{Terminal, backend::CrosstermBackend};
use std::io;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

mod alerts;
mod app;
mod candles;
mod chart;
mod config;
mod dashboard;
mod error;
mod feeds;
mod host;
mod indicators;
mod logging;
mod prefs;
mod retry;
mod ui;
mod websocket;

use alerts::TerminalNotifier;
use app::App;
use config::ConfigWatcher;
use host::{HostEvent, TokioHost};

const FRAME_INTERVAL: Duration = Duration::from_millis(33);
const CONFIG_POLL: Duration = Duration::from_secs(5);
const TICK: Duration = Duration::from_secs(1);

type Term = Terminal<CrosstermBackend<io::Stdout>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init().context("opening log file")?;

    let (watcher, config) = ConfigWatcher::open();
    let (tx, mut rx) = mpsc::unbounded_channel::<HostEvent>();
    let mut app = App::new(
        Box::new(TokioHost::new(tx)),
        prefs::open_default(),
        Box::new(TerminalNotifier::new()),
        config,
        dashboard::all_dashboards(),
    );

    // Setup terminal
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = io::stdout();
    execute!(
        stdout,
        EnterAlternateScreen,
        EnableMouseCapture,
        EnableFocusChange
    )?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;

    app.start();
    let res = run_app(&mut terminal, &mut app, &mut rx, watcher).await;
    app.shutdown();

    // Restore terminal
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        DisableFocusChange,
        DisableMouseCapture,
        LeaveAlternateScreen
    )?;
    terminal.show_cursor()?;

    if let Err(err) = &res {
        tracing::error!(error = ?err, "event loop failed");
    }
    res
}

async fn run_app(
    terminal: &mut Term,
    app: &mut App,
    rx: &mut mpsc::UnboundedReceiver<HostEvent>,
    mut watcher: ConfigWatcher,
) -> anyhow::Result<()> {
    let mut events = EventStream::new();
    let mut frame = tokio::time::interval(FRAME_INTERVAL);
    let mut config_poll = tokio::time::interval(CONFIG_POLL);
    let mut tick = tokio::time::interval(TICK);
    frame.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    while !app.should_quit {
        tokio::select! {
            Some(event) = rx.recv() => app.on_host_event(event),
            maybe = events.next() => match maybe {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => app.on_key(key),
                Some(Ok(Event::Mouse(mouse))) => app.on_mouse(mouse),
                Some(Ok(Event::FocusGained)) => app.on_focus(true),
                Some(Ok(Event::FocusLost)) => app.on_focus(false),
                Some(Ok(Event::Resize(..))) => app.tick(Instant::now()),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("reading terminal events"),
                None => break,
            },
            _ = frame.tick() => {
                if app.wants_frame() {
                    let now = Instant::now();
                    terminal.draw(|f| ui::draw(f, app, now))?;
                    app.frame_drawn();
                }
            }
            _ = config_poll.tick() => {
                if let Some(config) = watcher.poll() {
                    tracing::info!("config changed, reloading");
                    app.on_config(config);
                }
            }
            _ = tick.tick() => app.tick(Instant::now()),
        }
    }
    Ok(())
}
