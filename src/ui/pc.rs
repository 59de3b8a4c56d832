use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph},
};
use std::time::Instant;

use crate::dashboard::pc::{PcLink, PcState};
use crate::feeds::sensors::gauge_fraction;

fn heat_color(value: Option<i64>) -> Color {
    match value {
        None => Color::Gray,
        Some(t) if t <= 30 => Color::LightBlue,
        Some(t) if t <= 45 => Color::Cyan,
        Some(t) if t <= 55 => Color::Yellow,
        Some(t) if t <= 65 => Color::LightYellow,
        Some(t) if t <= 75 => Color::LightRed,
        Some(_) => Color::Red,
    }
}

fn degrees(value: Option<i64>) -> String {
    value.map_or_else(|| "--°".to_string(), |t| format!("{}°", t))
}

pub fn render(f: &mut Frame, area: Rect, state: &PcState, _now: Instant) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(area);
    let gauges = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(rows[1]);

    let readings = state.readings.unwrap_or_default();
    let status_color = match state.link {
        PcLink::Online => Color::Green,
        PcLink::CheckSensors => Color::Yellow,
        PcLink::Offline => Color::Red,
        PcLink::Waiting => Color::Gray,
    };
    let (mode, mode_color) = if readings.is_gaming() {
        ("GAMING", Color::Magenta)
    } else {
        ("IDLE", Color::Cyan)
    };
    let status = Paragraph::new(Line::from(vec![
        Span::styled(state.link.label(), Style::default().fg(status_color).add_modifier(Modifier::BOLD)),
        Span::raw("   "),
        Span::styled(format!("[{}]", mode), Style::default().fg(mode_color)),
    ]))
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL).title(state.cfg.endpoint.clone()));
    f.render_widget(status, rows[0]);

    let cpu_title = format!("CPU {}", degrees(readings.cpu_temp));
    let gpu_title = match readings.gpu_hotspot {
        Some(hot) => format!("GPU {}  Hotspot {}°", degrees(readings.gpu_temp), hot),
        None => format!("GPU {}", degrees(readings.gpu_temp)),
    };
    for (rect, title, temp) in [
        (gauges[0], cpu_title, readings.cpu_temp),
        (gauges[1], gpu_title, readings.gpu_temp),
    ] {
        let gauge = Gauge::default()
            .block(Block::default().borders(Borders::ALL).title(title))
            .gauge_style(Style::default().fg(heat_color(temp)))
            .ratio(gauge_fraction(temp))
            .label(degrees(temp));
        f.render_widget(gauge, rect);
    }

    let load = |v: Option<i64>| v.map_or_else(|| "--%".to_string(), |l| format!("{}%", l));
    let loads = Paragraph::new(Line::from(vec![
        Span::raw("CPU "),
        Span::styled(load(readings.cpu_load), Style::default().fg(heat_color(readings.cpu_load))),
        Span::raw("  ·  GPU "),
        Span::styled(load(readings.gpu_load), Style::default().fg(heat_color(readings.gpu_load))),
    ]))
    .alignment(Alignment::Center)
    .block(Block::default().borders(Borders::ALL).title("Load"));
    f.render_widget(loads, rows[2]);
}
