use chrono::{Local, Utc};
use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph, block::Title},
};
use std::time::Instant;

use crate::app::{App, InputState};

pub mod chart;
pub mod crypto;
pub mod pc;
pub mod stocks;
pub mod weather;

const GLOBAL_HELP: &str = "'Tab'/'F1-F4': Dashboard | 'e': Errors | 'q': Quit";

pub fn draw(f: &mut Frame, app: &mut App, now: Instant) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(4),
        ])
        .split(f.area());

    render_header(f, app, chunks[0]);

    let help = match app.controller.current() {
        Some(dashboard) => {
            dashboard.draw(f, chunks[1], now);
            dashboard.help()
        }
        None => {
            let idle = Paragraph::new("No dashboard registered")
                .style(Style::default().fg(Color::Gray))
                .alignment(Alignment::Center)
                .block(Block::default().borders(Borders::ALL));
            f.render_widget(idle, chunks[1]);
            ""
        }
    };
    render_footer(f, help, chunks[2]);

    if let Some(toast) = app.status.active_toast(now) {
        render_toast(f, toast);
    }
    if let Some(input) = &app.input {
        render_prompt(f, input);
    }
    if app.show_error_log {
        render_error_log(f, app);
    }
}

fn render_header(f: &mut Frame, app: &App, area: Rect) {
    let current = app.controller.current_id();
    let mut tabs = Vec::new();
    for (i, (id, title)) in app.controller.ids().into_iter().enumerate() {
        let style = if Some(id) == current {
            Style::default()
                .fg(Color::Black)
                .bg(Color::Cyan)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Gray)
        };
        tabs.push(Span::styled(format!(" F{} {} ", i + 1, title), style));
        tabs.push(Span::raw(" "));
    }

    let badge = &app.status.badge;
    let badge_span = if badge.live {
        Span::styled(format!("[● {}]", badge.label), Style::default().fg(Color::Green))
    } else {
        Span::styled(format!("[○ {}]", badge.label), Style::default().fg(Color::Yellow))
    };
    tabs.push(badge_span);
    if app.status.rate() > 0.0 {
        tabs.push(Span::styled(
            format!("  {:.1} msg/s", app.status.rate()),
            Style::default().fg(Color::DarkGray),
        ));
    }

    let wall = Utc::now();
    let stamps: Vec<String> = app
        .status
        .stamps()
        .map(|(section, at)| {
            let secs = wall.signed_duration_since(*at).num_seconds().max(0);
            format!("{} {}s", section, secs)
        })
        .collect();
    if !stamps.is_empty() {
        tabs.push(Span::styled(
            format!("  {}", stamps.join(" · ")),
            Style::default().fg(Color::DarkGray),
        ));
    }

    let header = Paragraph::new(Line::from(tabs)).block(
        Block::default()
            .borders(Borders::ALL)
            .title("dashty")
            .title(
                Title::from(Local::now().format("%H:%M:%S").to_string())
                    .alignment(Alignment::Right),
            ),
    );
    f.render_widget(header, area);
}

fn render_footer(f: &mut Frame, help: &str, area: Rect) {
    let footer_text = vec![Line::from(help.to_string()), Line::from(GLOBAL_HELP)];
    let footer = Paragraph::new(footer_text)
        .block(Block::default().borders(Borders::ALL).title("Controls"));
    f.render_widget(footer, area);
}

/// `area`-relative rectangle of at most `width` x `height`, centred.
pub fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

/// Green for gains, red for losses, gray when unknown.
pub fn signed_color(value: Option<f64>) -> Color {
    match value {
        Some(v) if v > 0.0 => Color::Green,
        Some(v) if v < 0.0 => Color::Red,
        _ => Color::Gray,
    }
}

/// `+1.23%`, or `--` when unknown.
pub fn percent(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{:+.2}%", v),
        _ => "--".to_string(),
    }
}

/// Text width plus borders and padding, capped at `max`.
fn toast_width(message: &str, max: u16) -> u16 {
    u16::try_from(message.chars().count())
        .unwrap_or(u16::MAX)
        .saturating_add(4)
        .min(max)
}

fn render_toast(f: &mut Frame, message: &str) {
    let area = f.area();
    let width = toast_width(message, area.width);
    let toast_area = Rect {
        x: area.width.saturating_sub(width.saturating_add(1)),
        y: area.y + 3,
        width,
        height: 3.min(area.height),
    };
    let toast = Paragraph::new(message.to_string())
        .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
        .block(Block::default().borders(Borders::ALL).style(Style::default().bg(Color::Black)));
    f.render_widget(Clear, toast_area);
    f.render_widget(toast, toast_area);
}

fn render_prompt(f: &mut Frame, input: &InputState) {
    let popup_area = centered(f.area(), 50, 6);
    let mut text = vec![
        Line::from(vec![
            Span::styled("> ", Style::default().fg(Color::Cyan)),
            Span::raw(input.buffer.clone()),
            Span::styled("_", Style::default().add_modifier(Modifier::SLOW_BLINK)),
        ]),
        Line::from(""),
    ];
    match &input.error {
        Some(error) => text.push(Line::from(Span::styled(
            error.clone(),
            Style::default().fg(Color::Red),
        ))),
        None => text.push(Line::from(Span::styled(
            "Enter to apply, Esc to cancel",
            Style::default().fg(Color::Gray),
        ))),
    }
    let popup = Paragraph::new(text).block(
        Block::default()
            .borders(Borders::ALL)
            .title(input.prompt.title.clone())
            .style(Style::default().bg(Color::Black)),
    );
    f.render_widget(Clear, popup_area);
    f.render_widget(popup, popup_area);
}

fn render_error_log(f: &mut Frame, app: &App) {
    let popup_area = centered(f.area(), 70, 15);
    let items: Vec<ListItem> = if app.status.error_log.is_empty() {
        vec![ListItem::new(Line::from(Span::styled(
            "No errors logged yet",
            Style::default().fg(Color::Gray),
        )))]
    } else {
        app.status
            .error_log
            .iter()
            .map(|error| {
                ListItem::new(Line::from(Span::styled(
                    error.clone(),
                    Style::default().fg(Color::Red),
                )))
            })
            .collect()
    };
    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Error Log (ESC to close)")
            .style(Style::default().bg(Color::Black)),
    );
    f.render_widget(Clear, popup_area);
    f.render_widget(list, popup_area);
}
