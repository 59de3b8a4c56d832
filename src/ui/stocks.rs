use ratatui::{
    Frame,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
};
use std::time::Instant;

use super::chart::{ohlc_line, paint};
use super::{percent, signed_color};
use crate::chart::{ChartMode, format_price};
use crate::dashboard::stocks::StocksState;
use crate::feeds::stocks::format_volume;

pub fn render(f: &mut Frame, area: Rect, state: &mut StocksState, _now: Instant) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(0)])
        .split(area);
    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(24)])
        .split(rows[1]);

    render_quote(f, state, rows[0]);
    render_chart(f, state, body[0]);
    render_heatmap(f, state, body[1]);
}

fn render_quote(f: &mut Frame, state: &StocksState, area: Rect) {
    let chip_color = if state.api.is_ok() { Color::Green } else { Color::Yellow };
    let market = match state.market_open {
        Some(true) => Span::styled("Market Open", Style::default().fg(Color::Green)),
        Some(false) => Span::styled("Market Closed", Style::default().fg(Color::Red)),
        None => Span::styled("Market --", Style::default().fg(Color::Gray)),
    };

    let mut lines = Vec::new();
    match &state.snapshot {
        Some(snap) => {
            let change = snap.change();
            let price_color = signed_color(change.map(|(d, _)| d));
            let symbol = match change {
                Some((d, _)) if d < 0.0 => "▼",
                _ => "▲",
            };
            let (diff, pct) = change.unwrap_or((0.0, 0.0));
            lines.push(Line::from(vec![
                Span::raw(format!("{} ", state.ticker)),
                Span::styled(
                    format!("${}", snap.last.map(format_price).unwrap_or_else(|| "--".into())),
                    Style::default().fg(price_color).add_modifier(Modifier::BOLD),
                ),
                Span::raw("  "),
                Span::styled(
                    format!("{} ${:.2} ({:.2}%)", symbol, diff.abs(), pct.abs()),
                    Style::default().fg(price_color),
                ),
            ]));
            let fmt = |v: Option<f64>| v.map(format_price).unwrap_or_else(|| "--".into());
            lines.push(Line::from(format!(
                "O {}  H {}  L {}  Vol {}",
                fmt(snap.open),
                fmt(snap.high),
                fmt(snap.low),
                snap.volume.map(format_volume).unwrap_or_else(|| "--".into())
            )));
        }
        None => lines.push(Line::from(Span::styled(
            format!("{} loading...", state.ticker),
            Style::default().fg(Color::Gray),
        ))),
    }

    let block = Block::default()
        .borders(Borders::ALL)
        .title(Line::from(vec![
            Span::raw(format!("{} ", state.ticker)),
            Span::styled(format!("[{}]", state.api.label()), Style::default().fg(chip_color)),
            Span::raw(" "),
            market,
        ]));
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_chart(f: &mut Frame, state: &mut StocksState, area: Rect) {
    let mode = if state.chart.mode == ChartMode::Candle { "Candles" } else { "Line" };
    let mut block = Block::default()
        .borders(Borders::ALL)
        .title(format!("{} {} - {}", state.ticker, state.tf.display(), mode));
    if let Some(candle) = state.chart.hovered(&state.store, state.tf) {
        block = block.title_bottom(ohlc_line(candle));
    }
    let inner = block.inner(area);
    f.render_widget(block, area);

    if state.store.len(state.tf) == 0 {
        state.chart_area = None;
        let loading = Paragraph::new("Loading bars...")
            .style(Style::default().fg(Color::Yellow))
            .alignment(Alignment::Center);
        f.render_widget(loading, inner);
        return;
    }
    state.chart_area = Some(inner);
    state.paint_chart((inner.width as u32 * 2, inner.height as u32 * 4));
    paint(f, inner, state.chart.surface());
}

fn render_heatmap(f: &mut Frame, state: &StocksState, area: Rect) {
    let items: Vec<ListItem> = state
        .heatmap
        .iter()
        .enumerate()
        .map(|(i, tile)| {
            let marker = if i == state.heat_selected { "▶ " } else { "  " };
            ListItem::new(Line::from(vec![
                Span::raw(format!("{}{:<7}", marker, tile.ticker)),
                Span::styled(
                    percent(tile.change_pct),
                    Style::default().fg(signed_color(tile.change_pct)),
                ),
            ]))
        })
        .collect();
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Heatmap"));
    f.render_widget(list, area);
}
