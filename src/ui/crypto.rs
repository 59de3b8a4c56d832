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
use crate::dashboard::crypto::CryptoState;

pub fn render(f: &mut Frame, area: Rect, state: &mut CryptoState, _now: Instant) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(5), Constraint::Min(0)])
        .split(area);
    let top = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(34),
            Constraint::Percentage(33),
            Constraint::Percentage(33),
        ])
        .split(rows[0]);
    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(30)])
        .split(rows[1]);
    let side = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(8)])
        .split(body[1]);

    render_price(f, state, top[0]);
    render_flow(f, state, top[1]);
    render_sentiment(f, state, top[2]);
    render_chart(f, state, body[0]);
    render_heatmap(f, state, side[0]);
    render_alerts(f, state, side[1]);
}

fn render_price(f: &mut Frame, state: &CryptoState, area: Rect) {
    let m = &state.market;
    let color = match m.direction() {
        Some(true) => Color::Green,
        Some(false) => Color::Red,
        None => Color::White,
    };
    let price = m.price.map(format_price).unwrap_or_else(|| "--".to_string());
    let mut lines = vec![Line::from(vec![
        Span::raw(format!("{} ", state.cfg.display_name(&state.symbol))),
        Span::styled(
            format!("${}", price),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        ),
    ])];
    match m.ticker {
        Some(t) => {
            let symbol = if t.change_pct >= 0.0 { "▲" } else { "▼" };
            lines.push(Line::from(Span::styled(
                format!(
                    "{} ${} ({:.2}%)",
                    symbol,
                    format_price(t.change_abs.abs()),
                    t.change_pct.abs()
                ),
                Style::default().fg(signed_color(Some(t.change_pct))),
            )));
            lines.push(Line::from(format!(
                "H {}  L {}",
                format_price(t.high),
                format_price(t.low)
            )));
        }
        None => lines.push(Line::from(Span::styled(
            "Waiting for ticker...",
            Style::default().fg(Color::Gray),
        ))),
    }
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!("{} [{}]", state.symbol, state.tf.display()));
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_flow(f: &mut Frame, state: &CryptoState, area: Rect) {
    let m = &state.market;
    let spread = m.spread().map(format_price).unwrap_or_else(|| "--".to_string());
    let buy = m
        .buy_share()
        .map(|b| format!("{:.0}% buy / {:.0}% sell", b, 100.0 - b))
        .unwrap_or_else(|| "--".to_string());
    let (from_high, from_low) = m.range_distance().unzip();
    let volume = m
        .ticker
        .map(|t| format!("${:.0}M  {} trades", t.quote_volume / 1e6, t.trades))
        .unwrap_or_else(|| "--".to_string());
    let lines = vec![
        Line::from(format!("Spread {}  CVD {:+.0}", spread, m.cvd)),
        Line::from(Span::styled(buy, Style::default().fg(signed_color(m.buy_share().map(|b| b - 50.0))))),
        Line::from(vec![
            Span::raw("From high "),
            Span::styled(percent(from_high), Style::default().fg(signed_color(from_high))),
            Span::raw("  low "),
            Span::styled(percent(from_low), Style::default().fg(signed_color(from_low))),
        ]),
    ];
    let block = Block::default().borders(Borders::ALL).title(format!("Flow · 24h {}", volume));
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_sentiment(f: &mut Frame, state: &CryptoState, area: Rect) {
    let fgi = match &state.fgi {
        Some(fg) => {
            let color = match fg.value {
                0..=24 => Color::Red,
                25..=44 => Color::LightRed,
                45..=55 => Color::Yellow,
                56..=74 => Color::LightGreen,
                _ => Color::Green,
            };
            Span::styled(format!("{} {}", fg.value, fg.label), Style::default().fg(color))
        }
        None => Span::styled("--", Style::default().fg(Color::Gray)),
    };
    let dominance = state
        .dominance
        .map(|d| format!("{:.1}%", d))
        .unwrap_or_else(|| "--".to_string());
    let p = &state.performance;
    let lines = vec![
        Line::from(vec![Span::raw("Fear & Greed "), fgi]),
        Line::from(format!("BTC dominance {}", dominance)),
        Line::from(vec![
            Span::raw("7d "),
            Span::styled(percent(p.week), Style::default().fg(signed_color(p.week))),
            Span::raw(" 30d "),
            Span::styled(percent(p.month), Style::default().fg(signed_color(p.month))),
            Span::raw(" YTD "),
            Span::styled(percent(p.ytd), Style::default().fg(signed_color(p.ytd))),
        ]),
    ];
    let block = Block::default().borders(Borders::ALL).title("Sentiment");
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_chart(f: &mut Frame, state: &mut CryptoState, area: Rect) {
    let flags = state.chart.flags;
    let mut title = format!(
        "{} {}",
        if state.chart.mode == ChartMode::Candle { "Candles" } else { "Line" },
        state.tf.display()
    );
    for (on, name) in [
        (flags.sma, "SMA"),
        (flags.ema, "EMA"),
        (flags.bollinger, "BB"),
        (flags.rsi, "RSI"),
    ] {
        if on {
            title.push(' ');
            title.push_str(name);
        }
    }
    let mut block = Block::default().borders(Borders::ALL).title(title);
    if let Some(candle) = state.chart.hovered(&state.store, state.tf) {
        block = block.title_bottom(ohlc_line(candle));
    }
    let inner = block.inner(area);
    f.render_widget(block, area);

    if state.store.len(state.tf) == 0 {
        state.chart_area = None;
        let loading = Paragraph::new("Loading candles...")
            .style(Style::default().fg(Color::Yellow))
            .alignment(Alignment::Center);
        f.render_widget(loading, inner);
        return;
    }
    state.chart_area = Some(inner);
    state.paint_chart((inner.width as u32 * 2, inner.height as u32 * 4));
    paint(f, inner, state.chart.surface());
}

fn render_heatmap(f: &mut Frame, state: &CryptoState, area: Rect) {
    let items: Vec<ListItem> = if state.heatmap.is_empty() {
        vec![ListItem::new(Span::styled("Loading...", Style::default().fg(Color::Gray)))]
    } else {
        state
            .heatmap
            .iter()
            .enumerate()
            .map(|(i, tile)| {
                let marker = if i == state.heat_selected { "▶ " } else { "  " };
                let name = tile.symbol.trim_end_matches("USDT");
                ListItem::new(Line::from(vec![
                    Span::raw(format!("{}{:<8}", marker, name)),
                    Span::styled(
                        percent(Some(tile.change_pct)),
                        Style::default().fg(signed_color(Some(tile.change_pct))),
                    ),
                ]))
            })
            .collect()
    };
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title("Heatmap 24h"));
    f.render_widget(list, area);
}

fn render_alerts(f: &mut Frame, state: &CryptoState, area: Rect) {
    let show = |v: f64| if v > 0.0 { format_price(v) } else { "off".to_string() };
    let (high_hit, low_hit) = state.alerts.latched();
    let mut lines = vec![Line::from(vec![
        Span::styled(
            format!("High {}", show(state.alerts.high())),
            Style::default().fg(if high_hit { Color::Yellow } else { Color::Green }),
        ),
        Span::raw("  "),
        Span::styled(
            format!("Low {}", show(state.alerts.low())),
            Style::default().fg(if low_hit { Color::Yellow } else { Color::Red }),
        ),
    ])];
    for entry in state.alerts.history().iter().take(area.height.saturating_sub(3) as usize) {
        lines.push(Line::from(Span::styled(
            format!("{} {}", entry.time, entry.message),
            Style::default().fg(Color::DarkGray),
        )));
    }
    let title = if state.alerts.is_armed() { "Alerts (armed)" } else { "Alerts" };
    let block = Block::default().borders(Borders::ALL).title(title);
    f.render_widget(Paragraph::new(lines).block(block), area);
}
