use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
};
use std::time::Instant;

use crate::dashboard::weather::WeatherState;
use crate::feeds::weather::{self, Day};

const HOURS_SHOWN: usize = 24;

fn temp_color(t: f64) -> Color {
    match t.round() as i64 {
        i64::MIN..=0 => Color::LightBlue,
        1..=10 => Color::Cyan,
        11..=18 => Color::Green,
        19..=25 => Color::Yellow,
        _ => Color::Red,
    }
}

pub fn render(f: &mut Frame, area: Rect, state: &WeatherState, _now: Instant) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(7),
            Constraint::Length(4),
            Constraint::Min(0),
        ])
        .split(area);
    let bottom = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Length(34), Constraint::Min(0)])
        .split(rows[2]);

    render_current(f, state, rows[0]);
    render_hourly(f, state, rows[1]);
    render_days(f, state, bottom[0]);
    render_day_detail(f, state, bottom[1]);
}

fn render_current(f: &mut Frame, state: &WeatherState, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!("● {}", state.cfg.name));

    let lines = if let Some(forecast) = &state.forecast {
        let cur = &forecast.current;
        let (icon, desc) = weather::describe(cur.code);
        vec![
            Line::from(vec![
                Span::raw(format!("{} ", icon)),
                Span::styled(
                    format!("{:.0}°C", cur.temperature),
                    Style::default()
                        .fg(temp_color(cur.temperature))
                        .add_modifier(Modifier::BOLD),
                ),
                Span::raw(format!("  {}", desc)),
            ]),
            Line::from(vec![
                Span::raw("Feels like "),
                Span::styled(
                    format!("{:.0}°C", cur.apparent),
                    Style::default().fg(temp_color(cur.apparent)),
                ),
            ]),
            Line::from(format!(
                "Humidity {:.0}%  Wind {:.0} km/h {}",
                cur.humidity,
                cur.wind_speed,
                weather::wind_direction(cur.wind_direction)
            )),
            Line::from(format!(
                "Pressure {:.0} hPa  Visibility {}{}",
                cur.pressure,
                weather::visibility(cur.code),
                forecast
                    .today()
                    .map(|d| format!("  Today {:.0}° / {:.0}°", d.high, d.low))
                    .unwrap_or_default()
            )),
        ]
    } else if let Some(cache) = &state.cached {
        vec![
            Line::from(vec![
                Span::raw(format!("{} ", cache.icon)),
                Span::styled(
                    format!("{}°C", cache.cur_temp),
                    Style::default()
                        .fg(temp_color(cache.cur_temp as f64))
                        .add_modifier(Modifier::BOLD),
                ),
                Span::raw(format!("  {}", cache.desc)),
            ]),
            Line::from(format!("Feels like {}°C", cache.feels_temp)),
            Line::from(format!(
                "Humidity {}%  Wind {} km/h {}",
                cache.humidity, cache.wind, cache.wind_dir
            )),
            Line::from(format!("Pressure {} hPa", cache.pressure)),
        ]
    } else if state.failed {
        vec![Line::from(Span::styled(
            "Failed to load weather",
            Style::default().fg(Color::Red),
        ))]
    } else {
        vec![Line::from(Span::styled("Loading…", Style::default().fg(Color::Gray)))]
    };
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_hourly(f: &mut Frame, state: &WeatherState, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title("Next 24h");
    let Some(forecast) = &state.forecast else {
        f.render_widget(Paragraph::new("Loading…").block(block), area);
        return;
    };
    let slot = 7usize;
    let fits = (area.width.saturating_sub(2) as usize / slot).min(HOURS_SHOWN);
    let hours = forecast.upcoming_hours(fits);
    let mut top = Vec::new();
    let mut bottom = Vec::new();
    for hour in hours {
        let (icon, _) = weather::describe(hour.code);
        top.push(Span::raw(format!("{:<7}", hour.time.format("%H:%M"))));
        bottom.push(Span::styled(
            format!("{}{:<5}", icon, format!("{:.0}°", hour.temperature)),
            Style::default().fg(temp_color(hour.temperature)),
        ));
    }
    let lines = vec![Line::from(top), Line::from(bottom)];
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn render_days(f: &mut Frame, state: &WeatherState, area: Rect) {
    let items: Vec<ListItem> = state
        .forecast
        .iter()
        .flat_map(|fc| fc.daily.iter().take(7))
        .enumerate()
        .map(|(i, day)| {
            let (icon, _) = weather::describe(day.code);
            let style = if i == state.selected_day {
                Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            let name = if i == 0 {
                "Today".to_string()
            } else {
                day.date.format("%a %d").to_string()
            };
            ListItem::new(Line::from(vec![
                Span::raw(format!("{:<7}{} ", name, icon)),
                Span::styled(format!("{:>4.0}°", day.high), Style::default().fg(temp_color(day.high))),
                Span::raw(" / "),
                Span::styled(format!("{:.0}°", day.low), Style::default().fg(temp_color(day.low))),
                Span::raw(format!("  {}%", day.rain)),
            ]))
            .style(style)
        })
        .collect();
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title("7 Days"));
    f.render_widget(list, area);
}

fn detail_lines(day: &Day) -> Vec<Line<'static>> {
    let (icon, desc) = weather::describe(day.code);
    let clock = |t: Option<chrono::NaiveDateTime>| {
        t.map(|t| t.format("%H:%M").to_string())
            .unwrap_or_else(|| "--".to_string())
    };
    vec![
        Line::from(format!("{} {}", icon, desc)),
        Line::from(format!("High {:.0}°C  Low {:.0}°C", day.high, day.low)),
        Line::from(format!(
            "Sunrise {}  Sunset {}",
            clock(day.sunrise),
            clock(day.sunset)
        )),
        Line::from(format!(
            "UV {:.1}  Rain {}%  Wind {:.0} km/h{}",
            day.uv,
            day.rain,
            day.wind,
            day.humidity
                .map(|h| format!("  Humidity {:.0}%", h))
                .unwrap_or_default()
        )),
        Line::from(""),
        Line::from(Span::styled(day.summary(), Style::default().fg(Color::Cyan))),
    ]
}

fn render_day_detail(f: &mut Frame, state: &WeatherState, area: Rect) {
    let day = state
        .forecast
        .as_ref()
        .and_then(|fc| fc.daily.get(state.selected_day));
    let (title, lines) = match day {
        Some(day) => (day.date.format("%A %d %B").to_string(), detail_lines(day)),
        None => ("Day".to_string(), vec![Line::from("--")]),
    };
    let block = Block::default().borders(Borders::ALL).title(title);
    f.render_widget(
        Paragraph::new(lines).wrap(Wrap { trim: true }).block(block),
        area,
    );
}
