use ratatui::{
    Frame,
    layout::Rect,
    style::{Color, Style},
    symbols::Marker,
    text::Span,
    widgets::canvas::{Canvas, Context, Line, Points},
};

use crate::candles::Candle;
use crate::chart::{Shape, Surface, Tone, format_price};

fn tone_color(tone: Tone) -> Color {
    match tone {
        Tone::Grid => Color::Rgb(40, 44, 52),
        Tone::Axis => Color::Gray,
        Tone::Up => Color::Green,
        Tone::Down => Color::Red,
        Tone::Fill(alpha) => {
            let a = alpha.clamp(0.0, 1.0);
            Color::Rgb(0, (30.0 + 90.0 * a) as u8, (45.0 + 120.0 * a) as u8)
        }
        Tone::VolumeUp => Color::Rgb(0, 95, 60),
        Tone::VolumeDown => Color::Rgb(110, 30, 30),
        Tone::Sma => Color::Yellow,
        Tone::Ema => Color::Magenta,
        Tone::Bollinger => Color::Blue,
        Tone::Rsi => Color::LightMagenta,
        Tone::RsiBand => Color::DarkGray,
        Tone::Price => Color::White,
        Tone::Crosshair => Color::Gray,
    }
}

fn draw_shape(ctx: &mut Context, shape: &Shape, height: f64) {
    // Surface y grows downwards, canvas y grows upwards.
    let flip = |y: f64| height - y;
    match shape {
        Shape::Line { x1, y1, x2, y2, tone } => {
            ctx.draw(&Line::new(*x1, flip(*y1), *x2, flip(*y2), tone_color(*tone)));
        }
        Shape::Rect {
            x,
            y,
            width,
            height: h,
            tone,
        } => {
            let color = tone_color(*tone);
            let (top, bottom) = (flip(*y), flip(y + h));
            if *width < 1.0 {
                let cx = x + width / 2.0;
                ctx.draw(&Line::new(cx, top, cx, bottom, color));
                return;
            }
            let mut cx = *x;
            while cx <= x + width {
                ctx.draw(&Line::new(cx, top, cx, bottom, color));
                cx += 1.0;
            }
        }
        Shape::Dot { x, y, tone } => {
            ctx.draw(&Points {
                coords: &[(*x, flip(*y))],
                color: tone_color(*tone),
            });
        }
        Shape::Label { x, y, text, tone } => {
            ctx.print(
                *x,
                flip(*y),
                Span::styled(text.clone(), Style::default().fg(tone_color(*tone))),
            );
        }
    }
}

/// Paints a rendered chart surface into `area` with Braille dots.
pub fn paint(f: &mut Frame, area: Rect, surface: &Surface) {
    let (width, height) = (surface.width() as f64, surface.height() as f64);
    if area.width == 0 || area.height == 0 || width == 0.0 || height == 0.0 {
        return;
    }
    let canvas = Canvas::default()
        .marker(Marker::Braille)
        .x_bounds([0.0, width])
        .y_bounds([0.0, height])
        .paint(|ctx| {
            let mut labels = Vec::new();
            for shape in surface.shapes() {
                match shape {
                    Shape::Label { .. } => labels.push(shape),
                    _ => draw_shape(ctx, shape, height),
                }
            }
            // Text goes on its own layer above the dots.
            ctx.layer();
            for label in labels {
                draw_shape(ctx, label, height);
            }
        });
    f.render_widget(canvas, area);
}

/// `O 1.00  H 2.00  L 0.50  C 1.50` for the candle under the pointer.
pub fn ohlc_line(candle: &Candle) -> String {
    format!(
        "O {}  H {}  L {}  C {}",
        format_price(candle.open),
        format_price(candle.high),
        format_price(candle.low),
        format_price(candle.close)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_tone_brightens_with_alpha() {
        let faint = tone_color(Tone::Fill(0.0));
        let strong = tone_color(Tone::Fill(1.0));
        assert_ne!(faint, strong);
        assert_eq!(tone_color(Tone::Fill(7.0)), strong);
    }

    #[test]
    fn ohlc_formatting() {
        let c = Candle {
            time: 0,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 0.0,
        };
        assert!(ohlc_line(&c).starts_with("O "));
    }
}
