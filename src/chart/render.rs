use serde::{Deserialize, Serialize};

use super::surface::{Surface, Tone};
use super::viewport::{self, Viewport};
use crate::candles::{Candle, CandleStore, TimeFrame};
use crate::indicators::{Band, IndicatorCache};

const PAD: f64 = 2.0;
const VOLUME_HEIGHT: f64 = 12.0;
const RSI_HEIGHT: f64 = 20.0;
const GAP: f64 = 2.0;
const GRID_LINES: usize = 5;
const PRICE_PADDING: f64 = 0.05;
const FILL_BANDS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartMode {
    #[default]
    #[serde(alias = "candlestick")]
    Candle,
    Line,
}

impl ChartMode {
    pub fn toggle(self) -> Self {
        match self {
            ChartMode::Candle => ChartMode::Line,
            ChartMode::Line => ChartMode::Candle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Indicator {
    Sma,
    Ema,
    Bollinger,
    Rsi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorFlags {
    pub sma: bool,
    pub ema: bool,
    pub bollinger: bool,
    pub rsi: bool,
}

impl IndicatorFlags {
    pub fn toggle(&mut self, which: Indicator) {
        let flag = match which {
            Indicator::Sma => &mut self.sma,
            Indicator::Ema => &mut self.ema,
            Indicator::Bollinger => &mut self.bollinger,
            Indicator::Rsi => &mut self.rsi,
        };
        *flag = !*flag;
    }
}

/// Geometry of the last rendered frame, kept for pointer mapping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameLayout {
    pub pad: f64,
    pub step: f64,
    pub visible: usize,
    /// Index of the first visible candle within the full series.
    pub start: usize,
    pub price_min: f64,
    pub price_max: f64,
}

/// Price chart with volume strip and optional RSI strip.
pub struct ChartRenderer {
    pub mode: ChartMode,
    pub flags: IndicatorFlags,
    viewport: Viewport,
    cache: IndicatorCache,
    surface: Surface,
    surface_allocations: u64,
    layout: Option<FrameLayout>,
    drag_anchor: Option<(f64, usize)>,
    hover_x: Option<f64>,
    renders: u64,
}

impl ChartRenderer {
    pub fn new(mode: ChartMode, flags: IndicatorFlags) -> Self {
        Self {
            mode,
            flags,
            viewport: Viewport::default(),
            cache: IndicatorCache::default(),
            surface: Surface::new(0, 0),
            surface_allocations: 1,
            layout: None,
            drag_anchor: None,
            hover_x: None,
            renders: 0,
        }
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn reset_viewport(&mut self, len: usize) {
        self.viewport = Viewport::reset(len);
        self.drag_anchor = None;
    }

    /// Replaces the viewport with a different default window size.
    pub fn reset_viewport_to(&mut self, visible: usize, len: usize) {
        self.viewport = Viewport {
            visible_count: visible.min(len),
            scroll_offset: 0,
        };
        self.drag_anchor = None;
    }

    pub fn zoom(&mut self, out: bool, len: usize) {
        self.viewport.zoom(out, len);
    }

    pub fn pan(&mut self, candles: i64, len: usize) {
        self.viewport.pan(candles, len);
    }

    pub fn begin_drag(&mut self, x: f64) {
        self.drag_anchor = Some((x, self.viewport.scroll_offset));
    }

    /// Dragging right reveals older candles.
    pub fn drag_to(&mut self, x: f64, len: usize) {
        let Some((start_x, start_offset)) = self.drag_anchor else {
            return;
        };
        let Some(step) = self.layout.map(|l| l.step).filter(|s| *s > 0.0) else {
            return;
        };
        let moved = ((x - start_x) / step).round() as i64;
        self.viewport.scroll_offset = start_offset;
        self.viewport.pan(moved, len);
    }

    pub fn end_drag(&mut self) {
        self.drag_anchor = None;
    }

    pub fn is_dragging(&self) -> bool {
        self.drag_anchor.is_some()
    }

    pub fn hover(&mut self, x: Option<f64>) {
        self.hover_x = x;
    }

    /// Index within the visible slice under surface x.
    pub fn hit_test(&self, x: f64) -> Option<usize> {
        let layout = self.layout?;
        viewport::hit_test(x, layout.pad, layout.step, layout.visible)
    }

    /// Candle under the crosshair, read from the current series.
    pub fn hovered<'a>(&self, store: &'a CandleStore, tf: TimeFrame) -> Option<&'a Candle> {
        let layout = self.layout?;
        let index = self.hit_test(self.hover_x?)?;
        store.series(tf).get(layout.start + index)
    }

    pub fn layout(&self) -> Option<FrameLayout> {
        self.layout
    }

    pub fn surface(&self) -> &Surface {
        &self.surface
    }

    pub fn surface_allocations(&self) -> u64 {
        self.surface_allocations
    }

    pub fn renders(&self) -> u64 {
        self.renders
    }

    pub fn needs_resize(&self, size: (u32, u32)) -> bool {
        self.surface.size() != size
    }

    /// Drops the backing surface and starts from a fresh one.
    pub fn replace_surface(&mut self) {
        let (w, h) = self.surface.size();
        self.surface = Surface::new(w, h);
        self.surface_allocations += 1;
        self.layout = None;
        tracing::info!("chart surface replaced");
    }

    pub fn render(&mut self, size: (u32, u32), store: &CandleStore, tf: TimeFrame) {
        if self.needs_resize(size) {
            self.surface = Surface::new(size.0, size.1);
            self.surface_allocations += 1;
        }
        self.renders += 1;
        self.surface.clear();
        self.layout = None;

        let series = store.series(tf);
        self.viewport.clamp(series.len());
        let data = store.visible_slice(tf, self.viewport);
        let w = size.0 as f64;
        let h = size.1 as f64;
        let rsi_h = if self.flags.rsi { RSI_HEIGHT + GAP } else { 0.0 };
        let main_bottom = h - VOLUME_HEIGHT - GAP - rsi_h;
        if data.len() < 2 || w < PAD * 2.0 + 2.0 || main_bottom <= PAD * 2.0 {
            return;
        }

        let start = series.len() - self.viewport.scroll_offset.min(series.len()) - data.len();
        let n = data.len();
        let step = (w - PAD * 2.0) / n as f64;
        let x_at = |i: usize| PAD + i as f64 * step + step / 2.0;

        let mut lo = data.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let mut hi = data.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        let range = hi - lo;
        let padding = if range > 0.0 {
            range * PRICE_PADDING
        } else {
            hi.abs().max(1.0) * 0.01
        };
        lo -= padding;
        hi += padding;
        let main_h = main_bottom - PAD;
        let y_at = |price: f64| PAD + (hi - price) / (hi - lo) * main_h;

        self.layout = Some(FrameLayout {
            pad: PAD,
            step,
            visible: n,
            start,
            price_min: lo,
            price_max: hi,
        });

        // Grid
        for g in 0..GRID_LINES {
            let y = PAD + main_h * g as f64 / (GRID_LINES - 1) as f64;
            let price = hi - (hi - lo) * g as f64 / (GRID_LINES - 1) as f64;
            self.surface.line(PAD, y, w - PAD, y, Tone::Grid);
            self.surface.label(PAD, y, format_price(price), Tone::Axis);
        }

        // Price series
        match self.mode {
            ChartMode::Candle => {
                let body_w = (step * 0.6).max(1.0);
                for (i, c) in data.iter().enumerate() {
                    let tone = if c.is_bullish() { Tone::Up } else { Tone::Down };
                    let x = x_at(i);
                    self.surface.line(x, y_at(c.high), x, y_at(c.low), tone);
                    let top = y_at(c.open.max(c.close));
                    let bottom = y_at(c.open.min(c.close));
                    let body_h = (bottom - top).max(1.0);
                    self.surface.rect(x - body_w / 2.0, top, body_w, body_h, tone);
                }
            }
            ChartMode::Line => {
                let tone = if data[n - 1].close >= data[0].close { Tone::Up } else { Tone::Down };
                for (i, c) in data.iter().enumerate() {
                    let x = x_at(i);
                    let top = y_at(c.close);
                    let depth = main_bottom - top;
                    for band in 0..FILL_BANDS {
                        let y1 = top + depth * band as f64 / FILL_BANDS as f64;
                        let y2 = top + depth * (band + 1) as f64 / FILL_BANDS as f64;
                        let alpha = 0.3 * (1.0 - band as f64 / FILL_BANDS as f64);
                        self.surface.line(x, y1, x, y2, Tone::Fill(alpha));
                    }
                }
                self.surface
                    .polyline(data.iter().enumerate().map(|(i, c)| Some((x_at(i), y_at(c.close)))), tone);
            }
        }

        // Overlays
        let flags = self.flags;
        let set = self.cache.get(tf, store.revision(), series);
        let window = start..start + n;
        if flags.sma {
            let points = set.sma[window.clone()]
                .iter()
                .enumerate()
                .map(|(i, v)| v.map(|v| (x_at(i), y_at(v))));
            self.surface.polyline(points, Tone::Sma);
        }
        if flags.ema {
            // index 0 is only the recurrence seed
            let points = set.ema[window.clone()].iter().enumerate().map(|(i, v)| {
                if start + i == 0 {
                    None
                } else {
                    v.map(|v| (x_at(i), y_at(v)))
                }
            });
            self.surface.polyline(points, Tone::Ema);
        }
        if flags.bollinger {
            let bands = &set.bollinger[window.clone()];
            let picks: [fn(&Band) -> f64; 3] = [|b| b.upper, |b| b.middle, |b| b.lower];
            for pick in picks {
                let points = bands
                    .iter()
                    .enumerate()
                    .map(|(i, b)| b.as_ref().map(|b| (x_at(i), y_at(pick(b)))));
                self.surface.polyline(points, Tone::Bollinger);
            }
        }

        // Volume
        let vol_top = main_bottom + GAP;
        let max_vol = data.iter().map(|c| c.volume).fold(0.0, f64::max);
        if max_vol > 0.0 {
            let bar_w = (step * 0.6).max(1.0);
            for (i, c) in data.iter().enumerate() {
                let bar_h = (c.volume / max_vol * VOLUME_HEIGHT).max(0.5);
                let tone = if c.is_bullish() { Tone::VolumeUp } else { Tone::VolumeDown };
                self.surface
                    .rect(x_at(i) - bar_w / 2.0, vol_top + VOLUME_HEIGHT - bar_h, bar_w, bar_h, tone);
            }
        }

        // RSI strip
        if flags.rsi {
            let top = vol_top + VOLUME_HEIGHT + GAP;
            let rsi_y = |v: f64| top + (100.0 - v) / 100.0 * RSI_HEIGHT;
            self.surface.dashed(PAD, w - PAD, rsi_y(70.0), 3.0, Tone::RsiBand);
            self.surface.dashed(PAD, w - PAD, rsi_y(30.0), 3.0, Tone::RsiBand);
            let points = set.rsi[window]
                .iter()
                .enumerate()
                .map(|(i, v)| v.map(|v| (x_at(i), rsi_y(v))));
            self.surface.polyline(points, Tone::Rsi);
        }

        // Last price marker
        let last = data[n - 1];
        self.surface.dot(x_at(n - 1), y_at(last.close), Tone::Price);

        if let Some(index) = self.hover_x.and_then(|x| viewport::hit_test(x, PAD, step, n)) {
            let x = x_at(index);
            self.surface.line(x, PAD, x, main_bottom, Tone::Crosshair);
        }
    }
}

pub fn format_price(price: f64) -> String {
    let abs = price.abs();
    if abs >= 1000.0 {
        format!("{:.0}", price)
    } else if abs >= 1.0 {
        format!("{:.2}", price)
    } else {
        format!("{:.5}", price)
    }
}
