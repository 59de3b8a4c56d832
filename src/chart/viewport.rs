pub const DEFAULT_VISIBLE: usize = 100;
pub const MIN_VISIBLE: usize = 20;
pub const ZOOM_STEP: usize = 10;

/// Which suffix window of a series is on screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub visible_count: usize,
    /// Candles back from the newest.
    pub scroll_offset: usize,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            visible_count: DEFAULT_VISIBLE,
            scroll_offset: 0,
        }
    }
}

impl Viewport {
    pub fn reset(len: usize) -> Self {
        Self {
            visible_count: DEFAULT_VISIBLE.min(len),
            scroll_offset: 0,
        }
    }

    pub fn max_offset(&self, len: usize) -> usize {
        len.saturating_sub(self.visible_count)
    }

    pub fn clamp(&mut self, len: usize) {
        self.scroll_offset = self.scroll_offset.min(self.max_offset(len));
    }

    /// One wheel notch. `out` widens the window.
    pub fn zoom(&mut self, out: bool, len: usize) {
        let next = if out {
            self.visible_count + ZOOM_STEP
        } else {
            self.visible_count.saturating_sub(ZOOM_STEP)
        };
        self.visible_count = next.min(len).max(MIN_VISIBLE);
        self.clamp(len);
    }

    /// Shifts by whole candles; positive looks further back.
    pub fn pan(&mut self, candles: i64, len: usize) {
        let moved = self.scroll_offset as i64 + candles;
        self.scroll_offset = moved.clamp(0, self.max_offset(len) as i64) as usize;
    }
}

/// Candle index under a pointer position, given the plot's left padding and
/// per-candle pitch.
pub fn hit_test(x: f64, pad: f64, step: f64, visible: usize) -> Option<usize> {
    if visible == 0 || step <= 0.0 || !x.is_finite() {
        return None;
    }
    let raw = ((x - pad) / step).floor();
    if raw < 0.0 {
        return Some(0);
    }
    Some((raw as usize).min(visible - 1))
}
