/// Semantic colour of a shape; the paint step picks the actual colour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tone {
    Grid,
    Axis,
    Up,
    Down,
    /// Line-mode area under the price, 0.0 transparent .. 1.0 opaque.
    Fill(f64),
    VolumeUp,
    VolumeDown,
    Sma,
    Ema,
    Bollinger,
    Rsi,
    RsiBand,
    Price,
    Crosshair,
}

/// Coordinates are in surface dots, origin top-left, y growing downwards.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Line {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        tone: Tone,
    },
    /// Filled rectangle.
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        tone: Tone,
    },
    Dot {
        x: f64,
        y: f64,
        tone: Tone,
    },
    Label {
        x: f64,
        y: f64,
        text: String,
        tone: Tone,
    },
}

/// Retained drawing of one chart frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Surface {
    width: u32,
    height: u32,
    shapes: Vec<Shape>,
}

impl Surface {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            shapes: Vec::with_capacity(1024),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn clear(&mut self) {
        self.shapes.clear();
    }

    pub fn shapes(&self) -> &[Shape] {
        &self.shapes
    }

    pub fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, tone: Tone) {
        self.shapes.push(Shape::Line { x1, y1, x2, y2, tone });
    }

    pub fn rect(&mut self, x: f64, y: f64, width: f64, height: f64, tone: Tone) {
        self.shapes.push(Shape::Rect {
            x,
            y,
            width,
            height,
            tone,
        });
    }

    pub fn dot(&mut self, x: f64, y: f64, tone: Tone) {
        self.shapes.push(Shape::Dot { x, y, tone });
    }

    pub fn label(&mut self, x: f64, y: f64, text: String, tone: Tone) {
        self.shapes.push(Shape::Label { x, y, text, tone });
    }

    /// Dashed horizontal line.
    pub fn dashed(&mut self, x1: f64, x2: f64, y: f64, dash: f64, tone: Tone) {
        let mut x = x1;
        while x < x2 {
            let end = (x + dash).min(x2);
            self.line(x, y, end, y, tone);
            x += dash * 2.0;
        }
    }

    /// Connects consecutive present points; gaps break the line.
    pub fn polyline(&mut self, points: impl IntoIterator<Item = Option<(f64, f64)>>, tone: Tone) {
        let mut prev: Option<(f64, f64)> = None;
        for point in points {
            match (prev, point) {
                (Some((x1, y1)), Some((x2, y2))) => self.line(x1, y1, x2, y2, tone),
                (None, Some((x, y))) => self.dot(x, y, tone),
                _ => {}
            }
            prev = point;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polyline_breaks_on_gaps() {
        let mut s = Surface::new(10, 10);
        s.polyline(
            [Some((0.0, 0.0)), Some((1.0, 1.0)), None, Some((3.0, 3.0)), Some((4.0, 4.0))],
            Tone::Sma,
        );
        let lines = s
            .shapes()
            .iter()
            .filter(|sh| matches!(sh, Shape::Line { .. }))
            .count();
        assert_eq!(lines, 2);
    }

    #[test]
    fn dashed_leaves_gaps() {
        let mut s = Surface::new(100, 10);
        s.dashed(0.0, 10.0, 5.0, 2.0, Tone::RsiBand);
        assert_eq!(s.shapes().len(), 3);
    }
}
