//! Chart model: viewport, redraw coalescing and the retained surface the
//! terminal paints from. Nothing here touches the terminal.

mod render;
mod scheduler;
mod surface;
mod viewport;

pub use render::{ChartMode, ChartRenderer, Indicator, IndicatorFlags, format_price};
pub use scheduler::RedrawScheduler;
pub use surface::{Shape, Surface, Tone};
pub use viewport::Viewport;
