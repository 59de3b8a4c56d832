/// Collapses any number of redraw requests into one render per frame.
#[derive(Debug, Default)]
pub struct RedrawScheduler {
    pending: bool,
    hidden: bool,
}

impl RedrawScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// No-op while hidden.
    pub fn request(&mut self) {
        if !self.hidden {
            self.pending = true;
        }
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
        if hidden {
            self.pending = false;
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    /// Called once per frame; true means render now.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.pending) && !self.hidden
    }
}
