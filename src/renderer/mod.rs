pub mod cell;
pub mod display;
pub mod processor;

pub use display::{DisplayManager, DisplayMode};

use crate::decoder::Frame;
use crate::utils::logger;

/// Presentation side of the player. Only ever called from the cadence thread.
pub trait Renderer {
    /// Shows `frame`. The frame is borrowed for the duration of the call only.
    fn present(&mut self, frame: &Frame);

    /// Polled once per tick so UI input is handled on the same thread as presentation.
    fn wants_quit(&mut self) -> bool {
        false
    }
}

/// Renderer for runs without a terminal: counts frames and logs progress.
#[derive(Default)]
pub struct HeadlessRenderer {
    presented: u64,
    last_sequence: Option<u64>,
}

impl HeadlessRenderer {
    const LOG_EVERY: u64 = 100;

    pub fn new() -> Self {
        Self::default()
    }
}

impl Renderer for HeadlessRenderer {
    fn present(&mut self, frame: &Frame) {
        if let Some(last) = self.last_sequence {
            if frame.sequence <= last {
                logger::warn(&format!("frame {} presented after {}", frame.sequence, last));
            }
        }
        self.last_sequence = Some(frame.sequence);
        self.presented += 1;

        if self.presented % Self::LOG_EVERY == 0 {
            logger::info(&format!(
                "headless: {} frames presented (last #{}, {}x{})",
                self.presented, frame.sequence, frame.width, frame.height
            ));
        }
    }
}
