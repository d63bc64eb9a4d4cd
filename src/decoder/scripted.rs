use anyhow::anyhow;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::frame_data::{Frame, PixelFormat, StreamInfo};
use super::{FrameSource, SourceEvent};

pub enum Step {
    /// Emit a frame whose bytes and sequence are all `n`.
    Frame(u64),
    /// Emit a frame of the wrong size.
    Misfit(u64),
    Fail,
}

/// In-memory source playing back a fixed script, then end of stream.
pub struct ScriptedSource {
    info: StreamInfo,
    steps: VecDeque<Step>,
    frame: Frame,
    misfit: Frame,
    per_unit_delay: Duration,
    pub closed: Arc<AtomicBool>,
    pub reads: Arc<AtomicUsize>,
}

impl ScriptedSource {
    pub fn new(width: u32, height: u32, format: PixelFormat, steps: Vec<Step>) -> Self {
        Self {
            info: StreamInfo {
                width,
                height,
                pixel_format: format,
                codec: "scripted".into(),
                frame_rate: None,
            },
            steps: steps.into(),
            frame: Frame::new(width, height, format),
            misfit: Frame::new(width + 1, height, format),
            per_unit_delay: Duration::ZERO,
            closed: Arc::new(AtomicBool::new(false)),
            reads: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn frames(width: u32, height: u32, sequences: impl IntoIterator<Item = u64>) -> Self {
        let steps = sequences.into_iter().map(Step::Frame).collect();
        Self::new(width, height, PixelFormat::Rgb24, steps)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.per_unit_delay = delay;
        self
    }
}

impl FrameSource for ScriptedSource {
    fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_unit(&mut self) -> SourceEvent<'_> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if !self.per_unit_delay.is_zero() {
            std::thread::sleep(self.per_unit_delay);
        }
        match self.steps.pop_front() {
            None => SourceEvent::EndOfStream,
            Some(Step::Fail) => SourceEvent::DecodeError(anyhow!("scripted failure")),
            Some(Step::Frame(n)) => {
                self.frame.sequence = n;
                self.frame.data.iter_mut().for_each(|b| *b = n as u8);
                SourceEvent::Frame(&self.frame)
            }
            Some(Step::Misfit(n)) => {
                self.misfit.sequence = n;
                SourceEvent::Frame(&self.misfit)
            }
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
