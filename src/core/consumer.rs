use std::sync::Arc;

use super::frame_ring::FrameRing;
use crate::decoder::Frame;
use crate::renderer::Renderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Presented(u64),
    Idle,
}

/// Per-tick consumer: moves at most one frame from the ring to the renderer.
pub struct ConsumerDriver<R: Renderer> {
    ring: Arc<FrameRing>,
    renderer: R,
    // Reused for every frame; the renderer only ever borrows it.
    current: Frame,
    presented: u64,
    empty_ticks: u64,
}

impl<R: Renderer> ConsumerDriver<R> {
    pub fn new(ring: Arc<FrameRing>, renderer: R) -> Self {
        let (width, height, format) = ring.geometry();
        Self {
            ring,
            renderer,
            current: Frame::new(width, height, format),
            presented: 0,
            empty_ticks: 0,
        }
    }

    pub fn on_tick(&mut self) -> Tick {
        if !self.ring.try_get_into(&mut self.current) {
            self.empty_ticks += 1;
            return Tick::Idle;
        }

        self.renderer.present(&self.current);
        self.presented += 1;
        Tick::Presented(self.current.sequence)
    }

    pub fn renderer_mut(&mut self) -> &mut R {
        &mut self.renderer
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn empty_ticks(&self) -> u64 {
        self.empty_ticks
    }
}
