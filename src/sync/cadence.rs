use crossbeam_channel::{select, tick, Receiver};
use std::time::Duration;

use crate::shared::constants::MAX_FRAME_RATE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The tick callback asked to stop.
    Finished,
    /// A shutdown signal arrived (or its sender went away).
    Shutdown,
}

/// Fixed-period tick source for the display side.
///
/// The period is `1000 / fps` whole milliseconds, never below 1 ms. Ticks that
/// fall behind are dropped by the underlying ticker rather than bunched up, so
/// there is no drift correction and no catch-up burst.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    period: Duration,
}

impl Cadence {
    pub fn from_frame_rate(fps: u32) -> Self {
        let fps = fps.clamp(1, MAX_FRAME_RATE);
        let millis = (1000 / fps).max(1);
        Self {
            period: Duration::from_millis(millis as u64),
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Calls `on_tick` once per period until it returns `false` or `shutdown` fires.
    pub fn run<F>(&self, shutdown: &Receiver<()>, mut on_tick: F) -> StopReason
    where
        F: FnMut() -> bool,
    {
        let ticker = tick(self.period);
        loop {
            select! {
                recv(shutdown) -> _ => return StopReason::Shutdown,
                recv(ticker) -> _ => {
                    if !on_tick() {
                        return StopReason::Finished;
                    }
                }
            }
        }
    }
}
