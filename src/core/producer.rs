use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use super::frame_ring::{FrameRing, PutOutcome};
use crate::decoder::{convert, Frame, FrameSource, SourceEvent};
use crate::shared::constants;
use crate::utils::logger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerExit {
    EndOfStream,
    Cancelled,
    /// Too many undecodable units in a row.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProducerReport {
    pub exit: ProducerExit,
    pub committed: u64,
    pub skipped: u64,
}

/// Decode worker: pulls units from its source, converts them to the ring's
/// format and commits them. Owns the source and its scratch frame outright.
pub struct Producer<S: FrameSource> {
    source: S,
    ring: Arc<FrameRing>,
    scratch: Frame,
}

impl<S: FrameSource + 'static> Producer<S> {
    pub fn new(source: S, ring: Arc<FrameRing>) -> Self {
        let (width, height, format) = ring.geometry();
        Self {
            source,
            ring,
            scratch: Frame::new(width, height, format),
        }
    }

    pub fn spawn(self) -> io::Result<JoinHandle<ProducerReport>> {
        thread::Builder::new()
            .name(constants::PRODUCER_THREAD_NAME.into())
            .spawn(move || self.run())
    }

    pub fn run(mut self) -> ProducerReport {
        logger::debug("producer started");

        let mut committed = 0u64;
        let mut skipped = 0u64;
        let mut consecutive_errors = 0u32;

        let exit = loop {
            if self.ring.is_cancelled() {
                break ProducerExit::Cancelled;
            }

            let failure = match self.source.next_unit() {
                SourceEvent::EndOfStream => break ProducerExit::EndOfStream,
                SourceEvent::DecodeError(e) => Some(e),
                SourceEvent::Frame(frame) => {
                    if frame.width != self.scratch.width || frame.height != self.scratch.height {
                        Some(anyhow::anyhow!(
                            "frame {} is {}x{}, stream is {}x{}",
                            frame.sequence,
                            frame.width,
                            frame.height,
                            self.scratch.width,
                            self.scratch.height
                        ))
                    } else {
                        convert::convert_into(frame, &mut self.scratch).err()
                    }
                }
            };

            if let Some(e) = failure {
                skipped += 1;
                consecutive_errors += 1;
                logger::warn(&format!("skipping undecodable unit: {:#}", e));
                if consecutive_errors >= constants::MAX_CONSECUTIVE_DECODE_ERRORS {
                    logger::error(&format!(
                        "giving up after {} consecutive decode errors",
                        consecutive_errors
                    ));
                    break ProducerExit::Exhausted;
                }
                continue;
            }
            consecutive_errors = 0;

            match self.ring.put(&self.scratch) {
                PutOutcome::Committed => committed += 1,
                PutOutcome::Cancelled => break ProducerExit::Cancelled,
            }
        };

        self.source.close();

        logger::debug(&format!(
            "producer exiting: {:?}, committed {}, skipped {}",
            exit, committed, skipped
        ));
        ProducerReport {
            exit,
            committed,
            skipped,
        }
    }
}
