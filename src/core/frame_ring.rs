use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::decoder::{Frame, PixelFormat};

/// Result of a blocking [`FrameRing::put`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Committed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RingStats {
    pub committed: u64,
    pub taken: u64,
    /// Slot buffers allocated so far. Never exceeds the capacity.
    pub allocations: usize,
    /// Largest number of unread frames seen at once.
    pub high_water: usize,
}

#[derive(Default)]
struct Slot {
    frame: Option<Frame>,
    occupied: bool,
}

struct RingState {
    slots: Vec<Slot>,
    write: usize,
    read: usize,
    unread: usize,
    cancelled: bool,
    stats: RingStats,
}

/// Fixed-capacity frame exchange between one decode worker and one display driver.
///
/// `put` blocks while the slot under the write cursor is still occupied, `try_get`
/// never blocks. Slot storage is allocated on the first write to each slot and
/// reused for the rest of the stream, so frames handed out are always copies.
pub struct FrameRing {
    state: Mutex<RingState>,
    slot_freed: Condvar,
    slot_filled: Condvar,
    capacity: usize,
    width: u32,
    height: u32,
    format: PixelFormat,
}

impl FrameRing {
    pub fn new(capacity: usize, width: u32, height: u32, format: PixelFormat) -> Self {
        assert!(capacity > 0, "frame ring needs at least one slot");

        let slots = (0..capacity).map(|_| Slot::default()).collect();
        Self {
            state: Mutex::new(RingState {
                slots,
                write: 0,
                read: 0,
                unread: 0,
                cancelled: false,
                stats: RingStats::default(),
            }),
            slot_freed: Condvar::new(),
            slot_filled: Condvar::new(),
            capacity,
            width,
            height,
            format,
        }
    }

    // Slot state is only mutated under the lock and is consistent between
    // critical sections, so a poisoned lock is still safe to use.
    fn lock(&self) -> MutexGuard<'_, RingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copies `frame` into the slot under the write cursor, waiting for the
    /// consumer to free it first if needed.
    ///
    /// Returns [`PutOutcome::Cancelled`] without writing once [`cancel`](Self::cancel)
    /// has been called, including when cancellation arrives mid-wait.
    pub fn put(&self, frame: &Frame) -> PutOutcome {
        assert!(
            frame.width == self.width && frame.height == self.height && frame.format == self.format,
            "frame {}x{} {:?} does not match ring geometry {}x{} {:?}",
            frame.width,
            frame.height,
            frame.format,
            self.width,
            self.height,
            self.format
        );

        let mut state = self.lock();
        loop {
            if state.cancelled {
                return PutOutcome::Cancelled;
            }
            let write = state.write;
            if !state.slots[write].occupied {
                break;
            }
            state = self
                .slot_freed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }

        let write = state.write;
        let slot = &mut state.slots[write];
        assert!(!slot.occupied, "slot {} overwritten while occupied", write);

        let allocated = match slot.frame.as_mut() {
            Some(stored) => {
                stored.copy_from(frame);
                false
            }
            None => {
                slot.frame = Some(frame.clone());
                true
            }
        };
        slot.occupied = true;

        state.write = (write + 1) % self.capacity;
        state.unread += 1;
        debug_assert!(state.unread <= self.capacity);
        state.stats.committed += 1;
        state.stats.high_water = state.stats.high_water.max(state.unread);
        if allocated {
            state.stats.allocations += 1;
        }
        drop(state);

        self.slot_filled.notify_one();
        PutOutcome::Committed
    }

    /// Copies the oldest unread frame into `dst` and frees its slot.
    ///
    /// Returns `false` immediately when nothing is ready.
    pub fn try_get_into(&self, dst: &mut Frame) -> bool {
        let mut state = self.lock();
        let read = state.read;
        let slot = &mut state.slots[read];
        let Some(stored) = slot.frame.as_ref().filter(|_| slot.occupied) else {
            return false;
        };

        dst.copy_from(stored);
        slot.occupied = false;

        state.read = (read + 1) % self.capacity;
        state.unread -= 1;
        state.stats.taken += 1;
        drop(state);

        self.slot_freed.notify_one();
        true
    }

    /// Non-blocking read returning an owned copy of the oldest unread frame.
    #[cfg(test)]
    pub fn try_get(&self) -> Option<Frame> {
        let mut frame = Frame::new(0, 0, self.format);
        self.try_get_into(&mut frame).then_some(frame)
    }

    /// Blocks until a frame is ready to read, the ring is cancelled, or `timeout`
    /// elapses. Returns whether a frame is ready.
    ///
    /// The cadence-driven consumer never calls this.
    pub fn wait_for_frame(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.slots[state.read].occupied {
                return true;
            }
            if state.cancelled {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .slot_filled
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Requests cooperative shutdown and wakes every waiter on both conditions.
    pub fn cancel(&self) {
        let mut state = self.lock();
        state.cancelled = true;
        drop(state);

        self.slot_freed.notify_all();
        self.slot_filled.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Number of unread frames.
    pub fn len(&self) -> usize {
        self.lock().unread
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn geometry(&self) -> (u32, u32, PixelFormat) {
        (self.width, self.height, self.format)
    }

    pub fn stats(&self) -> RingStats {
        self.lock().stats
    }

    /// Bytes currently held by slot storage.
    pub fn allocated_bytes(&self) -> usize {
        self.lock()
            .slots
            .iter()
            .filter_map(|slot| slot.frame.as_ref())
            .map(|frame| frame.data.capacity())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    const W: u32 = 4;
    const H: u32 = 2;

    fn ring(capacity: usize) -> FrameRing {
        FrameRing::new(capacity, W, H, PixelFormat::Rgb24)
    }

    fn frame(sequence: u64) -> Frame {
        let mut frame = Frame::new(W, H, PixelFormat::Rgb24);
        frame.sequence = sequence;
        frame.data.iter_mut().for_each(|b| *b = sequence as u8);
        frame
    }

    #[test]
    fn put_then_get_preserves_payload() {
        let ring = ring(3);
        assert_eq!(ring.put(&frame(7)), PutOutcome::Committed);
        assert_eq!(ring.len(), 1);

        let out = ring.try_get().unwrap();
        assert_eq!(out, frame(7));
        assert!(ring.is_empty());
    }

    #[test]
    fn empty_ring_never_blocks_readers() {
        let ring = ring(5);
        let started = Instant::now();
        for _ in 0..10 {
            assert!(ring.try_get().is_none());
        }
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(ring.stats().taken, 0);
    }

    #[test]
    fn third_put_blocks_until_a_slot_is_freed() {
        let ring = Arc::new(ring(2));
        assert_eq!(ring.put(&frame(1)), PutOutcome::Committed);
        assert_eq!(ring.put(&frame(2)), PutOutcome::Committed);

        let done = Arc::new(AtomicBool::new(false));
        let writer = {
            let ring = Arc::clone(&ring);
            let done = Arc::clone(&done);
            thread::spawn(move || {
                let outcome = ring.put(&frame(3));
                done.store(true, Ordering::SeqCst);
                outcome
            })
        };

        thread::sleep(Duration::from_millis(100));
        assert!(!done.load(Ordering::SeqCst), "put returned while the ring was full");
        assert_eq!(ring.len(), 2);

        assert_eq!(ring.try_get().unwrap().sequence, 1);
        assert_eq!(writer.join().unwrap(), PutOutcome::Committed);
        assert!(done.load(Ordering::SeqCst));

        assert_eq!(ring.try_get().unwrap().sequence, 2);
        assert_eq!(ring.try_get().unwrap().sequence, 3);
        assert!(ring.try_get().is_none());
    }

    #[test]
    fn cancel_releases_a_blocked_writer() {
        let ring = Arc::new(ring(1));
        assert_eq!(ring.put(&frame(1)), PutOutcome::Committed);

        let writer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.put(&frame(2)))
        };

        thread::sleep(Duration::from_millis(50));
        ring.cancel();

        assert_eq!(writer.join().unwrap(), PutOutcome::Cancelled);
        assert!(ring.is_cancelled());
        assert_eq!(ring.stats().committed, 1);
    }

    #[test]
    fn put_after_cancel_does_not_write() {
        let ring = ring(4);
        ring.cancel();
        assert_eq!(ring.put(&frame(1)), PutOutcome::Cancelled);
        assert!(ring.is_empty());
        assert_eq!(ring.stats().allocations, 0);
    }

    #[test]
    fn cancel_wakes_frame_waiters() {
        let ring = Arc::new(ring(2));
        let waiter = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.wait_for_frame(Duration::from_secs(10)))
        };

        thread::sleep(Duration::from_millis(50));
        ring.cancel();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn wait_for_frame_sees_a_later_put() {
        let ring = Arc::new(ring(2));
        let writer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                ring.put(&frame(9))
            })
        };

        assert!(ring.wait_for_frame(Duration::from_secs(5)));
        assert_eq!(writer.join().unwrap(), PutOutcome::Committed);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn slot_storage_is_allocated_once_per_slot() {
        let ring = ring(3);
        let mut out = Frame::new(W, H, PixelFormat::Rgb24);

        for seq in 0..30 {
            assert_eq!(ring.put(&frame(seq)), PutOutcome::Committed);
            assert!(ring.try_get_into(&mut out));
            assert_eq!(out.sequence, seq);
        }

        let stats = ring.stats();
        assert_eq!(stats.allocations, 3);
        assert_eq!(stats.committed, 30);
        assert_eq!(stats.taken, 30);
        assert_eq!(stats.high_water, 1);
        assert!(ring.allocated_bytes() >= 3 * frame(0).data.len());
    }

    #[test]
    fn concurrent_exchange_keeps_order_and_bound() {
        const FRAMES: u64 = 2_000;
        const CAPACITY: usize = 4;

        let ring = Arc::new(ring(CAPACITY));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let writer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for seq in 0..FRAMES {
                    assert_eq!(ring.put(&frame(seq)), PutOutcome::Committed);
                }
            })
        };

        let mut received = Vec::with_capacity(FRAMES as usize);
        let mut out = Frame::new(W, H, PixelFormat::Rgb24);
        while received.len() < FRAMES as usize {
            max_seen.fetch_max(ring.len(), Ordering::Relaxed);
            if ring.try_get_into(&mut out) {
                assert!(out.data.iter().all(|&b| b == out.sequence as u8));
                received.push(out.sequence);
            } else {
                thread::yield_now();
            }
        }
        writer.join().unwrap();

        assert_eq!(received, (0..FRAMES).collect::<Vec<_>>());
        assert!(max_seen.load(Ordering::Relaxed) <= CAPACITY);
        assert!(ring.stats().high_water <= CAPACITY);
        assert_eq!(ring.stats().allocations, CAPACITY);
    }

    #[test]
    #[should_panic(expected = "does not match ring geometry")]
    fn mismatched_geometry_is_rejected() {
        let ring = ring(2);
        ring.put(&Frame::new(W + 1, H, PixelFormat::Rgb24));
    }
}
