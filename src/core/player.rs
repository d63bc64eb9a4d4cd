use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::consumer::{ConsumerDriver, Tick};
use super::frame_ring::FrameRing;
use super::producer::{Producer, ProducerExit, ProducerReport};
use crate::decoder::{FrameSource, StartupError, StreamInfo, TARGET_FORMAT};
use crate::renderer::Renderer;
use crate::shared::constants;
use crate::sync::Cadence;
use crate::utils::logger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerConfig {
    pub capacity: usize,
    pub frame_rate: u32,
    /// Stop once the stream has ended and every committed frame was shown.
    pub exit_on_end: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackSummary {
    pub presented: u64,
    pub empty_ticks: u64,
    pub committed: u64,
    pub skipped: u64,
    /// `None` if playback never started or the worker panicked.
    pub producer_exit: Option<ProducerExit>,
    pub high_water: usize,
}

/// Owns one playback session: the ring, the decode worker and the display side.
pub struct Player<R: Renderer> {
    config: PlayerConfig,
    state: PlayerState,
    ring: Option<Arc<FrameRing>>,
    worker: Option<JoinHandle<ProducerReport>>,
    driver: Option<ConsumerDriver<R>>,
    cadence: Option<Cadence>,
    summary: PlaybackSummary,
}

impl<R: Renderer> Player<R> {
    pub fn new(config: PlayerConfig) -> Self {
        Self {
            config,
            state: PlayerState::Idle,
            ring: None,
            worker: None,
            driver: None,
            cadence: None,
            summary: PlaybackSummary::default(),
        }
    }

    pub fn state(&self) -> PlayerState {
        self.state
    }

    /// Opens the source, builds the renderer for its geometry and starts the
    /// decode worker. On error nothing is left running and the player is `Stopped`.
    pub fn start<S, O, M>(&mut self, open_source: O, make_renderer: M) -> Result<StreamInfo, StartupError>
    where
        S: FrameSource + 'static,
        O: FnOnce() -> Result<S, StartupError>,
        M: FnOnce(&StreamInfo) -> anyhow::Result<R>,
    {
        if self.state != PlayerState::Idle {
            return Err(StartupError::InvalidState(self.state));
        }

        let result = self.launch(open_source, make_renderer);
        match &result {
            Ok(info) => {
                self.state = PlayerState::Running;
                logger::info(&format!(
                    "playing {}x{} {} ({:?}) at {} fps, ring capacity {}",
                    info.width,
                    info.height,
                    info.codec,
                    info.pixel_format,
                    self.config.frame_rate,
                    self.config.capacity
                ));
            }
            Err(e) => {
                self.state = PlayerState::Stopped;
                logger::error(&format!("startup failed: {}", e));
            }
        }
        result
    }

    fn launch<S, O, M>(&mut self, open_source: O, make_renderer: M) -> Result<StreamInfo, StartupError>
    where
        S: FrameSource + 'static,
        O: FnOnce() -> Result<S, StartupError>,
        M: FnOnce(&StreamInfo) -> anyhow::Result<R>,
    {
        let mut source = open_source()?;
        let info = source.stream_info().clone();

        let renderer = match make_renderer(&info) {
            Ok(renderer) => renderer,
            Err(e) => {
                source.close();
                return Err(StartupError::Renderer(e));
            }
        };

        let ring = Arc::new(FrameRing::new(
            self.config.capacity.max(1),
            info.width,
            info.height,
            TARGET_FORMAT,
        ));
        let worker = Producer::new(source, Arc::clone(&ring))
            .spawn()
            .map_err(StartupError::Worker)?;
        logger::debug(&format!(
            "ring of {} slots, {} bytes per frame",
            ring.capacity(),
            info.width as usize * info.height as usize * TARGET_FORMAT.bytes_per_pixel()
        ));
        preroll(&ring, &worker);

        self.driver = Some(ConsumerDriver::new(Arc::clone(&ring), renderer));
        self.cadence = Some(Cadence::from_frame_rate(self.config.frame_rate));
        self.ring = Some(ring);
        self.worker = Some(worker);
        Ok(info)
    }

    /// One display tick. Returns `false` once playback should end.
    pub fn tick(&mut self) -> bool {
        if self.state != PlayerState::Running {
            return false;
        }
        let Some(driver) = self.driver.as_mut() else {
            return false;
        };

        let outcome = driver.on_tick();
        if driver.renderer_mut().wants_quit() {
            return false;
        }

        if outcome == Tick::Idle && self.config.exit_on_end {
            let finished = self.worker.as_ref().map_or(true, JoinHandle::is_finished);
            // Checked after `finished` so no commit can slip in between.
            let drained = self.ring.as_ref().map_or(true, |ring| ring.is_empty());
            if finished && drained {
                logger::info("stream ended and ring drained");
                return false;
            }
        }
        true
    }

    /// Ticks at the configured frame rate until the stream ends, the renderer
    /// asks to quit or `shutdown` fires, then stops.
    pub fn run(&mut self, shutdown: &Receiver<()>) -> PlaybackSummary {
        if let (PlayerState::Running, Some(cadence)) = (self.state, self.cadence) {
            logger::debug(&format!("cadence armed, period {:?}", cadence.period()));
            let reason = cadence.run(shutdown, || self.tick());
            logger::info(&format!("playback loop ended: {:?}", reason));
        }
        self.stop()
    }

    /// Cancels and joins the worker, then releases the renderer and the ring.
    /// Safe to call more than once.
    pub fn stop(&mut self) -> PlaybackSummary {
        match self.state {
            PlayerState::Running => {}
            PlayerState::Idle => {
                self.state = PlayerState::Stopped;
                return self.summary;
            }
            PlayerState::Stopping | PlayerState::Stopped => return self.summary,
        }

        self.state = PlayerState::Stopping;
        if let Some(ring) = &self.ring {
            ring.cancel();
        }

        let report = match self.worker.take().map(JoinHandle::join) {
            Some(Ok(report)) => Some(report),
            Some(Err(_)) => {
                logger::error("producer thread panicked");
                None
            }
            None => None,
        };

        self.cadence = None;
        let mut summary = PlaybackSummary::default();
        if let Some(driver) = self.driver.take() {
            summary.presented = driver.presented();
            summary.empty_ticks = driver.empty_ticks();
        }
        if let Some(report) = report {
            summary.committed = report.committed;
            summary.skipped = report.skipped;
            summary.producer_exit = Some(report.exit);
        }

        if let Some(ring) = self.ring.take() {
            summary.high_water = ring.stats().high_water;
            match Arc::try_unwrap(ring) {
                Ok(ring) => logger::debug(&format!(
                    "released {} bytes of slot storage",
                    ring.allocated_bytes()
                )),
                Err(_) => logger::warn("frame ring still shared at shutdown"),
            }
        }

        self.summary = summary;
        self.state = PlayerState::Stopped;
        logger::info(&format!("playback stopped: {:?}", summary));
        summary
    }
}

/// Gives the worker a bounded head start so the first tick has something to show.
/// Runs before the cadence is armed; ticks themselves never wait.
fn preroll(ring: &FrameRing, worker: &JoinHandle<ProducerReport>) {
    let started = Instant::now();
    let step = Duration::from_millis(20);
    loop {
        if ring.wait_for_frame(step) {
            logger::debug(&format!("first frame ready after {:?}", started.elapsed()));
            return;
        }
        if worker.is_finished() || ring.is_cancelled() {
            return;
        }
        if started.elapsed() >= constants::PREROLL_TIMEOUT {
            logger::warn(&format!(
                "no frame decoded within {:?}, starting playback anyway",
                constants::PREROLL_TIMEOUT
            ));
            return;
        }
    }
}

impl<R: Renderer> Drop for Player<R> {
    fn drop(&mut self) {
        if self.state == PlayerState::Running {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::scripted::ScriptedSource;
    use crate::renderer::testing::RecordingRenderer;
    use crossbeam_channel::bounded;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

    fn config(capacity: usize, exit_on_end: bool) -> PlayerConfig {
        PlayerConfig {
            capacity,
            frame_rate: 1000,
            exit_on_end,
        }
    }

    fn tick_until_done(player: &mut Player<RecordingRenderer>, capacity: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let ring = player.ring.as_ref().unwrap();
            assert!(ring.len() <= capacity);
            if !player.tick() {
                break;
            }
            assert!(Instant::now() < deadline, "playback never finished");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn failed_negotiation_leaves_nothing_running() {
        let mut player = Player::<RecordingRenderer>::new(config(3, true));
        let renderer_built = AtomicBool::new(false);

        let err = player
            .start(
                || Err::<ScriptedSource, _>(StartupError::NoVideoTrack(PathBuf::from("a.wav"))),
                |_| {
                    renderer_built.store(true, Ordering::SeqCst);
                    Ok(RecordingRenderer::default())
                },
            )
            .unwrap_err();

        assert!(matches!(err, StartupError::NoVideoTrack(_)));
        assert_eq!(player.state(), PlayerState::Stopped);
        assert!(player.ring.is_none() && player.worker.is_none());
        assert!(!renderer_built.load(Ordering::SeqCst));
        assert_eq!(player.stop(), PlaybackSummary::default());
    }

    #[test]
    fn start_returns_with_the_first_frame_buffered() {
        let mut player = Player::new(config(3, true));
        let source = ScriptedSource::frames(2, 2, 1..=3).with_delay(Duration::from_millis(30));

        player.start(|| Ok(source), |_| Ok(RecordingRenderer::default())).unwrap();

        assert!(!player.ring.as_ref().unwrap().is_empty());
        assert!(player.stop().high_water >= 1);
    }

    #[test]
    fn empty_stream_does_not_stall_startup() {
        let mut player = Player::new(config(3, true));
        let started = Instant::now();

        player
            .start(|| Ok(ScriptedSource::frames(2, 2, 0..0)), |_| Ok(RecordingRenderer::default()))
            .unwrap();

        assert!(started.elapsed() < constants::PREROLL_TIMEOUT);
        assert!(!player.tick());
        assert_eq!(player.stop().presented, 0);
    }

    #[test]
    fn renderer_failure_closes_the_source() {
        let mut player = Player::<RecordingRenderer>::new(config(3, true));
        let source = ScriptedSource::frames(2, 2, 1..=3);
        let closed = Arc::clone(&source.closed);

        let err = player
            .start(|| Ok(source), |_| Err(anyhow::anyhow!("no terminal")))
            .unwrap_err();

        assert!(matches!(err, StartupError::Renderer(_)));
        assert_eq!(player.state(), PlayerState::Stopped);
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn start_is_only_valid_once() {
        let mut player = Player::new(config(2, true));
        player
            .start(|| Ok(ScriptedSource::frames(2, 2, 1..=2)), |_| Ok(RecordingRenderer::default()))
            .unwrap();

        let err = player
            .start(|| Ok(ScriptedSource::frames(2, 2, 1..=2)), |_| Ok(RecordingRenderer::default()))
            .unwrap_err();
        assert!(matches!(err, StartupError::InvalidState(PlayerState::Running)));
        player.stop();
    }

    #[test]
    fn plays_every_frame_in_order_within_capacity() {
        let mut player = Player::new(config(3, true));
        let renderer = RecordingRenderer::default();
        let seen = renderer.handle();
        let source = ScriptedSource::frames(4, 2, 1..=5).with_delay(Duration::from_millis(2));

        let info = player.start(|| Ok(source), |_| Ok(renderer)).unwrap();
        assert_eq!((info.width, info.height), (4, 2));
        assert_eq!(player.state(), PlayerState::Running);

        tick_until_done(&mut player, 3);
        let summary = player.stop();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4, 5]);
        assert_eq!(summary.presented, 5);
        assert_eq!(summary.committed, 5);
        assert_eq!(summary.producer_exit, Some(ProducerExit::EndOfStream));
        assert!(summary.high_water >= 1 && summary.high_water <= 3);
        assert_eq!(player.state(), PlayerState::Stopped);
    }

    #[test]
    fn run_ends_with_the_stream() {
        let (_tx, rx) = bounded::<()>(1);
        let mut player = Player::new(config(2, true));
        let renderer = RecordingRenderer::default();
        let seen = renderer.handle();

        player
            .start(|| Ok(ScriptedSource::frames(2, 2, 10..20)), |_| Ok(renderer))
            .unwrap();
        let summary = player.run(&rx);

        assert_eq!(*seen.lock().unwrap(), (10..20).collect::<Vec<_>>());
        assert_eq!(summary.presented, 10);
        assert!(summary.empty_ticks >= 1);
        assert_eq!(player.state(), PlayerState::Stopped);
    }

    #[test]
    fn shutdown_signal_cancels_a_blocked_producer() {
        let (tx, rx) = bounded::<()>(1);
        tx.send(()).unwrap();
        let mut player = Player::new(config(2, true));

        player
            .start(|| Ok(ScriptedSource::frames(2, 2, 0..1000)), |_| Ok(RecordingRenderer::default()))
            .unwrap();
        let summary = player.run(&rx);

        assert_eq!(summary.producer_exit, Some(ProducerExit::Cancelled));
        assert!(summary.presented < 1000);
    }

    #[test]
    fn stop_while_producer_is_blocked_in_put() {
        let mut player = Player::new(config(1, true));
        let source = ScriptedSource::frames(2, 2, 0..100);
        let reads = Arc::clone(&source.reads);
        let closed = Arc::clone(&source.closed);

        player.start(|| Ok(source), |_| Ok(RecordingRenderer::default())).unwrap();
        while player.ring.as_ref().unwrap().len() < 1 || reads.load(Ordering::SeqCst) < 2 {
            thread::sleep(Duration::from_millis(2));
        }

        let summary = player.stop();
        assert_eq!(summary.producer_exit, Some(ProducerExit::Cancelled));
        assert_eq!(summary.committed, 1);
        assert_eq!(summary.presented, 0);
        assert!(closed.load(Ordering::SeqCst));
        assert!(player.ring.is_none());

        assert_eq!(player.stop(), summary);
        assert!(!player.tick());
    }

    #[test]
    fn quit_request_from_renderer_ends_playback() {
        let mut player = Player::new(config(10, false));
        let mut renderer = RecordingRenderer::default();
        renderer.quit_after = Some(2);
        let seen = renderer.handle();

        player
            .start(|| Ok(ScriptedSource::frames(2, 2, 1..=10)), |_| Ok(renderer))
            .unwrap();
        tick_until_done(&mut player, 10);

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(player.stop().presented, 2);
    }

    #[test]
    fn keep_open_outlives_the_stream() {
        let mut player = Player::new(config(4, false));
        let renderer = RecordingRenderer::default();
        let seen = renderer.handle();

        player
            .start(|| Ok(ScriptedSource::frames(2, 2, 1..=2)), |_| Ok(renderer))
            .unwrap();
        for _ in 0..30 {
            assert!(player.tick());
            thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(player.stop().producer_exit, Some(ProducerExit::EndOfStream));
    }

    #[test]
    fn dropping_a_running_player_joins_the_worker() {
        let source = ScriptedSource::frames(2, 2, 0..100);
        let closed = Arc::clone(&source.closed);
        {
            let mut player = Player::new(config(1, true));
            player.start(|| Ok(source), |_| Ok(RecordingRenderer::default())).unwrap();
        }
        assert!(closed.load(Ordering::SeqCst));
    }
}
