mod core;
mod decoder;
mod renderer;
mod shared;
mod sync;
mod utils;

use anyhow::Result;
use clap::{error::ErrorKind, Parser, ValueEnum};
use crossbeam_channel::{bounded, Receiver};
use std::path::{Path, PathBuf};

use crate::core::player::{PlaybackSummary, Player, PlayerConfig};
use crate::decoder::{FfmpegSource, FrameSource, StartupError};
use crate::renderer::{DisplayManager, DisplayMode, HeadlessRenderer, Renderer};
use crate::shared::constants;
use crate::utils::config::FileConfig;
use crate::utils::logger;

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    Ffmpeg,
    Opencv,
}

#[derive(Parser, Debug)]
#[command(name = "framering", author, version, about = "Play a video file in the terminal through a bounded frame ring", long_about = None)]
struct Cli {
    /// Local video file to play
    path: PathBuf,

    /// Display rate in frames per second (1-1000)
    #[arg(value_parser = clap::value_parser!(u32).range(1..=constants::MAX_FRAME_RATE as i64))]
    frame_rate: u32,

    /// Number of decoded frames buffered ahead of the display (1-1024)
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..=constants::MAX_RING_CAPACITY as i64))]
    capacity: Option<u32>,

    #[arg(short, long, value_enum)]
    mode: Option<DisplayMode>,

    #[arg(short, long, value_enum, default_value_t = Backend::Ffmpeg)]
    backend: Backend,

    /// Decode and pace frames without drawing them
    #[arg(long)]
    headless: bool,

    /// Keep the last frame on screen after the stream ends
    #[arg(long)]
    keep_open: bool,

    /// Config file (default: ./framering.config if present)
    #[arg(long)]
    config: Option<PathBuf>,
}

/// Effective settings after layering CLI over config file over defaults.
#[derive(Debug, Clone, PartialEq)]
struct Settings {
    player: PlayerConfig,
    mode: DisplayMode,
    headless: bool,
    log_dir: PathBuf,
}

impl Settings {
    fn resolve(cli: &Cli, file: &FileConfig) -> Self {
        let capacity = cli
            .capacity
            .map(|c| c as usize)
            .or(file.capacity)
            .unwrap_or(constants::DEFAULT_RING_CAPACITY);
        let exit_on_end = if cli.keep_open {
            false
        } else {
            file.exit_on_end.unwrap_or(true)
        };

        Self {
            player: PlayerConfig {
                capacity,
                frame_rate: cli.frame_rate,
                exit_on_end,
            },
            mode: cli.mode.or(file.mode).unwrap_or(DisplayMode::Rgb),
            headless: cli.headless || file.headless.unwrap_or(false),
            log_dir: file.log_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}

fn main() -> Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            std::process::exit(code);
        }
    };

    let file_config = match &cli.config {
        Some(path) => FileConfig::load(path, true)?,
        None => FileConfig::load(Path::new(constants::CONFIG_FILE), false)?,
    };
    let settings = Settings::resolve(&cli, &file_config);

    logger::init(&settings.log_dir);
    logger::info(&format!("starting with {:?}", settings));
    for key in &file_config.unknown_keys {
        logger::warn(&format!("ignoring unknown config key `{}`", key));
    }

    let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })?;

    let summary = match cli.backend {
        Backend::Ffmpeg => play(&settings, || FfmpegSource::open(&cli.path), &shutdown_rx)?,
        Backend::Opencv => play_opencv(&settings, &cli.path, &shutdown_rx)?,
    };

    println!(
        "{} frames shown, {} decoded, {} skipped, {} empty ticks, peak ring depth {} ({:?})",
        summary.presented,
        summary.committed,
        summary.skipped,
        summary.empty_ticks,
        summary.high_water,
        summary.producer_exit
    );
    Ok(())
}

#[cfg(feature = "opencv")]
fn play_opencv(settings: &Settings, path: &Path, shutdown: &Receiver<()>) -> Result<PlaybackSummary> {
    play(settings, || decoder::OpenCvSource::open(path), shutdown)
}

#[cfg(not(feature = "opencv"))]
fn play_opencv(_settings: &Settings, _path: &Path, _shutdown: &Receiver<()>) -> Result<PlaybackSummary> {
    anyhow::bail!("this build has no OpenCV support (rebuild with `--features opencv`)")
}

fn play<S, O>(settings: &Settings, open_source: O, shutdown: &Receiver<()>) -> Result<PlaybackSummary>
where
    S: FrameSource + 'static,
    O: FnOnce() -> Result<S, StartupError>,
{
    if settings.headless {
        let mut player = Player::new(settings.player);
        player.start(open_source, |_| Ok(HeadlessRenderer::new()))?;
        Ok(finish(&mut player, shutdown))
    } else {
        let mode = settings.mode;
        let mut player = Player::new(settings.player);
        player.start(open_source, |_| DisplayManager::new(mode))?;
        Ok(finish(&mut player, shutdown))
    }
}

fn finish<R: Renderer>(player: &mut Player<R>, shutdown: &Receiver<()>) -> PlaybackSummary {
    let summary = player.run(shutdown);
    logger::debug(&format!("player {:?}", player.state()));
    summary
}
