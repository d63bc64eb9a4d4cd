use anyhow::anyhow;
use serde::Deserialize;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::{self, JoinHandle};

use super::frame_data::{Frame, PixelFormat, StreamInfo, TARGET_FORMAT};
use super::{FrameSource, SourceEvent, StartupError};
use crate::shared::constants;
use crate::utils::logger;

#[derive(Debug, Deserialize)]
struct Probe {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    avg_frame_rate: Option<String>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

/// Executables used to probe and decode.
#[derive(Debug, Clone)]
pub struct Tools {
    pub ffprobe: PathBuf,
    pub ffmpeg: PathBuf,
}

impl Default for Tools {
    fn default() -> Self {
        Self {
            ffprobe: PathBuf::from(constants::FFPROBE_BIN),
            ffmpeg: PathBuf::from(constants::FFMPEG_BIN),
        }
    }
}

/// Reads raw frames from an `ffmpeg` child process.
///
/// Geometry is negotiated up front with `ffprobe`. ffmpeg then decodes the first
/// video stream without scaling or rotating, so every frame has the probed size.
/// The first frame is decoded inside [`open`](Self::open): a decoder that cannot
/// produce a single frame is a startup failure, not an empty stream.
pub struct FfmpegSource {
    path: PathBuf,
    info: StreamInfo,
    child: Option<Child>,
    stdout: Option<BufReader<ChildStdout>>,
    stderr: Option<JoinHandle<String>>,
    frame: Frame,
    decoded: u64,
    // First frame was read during `open` and not yet handed out.
    primed: bool,
}

impl FfmpegSource {
    pub fn open(path: &Path) -> Result<Self, StartupError> {
        Self::open_with(path, &Tools::default())
    }

    pub fn open_with(path: &Path, tools: &Tools) -> Result<Self, StartupError> {
        let unreadable = |reason: String| StartupError::Unreadable {
            path: path.to_path_buf(),
            reason,
        };

        if !path.is_file() {
            return Err(unreadable("no such file".into()));
        }

        let output = Command::new(&tools.ffprobe)
            .args(["-v", "error", "-show_streams", "-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| unreadable(format!("failed to run {}: {}", tools.ffprobe.display(), e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(unreadable(stderr.trim().to_string()));
        }

        let probe: Probe = serde_json::from_slice(&output.stdout)
            .map_err(|e| unreadable(format!("unparseable probe output: {}", e)))?;
        let info = negotiate(path, &probe)?;

        logger::info(&format!(
            "negotiated {}: {}x{} {:?} codec={} rate={:?}",
            path.display(),
            info.width,
            info.height,
            info.pixel_format,
            info.codec,
            info.frame_rate
        ));

        let spawn_failed = |reason: String| StartupError::CodecOpen {
            codec: info.codec.clone(),
            reason,
        };

        // -noautorotate: rotated streams would otherwise come out as height x width.
        let mut child = Command::new(&tools.ffmpeg)
            .args(["-v", "error", "-nostdin", "-noautorotate", "-i"])
            .arg(path)
            .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", info.pixel_format.ffmpeg_name(), "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_failed(format!("failed to start {}: {}", tools.ffmpeg.display(), e)))?;

        let stderr = match child.stderr.take().map(log_stderr).transpose() {
            Ok(stderr) => stderr,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(spawn_failed(format!("failed to watch decoder output: {}", e)));
            }
        };
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(spawn_failed("decoder output is not readable".into()));
        };

        let frame = Frame::new(info.width, info.height, info.pixel_format);
        let mut source = Self {
            path: path.to_path_buf(),
            stdout: Some(BufReader::with_capacity(frame.data.len(), stdout)),
            child: Some(child),
            stderr,
            info,
            frame,
            decoded: 0,
            primed: false,
        };
        source.prime()?;
        Ok(source)
    }

    fn prime(&mut self) -> Result<(), StartupError> {
        let Some(reader) = self.stdout.as_mut() else {
            return Ok(());
        };
        let err = match reader.read_exact(&mut self.frame.data) {
            Ok(()) => {
                self.frame.sequence = 0;
                self.decoded = 1;
                self.primed = true;
                return Ok(());
            }
            Err(e) => e,
        };

        self.stdout = None;
        let status = self.child.take().map(|mut child| {
            if err.kind() != ErrorKind::UnexpectedEof {
                let _ = child.kill();
            }
            child.wait()
        });
        let stderr = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .filter(|line| !line.is_empty());

        match status {
            Some(Ok(status)) if status.success() && err.kind() == ErrorKind::UnexpectedEof => {
                logger::warn(&format!("{}: video stream has no frames", self.path.display()));
                Ok(())
            }
            status => {
                let reason = stderr.unwrap_or_else(|| match status {
                    Some(Ok(status)) => format!("decoder exited with {} before the first frame", status),
                    Some(Err(e)) => e.to_string(),
                    None => err.to_string(),
                });
                Err(decoder_failure(&self.info.codec, reason))
            }
        }
    }
}

/// Logs every stderr line of the decoder. Yields the last one once the pipe closes.
fn log_stderr(stderr: ChildStderr) -> std::io::Result<JoinHandle<String>> {
    thread::Builder::new()
        .name("ffmpeg-stderr".into())
        .spawn(move || {
            let mut last = String::new();
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                logger::error(&format!("{}: {}", constants::FFMPEG_BIN, line));
                last = line.to_string();
            }
            last
        })
}

fn decoder_failure(codec: &str, reason: String) -> StartupError {
    let lower = reason.to_ascii_lowercase();
    if lower.contains("decoder") && lower.contains("not found") {
        StartupError::UnsupportedCodec(codec.to_string())
    } else {
        StartupError::CodecOpen {
            codec: codec.to_string(),
            reason,
        }
    }
}

fn negotiate(path: &Path, probe: &Probe) -> Result<StreamInfo, StartupError> {
    let stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| StartupError::NoVideoTrack(path.to_path_buf()))?;

    let codec = match stream.codec_name.as_deref() {
        None | Some("") | Some("unknown") | Some("none") => {
            return Err(StartupError::UnsupportedCodec(
                stream.codec_name.clone().unwrap_or_else(|| "unknown".into()),
            ))
        }
        Some(name) => name.to_string(),
    };

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(StartupError::CodecOpen {
                codec,
                reason: "stream reports no frame size".into(),
            })
        }
    };

    if let Some(degrees) = display_rotation(stream) {
        logger::info(&format!(
            "{} carries a {} degree display rotation; playing it unrotated at {}x{}",
            path.display(),
            degrees,
            width,
            height
        ));
    }

    // Packed layouts the converter understands are decoded as-is; anything else
    // (planar YUV and friends) is converted by ffmpeg.
    let pixel_format = stream
        .pix_fmt
        .as_deref()
        .and_then(PixelFormat::from_ffmpeg_name)
        .unwrap_or(TARGET_FORMAT);

    Ok(StreamInfo {
        width,
        height,
        pixel_format,
        codec,
        frame_rate: stream.avg_frame_rate.as_deref().and_then(parse_rate),
    })
}

fn display_rotation(stream: &ProbeStream) -> Option<i64> {
    stream
        .side_data_list
        .iter()
        .filter_map(|side| side.rotation)
        .map(|r| r.round() as i64)
        .find(|&r| r % 360 != 0)
}

/// Parses ffprobe rationals such as `30000/1001`. `0/0` means unknown.
fn parse_rate(rate: &str) -> Option<f64> {
    let (num, den) = rate.split_once('/').unwrap_or((rate, "1"));
    let num: f64 = num.trim().parse().ok()?;
    let den: f64 = den.trim().parse().ok()?;
    (num > 0.0 && den > 0.0).then(|| num / den)
}

impl FrameSource for FfmpegSource {
    fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_unit(&mut self) -> SourceEvent<'_> {
        if std::mem::take(&mut self.primed) {
            return SourceEvent::Frame(&self.frame);
        }
        let Some(reader) = self.stdout.as_mut() else {
            return SourceEvent::EndOfStream;
        };

        match reader.read_exact(&mut self.frame.data) {
            Ok(()) => {
                self.frame.sequence = self.decoded;
                self.decoded += 1;
                SourceEvent::Frame(&self.frame)
            }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                logger::debug(&format!(
                    "{}: end of stream after {} frames",
                    self.path.display(),
                    self.decoded
                ));
                self.stdout = None;
                SourceEvent::EndOfStream
            }
            Err(e) => SourceEvent::DecodeError(anyhow!(e).context(format!("reading frame {}", self.decoded))),
        }
    }

    fn close(&mut self) {
        // Dropping the pipe first lets a still-running ffmpeg fail its next write.
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                let _ = child.kill();
            }
            let _ = child.wait();
            logger::debug(&format!("{}: decoder process closed", self.path.display()));
        }
        if let Some(handle) = self.stderr.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.close();
    }
}
