use anyhow::anyhow;
use opencv::{prelude::*, videoio};
use std::path::{Path, PathBuf};

use super::frame_data::{Frame, PixelFormat, StreamInfo};
use super::{FrameSource, SourceEvent, StartupError};
use crate::utils::logger;

/// OpenCV `videoio` backed source. Hands over BGR24 frames at the stream's native size.
pub struct OpenCvSource {
    path: PathBuf,
    capture: Option<videoio::VideoCapture>,
    info: StreamInfo,
    mat: Mat,
    frame: Frame,
    decoded: u64,
}

impl OpenCvSource {
    pub fn open(path: &Path) -> Result<Self, StartupError> {
        let unreadable = |reason: String| StartupError::Unreadable {
            path: path.to_path_buf(),
            reason,
        };

        let path_str = path
            .to_str()
            .ok_or_else(|| unreadable("path is not valid UTF-8".into()))?;

        // CAP_ANY lets OpenCV pick the platform backend (AVFoundation, Media Foundation, FFmpeg, GStreamer)
        let mut capture = videoio::VideoCapture::from_file(path_str, videoio::CAP_ANY)
            .map_err(|e| unreadable(e.to_string()))?;
        let _ = capture.set(
            videoio::CAP_PROP_HW_ACCELERATION,
            videoio::VIDEO_ACCELERATION_ANY as f64,
        );

        if !capture.is_opened().map_err(|e| unreadable(e.to_string()))? {
            return Err(unreadable("backend refused the file".into()));
        }

        let prop = |capture: &videoio::VideoCapture, id: i32| capture.get(id).unwrap_or(0.0);
        let width = prop(&capture, videoio::CAP_PROP_FRAME_WIDTH) as u32;
        let height = prop(&capture, videoio::CAP_PROP_FRAME_HEIGHT) as u32;
        let fps = prop(&capture, videoio::CAP_PROP_FPS);
        let codec = fourcc_name(prop(&capture, videoio::CAP_PROP_FOURCC) as u32);

        if width == 0 || height == 0 {
            return Err(StartupError::NoVideoTrack(path.to_path_buf()));
        }
        let Some(codec) = codec else {
            return Err(StartupError::UnsupportedCodec("unknown".into()));
        };

        let info = StreamInfo {
            width,
            height,
            pixel_format: PixelFormat::Bgr24,
            codec,
            frame_rate: (fps > 0.0).then_some(fps),
        };
        logger::info(&format!(
            "OpenCV opened {}: {}x{} codec={} rate={:?}",
            path.display(),
            info.width,
            info.height,
            info.codec,
            info.frame_rate
        ));

        Ok(Self {
            path: path.to_path_buf(),
            capture: Some(capture),
            frame: Frame::new(width, height, PixelFormat::Bgr24),
            info,
            mat: Mat::default(),
            decoded: 0,
        })
    }
}

fn fourcc_name(fourcc: u32) -> Option<String> {
    let name: String = fourcc
        .to_le_bytes()
        .iter()
        .filter(|b| b.is_ascii_graphic())
        .map(|&b| b as char)
        .collect();
    (!name.is_empty()).then_some(name)
}

impl FrameSource for OpenCvSource {
    fn stream_info(&self) -> &StreamInfo {
        &self.info
    }

    fn next_unit(&mut self) -> SourceEvent<'_> {
        let Some(capture) = self.capture.as_mut() else {
            return SourceEvent::EndOfStream;
        };

        match capture.read(&mut self.mat) {
            Ok(false) => return SourceEvent::EndOfStream,
            Ok(true) => {}
            Err(e) => return SourceEvent::DecodeError(anyhow!("frame {}: {}", self.decoded, e)),
        }
        if self.mat.empty() {
            return SourceEvent::EndOfStream;
        }

        let (cols, rows) = (self.mat.cols() as u32, self.mat.rows() as u32);
        if cols != self.info.width || rows != self.info.height || self.mat.channels() != 3 {
            return SourceEvent::DecodeError(anyhow!(
                "frame {} is {}x{}x{}, expected {}x{}x3",
                self.decoded,
                cols,
                rows,
                self.mat.channels(),
                self.info.width,
                self.info.height
            ));
        }
        if !self.mat.is_continuous() {
            return SourceEvent::DecodeError(anyhow!("frame {} is not continuous", self.decoded));
        }

        match self.mat.data_bytes() {
            Ok(bytes) => {
                self.frame.data.clear();
                self.frame.data.extend_from_slice(bytes);
            }
            Err(e) => return SourceEvent::DecodeError(anyhow!("frame {}: {}", self.decoded, e)),
        }

        self.frame.sequence = self.decoded;
        self.decoded += 1;
        SourceEvent::Frame(&self.frame)
    }

    fn close(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            let _ = capture.release();
            logger::debug(&format!("{}: capture released after {} frames", self.path.display(), self.decoded));
        }
    }
}

impl Drop for OpenCvSource {
    fn drop(&mut self) {
        self.close();
    }
}
