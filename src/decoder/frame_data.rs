/// Pixel layouts a source may hand over. The ring itself only ever stores [`TARGET_FORMAT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Rgb24,
    Bgr24,
    Rgba32,
    Bgra32,
    Gray8,
}

pub const TARGET_FORMAT: PixelFormat = PixelFormat::Rgb24;

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => 3,
            PixelFormat::Rgba32 | PixelFormat::Bgra32 => 4,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Name used by ffmpeg's `-pix_fmt` / ffprobe's `pix_fmt`.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Rgba32 => "rgba",
            PixelFormat::Bgra32 => "bgra",
            PixelFormat::Gray8 => "gray",
        }
    }

    pub fn from_ffmpeg_name(name: &str) -> Option<Self> {
        match name {
            "rgb24" => Some(PixelFormat::Rgb24),
            "bgr24" => Some(PixelFormat::Bgr24),
            "rgba" => Some(PixelFormat::Rgba32),
            "bgra" => Some(PixelFormat::Bgra32),
            "gray" => Some(PixelFormat::Gray8),
            _ => None,
        }
    }
}

/// Geometry and codec details agreed on when a source is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub codec: String,
    /// Container's nominal rate. Informational; playback is paced by the cadence.
    pub frame_rate: Option<f64>,
}

/// One decoded picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Bytes per row, at least `width * bytes_per_pixel`.
    pub stride: usize,
    /// Decode-order index assigned by the source.
    pub sequence: u64,
    pub data: Vec<u8>,
}

impl Frame {
    /// Zero-filled, tightly packed frame.
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = width as usize * format.bytes_per_pixel();
        Self {
            width,
            height,
            format,
            stride,
            sequence: 0,
            data: vec![0; stride * height as usize],
        }
    }

    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.format.bytes_per_pixel()
    }

    /// Visible bytes of row `y`, without stride padding.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.row_bytes()]
    }

    /// Copies `other` into this frame's storage. Once the buffer has grown to the
    /// stream's frame size this never reallocates.
    pub fn copy_from(&mut self, other: &Frame) {
        self.width = other.width;
        self.height = other.height;
        self.format = other.format;
        self.stride = other.stride;
        self.sequence = other.sequence;
        self.data.clear();
        self.data.extend_from_slice(&other.data);
    }
}
