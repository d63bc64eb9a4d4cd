pub const APP_NAME: &str = "framering";

pub const CONFIG_FILE: &str = "framering.config";
pub const ERROR_LOG_FILE: &str = "framering-error.log";
pub const DEBUG_LOG_FILE: &str = "framering-debug.log";

/// Number of slots in the frame ring when neither the CLI nor the config file says otherwise.
pub const DEFAULT_RING_CAPACITY: usize = 10;
pub const MAX_FRAME_RATE: u32 = 1000;

/// After this many undecodable units in a row the stream is treated as ended.
pub const MAX_CONSECUTIVE_DECODE_ERRORS: u32 = 64;

pub const PRODUCER_THREAD_NAME: &str = "frame-producer";

pub const FFPROBE_BIN: &str = "ffprobe";
pub const FFMPEG_BIN: &str = "ffmpeg";

/// Half-block rendering packs two pixel rows into one terminal row.
pub const PIXEL_ROWS_PER_CELL: u32 = 2;
pub const RENDER_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// Upper bound for the ring capacity from the CLI or config file.
pub const MAX_RING_CAPACITY: usize = 1024;
/// How long `Player::start` waits for the first decoded frame.
pub const PREROLL_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(500);
