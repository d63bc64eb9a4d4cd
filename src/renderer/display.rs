use anyhow::Result;
use crossterm::{
    cursor,
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    style::Print,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use std::io::{BufWriter, Stdout, Write};
use std::time::{Duration, Instant};

use super::cell::CellData;
use super::processor::{fit_within, FrameProcessor, Scaler};
use super::Renderer;
use crate::decoder::Frame;
use crate::shared::constants::{PIXEL_ROWS_PER_CELL, RENDER_BUFFER_BYTES};
use crate::utils::logger;

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum DisplayMode {
    Ascii,
    Rgb,
}

const ASCII_RAMP: &[char] = &[' ', '.', ':', '-', '=', '+', '*', '#', '%', '@'];

/// Brightness-mapped glyph for ASCII mode (Rec. 601 luma).
pub fn ascii_glyph((r, g, b): (u8, u8, u8)) -> char {
    let luma = (r as u32 * 299 + g as u32 * 587 + b as u32 * 114) / 1000;
    ASCII_RAMP[(luma * (ASCII_RAMP.len() as u32 - 1) / 255) as usize]
}

/// Full-screen terminal renderer. Owns raw mode and the alternate screen
/// from construction until drop.
pub struct DisplayManager {
    stdout: BufWriter<Stdout>,
    mode: DisplayMode,
    scaler: Scaler,
    processor: FrameProcessor,
    cells: Vec<CellData>,
    last_cells: Option<Vec<CellData>>,
    render_buffer: Vec<u8>,
}

impl DisplayManager {
    pub fn new(mode: DisplayMode) -> Result<Self> {
        let stdout = BufWriter::with_capacity(RENDER_BUFFER_BYTES, std::io::stdout());
        let mut dm = Self {
            stdout,
            mode,
            scaler: Scaler::new(),
            processor: FrameProcessor::new(0, 0),
            cells: Vec::new(),
            last_cells: None,
            render_buffer: Vec::with_capacity(RENDER_BUFFER_BYTES),
        };

        dm.initialize_terminal()?;

        Ok(dm)
    }

    fn initialize_terminal(&mut self) -> Result<()> {
        terminal::enable_raw_mode()?;
        self.stdout.execute(EnterAlternateScreen)?;
        self.stdout.execute(cursor::Hide)?;

        // No line wrapping at the right edge (DECAWM off)
        self.stdout.execute(Print("\x1b[?7l"))?;
        // Steady cursor
        self.stdout.execute(Print("\x1b[?12l"))?;

        Ok(())
    }

    /// Terminal size in character columns and rows.
    ///
    /// Some terminals report pixels; `CHAR_WIDTH`/`CHAR_HEIGHT` convert those back.
    pub fn terminal_size_chars() -> Result<(u16, u16)> {
        let (mut term_cols, mut term_rows) = terminal::size()?;
        if let (Ok(cw_str), Ok(ch_str)) =
            (std::env::var("CHAR_WIDTH"), std::env::var("CHAR_HEIGHT"))
        {
            if let (Ok(cw), Ok(ch)) = (cw_str.parse::<u16>(), ch_str.parse::<u16>()) {
                if cw > 0 && term_cols > cw * 16 {
                    term_cols = (term_cols / cw).max(1);
                }
                if ch > 0 && term_rows > ch * 8 {
                    term_rows = (term_rows / ch).max(1);
                }
            }
        }
        Ok((term_cols, term_rows))
    }

    fn draw(&mut self, frame: &Frame) -> Result<()> {
        let started = Instant::now();

        let (cols, rows) = Self::terminal_size_chars()?;
        let (pixel_w, pixel_h) = fit_within(
            frame.width,
            frame.height,
            cols as u32,
            rows as u32 * PIXEL_ROWS_PER_CELL,
        );

        if (self.processor.width, self.processor.height) != (pixel_w as usize, pixel_h as usize) {
            self.processor = FrameProcessor::new(pixel_w as usize, pixel_h as usize);
            self.cells = vec![CellData::default(); self.processor.cell_count()];
            logger::debug(&format!(
                "terminal {}x{} cells, drawing {}x{} px for a {}x{} stream",
                cols, rows, pixel_w, pixel_h, frame.width, frame.height
            ));
        }

        let pixels = self.scaler.scale(frame, pixel_w, pixel_h)?;
        self.processor.process_frame_into(pixels, &mut self.cells);

        let cells = std::mem::take(&mut self.cells);
        let result = self.render_diff(&cells, pixel_w as usize, (cols, rows));
        self.cells = cells;
        result?;

        let elapsed = started.elapsed();
        if elapsed > Duration::from_millis(10) {
            logger::debug(&format!(
                "slow render: frame {} took {}us",
                frame.sequence,
                elapsed.as_micros()
            ));
        }
        Ok(())
    }

    /// Writes only the cells that changed since the last frame, centred in the terminal.
    pub fn render_diff(&mut self, cells: &[CellData], width: usize, term: (u16, u16)) -> Result<()> {
        if width == 0 {
            return Ok(());
        }
        let (term_cols, term_rows) = term;

        self.render_buffer.clear();
        let buffer = &mut self.render_buffer;

        // Synchronized update (DEC mode 2026): terminal presents the frame atomically
        buffer.extend_from_slice(b"\x1b[?2026h");

        let force_redraw = self.last_cells.as_ref().map(Vec::len) != Some(cells.len());
        if force_redraw {
            buffer.extend_from_slice(b"\x1b[0m\x1b[2J");
        }
        let last_cells = self.last_cells.get_or_insert_with(Vec::new);
        if force_redraw {
            last_cells.clear();
            last_cells.resize(cells.len(), CellData::default());
        }

        let content_height = (cells.len() / width) as u16;
        let offset_x = term_cols.saturating_sub(width as u16) / 2;
        let offset_y = term_rows.saturating_sub(content_height) / 2;

        let mut last_fg: Option<(u8, u8, u8)> = None;
        let mut last_bg: Option<(u8, u8, u8)> = None;
        // Where the terminal cursor is after the last write, if known
        let mut cursor: Option<(u16, u16)> = None;

        for (i, (cell, old)) in cells.iter().zip(last_cells.iter_mut()).enumerate() {
            if !force_redraw && *cell == *old {
                cursor = None;
                continue;
            }

            let x = (i % width) as u16 + offset_x;
            let y = (i / width) as u16 + offset_y;
            if x >= term_cols || y >= term_rows {
                cursor = None;
                continue;
            }

            if cursor != Some((x, y)) {
                write!(buffer, "\x1b[{};{}H", y + 1, x + 1)?;
            }

            match self.mode {
                DisplayMode::Rgb => {
                    if last_fg != Some(cell.fg) {
                        write!(buffer, "\x1b[38;2;{};{};{}m", cell.fg.0, cell.fg.1, cell.fg.2)?;
                        last_fg = Some(cell.fg);
                    }
                    if last_bg != Some(cell.bg) {
                        write!(buffer, "\x1b[48;2;{};{};{}m", cell.bg.0, cell.bg.1, cell.bg.2)?;
                        last_bg = Some(cell.bg);
                    }
                    let mut utf8 = [0u8; 4];
                    buffer.extend_from_slice(cell.char.encode_utf8(&mut utf8).as_bytes());
                }
                DisplayMode::Ascii => {
                    let mut utf8 = [0u8; 4];
                    buffer.extend_from_slice(ascii_glyph(cell.fg).encode_utf8(&mut utf8).as_bytes());
                }
            }

            *old = *cell;
            cursor = Some((x + 1, y));
        }

        buffer.extend_from_slice(b"\x1b[0m\x1b[?2026l");

        self.stdout.write_all(&buffer[..])?;
        self.stdout.flush()?;
        Ok(())
    }
}

impl Renderer for DisplayManager {
    fn present(&mut self, frame: &Frame) {
        if let Err(e) = self.draw(frame) {
            logger::error(&format!("render error on frame {}: {:#}", frame.sequence, e));
        }
    }

    fn wants_quit(&mut self) -> bool {
        while let Ok(true) = event::poll(Duration::ZERO) {
            match event::read() {
                Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                    let ctrl_c = key.code == KeyCode::Char('c')
                        && key.modifiers.contains(KeyModifiers::CONTROL);
                    if ctrl_c || matches!(key.code, KeyCode::Char('q') | KeyCode::Esc) {
                        logger::info("quit requested from keyboard");
                        return true;
                    }
                }
                Ok(Event::Resize(cols, rows)) => {
                    logger::debug(&format!("terminal resized to {}x{}", cols, rows));
                    self.last_cells = None;
                }
                Ok(_) => {}
                Err(e) => {
                    logger::error(&format!("failed to read terminal event: {}", e));
                    break;
                }
            }
        }
        false
    }
}

impl Drop for DisplayManager {
    fn drop(&mut self) {
        let _ = self.stdout.execute(Print("\x1b[0m\x1b[?7h"));
        let _ = self.stdout.execute(cursor::Show);
        let _ = self.stdout.execute(LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}
