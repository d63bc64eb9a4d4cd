use anyhow::{bail, Result};
use fast_image_resize as fr;
use fr::images::{Image, ImageRef};
use rayon::prelude::*;

use super::cell::CellData;
use crate::decoder::{Frame, PixelFormat};
use crate::shared::constants::PIXEL_ROWS_PER_CELL;

/// Largest size with the frame's aspect ratio that fits `max_w` x `max_h` pixels.
/// Height is kept even so every terminal row gets a full half-block pair.
pub fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width == 0 || height == 0 || max_w == 0 || max_h < PIXEL_ROWS_PER_CELL {
        return (max_w.max(1), PIXEL_ROWS_PER_CELL);
    }
    let scale = (max_w as f64 / width as f64).min(max_h as f64 / height as f64);
    let w = ((width as f64 * scale).round() as u32).clamp(1, max_w);
    let h = ((height as f64 * scale).round() as u32).clamp(PIXEL_ROWS_PER_CELL, max_h);
    (w, h - h % PIXEL_ROWS_PER_CELL)
}

/// Resizes RGB24 frames to the terminal's pixel grid, reusing its output image.
pub struct Scaler {
    resizer: fr::Resizer,
    dst: Image<'static>,
    dims: (u32, u32),
}

impl Scaler {
    pub fn new() -> Self {
        Self {
            resizer: fr::Resizer::new(),
            dst: Image::new(1, 1, fr::PixelType::U8x3),
            dims: (1, 1),
        }
    }

    pub fn scale<'a>(&'a mut self, frame: &'a Frame, width: u32, height: u32) -> Result<&'a [u8]> {
        if frame.format != PixelFormat::Rgb24 || frame.stride != frame.row_bytes() {
            bail!("scaler expects packed RGB24, got {:?} with stride {}", frame.format, frame.stride);
        }
        if (frame.width, frame.height) == (width, height) {
            return Ok(&frame.data);
        }

        if self.dims != (width, height) {
            self.dst = Image::new(width, height, fr::PixelType::U8x3);
            self.dims = (width, height);
        }
        let src = ImageRef::new(frame.width, frame.height, &frame.data, fr::PixelType::U8x3)?;
        self.resizer.resize(&src, &mut self.dst, None)?;
        Ok(self.dst.buffer())
    }
}

/// Turns an RGB24 pixel grid into half-block cells, two pixel rows per cell.
pub struct FrameProcessor {
    pub width: usize,
    pub height: usize,
}

impl FrameProcessor {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn cell_count(&self) -> usize {
        self.width * (self.height / PIXEL_ROWS_PER_CELL as usize)
    }

    #[cfg(test)]
    pub fn process_frame(&self, pixel_data: &[u8]) -> Vec<CellData> {
        let mut cells = vec![CellData::default(); self.cell_count()];
        self.process_frame_into(pixel_data, &mut cells);
        cells
    }

    pub fn process_frame_into(&self, pixel_data: &[u8], cells: &mut [CellData]) {
        let w = self.width;
        if cells.len() != self.cell_count() || w == 0 {
            return;
        }

        // One terminal row per rayon task keeps the work units even.
        cells.par_chunks_mut(w).enumerate().for_each(|(cy, row)| {
            let pixel = |x: usize, y: usize| -> (u8, u8, u8) {
                let offset = (y * w + x) * 3;
                match pixel_data.get(offset..offset + 3) {
                    Some(px) => (px[0], px[1], px[2]),
                    None => (0, 0, 0),
                }
            };

            for (cx, cell) in row.iter_mut().enumerate() {
                *cell = CellData {
                    char: '▀',
                    fg: pixel(cx, cy * 2),
                    bg: pixel(cx, cy * 2 + 1),
                };
            }
        });
    }
}
