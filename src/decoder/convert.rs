use anyhow::{bail, Result};

use super::frame_data::{Frame, PixelFormat, TARGET_FORMAT};

/// Converts `src` into `dst` as tightly packed RGB24, reusing `dst`'s buffer.
///
/// Fails when `src` claims more rows or wider rows than its buffer holds.
pub fn convert_into(src: &Frame, dst: &mut Frame) -> Result<()> {
    let row_in = src.row_bytes();
    if src.stride < row_in {
        bail!("stride {} shorter than a {}px {:?} row", src.stride, src.width, src.format);
    }
    let needed = match src.height {
        0 => 0,
        h => src.stride * (h as usize - 1) + row_in,
    };
    if src.data.len() < needed {
        bail!(
            "frame {} holds {} bytes, {}x{} {:?} needs {}",
            src.sequence,
            src.data.len(),
            src.width,
            src.height,
            src.format,
            needed
        );
    }

    let row_out = src.width as usize * TARGET_FORMAT.bytes_per_pixel();
    dst.width = src.width;
    dst.height = src.height;
    dst.format = TARGET_FORMAT;
    dst.stride = row_out;
    dst.sequence = src.sequence;
    dst.data.resize(row_out * src.height as usize, 0);

    for (y, out) in dst.data.chunks_exact_mut(row_out.max(1)).enumerate().take(src.height as usize) {
        let row = src.row(y as u32);
        match src.format {
            PixelFormat::Rgb24 => out.copy_from_slice(row),
            PixelFormat::Bgr24 => {
                for (px, bgr) in out.chunks_exact_mut(3).zip(row.chunks_exact(3)) {
                    px.copy_from_slice(&[bgr[2], bgr[1], bgr[0]]);
                }
            }
            PixelFormat::Rgba32 => {
                for (px, rgba) in out.chunks_exact_mut(3).zip(row.chunks_exact(4)) {
                    px.copy_from_slice(&rgba[..3]);
                }
            }
            PixelFormat::Bgra32 => {
                for (px, bgra) in out.chunks_exact_mut(3).zip(row.chunks_exact(4)) {
                    px.copy_from_slice(&[bgra[2], bgra[1], bgra[0]]);
                }
            }
            PixelFormat::Gray8 => {
                for (px, &luma) in out.chunks_exact_mut(3).zip(row) {
                    px.fill(luma);
                }
            }
        }
    }

    Ok(())
}
