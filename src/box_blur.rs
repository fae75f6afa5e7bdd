//! Box blur kernel.
//!
//! One pass replaces every channel of every pixel with the unweighted mean of
//! the `(2r + 1) x (2r + 1)` window centered on it. The window is separable,
//! so a pass runs as a horizontal sweep followed by a vertical sweep, each
//! using a running sum: cost is `O(width * height)` regardless of `r`.
//!
//! Pixels outside the buffer take the value of the nearest edge pixel
//! (clamp-to-edge). Sums are accumulated in `u64` and rounded to nearest when
//! narrowed back to `u8`.

use crate::error::{BlurError, ProcessingCode, Result};
use crate::pixel_buffer::PixelBuffer;

// ============================================================================
// Line sweep
// ============================================================================

/// Blur one line of `len` pixels with `bpp` interleaved channels.
///
/// `src[i * src_step + c]` is channel `c` of input pixel `i`; the result for
/// pixel `i` is written to `dst[i * dst_step + c]`.
fn blur_line(
    src: &[u8],
    src_step: usize,
    dst: &mut [u8],
    dst_step: usize,
    len: usize,
    bpp: usize,
    radius: usize,
) {
    if len == 0 {
        return;
    }
    let last = len - 1;
    let div = 2 * radius as u64 + 1;
    let half = div / 2;

    for c in 0..bpp {
        let px = |i: usize| src[i * src_step + c] as u64;

        // Window for pixel 0 covers [-r, r]: r + 1 copies of the left edge,
        // then pixels 1..=r with everything past the right edge clamped.
        let inside = radius.min(last);
        let mut sum = (radius as u64 + 1) * px(0);
        for i in 1..=inside {
            sum += px(i);
        }
        sum += (radius - inside) as u64 * px(last);

        for i in 0..len {
            dst[i * dst_step + c] = ((sum + half) / div) as u8;
            let incoming = i.saturating_add(radius).saturating_add(1).min(last);
            let outgoing = i.saturating_sub(radius);
            sum = sum + px(incoming) - px(outgoing);
        }
    }
}

// ============================================================================
// Kernel passes
// ============================================================================

/// Apply one box-blur pass of `radius` to `src`, writing into `dst`.
///
/// `dst` must have the same geometry as `src`. `line` is scratch space for
/// the vertical sweep and is grown as needed. A radius of 0 copies `src`.
pub fn box_blur_into(
    src: &PixelBuffer,
    dst: &mut PixelBuffer,
    line: &mut Vec<u8>,
    radius: u32,
) -> Result<()> {
    if !src.same_geometry(dst) {
        return Err(BlurError::Processing(ProcessingCode::BufferSizeMismatch));
    }
    let w = src.width() as usize;
    let h = src.height() as usize;
    let bpp = src.bpp();
    let stride = src.stride();
    if w == 0 || h == 0 {
        return Ok(());
    }
    if radius == 0 {
        dst.data_mut().copy_from_slice(src.data());
        return Ok(());
    }
    let r = radius as usize;

    // Horizontal pass: src rows -> dst rows.
    for y in 0..src.height() {
        blur_line(src.row(y), bpp, dst.row_mut(y), bpp, w, bpp, r);
    }

    // Vertical pass: each dst column is gathered into `line`, then blurred
    // back into place.
    let column_bytes = h * bpp;
    if line.len() < column_bytes {
        line.try_reserve_exact(column_bytes - line.len())?;
        line.resize(column_bytes, 0);
    }
    let data = dst.data_mut();
    for x in 0..w {
        let base = x * bpp;
        for y in 0..h {
            let off = base + y * stride;
            line[y * bpp..(y + 1) * bpp].copy_from_slice(&data[off..off + bpp]);
        }
        blur_line(&line[..column_bytes], bpp, &mut data[base..], stride, h, bpp, r);
    }
    Ok(())
}

/// Apply one box-blur pass of `radius` to `src`, returning a new buffer.
pub fn box_blur(src: &PixelBuffer, radius: u32) -> Result<PixelBuffer> {
    let mut dst = PixelBuffer::try_new_like(src)?;
    let mut line = Vec::new();
    box_blur_into(src, &mut dst, &mut line, radius)?;
    Ok(dst)
}
