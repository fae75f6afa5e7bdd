//! Blur engine: radius normalization and iterated kernel application.
//!
//! [`BlurEngine::blur`] runs the box-blur kernel `iterations` times, feeding
//! each pass into the next. Intermediate passes ping-pong between buffers
//! checked out from the engine's [`ScratchPool`]; only the final pass writes
//! into a newly allocated output buffer.

use std::sync::Arc;

use image::DynamicImage;
use tracing::trace;

use crate::box_blur::box_blur_into;
use crate::error::Result;
use crate::pixel_buffer::PixelBuffer;
use crate::scratch::{ScratchPool, ScratchSet};

/// Make `radius` odd: even non-zero radii are increased by one.
///
/// A radius of 0 stays 0.
#[inline]
pub fn normalize_radius(radius: u32) -> u32 {
    if radius != 0 && radius % 2 == 0 {
        radius + 1
    } else {
        radius
    }
}

// ============================================================================
// BlurRequest
// ============================================================================

/// An immutable blur request: the source image snapshot plus parameters.
#[derive(Debug, Clone)]
pub struct BlurRequest {
    image: Arc<DynamicImage>,
    radius: u32,
    iterations: u8,
}

impl BlurRequest {
    /// Radius is normalized to odd on construction.
    pub fn new(image: Arc<DynamicImage>, radius: u32, iterations: u8) -> Self {
        Self {
            image,
            radius: normalize_radius(radius),
            iterations,
        }
    }

    pub fn image(&self) -> &Arc<DynamicImage> {
        &self.image
    }

    /// The normalized radius.
    pub fn radius(&self) -> u32 {
        self.radius
    }

    pub fn iterations(&self) -> u8 {
        self.iterations
    }

    /// True if the request leaves the image unchanged.
    pub fn is_identity(&self) -> bool {
        self.radius == 0 || self.iterations == 0
    }
}

// ============================================================================
// BlurEngine
// ============================================================================

/// Applies iterated box blurs, reusing scratch buffers across calls.
#[derive(Default)]
pub struct BlurEngine {
    pool: Arc<ScratchPool>,
}

impl BlurEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine around an existing pool.
    pub fn with_pool(pool: Arc<ScratchPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ScratchPool> {
        &self.pool
    }

    /// Free the idle scratch buffers now.
    pub fn release_scratch(&self) -> usize {
        self.pool.release()
    }

    /// Blur `src` with `radius` for `iterations` passes.
    ///
    /// Returns a copy of `src` when the normalized radius or the iteration
    /// count is zero.
    pub fn blur(&self, src: &PixelBuffer, radius: u32, iterations: u8) -> Result<PixelBuffer> {
        let radius = normalize_radius(radius);
        if radius == 0 || iterations == 0 {
            return Ok(src.clone());
        }
        let passes = iterations as usize;
        let mut out = PixelBuffer::try_new_like(src)?;
        let mut scratch = self.pool.checkout(src, passes - 1)?;
        let result = run_passes(src, &mut out, &mut scratch, radius, passes);
        self.pool.checkin(scratch);
        result.map(|()| out)
    }

    /// Blur an image, converting through [`PixelBuffer`].
    pub fn blur_image(&self, image: &DynamicImage, radius: u32, iterations: u8) -> Result<DynamicImage> {
        if normalize_radius(radius) == 0 || iterations == 0 {
            return Ok(image.clone());
        }
        let src = PixelBuffer::from_image(image)?;
        self.blur(&src, radius, iterations)?.to_image()
    }

    /// Execute a queued request.
    pub fn execute(&self, request: &BlurRequest) -> Result<DynamicImage> {
        self.blur_image(request.image(), request.radius(), request.iterations())
    }
}

fn run_passes(
    src: &PixelBuffer,
    out: &mut PixelBuffer,
    scratch: &mut ScratchSet,
    radius: u32,
    passes: usize,
) -> Result<()> {
    let line = &mut scratch.line;
    if passes == 1 {
        trace!(radius, pass = 1, "box blur pass");
        return box_blur_into(src, out, line, radius);
    }

    let (front, back) = scratch.buffers.split_at_mut(1);
    trace!(radius, pass = 1, "box blur pass");
    box_blur_into(src, &mut front[0], line, radius)?;
    // `cur_front` tells which buffer holds the latest pass.
    let mut cur_front = true;
    for pass in 2..passes {
        trace!(radius, pass, "box blur pass");
        if cur_front {
            box_blur_into(&front[0], &mut back[0], line, radius)?;
        } else {
            box_blur_into(&back[0], &mut front[0], line, radius)?;
        }
        cur_front = !cur_front;
    }
    trace!(radius, pass = passes, "box blur pass");
    let last = if cur_front { &front[0] } else { &back[0] };
    box_blur_into(last, out, line, radius)
}
