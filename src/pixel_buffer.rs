//! Pixel buffer: owned, row-oriented storage of 8-bit interleaved pixels.
//!
//! [`PixelBuffer`] is the only pixel representation the blur kernel works on.
//! It carries its own width, height, stride and [`PixelLayout`], and keeps the
//! invariant `data.len() == stride * height` at all times.
//!
//! Conversion to and from [`image::DynamicImage`] forms the boundary with the
//! host's image type. Only 8-bit layouts are accepted; conversion is lossless
//! for those.

use image::{DynamicImage, GrayAlphaImage, GrayImage, RgbImage, RgbaImage};

use crate::error::{BlurError, ProcessingCode, Result};

// ============================================================================
// PixelLayout
// ============================================================================

/// Interleaved 8-bit channel layouts understood by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelLayout {
    Gray8,
    GrayAlpha8,
    Rgb8,
    Rgba8,
}

impl PixelLayout {
    /// Bytes (and channels) per pixel.
    pub const fn bpp(self) -> usize {
        match self {
            PixelLayout::Gray8 => 1,
            PixelLayout::GrayAlpha8 => 2,
            PixelLayout::Rgb8 => 3,
            PixelLayout::Rgba8 => 4,
        }
    }
}

// ============================================================================
// PixelBuffer
// ============================================================================

/// Contiguous pixel storage with explicit stride.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    stride: usize,
    layout: PixelLayout,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Create a zeroed buffer with a tight stride.
    pub fn new(width: u32, height: u32, layout: PixelLayout) -> Self {
        let stride = width as usize * layout.bpp();
        Self {
            width,
            height,
            stride,
            layout,
            data: vec![0u8; stride * height as usize],
        }
    }

    /// Like [`new`](Self::new), but reports allocation failure instead of
    /// aborting.
    pub fn try_new(width: u32, height: u32, layout: PixelLayout) -> Result<Self> {
        let stride = width as usize * layout.bpp();
        let len = stride
            .checked_mul(height as usize)
            .ok_or(BlurError::Processing(ProcessingCode::AllocationFailed))?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)?;
        data.resize(len, 0);
        Ok(Self {
            width,
            height,
            stride,
            layout,
            data,
        })
    }

    /// Allocate a zeroed buffer with the geometry (including stride) of
    /// `other`.
    pub fn try_new_like(other: &PixelBuffer) -> Result<Self> {
        let len = other.stride * other.height as usize;
        let mut data = Vec::new();
        data.try_reserve_exact(len)?;
        data.resize(len, 0);
        Ok(Self {
            width: other.width,
            height: other.height,
            stride: other.stride,
            layout: other.layout,
            data,
        })
    }

    /// Wrap existing bytes.
    ///
    /// Fails with [`BlurError::InvalidImage`] if `stride < width * bpp` or
    /// `data.len() != stride * height`.
    pub fn from_raw(
        width: u32,
        height: u32,
        stride: usize,
        layout: PixelLayout,
        data: Vec<u8>,
    ) -> Result<Self> {
        let row_bytes = width as usize * layout.bpp();
        if stride < row_bytes {
            return Err(BlurError::InvalidImage(format!(
                "stride {} shorter than row of {} bytes",
                stride, row_bytes
            )));
        }
        if data.len() != stride * height as usize {
            return Err(BlurError::InvalidImage(format!(
                "buffer of {} bytes does not match {} rows of stride {}",
                data.len(),
                height,
                stride
            )));
        }
        Ok(Self {
            width,
            height,
            stride,
            layout,
            data,
        })
    }

    /// Extract the pixels of `image`.
    ///
    /// Fails with [`BlurError::InvalidImage`] for zero-sized images and for
    /// layouts other than 8-bit gray, gray+alpha, RGB and RGBA.
    pub fn from_image(image: &DynamicImage) -> Result<Self> {
        if image.width() == 0 || image.height() == 0 {
            return Err(BlurError::InvalidImage(format!(
                "image has zero dimensions ({}x{})",
                image.width(),
                image.height()
            )));
        }
        let (layout, raw) = match image {
            DynamicImage::ImageLuma8(img) => (PixelLayout::Gray8, img.as_raw()),
            DynamicImage::ImageLumaA8(img) => (PixelLayout::GrayAlpha8, img.as_raw()),
            DynamicImage::ImageRgb8(img) => (PixelLayout::Rgb8, img.as_raw()),
            DynamicImage::ImageRgba8(img) => (PixelLayout::Rgba8, img.as_raw()),
            other => {
                return Err(BlurError::InvalidImage(format!(
                    "unsupported pixel layout {:?}",
                    other.color()
                )))
            }
        };
        let stride = image.width() as usize * layout.bpp();
        Self::from_raw(image.width(), image.height(), stride, layout, raw.clone())
    }

    /// Render the buffer back into an image of the same layout.
    pub fn to_image(&self) -> Result<DynamicImage> {
        let (w, h) = (self.width, self.height);
        let pixels = self.to_packed();
        let mismatch = || BlurError::Processing(ProcessingCode::BufferSizeMismatch);
        let image = match self.layout {
            PixelLayout::Gray8 => {
                DynamicImage::ImageLuma8(GrayImage::from_raw(w, h, pixels).ok_or_else(mismatch)?)
            }
            PixelLayout::GrayAlpha8 => DynamicImage::ImageLumaA8(
                GrayAlphaImage::from_raw(w, h, pixels).ok_or_else(mismatch)?,
            ),
            PixelLayout::Rgb8 => {
                DynamicImage::ImageRgb8(RgbImage::from_raw(w, h, pixels).ok_or_else(mismatch)?)
            }
            PixelLayout::Rgba8 => {
                DynamicImage::ImageRgba8(RgbaImage::from_raw(w, h, pixels).ok_or_else(mismatch)?)
            }
        };
        Ok(image)
    }

    /// Pixel rows without stride padding.
    fn to_packed(&self) -> Vec<u8> {
        let row_bytes = self.row_bytes();
        if row_bytes == self.stride {
            return self.data.clone();
        }
        let mut out = Vec::with_capacity(row_bytes * self.height as usize);
        for y in 0..self.height {
            out.extend_from_slice(self.row(y));
        }
        out
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn bpp(&self) -> usize {
        self.layout.bpp()
    }

    /// Bytes of pixel data in one row, excluding padding.
    pub fn row_bytes(&self) -> usize {
        self.width as usize * self.layout.bpp()
    }

    /// True if `other` has the same width, height, stride and layout.
    pub fn same_geometry(&self, other: &PixelBuffer) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.stride == other.stride
            && self.layout == other.layout
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Pixel bytes of row `y`, without padding.
    pub fn row(&self, y: u32) -> &[u8] {
        assert!(
            y < self.height,
            "row {} out of bounds (height={})",
            y,
            self.height
        );
        let start = y as usize * self.stride;
        &self.data[start..start + self.row_bytes()]
    }

    /// Mutable pixel bytes of row `y`, without padding.
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        assert!(
            y < self.height,
            "row {} out of bounds (height={})",
            y,
            self.height
        );
        let start = y as usize * self.stride;
        let row_bytes = self.row_bytes();
        &mut self.data[start..start + row_bytes]
    }

    /// Channel bytes of the pixel at (x, y).
    pub fn pixel(&self, x: u32, y: u32) -> &[u8] {
        let bpp = self.bpp();
        let off = x as usize * bpp;
        &self.row(y)[off..off + bpp]
    }

    /// Reshape this buffer to the geometry of `like`, reusing the allocation
    /// when it is large enough. Contents are unspecified afterwards.
    pub(crate) fn reshape_like(&mut self, like: &PixelBuffer) -> Result<()> {
        let len = like.stride * like.height as usize;
        if len > self.data.capacity() {
            self.data.try_reserve_exact(len - self.data.len())?;
        }
        self.data.resize(len, 0);
        self.width = like.width;
        self.height = like.height;
        self.stride = like.stride;
        self.layout = like.layout;
        Ok(())
    }

    /// Allocated size in bytes.
    pub fn capacity_bytes(&self) -> usize {
        self.data.capacity()
    }
}
