// Copyright 2025. Preview and comparison helpers for the blur-preview CLI.
//
// Provides image file I/O and pixel comparison between blurred outputs.

use std::path::Path;

use image::DynamicImage;

// ============================================================================
// Image I/O
// ============================================================================

/// Decode an image file. Format is taken from the file contents.
pub fn load_image(path: &Path) -> Result<DynamicImage, String> {
    image::open(path).map_err(|e| format!("{}: {}", path.display(), e))
}

/// Encode an image file. Format is taken from the extension.
pub fn save_image(path: &Path, image: &DynamicImage) -> Result<(), String> {
    image
        .save(path)
        .map_err(|e| format!("{}: {}", path.display(), e))
}

/// Output path of frame `n` in a sequence: `<prefix>_<n>.png`.
pub fn frame_path(prefix: &str, n: u64) -> String {
    format!("{}_{:03}.png", prefix, n)
}

// ============================================================================
// Comparison
// ============================================================================

/// Result of comparing two images of equal size.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareResult {
    pub identical: bool,
    pub total_pixels: u64,
    /// Pixels that differ by at least 1 in any channel.
    pub different_pixels: u64,
    pub max_channel_diff: u8,
    /// Mean absolute difference over the differing channels.
    pub mean_channel_diff: f64,
}

impl std::fmt::Display for CompareResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.identical {
            write!(f, "IDENTICAL: {} pixels match", self.total_pixels)
        } else {
            write!(
                f,
                "DIFFERENT: {}/{} pixels differ ({:.2}%), max_diff={}, mean_diff={:.4}",
                self.different_pixels,
                self.total_pixels,
                self.different_pixels as f64 / self.total_pixels as f64 * 100.0,
                self.max_channel_diff,
                self.mean_channel_diff,
            )
        }
    }
}

/// Compare two images channel by channel after converting both to RGBA.
pub fn compare_images(a: &DynamicImage, b: &DynamicImage) -> Result<CompareResult, String> {
    if a.width() != b.width() || a.height() != b.height() {
        return Err(format!(
            "size mismatch: {}x{} vs {}x{}",
            a.width(),
            a.height(),
            b.width(),
            b.height()
        ));
    }
    let a = a.to_rgba8();
    let b = b.to_rgba8();

    let mut different_pixels = 0u64;
    let mut max_channel_diff = 0u8;
    let mut diff_sum = 0u64;
    let mut diff_channels = 0u64;
    for (pa, pb) in a.pixels().zip(b.pixels()) {
        let mut differs = false;
        for c in 0..4 {
            let d = pa.0[c].abs_diff(pb.0[c]);
            if d > 0 {
                differs = true;
                max_channel_diff = max_channel_diff.max(d);
                diff_sum += d as u64;
                diff_channels += 1;
            }
        }
        if differs {
            different_pixels += 1;
        }
    }

    Ok(CompareResult {
        identical: different_pixels == 0,
        total_pixels: a.width() as u64 * a.height() as u64,
        different_pixels,
        max_channel_diff,
        mean_channel_diff: if diff_channels > 0 {
            diff_sum as f64 / diff_channels as f64
        } else {
            0.0
        },
    })
}
