//! Face descriptor extraction.
//!
//! Turns a grayscale face crop into a fixed 128-element L2-normalized
//! descriptor built from a gradient-orientation histogram and an
//! intensity histogram. Deterministic for identical pixel input.

use crate::types::{FaceCrop, FeatureVector, DESCRIPTOR_DIM};

// --- Named constants ---
const CANONICAL_SIZE: usize = 64;
const ORIENTATION_BINS: usize = 8;
const INTENSITY_BINS: usize = 64;
// 256 intensity levels folded into 64 bins.
const INTENSITY_BIN_WIDTH: usize = 256 / INTENSITY_BINS;

/// Stateless descriptor extractor.
///
/// The pipeline shares one instance across invocations; extraction is a
/// pure function of the crop pixels.
#[derive(Debug, Default, Clone, Copy)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract a descriptor from a face crop.
    ///
    /// Returns `None` for degenerate input (empty crop) or when the
    /// combined histogram has zero norm. Never panics on any pixel
    /// content.
    pub fn extract(&self, crop: &FaceCrop) -> Option<FeatureVector> {
        if crop.is_empty() {
            tracing::debug!("empty face crop, no descriptor");
            return None;
        }

        // Canonical square size for consistent feature extraction.
        let mut gray = resize_bilinear(
            crop.data(),
            crop.width() as usize,
            crop.height() as usize,
            CANONICAL_SIZE,
        );

        equalize_histogram(&mut gray);

        let (gx, gy) = sobel_gradients(&gray, CANONICAL_SIZE);

        // Magnitude-weighted histogram of gradient orientations in [-pi, pi].
        let mut orientation_hist = [0f32; ORIENTATION_BINS];
        for i in 0..gray.len() {
            let magnitude = (gx[i] * gx[i] + gy[i] * gy[i]).sqrt();
            let direction = gy[i].atan2(gx[i]);
            let mut bin = ((direction + std::f32::consts::PI)
                / (2.0 * std::f32::consts::PI)
                * ORIENTATION_BINS as f32) as usize;
            // direction == +pi maps past the last bin edge
            if bin >= ORIENTATION_BINS {
                bin = ORIENTATION_BINS - 1;
            }
            orientation_hist[bin] += magnitude;
        }

        let mut intensity_hist = [0f32; INTENSITY_BINS];
        for &p in &gray {
            intensity_hist[p as usize / INTENSITY_BIN_WIDTH] += 1.0;
        }

        let mut features: Vec<f32> = orientation_hist
            .iter()
            .chain(intensity_hist.iter())
            .copied()
            .collect();
        // Deterministically truncate or zero-pad to the fixed dimension.
        features.resize(DESCRIPTOR_DIM, 0.0);

        let norm: f32 = features.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm <= 0.0 {
            tracing::debug!("zero-norm feature histogram, no descriptor");
            return None;
        }
        for v in features.iter_mut() {
            *v /= norm;
        }

        FeatureVector::new(features).ok()
    }
}

/// Resize a grayscale buffer to a square output using bilinear
/// interpolation.
fn resize_bilinear(src: &[u8], width: usize, height: usize, out_size: usize) -> Vec<u8> {
    let mut out = vec![0u8; out_size * out_size];
    let inv_scale_x = width as f32 / out_size as f32;
    let inv_scale_y = height as f32 / out_size as f32;

    for y in 0..out_size {
        let src_y = (y as f32 + 0.5) * inv_scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..out_size {
            let src_x = (x as f32 + 0.5) * inv_scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            let tl = src[y0 * width + x0] as f32;
            let tr = src[y0 * width + x1] as f32;
            let bl = src[y1 * width + x0] as f32;
            let br = src[y1 * width + x1] as f32;

            let val = tl * (1.0 - fx) * (1.0 - fy)
                + tr * fx * (1.0 - fy)
                + bl * (1.0 - fx) * fy
                + br * fx * fy;

            out[y * out_size + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }

    out
}

/// Global histogram equalization in-place for contrast normalization.
fn equalize_histogram(gray: &mut [u8]) {
    if gray.is_empty() {
        return;
    }

    let mut hist = [0u32; 256];
    for &p in gray.iter() {
        hist[p as usize] += 1;
    }

    let mut cdf = [0f32; 256];
    cdf[0] = hist[0] as f32;
    for i in 1..256 {
        cdf[i] = cdf[i - 1] + hist[i] as f32;
    }

    let cdf_min = cdf.iter().find(|&&v| v > 0.0).copied().unwrap_or(0.0);
    let denom = gray.len() as f32 - cdf_min;
    if denom <= 0.0 {
        // Constant image: equalization is a no-op.
        return;
    }

    for p in gray.iter_mut() {
        let mapped = (cdf[*p as usize] - cdf_min) / denom * 255.0;
        *p = mapped.round().clamp(0.0, 255.0) as u8;
    }
}

/// 3x3 Sobel gradients with replicated borders. Returns (gx, gy).
fn sobel_gradients(gray: &[u8], size: usize) -> (Vec<f32>, Vec<f32>) {
    let mut gx = vec![0f32; gray.len()];
    let mut gy = vec![0f32; gray.len()];

    let sample = |x: i32, y: i32| -> f32 {
        let cx = x.clamp(0, size as i32 - 1) as usize;
        let cy = y.clamp(0, size as i32 - 1) as usize;
        gray[cy * size + cx] as f32
    };

    for y in 0..size as i32 {
        for x in 0..size as i32 {
            let tl = sample(x - 1, y - 1);
            let tc = sample(x, y - 1);
            let tr = sample(x + 1, y - 1);
            let ml = sample(x - 1, y);
            let mr = sample(x + 1, y);
            let bl = sample(x - 1, y + 1);
            let bc = sample(x, y + 1);
            let br = sample(x + 1, y + 1);

            let idx = y as usize * size + x as usize;
            gx[idx] = (tr + 2.0 * mr + br) - (tl + 2.0 * ml + bl);
            gy[idx] = (bl + 2.0 * bc + br) - (tl + 2.0 * tc + tr);
        }
    }

    (gx, gy)
}
