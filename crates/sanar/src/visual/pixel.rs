//! Anti-aliasing aware per-pixel comparison.
//!
//! Color distance is measured in YIQ space over alpha-blended-on-white
//! pixels. A pixel whose distance exceeds `35215 * threshold²` is a
//! mismatch, unless anti-aliasing detection is on and the pixel looks like
//! an anti-aliased edge in either image.

use image::{Rgba, RgbaImage};

/// Largest possible YIQ squared distance
const MAX_YIQ_DELTA: f64 = 35215.0;

const DIFF_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const AA_COLOR: Rgba<u8> = Rgba([255, 255, 0, 255]);
const GRAY_ALPHA: f64 = 0.1;

/// Comparison knobs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiffOptions {
    /// Per-pixel color threshold in `[0, 1]`; smaller is stricter
    pub threshold: f64,
    /// Count anti-aliased pixels as mismatches
    pub include_anti_aliasing: bool,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            include_anti_aliasing: true,
        }
    }
}

impl DiffOptions {
    /// Set the color threshold
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set anti-aliasing handling
    #[must_use]
    pub const fn with_anti_aliasing(mut self, include: bool) -> Self {
        self.include_anti_aliasing = include;
        self
    }
}

/// Result of a pixel comparison
#[derive(Debug, Clone)]
pub struct PixelDiff {
    /// Pixels counted as different
    pub mismatched: u64,
    /// Pixels compared
    pub total: u64,
    /// Red mismatches over a faded grayscale copy of the baseline
    pub image: RgbaImage,
}

impl PixelDiff {
    /// Mismatched share of all pixels; 0 for empty images
    #[must_use]
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.mismatched as f64 / self.total as f64
        }
    }

    /// Whether nothing differed
    #[must_use]
    pub const fn is_identical(&self) -> bool {
        self.mismatched == 0
    }
}

/// Compare two images of equal size. Returns `None` when sizes differ.
#[must_use]
pub fn compare(baseline: &RgbaImage, current: &RgbaImage, options: &DiffOptions) -> Option<PixelDiff> {
    if baseline.dimensions() != current.dimensions() {
        return None;
    }
    let (width, height) = baseline.dimensions();
    let total = u64::from(width) * u64::from(height);
    let mut output = RgbaImage::new(width, height);

    if baseline.as_raw() == current.as_raw() {
        for (x, y, px) in baseline.enumerate_pixels() {
            output.put_pixel(x, y, gray_pixel(*px));
        }
        return Some(PixelDiff {
            mismatched: 0,
            total,
            image: output,
        });
    }

    let max_delta = MAX_YIQ_DELTA * options.threshold * options.threshold;
    let mut mismatched = 0u64;
    for y in 0..height {
        for x in 0..width {
            let a = *baseline.get_pixel(x, y);
            let b = *current.get_pixel(x, y);
            let delta = color_delta(a, b, false);
            if delta.abs() > max_delta {
                if !options.include_anti_aliasing
                    && (antialiased(baseline, x, y, current) || antialiased(current, x, y, baseline))
                {
                    output.put_pixel(x, y, AA_COLOR);
                } else {
                    output.put_pixel(x, y, DIFF_COLOR);
                    mismatched += 1;
                }
            } else {
                output.put_pixel(x, y, gray_pixel(a));
            }
        }
    }

    Some(PixelDiff {
        mismatched,
        total,
        image: output,
    })
}

fn blend(channel: f64, alpha: f64) -> f64 {
    255.0 + (channel - 255.0) * alpha
}

fn blended_rgb(px: Rgba<u8>) -> (f64, f64, f64) {
    let Rgba([r, g, b, a]) = px;
    let (r, g, b) = (f64::from(r), f64::from(g), f64::from(b));
    if a < 255 {
        let alpha = f64::from(a) / 255.0;
        (blend(r, alpha), blend(g, alpha), blend(b, alpha))
    } else {
        (r, g, b)
    }
}

fn rgb2y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.298_895_31 + g * 0.586_622_47 + b * 0.114_482_23
}

fn rgb2i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.595_977_99 - g * 0.274_176_10 - b * 0.321_801_89
}

fn rgb2q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.211_470_17 - g * 0.522_617_11 + b * 0.311_146_94
}

/// Signed YIQ distance; negative when `a` is brighter than `b`.
/// With `y_only`, just the brightness difference.
fn color_delta(a: Rgba<u8>, b: Rgba<u8>, y_only: bool) -> f64 {
    if a == b {
        return 0.0;
    }
    let (r1, g1, b1) = blended_rgb(a);
    let (r2, g2, b2) = blended_rgb(b);
    let y = rgb2y(r1, g1, b1) - rgb2y(r2, g2, b2);
    if y_only {
        return y;
    }
    let i = rgb2i(r1, g1, b1) - rgb2i(r2, g2, b2);
    let q = rgb2q(r1, g1, b1) - rgb2q(r2, g2, b2);
    let delta = 0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q;
    if y > 0.0 {
        -delta
    } else {
        delta
    }
}

fn gray_pixel(px: Rgba<u8>) -> Rgba<u8> {
    let (r, g, b) = blended_rgb(px);
    let val = blend(rgb2y(r, g, b), GRAY_ALPHA * f64::from(px[3]) / 255.0);
    let v = val.round().clamp(0.0, 255.0) as u8;
    Rgba([v, v, v, 255])
}

/// Clamped 3x3 neighborhood bounds around (x, y)
fn neighborhood(img: &RgbaImage, x: u32, y: u32) -> (u32, u32, u32, u32) {
    let (w, h) = img.dimensions();
    (
        x.saturating_sub(1),
        y.saturating_sub(1),
        (x + 1).min(w - 1),
        (y + 1).min(h - 1),
    )
}

fn on_edge(img: &RgbaImage, x: u32, y: u32) -> bool {
    let (x0, y0, x2, y2) = neighborhood(img, x, y);
    x == x0 || x == x2 || y == y0 || y == y2
}

/// Whether (x, y) looks like an anti-aliased pixel in `img`
fn antialiased(img: &RgbaImage, x1: u32, y1: u32, other: &RgbaImage) -> bool {
    let (x0, y0, x2, y2) = neighborhood(img, x1, y1);
    let center = *img.get_pixel(x1, y1);
    let mut zeroes = u32::from(on_edge(img, x1, y1));
    let (mut min, mut max) = (0.0f64, 0.0f64);
    let (mut min_at, mut max_at) = ((x1, y1), (x1, y1));

    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }
            let delta = color_delta(center, *img.get_pixel(x, y), true);
            if delta == 0.0 {
                zeroes += 1;
                if zeroes > 2 {
                    return false;
                }
            } else if delta < min {
                min = delta;
                min_at = (x, y);
            } else if delta > max {
                max = delta;
                max_at = (x, y);
            }
        }
    }

    if min == 0.0 || max == 0.0 {
        return false;
    }

    (has_many_siblings(img, min_at) && has_many_siblings(other, min_at))
        || (has_many_siblings(img, max_at) && has_many_siblings(other, max_at))
}

/// Whether (x, y) has three or more identical neighbors
fn has_many_siblings(img: &RgbaImage, (x1, y1): (u32, u32)) -> bool {
    let (x0, y0, x2, y2) = neighborhood(img, x1, y1);
    let center = *img.get_pixel(x1, y1);
    let mut zeroes = u32::from(on_edge(img, x1, y1));
    for x in x0..=x2 {
        for y in y0..=y2 {
            if x == x1 && y == y1 {
                continue;
            }
            if *img.get_pixel(x, y) == center {
                zeroes += 1;
                if zeroes > 2 {
                    return true;
                }
            }
        }
    }
    false
}
