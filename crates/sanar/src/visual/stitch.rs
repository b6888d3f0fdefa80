//! Side-by-side composite of baseline and current capture for the oracle.

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{imageops, Rgba, RgbaImage};

/// Height of the label band above both images
pub const LABEL_BAND_HEIGHT: u32 = 30;
/// Left label text
pub const BASELINE_LABEL: &str = "1: Baseline";
/// Right label text
pub const CURRENT_LABEL: &str = "2: Current";

const LABEL_SCALE: u32 = 2;
const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Stitch `baseline` (left) and `current` (right) under a labeled band.
///
/// Returns `None` when the images differ in size.
#[must_use]
pub fn stitch(baseline: &RgbaImage, current: &RgbaImage) -> Option<RgbaImage> {
    if baseline.dimensions() != current.dimensions() {
        return None;
    }
    let (w, h) = baseline.dimensions();
    let mut out = RgbaImage::from_pixel(w * 2, h + LABEL_BAND_HEIGHT, WHITE);
    imageops::replace(&mut out, baseline, 0, i64::from(LABEL_BAND_HEIGHT));
    imageops::replace(&mut out, current, i64::from(w), i64::from(LABEL_BAND_HEIGHT));
    draw_text(&mut out, BASELINE_LABEL, 10, 5);
    draw_text(&mut out, CURRENT_LABEL, w + 10, 5);
    Some(out)
}

/// Draw `text` in black with the 8x8 bitmap font, clipped to the image
fn draw_text(img: &mut RgbaImage, text: &str, x: u32, y: u32) {
    let advance = 8 * LABEL_SCALE;
    let mut cursor_x = x;
    for ch in text.chars() {
        let Some(glyph) = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?')) else {
            cursor_x += advance;
            continue;
        };
        for (row_idx, &row_bits) in glyph.iter().enumerate() {
            for col in 0..8u32 {
                if (row_bits >> col) & 1 == 0 {
                    continue;
                }
                let px = cursor_x + col * LABEL_SCALE;
                let py = y + row_idx as u32 * LABEL_SCALE;
                for sy in 0..LABEL_SCALE {
                    for sx in 0..LABEL_SCALE {
                        let (tx, ty) = (px + sx, py + sy);
                        if tx < img.width() && ty < img.height() {
                            img.put_pixel(tx, ty, BLACK);
                        }
                    }
                }
            }
        }
        cursor_x += advance;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let baseline = RgbaImage::from_pixel(120, 40, Rgba([255, 0, 0, 255]));
        let current = RgbaImage::from_pixel(120, 40, Rgba([0, 0, 255, 255]));
        let out = stitch(&baseline, &current).unwrap();
        assert_eq!(out.dimensions(), (240, 70));
        assert_eq!(*out.get_pixel(5, 50), Rgba([255, 0, 0, 255]));
        assert_eq!(*out.get_pixel(200, 50), Rgba([0, 0, 255, 255]));
        assert_eq!(*out.get_pixel(239, 29), WHITE);
    }

    #[test]
    fn test_labels_are_drawn_in_band() {
        let img = RgbaImage::from_pixel(200, 10, WHITE);
        let out = stitch(&img, &img).unwrap();
        let dark_left = (0..200)
            .flat_map(|x| (0..LABEL_BAND_HEIGHT).map(move |y| (x, y)))
            .filter(|&(x, y)| *out.get_pixel(x, y) == BLACK)
            .count();
        let dark_right = (200..400)
            .flat_map(|x| (0..LABEL_BAND_HEIGHT).map(move |y| (x, y)))
            .filter(|&(x, y)| *out.get_pixel(x, y) == BLACK)
            .count();
        assert!(dark_left > 0);
        assert!(dark_right > 0);
        for x in 0..10 {
            assert_eq!(*out.get_pixel(x, 5), WHITE);
        }
    }

    #[test]
    fn test_size_mismatch() {
        let a = RgbaImage::new(10, 10);
        let b = RgbaImage::new(10, 11);
        assert!(stitch(&a, &b).is_none());
    }
}
