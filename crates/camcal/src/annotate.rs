//! Frame annotation: corner overlay markers and a progress counter.
//!
//! Pure side-effect helpers over grayscale frames; nothing here influences
//! session control flow.

use image::GrayImage;

use camcal_core::Pt2;

const MARKER_VALUE: u8 = 255;
const MARKER_ARM: i64 = 3;

/// 3x5 digit glyphs, one bit per pixel, rows top to bottom.
const DIGITS: [[u8; 5]; 10] = [
    [0b111, 0b101, 0b101, 0b101, 0b111], // 0
    [0b010, 0b110, 0b010, 0b010, 0b111], // 1
    [0b111, 0b001, 0b111, 0b100, 0b111], // 2
    [0b111, 0b001, 0b111, 0b001, 0b111], // 3
    [0b101, 0b101, 0b111, 0b001, 0b001], // 4
    [0b111, 0b100, 0b111, 0b001, 0b111], // 5
    [0b111, 0b100, 0b111, 0b101, 0b111], // 6
    [0b111, 0b001, 0b010, 0b010, 0b010], // 7
    [0b111, 0b101, 0b111, 0b101, 0b111], // 8
    [0b111, 0b101, 0b111, 0b001, 0b111], // 9
];
const SLASH: [u8; 5] = [0b001, 0b001, 0b010, 0b100, 0b100];

fn put(image: &mut GrayImage, x: i64, y: i64, value: u8) {
    if x >= 0 && y >= 0 && x < i64::from(image.width()) && y < i64::from(image.height()) {
        image.put_pixel(x as u32, y as u32, image::Luma([value]));
    }
}

/// Draw a cross marker at every detected corner.
pub fn draw_corner_markers(image: &mut GrayImage, points: &[Pt2]) {
    for p in points {
        let cx = p.x.round() as i64;
        let cy = p.y.round() as i64;
        for d in -MARKER_ARM..=MARKER_ARM {
            put(image, cx + d, cy, MARKER_VALUE);
            put(image, cx, cy + d, MARKER_VALUE);
        }
    }
}

fn draw_glyph(image: &mut GrayImage, glyph: &[u8; 5], x: i64, y: i64, scale: i64) {
    for (row, bits) in glyph.iter().enumerate() {
        for col in 0..3i64 {
            if bits & (0b100 >> col) == 0 {
                continue;
            }
            for sy in 0..scale {
                for sx in 0..scale {
                    put(
                        image,
                        x + col * scale + sx,
                        y + row as i64 * scale + sy,
                        MARKER_VALUE,
                    );
                }
            }
        }
    }
}

/// Draw a `captured/target` counter in the bottom-right corner.
pub fn draw_progress(image: &mut GrayImage, captured: usize, target: usize) {
    let text = format!("{captured}/{target}");
    let scale = 2i64;
    let advance = 4 * scale;
    let width = advance * text.len() as i64;
    let x0 = i64::from(image.width()) - width - 10;
    let y0 = i64::from(image.height()) - 5 * scale - 10;

    let mut x = x0;
    for ch in text.chars() {
        match ch {
            '/' => draw_glyph(image, &SLASH, x, y0, scale),
            _ => {
                if let Some(d) = ch.to_digit(10) {
                    draw_glyph(image, &DIGITS[d as usize], x, y0, scale);
                }
            }
        }
        x += advance;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_touch_the_corner_pixel() {
        let mut img = GrayImage::new(64, 64);
        draw_corner_markers(&mut img, &[Pt2::new(20.4, 30.6)]);
        assert_eq!(img.get_pixel(20, 31)[0], MARKER_VALUE);
        assert_eq!(img.get_pixel(17, 31)[0], MARKER_VALUE);
        assert_eq!(img.get_pixel(20, 28)[0], MARKER_VALUE);
        // untouched background
        assert_eq!(img.get_pixel(0, 0)[0], 0);
    }

    #[test]
    fn markers_clip_at_image_border() {
        let mut img = GrayImage::new(8, 8);
        draw_corner_markers(&mut img, &[Pt2::new(0.0, 0.0), Pt2::new(7.9, 7.9)]);
        assert_eq!(img.get_pixel(0, 0)[0], MARKER_VALUE);
    }

    #[test]
    fn progress_counter_marks_pixels() {
        let mut img = GrayImage::new(128, 64);
        draw_progress(&mut img, 3, 10);
        let lit = img.pixels().filter(|p| p[0] == MARKER_VALUE).count();
        assert!(lit > 0, "expected progress glyph pixels to be drawn");
    }
}
