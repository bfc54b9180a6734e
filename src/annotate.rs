//! Overlay drawing on RGB frames.
//!
//! Boxes are drawn as 2px outlines. Labels use a built-in 5x7 bitmap font,
//! upper-cased, on a dark backing strip so they stay legible on any scene.

use image::{Rgb, RgbImage};

use crate::detect::DetectionBox;

pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const RED: Rgb<u8> = Rgb([255, 48, 48]);
pub const AMBER: Rgb<u8> = Rgb([255, 191, 0]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BACKING: Rgb<u8> = Rgb([0, 0, 0]);

const GLYPH_ADVANCE: i32 = 6;
const GLYPH_HEIGHT: i32 = 7;

/// Outline plus `label` above the box (inside it when there is no room).
pub fn draw_detection(image: &mut RgbImage, det: &DetectionBox, label: &str, color: Rgb<u8>) {
    draw_rectangle(image, det.x1, det.y1, det.x2, det.y2, color, 2);
    let label_y = if det.y1 >= GLYPH_HEIGHT + 4 {
        det.y1 - GLYPH_HEIGHT - 4
    } else {
        det.y1 + 3
    };
    draw_label(image, det.x1, label_y, label, color);
}

/// Default "class: 0.80" label.
pub fn detection_label(det: &DetectionBox) -> String {
    format!("{}: {:.2}", det.class_name, det.confidence)
}

/// Text strip across the top-left corner.
pub fn draw_banner(image: &mut RgbImage, line: usize, text: &str, color: Rgb<u8>) {
    let y = 6 + line as i32 * (GLYPH_HEIGHT + 6);
    draw_label(image, 6, y, text, color);
}

/// Startup image shown before the first frame arrives.
pub fn placeholder(width: u32, height: u32, message: &str) -> RgbImage {
    let mut image = RgbImage::new(width.max(1), height.max(1));
    let text_width = text_width(message);
    let x = (width as i32 - text_width) / 2;
    let y = (height as i32 - GLYPH_HEIGHT) / 2;
    draw_label(&mut image, x.max(0), y.max(0), message, WHITE);
    image
}

pub fn text_width(text: &str) -> i32 {
    text.chars().count() as i32 * GLYPH_ADVANCE
}

pub fn draw_rectangle(
    image: &mut RgbImage,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: Rgb<u8>,
    thickness: i32,
) {
    for inset in 0..thickness.max(1) {
        outline(image, left + inset, top + inset, right - inset, bottom - inset, color);
    }
}

fn outline(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if width == 0 || height == 0 || right < left || bottom < top {
        return;
    }
    let l = left.clamp(0, width - 1);
    let r = right.clamp(0, width - 1);
    let t = top.clamp(0, height - 1);
    let b = bottom.clamp(0, height - 1);

    for x in l..=r {
        if (0..height).contains(&top) {
            image.put_pixel(x as u32, top as u32, color);
        }
        if (0..height).contains(&bottom) {
            image.put_pixel(x as u32, bottom as u32, color);
        }
    }
    for y in t..=b {
        if (0..width).contains(&left) {
            image.put_pixel(left as u32, y as u32, color);
        }
        if (0..width).contains(&right) {
            image.put_pixel(right as u32, y as u32, color);
        }
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    for y in top.max(0)..=bottom.min(height - 1) {
        for x in left.max(0)..=right.min(width - 1) {
            image.put_pixel(x as u32, y as u32, color);
        }
    }
}

pub fn draw_label(image: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    if text.is_empty() {
        return;
    }
    fill_rect(
        image,
        x - 1,
        y - 1,
        x + text_width(text),
        y + GLYPH_HEIGHT,
        BACKING,
    );
    let width = image.width() as i32;
    let height = image.height() as i32;
    let mut cursor = x;
    for ch in text.chars().flat_map(char::to_uppercase) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                let py = y + row as i32;
                if py < 0 || py >= height {
                    continue;
                }
                for col in 0..5 {
                    if (pattern >> (4 - col)) & 1 == 1 {
                        let px = cursor + col;
                        if px >= 0 && px < width {
                            image.put_pixel(px as u32, py as u32, color);
                        }
                    }
                }
            }
        }
        cursor += GLYPH_ADVANCE;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11100, 0b10010, 0b10001, 0b10001, 0b10001, 0b10010, 0b11100],
        'E' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b10000, 0b01110, 0b00001, 0b00001, 0b11110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11111, 0b00010, 0b00100, 0b00010, 0b00001, 0b10001, 0b01110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        ':' => [0b00000, 0b01100, 0b01100, 0b00000, 0b01100, 0b01100, 0b00000],
        '.' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b01100, 0b01100],
        '-' => [0b00000, 0b00000, 0b00000, 0b11111, 0b00000, 0b00000, 0b00000],
        '_' => [0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b00000, 0b11111],
        '#' => [0b01010, 0b01010, 0b11111, 0b01010, 0b11111, 0b01010, 0b01010],
        '%' => [0b11000, 0b11001, 0b00010, 0b00100, 0b01000, 0b10011, 0b00011],
        '/' => [0b00000, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b00000],
        '(' => [0b00010, 0b00100, 0b01000, 0b01000, 0b01000, 0b00100, 0b00010],
        ')' => [0b01000, 0b00100, 0b00010, 0b00010, 0b00010, 0b00100, 0b01000],
        _ => return None,
    };
    Some(bits)
}
