//! Defect overlay rendering.

use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
};
use imageproc::rect::Rect;

use crate::models::Defect;

const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const BLACK: Rgb<u8> = Rgb([0, 0, 0]);

/// Pixel scale of the 3x5 glyphs.
const LABEL_SCALE: u32 = 2;
const BANNER_SCALE: u32 = 3;

/// Rows of a 3x5 glyph, three low bits per row, most significant bit leftmost.
fn glyph(c: char) -> [u8; 5] {
    match c.to_ascii_uppercase() {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b010],
        'K' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b110, 0b101, 0b101, 0b101, 0b101],
        'O' => [0b010, 0b101, 0b101, 0b101, 0b010],
        'P' => [0b110, 0b101, 0b110, 0b100, 0b100],
        'Q' => [0b010, 0b101, 0b101, 0b110, 0b011],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '%' => [0b101, 0b001, 0b010, 0b100, 0b101],
        '#' => [0b101, 0b111, 0b101, 0b111, 0b101],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        ' ' => [0; 5],
        _ => [0b111, 0b001, 0b010, 0b000, 0b010],
    }
}

/// Width and height in pixels of `text` drawn at `scale`.
pub fn text_size(text: &str, scale: u32) -> (u32, u32) {
    let chars = text.chars().count() as u32;
    if chars == 0 {
        return (0, 0);
    }
    (chars * 4 * scale - scale, 5 * scale)
}

/// Draw `text` with its top-left corner at `(x, y)`. Pixels outside the image are skipped.
pub fn draw_text(img: &mut RgbImage, text: &str, x: i32, y: i32, scale: u32, color: Rgb<u8>) {
    let s = scale as i32;
    for (i, c) in text.chars().enumerate() {
        let origin_x = x + i as i32 * 4 * s;
        for (row, bits) in glyph(c).iter().enumerate() {
            for col in 0..3 {
                if bits & (0b100 >> col) == 0 {
                    continue;
                }
                fill(img, origin_x + col * s, y + row as i32 * s, scale, scale, color);
            }
        }
    }
}

/// Filled rectangle clipped to the image.
fn fill(img: &mut RgbImage, x: i32, y: i32, width: u32, height: u32, color: Rgb<u8>) {
    let (w, h) = (img.width() as i32, img.height() as i32);
    let (x0, y0) = (x.max(0), y.max(0));
    let x1 = (x + width as i32).min(w);
    let y1 = (y + height as i32).min(h);
    if x1 <= x0 || y1 <= y0 {
        return;
    }
    let rect = Rect::at(x0, y0).of_size((x1 - x0) as u32, (y1 - y0) as u32);
    draw_filled_rect_mut(img, rect, color);
}

fn outline(img: &mut RgbImage, x: i32, y: i32, width: u32, height: u32, color: Rgb<u8>) {
    for inset in 0..2 {
        let (w, h) = (width as i32 - 2 * inset, height as i32 - 2 * inset);
        if w <= 0 || h <= 0 {
            break;
        }
        draw_hollow_rect_mut(img, Rect::at(x + inset, y + inset).of_size(w as u32, h as u32), color);
    }
}

fn draw_contour(img: &mut RgbImage, defect: &Defect, color: Rgb<u8>) {
    let points = &defect.contour;
    if points.len() < 2 {
        return;
    }
    for (i, a) in points.iter().enumerate() {
        let b = points[(i + 1) % points.len()];
        for offset in [0.0, 1.0] {
            draw_line_segment_mut(
                img,
                (a.x as f32 + offset, a.y as f32),
                (b.x as f32 + offset, b.y as f32),
                color,
            );
        }
    }
}

fn draw_label(img: &mut RgbImage, defect: &Defect, index: usize, color: Rgb<u8>) {
    let label = format!("{} {:.2}%", defect.defect_type, defect.confidence * 100.0);
    let (text_w, text_h) = text_size(&label, LABEL_SCALE);
    let bbox = defect.bbox;

    let mut baseline = bbox.y - 5;
    if baseline < text_h as i32 + 5 {
        baseline = bbox.bottom() + text_h as i32 + 5;
    }
    fill(img, bbox.x, baseline - text_h as i32 - 3, text_w + 6, text_h + 6, color);
    draw_text(img, &label, bbox.x + 3, baseline - text_h as i32, LABEL_SCALE, WHITE);

    let marker = format!("#{}", index + 1);
    let (marker_w, marker_h) = text_size(&marker, LABEL_SCALE);
    draw_text(
        img,
        &marker,
        defect.center.x as i32 - marker_w as i32 / 2,
        defect.center.y as i32 - marker_h as i32 / 2,
        LABEL_SCALE,
        WHITE,
    );
}

/// Draw every defect's contour, box, centre, label and index on a colour copy of
/// `image`, plus a defect-count banner in the top-left corner.
pub fn render_defects(image: &DynamicImage, defects: &[Defect]) -> DynamicImage {
    let mut canvas = image.to_rgb8();
    if canvas.width() == 0 || canvas.height() == 0 {
        return DynamicImage::ImageRgb8(canvas);
    }

    for (i, defect) in defects.iter().enumerate() {
        let color = defect.color();
        draw_contour(&mut canvas, defect, color);
        if defect.bbox.area() > 0 {
            let b = defect.bbox;
            outline(&mut canvas, b.x, b.y, b.width as u32, b.height as u32, color);
            draw_filled_circle_mut(
                &mut canvas,
                (defect.center.x as i32, defect.center.y as i32),
                3,
                color,
            );
        }
        draw_label(&mut canvas, defect, i, color);
    }

    if !defects.is_empty() {
        let banner = format!("Defects: {}", defects.len());
        let (w, h) = text_size(&banner, BANNER_SCALE);
        fill(&mut canvas, 10, 10, w + 20, h + 20, BLACK);
        outline(&mut canvas, 10, 10, w + 20, h + 20, WHITE);
        draw_text(&mut canvas, &banner, 20, 20, BANNER_SCALE, WHITE);
    }
    DynamicImage::ImageRgb8(canvas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BoundingBox, DefectType};
    use image::{GrayImage, Luma};

    fn stain() -> Defect {
        Defect::new(DefectType::Stain, BoundingBox::new(60, 60, 30, 30), 0.87)
    }

    #[test]
    fn grayscale_input_becomes_color() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(120, 120, Luma([100])));
        let out = render_defects(&gray, &[stain()]);
        assert!(matches!(out, DynamicImage::ImageRgb8(_)));
        assert_eq!((out.width(), out.height()), (120, 120));
    }

    #[test]
    fn box_drawn_in_type_color() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(120, 120, Luma([100])));
        let out = render_defects(&gray, &[stain()]).to_rgb8();
        assert_eq!(*out.get_pixel(60, 75), DefectType::Stain.color());
        assert_eq!(*out.get_pixel(89, 75), DefectType::Stain.color());
    }

    #[test]
    fn no_defects_leaves_pixels_untouched() {
        let gray = DynamicImage::ImageLuma8(GrayImage::from_pixel(40, 40, Luma([77])));
        let out = render_defects(&gray, &[]).to_rgb8();
        assert!(out.pixels().all(|p| *p == Rgb([77, 77, 77])));
    }

    #[test]
    fn label_near_top_edge_is_clipped_not_panicking() {
        let img = DynamicImage::ImageRgb8(RgbImage::new(50, 20));
        let defect = Defect::new(DefectType::Scratch, BoundingBox::new(40, 2, 30, 30), 1.0);
        let out = render_defects(&img, &[defect]);
        assert_eq!((out.width(), out.height()), (50, 20));
    }

    #[test]
    fn text_metrics() {
        assert_eq!(text_size("", 2), (0, 0));
        assert_eq!(text_size("#1", 1), (7, 5));
    }
}
