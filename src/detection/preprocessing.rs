use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma};
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::separable_filter_equal;
use imageproc::morphology;

use crate::models::BoundingBox;

/// Fixed-level threshold variants. Each compares `pixel > threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdType {
    Binary,
    BinaryInv,
    Truncate,
    ToZero,
    ToZeroInv,
}

/// Structuring element for morphology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelShape {
    /// Diamond; for a 3x3 kernel this is the usual cross-shaped ellipse.
    Ellipse,
    Rect,
}

pub fn is_empty(img: &DynamicImage) -> bool {
    img.width() == 0 || img.height() == 0
}

/// Convert image to grayscale
pub fn to_grayscale(img: &DynamicImage) -> GrayImage {
    img.to_luma8()
}

/// Sigma implied by a kernel size when none is given.
pub fn sigma_for_kernel(kernel_size: u32) -> f32 {
    0.3 * ((kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

fn effective_sigma(kernel_size: u32, sigma: f32) -> Option<f32> {
    if kernel_size <= 1 {
        return None;
    }
    let sigma = if sigma > 0.0 { sigma } else { sigma_for_kernel(kernel_size) };
    (sigma > 0.0).then_some(sigma)
}

/// Normalised 1-D Gaussian with `kernel_size / 2` taps either side of the centre.
pub fn gaussian_kernel(kernel_size: u32, sigma: f32) -> Vec<f32> {
    let half = (kernel_size / 2) as i32;
    let weights: Vec<f32> = (-half..=half)
        .map(|i| (-((i * i) as f32) / (2.0 * sigma * sigma)).exp())
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.into_iter().map(|w| w / sum).collect()
}

fn blur_kernel(kernel_size: u32, sigma: f32) -> Option<Vec<f32>> {
    effective_sigma(kernel_size, sigma).map(|sigma| gaussian_kernel(kernel_size, sigma))
}

fn blur_luma(img: &GrayImage, kernel: &[f32]) -> GrayImage {
    let (width, height) = img.dimensions();
    let levels: ImageBuffer<Luma<f32>, Vec<f32>> =
        ImageBuffer::from_fn(width, height, |x, y| Luma([img.get_pixel(x, y)[0] as f32]));
    let blurred = separable_filter_equal(&levels, kernel);
    GrayImage::from_fn(width, height, |x, y| {
        Luma([blurred.get_pixel(x, y)[0].round().clamp(0.0, 255.0) as u8])
    })
}

/// Gaussian blur over a `kernel_size` window. `sigma <= 0` derives it from the kernel;
/// a 1x1 kernel is the identity.
pub fn gaussian_blur(img: &GrayImage, kernel_size: u32, sigma: f32) -> GrayImage {
    match blur_kernel(kernel_size, sigma) {
        Some(kernel) => blur_luma(img, &kernel),
        None => img.clone(),
    }
}

/// Channel-preserving blur for the pipeline stage.
pub fn gaussian_blur_dynamic(img: &DynamicImage, kernel_size: u32, sigma: f32) -> DynamicImage {
    let Some(kernel) = blur_kernel(kernel_size, sigma) else {
        return img.clone();
    };
    match img {
        DynamicImage::ImageLuma8(gray) => DynamicImage::ImageLuma8(blur_luma(gray, &kernel)),
        DynamicImage::ImageRgba8(_) => {
            let blurred = separable_filter_equal(&img.to_rgba32f(), &kernel);
            DynamicImage::ImageRgba8(DynamicImage::ImageRgba32F(blurred).to_rgba8())
        }
        other => {
            let blurred = separable_filter_equal(&other.to_rgb32f(), &kernel);
            DynamicImage::ImageRgb8(DynamicImage::ImageRgb32F(blurred).to_rgb8())
        }
    }
}

/// Apply a fixed threshold. Fractional thresholds are floored.
pub fn threshold(img: &GrayImage, thresh: f64, max_value: f64, kind: ThresholdType) -> GrayImage {
    let t = thresh.floor();
    let max = max_value.round().clamp(0.0, 255.0) as u8;
    let truncated = t.clamp(0.0, 255.0) as u8;
    let mut out = img.clone();
    for p in out.pixels_mut() {
        let v = p[0];
        let above = v as f64 > t;
        p[0] = match kind {
            ThresholdType::Binary => if above { max } else { 0 },
            ThresholdType::BinaryInv => if above { 0 } else { max },
            ThresholdType::Truncate => if above { truncated } else { v },
            ThresholdType::ToZero => if above { v } else { 0 },
            ThresholdType::ToZeroInv => if above { 0 } else { v },
        };
    }
    out
}

/// Binarise at the Otsu level. Returns the chosen level and the mask.
pub fn otsu_threshold(img: &GrayImage, max_value: f64, inverse: bool) -> (u8, GrayImage) {
    let level = otsu_level(img);
    let kind = if inverse { ThresholdType::BinaryInv } else { ThresholdType::Binary };
    (level, threshold(img, level as f64, max_value, kind))
}

/// Gaussian-weighted local threshold: a pixel is foreground when it is brighter than
/// its neighbourhood mean minus `c` (or not, for `inverse`).
pub fn adaptive_threshold_gaussian(
    img: &GrayImage,
    max_value: f64,
    block_size: u32,
    c: f64,
    inverse: bool,
) -> GrayImage {
    let mean = gaussian_blur(img, block_size, 0.0);
    let max = max_value.round().clamp(0.0, 255.0) as u8;
    let mut out = GrayImage::new(img.width(), img.height());
    for (x, y, p) in out.enumerate_pixels_mut() {
        let diff = img.get_pixel(x, y)[0] as i32 - mean.get_pixel(x, y)[0] as i32;
        let on = if inverse {
            diff <= -(c.floor() as i32)
        } else {
            diff > -(c.ceil() as i32)
        };
        *p = Luma([if on { max } else { 0 }]);
    }
    out
}

fn norm(shape: KernelShape) -> Norm {
    match shape {
        KernelShape::Ellipse => Norm::L1,
        KernelShape::Rect => Norm::LInf,
    }
}

fn radius(kernel_size: u32) -> u8 {
    (kernel_size / 2).min(u8::MAX as u32) as u8
}

pub fn morph_open(img: &GrayImage, kernel_size: u32, shape: KernelShape) -> GrayImage {
    match radius(kernel_size) {
        0 => img.clone(),
        r => morphology::open(img, norm(shape), r),
    }
}

pub fn morph_close(img: &GrayImage, kernel_size: u32, shape: KernelShape) -> GrayImage {
    match radius(kernel_size) {
        0 => img.clone(),
        r => morphology::close(img, norm(shape), r),
    }
}

pub fn morph_dilate(img: &GrayImage, kernel_size: u32, shape: KernelShape) -> GrayImage {
    match radius(kernel_size) {
        0 => img.clone(),
        r => morphology::dilate(img, norm(shape), r),
    }
}

/// Detect edges using Canny edge detector. The thresholds are taken in ascending order.
pub fn detect_edges(img: &GrayImage, low_threshold: f32, high_threshold: f32) -> GrayImage {
    canny(
        img,
        low_threshold.min(high_threshold),
        low_threshold.max(high_threshold),
    )
}

/// Per-pixel `|a - b|`. Both images must share dimensions.
pub fn abs_diff(a: &GrayImage, b: &GrayImage) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        Luma([a.get_pixel(x, y)[0].abs_diff(b.get_pixel(x, y)[0])])
    })
}

/// Bilinear resize, skipped when the size already matches.
pub fn resize_to(img: &GrayImage, width: u32, height: u32) -> GrayImage {
    if img.dimensions() == (width, height) {
        return img.clone();
    }
    imageops::resize(img, width, height, FilterType::Triangle)
}

/// Mean intensity inside `bbox`, clipped to the image. `0` for an empty region.
pub fn mean_in_box(img: &GrayImage, bbox: &BoundingBox) -> f64 {
    let roi = bbox.clip(img.width(), img.height());
    if roi.is_empty() {
        return 0.0;
    }
    let mut sum = 0u64;
    for y in roi.y..roi.bottom() {
        for x in roi.x..roi.right() {
            sum += img.get_pixel(x as u32, y as u32)[0] as u64;
        }
    }
    sum as f64 / roi.area() as f64
}

pub fn crop(img: &GrayImage, bbox: &BoundingBox) -> GrayImage {
    let roi = bbox.clip(img.width(), img.height());
    imageops::crop_imm(img, roi.x as u32, roi.y as u32, roi.width as u32, roi.height as u32)
        .to_image()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> GrayImage {
        GrayImage::from_fn(4, 1, |x, _| Luma([[10u8, 100, 150, 250][x as usize]]))
    }

    #[test]
    fn threshold_variants() {
        let img = ramp();
        let pick = |kind| threshold(&img, 120.0, 255.0, kind).into_raw();
        assert_eq!(pick(ThresholdType::Binary), vec![0, 0, 255, 255]);
        assert_eq!(pick(ThresholdType::BinaryInv), vec![255, 255, 0, 0]);
        assert_eq!(pick(ThresholdType::Truncate), vec![10, 100, 120, 120]);
        assert_eq!(pick(ThresholdType::ToZero), vec![0, 0, 150, 250]);
        assert_eq!(pick(ThresholdType::ToZeroInv), vec![10, 100, 0, 0]);
    }

    #[test]
    fn kernel_sigma_matches_common_defaults() {
        assert!((sigma_for_kernel(3) - 0.8).abs() < 1e-6);
        assert!((sigma_for_kernel(5) - 1.1).abs() < 1e-6);
        assert!((sigma_for_kernel(11) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn unit_kernel_blur_is_identity() {
        let img = ramp();
        assert_eq!(gaussian_blur(&img, 1, 3.0), img);
    }

    #[test]
    fn kernel_size_bounds_the_blur() {
        let img = GrayImage::from_fn(40, 40, |x, y| Luma([if (x / 2 + y / 2) % 2 == 0 { 240 } else { 10 }]));
        let narrow = gaussian_blur(&img, 3, 2.0);
        let wide = gaussian_blur(&img, 15, 2.0);
        assert_ne!(narrow, wide);
        assert_eq!(gaussian_kernel(15, 2.0).len(), 15);
        assert!((gaussian_kernel(3, 2.0).iter().sum::<f32>() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn blur_keeps_flat_level() {
        let flat = GrayImage::from_pixel(16, 16, Luma([129]));
        assert_eq!(gaussian_blur(&flat, 5, 1.0), flat);
        let rgb = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(8, 8, image::Rgb([7, 129, 250])));
        assert_eq!(gaussian_blur_dynamic(&rgb, 7, 0.0).as_bytes(), rgb.as_bytes());
    }

    #[test]
    fn canny_thresholds_in_any_order() {
        let img = GrayImage::from_fn(32, 32, |x, _| Luma([if x < 16 { 20 } else { 220 }]));
        assert_eq!(detect_edges(&img, 150.0, 50.0), detect_edges(&img, 50.0, 150.0));
    }

    #[test]
    fn adaptive_threshold_on_flat_image_is_empty() {
        let img = GrayImage::from_pixel(32, 32, Luma([128]));
        let mask = adaptive_threshold_gaussian(&img, 255.0, 11, 2.0, true);
        assert!(mask.pixels().all(|p| p[0] == 0));
    }

    #[test]
    fn adaptive_threshold_marks_dark_spot() {
        let mut img = GrayImage::from_pixel(32, 32, Luma([200]));
        img.put_pixel(16, 16, Luma([20]));
        let mask = adaptive_threshold_gaussian(&img, 255.0, 11, 2.0, true);
        assert_eq!(mask.get_pixel(16, 16)[0], 255);
        assert_eq!(mask.get_pixel(2, 2)[0], 0);
    }

    #[test]
    fn mean_in_box_clips_to_image() {
        let img = GrayImage::from_pixel(10, 10, Luma([40]));
        assert_eq!(mean_in_box(&img, &BoundingBox::new(5, 5, 20, 20)), 40.0);
        assert_eq!(mean_in_box(&img, &BoundingBox::new(50, 50, 2, 2)), 0.0);
    }
}
