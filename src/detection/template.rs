use image::{DynamicImage, GrayImage};
use serde_json::json;
use tracing::debug;

use crate::config::{self, Params};
use crate::detection::contours::find_external_contours;
use crate::detection::geometry;
use crate::detection::preprocessing::{self, KernelShape, ThresholdType};
use crate::detection::{Detection, Detector, DetectorCommon};
use crate::models::{BoundingBox, Defect, DefectType};

/// Reference comparison: differences against a known-good image become defects.
#[derive(Debug, Clone)]
pub struct TemplateMatcher {
    common: DetectorCommon,
    diff_threshold: f64,
    min_area: f64,
    max_area: f64,
    blur_kernel_size: u32,
    morphology_kernel_size: u32,
}

impl Default for TemplateMatcher {
    fn default() -> Self {
        Self::new(30.0, 100.0, 50000.0)
    }
}

impl TemplateMatcher {
    pub fn new(diff_threshold: f64, min_area: f64, max_area: f64) -> Self {
        Self {
            common: DetectorCommon::default(),
            diff_threshold: diff_threshold.clamp(0.0, 255.0),
            min_area: min_area.max(0.0),
            max_area: max_area.max(0.0),
            blur_kernel_size: 5,
            morphology_kernel_size: 3,
        }
    }

    pub fn diff_threshold(&self) -> f64 {
        self.diff_threshold
    }

    /// Test image is used as-is; geometric registration is not performed.
    fn align(&self, image: GrayImage) -> GrayImage {
        image
    }

    fn difference(&self, image: &GrayImage, reference: &GrayImage) -> GrayImage {
        let (image, reference) = if self.blur_kernel_size > 1 {
            (
                preprocessing::gaussian_blur(image, self.blur_kernel_size, 0.0),
                preprocessing::gaussian_blur(reference, self.blur_kernel_size, 0.0),
            )
        } else {
            (image.clone(), reference.clone())
        };
        preprocessing::abs_diff(&image, &reference)
    }

    fn classify(circularity: f64, bbox: &BoundingBox) -> DefectType {
        if circularity > 0.8 {
            DefectType::Stain
        } else if bbox.elongation() > 3.0 {
            DefectType::Scratch
        } else if circularity < 0.5 {
            DefectType::Discoloration
        } else {
            DefectType::Deformation
        }
    }

    fn find_defect_regions(&self, diff: &GrayImage) -> (Vec<Defect>, GrayImage) {
        let mut binary =
            preprocessing::threshold(diff, self.diff_threshold, 255.0, ThresholdType::Binary);
        if self.morphology_kernel_size > 0 {
            let k = self.morphology_kernel_size;
            binary = preprocessing::morph_open(&binary, k, KernelShape::Ellipse);
            binary = preprocessing::morph_close(&binary, k, KernelShape::Ellipse);
        }

        let mut defects = Vec::new();
        for contour in find_external_contours(&binary) {
            let area = geometry::contour_area(&contour);
            if area < self.min_area || area > self.max_area {
                continue;
            }
            let circularity = geometry::circularity(&contour);
            let mut defect = Defect::from_contour(DefectType::Unknown, contour, 0.0);
            defect.confidence = (preprocessing::mean_in_box(diff, &defect.bbox) / 255.0).min(1.0);
            if defect.confidence < self.common.confidence_threshold() {
                continue;
            }
            defect.defect_type = Self::classify(circularity, &defect.bbox);
            defect.area = area;
            defect.circularity = circularity;
            defects.push(defect);
        }
        (defects, binary)
    }
}

impl Detector for TemplateMatcher {
    fn analyze(&self, image: &DynamicImage) -> anyhow::Result<Detection> {
        let Some(reference) = self.common.reference() else {
            debug!("no reference image set, skipping template comparison");
            return Ok(Detection::default());
        };

        let gray = preprocessing::to_grayscale(image);
        let reference = preprocessing::resize_to(
            &preprocessing::to_grayscale(reference),
            gray.width(),
            gray.height(),
        );
        let aligned = self.align(gray);
        let diff = self.difference(&aligned, &reference);
        let (defects, mask) = self.find_defect_regions(&diff);
        Ok(Detection::new(defects, Some(mask)))
    }

    fn name(&self) -> &str {
        "TemplateMatcher"
    }

    fn kind(&self) -> &'static str {
        "template"
    }

    fn common(&self) -> &DetectorCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut DetectorCommon {
        &mut self.common
    }

    fn algorithm_parameters(&self) -> Params {
        config::params(json!({
            "diff_threshold": self.diff_threshold,
            "min_area": self.min_area,
            "max_area": self.max_area,
            "blur_kernel_size": self.blur_kernel_size,
            "morphology_kernel_size": self.morphology_kernel_size,
        }))
    }

    fn set_algorithm_parameters(&mut self, params: &Params) {
        let owner = "TemplateMatcher";
        config::apply_f64(owner, params, "diff_threshold", 0.0, 255.0, &mut self.diff_threshold);
        config::apply_f64(owner, params, "min_area", 0.0, f64::MAX, &mut self.min_area);
        config::apply_f64(owner, params, "max_area", 0.0, f64::MAX, &mut self.max_area);
        config::apply_u32(owner, params, "blur_kernel_size", 3, true, &mut self.blur_kernel_size);
        config::apply_u32(
            owner,
            params,
            "morphology_kernel_size",
            1,
            false,
            &mut self.morphology_kernel_size,
        );
    }

    fn box_clone(&self) -> Box<dyn Detector> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;
    use std::sync::Arc;

    fn plate() -> GrayImage {
        GrayImage::from_pixel(200, 200, Luma([200]))
    }

    #[test]
    fn no_reference_yields_nothing() {
        let matcher = TemplateMatcher::default();
        let detection = matcher.detect(&DynamicImage::ImageLuma8(plate())).unwrap();
        assert!(detection.defects.is_empty());
        assert!(detection.mask.is_none());
    }

    #[test]
    fn identical_images_have_no_defects() {
        let mut matcher = TemplateMatcher::default();
        matcher.set_reference_image(Some(Arc::new(DynamicImage::ImageLuma8(plate()))));
        let detection = matcher.detect(&DynamicImage::ImageLuma8(plate())).unwrap();
        assert!(detection.defects.is_empty());
    }

    #[test]
    fn long_bar_is_a_scratch() {
        let mut matcher = TemplateMatcher::new(25.0, 100.0, 100000.0);
        matcher.set_reference_image(Some(Arc::new(DynamicImage::ImageLuma8(plate()))));
        let mut test = plate();
        draw_filled_rect_mut(&mut test, Rect::at(30, 95).of_size(140, 10), Luma([0]));

        let detection = matcher.detect(&DynamicImage::ImageLuma8(test)).unwrap();
        assert_eq!(detection.defects.len(), 1);
        let defect = &detection.defects[0];
        assert_eq!(defect.defect_type, DefectType::Scratch);
        assert!(defect.confidence > 0.5 && defect.confidence <= 1.0);
        assert!(defect.bbox.width > 130);
    }

    #[test]
    fn reference_is_resized_to_test_image() {
        let mut matcher = TemplateMatcher::default();
        let small = GrayImage::from_pixel(100, 100, Luma([200]));
        matcher.set_reference_image(Some(Arc::new(DynamicImage::ImageLuma8(small))));
        let detection = matcher.detect(&DynamicImage::ImageLuma8(plate())).unwrap();
        assert!(detection.defects.is_empty());
        assert_eq!(detection.mask.map(|m| m.dimensions()), Some((200, 200)));
    }
}
