use image::{DynamicImage, GrayImage};
use serde_json::json;

use crate::config::{self, Params};
use crate::detection::contours::find_external_contours;
use crate::detection::geometry;
use crate::detection::preprocessing::{self, KernelShape};
use crate::detection::{Detection, Detector, DetectorCommon};
use crate::error::InspectionError;
use crate::models::{BoundingBox, Defect, DefectType, Point};

/// How the binary candidate mask is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureMode {
    /// Canny edges, dilated.
    Edge,
    /// Otsu, dark regions as foreground.
    Threshold,
    /// Gaussian adaptive threshold with open/close cleanup.
    Adaptive,
    /// Edge and Adaptive results concatenated. Overlapping regions are reported twice.
    Combined,
}

impl FeatureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureMode::Edge => "edge",
            FeatureMode::Threshold => "threshold",
            FeatureMode::Adaptive => "adaptive",
            FeatureMode::Combined => "combined",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "edge" => Some(FeatureMode::Edge),
            "threshold" => Some(FeatureMode::Threshold),
            "adaptive" => Some(FeatureMode::Adaptive),
            "combined" => Some(FeatureMode::Combined),
            _ => None,
        }
    }
}

/// Reference-free detector working on contour shape features.
#[derive(Debug, Clone)]
pub struct FeatureDetector {
    common: DetectorCommon,
    mode: FeatureMode,
    min_area: f64,
    max_area: f64,
    min_circularity: f64,
    max_circularity: f64,
    canny_low: f64,
    canny_high: f64,
    adaptive_block_size: u32,
    adaptive_c: f64,
}

impl Default for FeatureDetector {
    fn default() -> Self {
        Self::new(FeatureMode::Adaptive, 100.0, 50000.0)
    }
}

impl FeatureDetector {
    pub fn new(mode: FeatureMode, min_area: f64, max_area: f64) -> Self {
        Self {
            common: DetectorCommon::default(),
            mode,
            min_area: min_area.max(0.0),
            max_area: max_area.max(0.0),
            min_circularity: 0.0,
            max_circularity: 1.0,
            canny_low: 50.0,
            canny_high: 150.0,
            adaptive_block_size: 11,
            adaptive_c: 2.0,
        }
    }

    pub fn mode(&self) -> FeatureMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: FeatureMode) {
        self.mode = mode;
    }

    pub fn set_circularity_range(&mut self, min: f64, max: f64) -> crate::error::Result<()> {
        let min = config::in_range("min_circularity", min, 0.0, 1.0)?;
        let max = config::in_range("max_circularity", max, min, 1.0)?;
        self.min_circularity = min;
        self.max_circularity = max;
        Ok(())
    }

    fn edge_mask(&self, gray: &GrayImage) -> GrayImage {
        let blurred = preprocessing::gaussian_blur(gray, 5, 1.5);
        let edges =
            preprocessing::detect_edges(&blurred, self.canny_low as f32, self.canny_high as f32);
        preprocessing::morph_dilate(&edges, 3, KernelShape::Rect)
    }

    fn threshold_mask(&self, gray: &GrayImage) -> GrayImage {
        preprocessing::otsu_threshold(gray, 255.0, true).1
    }

    fn adaptive_mask(&self, gray: &GrayImage) -> GrayImage {
        let blurred = preprocessing::gaussian_blur(gray, 5, 0.0);
        let binary = preprocessing::adaptive_threshold_gaussian(
            &blurred,
            255.0,
            self.adaptive_block_size,
            self.adaptive_c,
            true,
        );
        let opened = preprocessing::morph_open(&binary, 3, KernelShape::Ellipse);
        preprocessing::morph_close(&opened, 3, KernelShape::Ellipse)
    }

    fn classify(circularity: f64, bbox: &BoundingBox, intensity: f64) -> DefectType {
        if circularity > 0.85 {
            DefectType::Stain
        } else if bbox.elongation() > 4.0 {
            DefectType::Scratch
        } else if intensity < 100.0 {
            DefectType::Discoloration
        } else if circularity < 0.4 {
            DefectType::Deformation
        } else {
            DefectType::Stain
        }
    }

    /// `0.6 * fill ratio + 0.4 * circularity`, clamped to `[0, 1]`.
    fn confidence(area: f64, bbox: &BoundingBox, circularity: f64) -> f64 {
        let bbox_area = bbox.area() as f64;
        if bbox_area <= 0.0 {
            return 0.0;
        }
        (0.6 * (area / bbox_area) + 0.4 * circularity).clamp(0.0, 1.0)
    }

    fn extract(&self, contours: Vec<Vec<Point>>, gray: &GrayImage) -> Vec<Defect> {
        let mut defects = Vec::new();
        for contour in contours {
            let area = geometry::contour_area(&contour);
            if area < self.min_area || area > self.max_area {
                continue;
            }
            let circularity = geometry::circularity(&contour);
            if circularity < self.min_circularity || circularity > self.max_circularity {
                continue;
            }
            let mut defect = Defect::from_contour(DefectType::Unknown, contour, 0.0);
            let intensity = preprocessing::mean_in_box(gray, &defect.bbox);
            defect.confidence = Self::confidence(area, &defect.bbox, circularity);
            if defect.confidence < self.common.confidence_threshold() {
                continue;
            }
            defect.defect_type = Self::classify(circularity, &defect.bbox, intensity);
            defect.area = area;
            defect.circularity = circularity;
            defects.push(defect);
        }
        defects
    }

    fn run(&self, gray: &GrayImage, mask: GrayImage) -> (Vec<Defect>, GrayImage) {
        let defects = self.extract(find_external_contours(&mask), gray);
        (defects, mask)
    }
}

impl Detector for FeatureDetector {
    fn analyze(&self, image: &DynamicImage) -> anyhow::Result<Detection> {
        let gray = preprocessing::to_grayscale(image);
        let (defects, mask) = match self.mode {
            FeatureMode::Edge => self.run(&gray, self.edge_mask(&gray)),
            FeatureMode::Threshold => self.run(&gray, self.threshold_mask(&gray)),
            FeatureMode::Adaptive => self.run(&gray, self.adaptive_mask(&gray)),
            FeatureMode::Combined => {
                let (mut defects, edge_mask) = self.run(&gray, self.edge_mask(&gray));
                let (adaptive, adaptive_mask) = self.run(&gray, self.adaptive_mask(&gray));
                defects.extend(adaptive);
                let mut union = edge_mask;
                for (dst, src) in union.pixels_mut().zip(adaptive_mask.pixels()) {
                    dst[0] = dst[0].max(src[0]);
                }
                (defects, union)
            }
        };
        Ok(Detection::new(defects, Some(mask)))
    }

    fn name(&self) -> &str {
        "FeatureDetector"
    }

    fn kind(&self) -> &'static str {
        "feature"
    }

    fn common(&self) -> &DetectorCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut DetectorCommon {
        &mut self.common
    }

    fn algorithm_parameters(&self) -> Params {
        config::params(json!({
            "mode": self.mode.as_str(),
            "min_area": self.min_area,
            "max_area": self.max_area,
            "min_circularity": self.min_circularity,
            "max_circularity": self.max_circularity,
            "canny_low": self.canny_low,
            "canny_high": self.canny_high,
            "adaptive_block_size": self.adaptive_block_size,
            "adaptive_c": self.adaptive_c,
        }))
    }

    fn set_algorithm_parameters(&mut self, params: &Params) {
        let owner = "FeatureDetector";
        config::apply_f64(owner, params, "min_area", 0.0, f64::MAX, &mut self.min_area);
        config::apply_f64(owner, params, "max_area", 0.0, f64::MAX, &mut self.max_area);
        config::apply_f64(owner, params, "min_circularity", 0.0, 1.0, &mut self.min_circularity);
        config::apply_f64(owner, params, "max_circularity", 0.0, 1.0, &mut self.max_circularity);
        config::apply_f64_pair(
            owner,
            params,
            ("canny_low", "canny_high"),
            0.0,
            f64::MAX,
            (&mut self.canny_low, &mut self.canny_high),
        );
        config::apply_u32(
            owner,
            params,
            "adaptive_block_size",
            3,
            true,
            &mut self.adaptive_block_size,
        );
        config::apply_f64(owner, params, "adaptive_c", f64::MIN, f64::MAX, &mut self.adaptive_c);
        if let Some(mode) = config::param_str(params, "mode") {
            let result = mode.and_then(|m| {
                FeatureMode::parse(m)
                    .map(|parsed| self.mode = parsed)
                    .ok_or_else(|| InspectionError::Config {
                        key: "mode".to_string(),
                        reason: format!("unknown mode '{m}'"),
                    })
            });
            config::report_rejected(owner, result);
        }
    }

    fn box_clone(&self) -> Box<dyn Detector> {
        Box::new(self.clone())
    }
}
