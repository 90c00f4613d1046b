use image::{DynamicImage, GrayImage, Luma};
use imageproc::filter::laplacian_filter;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use serde_json::json;

use crate::config::{self, Params};
use crate::detection::contours::{Retrieval, find_contours_in};
use crate::detection::geometry;
use crate::detection::preprocessing;
use crate::detection::{Detection, Detector, DetectorCommon};
use crate::error::InspectionError;
use crate::models::{BoundingBox, Defect, DefectType, Point};

/// Placeholder edge strength used in confidence scoring; not measured from the image.
const EDGE_STRENGTH: f64 = 100.0;
/// Consecutive contour points further apart than this count as a gap.
const GAP_DISTANCE: f64 = 10.0;

/// Operator producing the binary edge map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeMode {
    Canny,
    Sobel,
    Laplacian,
    /// Canny OR Sobel.
    Combined,
}

impl EdgeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeMode::Canny => "canny",
            EdgeMode::Sobel => "sobel",
            EdgeMode::Laplacian => "laplacian",
            EdgeMode::Combined => "combined",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "canny" => Some(EdgeMode::Canny),
            "sobel" => Some(EdgeMode::Sobel),
            "laplacian" => Some(EdgeMode::Laplacian),
            "combined" => Some(EdgeMode::Combined),
            _ => None,
        }
    }
}

/// Geometry of one traced edge.
#[derive(Debug, Clone, PartialEq)]
pub struct EdgeFeatures {
    pub bbox: BoundingBox,
    pub length: f64,
    /// Direction of the least-squares line in `[0, 180)` degrees.
    pub angle: f64,
    pub straightness: f64,
    pub curvature: f64,
    pub on_boundary: bool,
    pub gaps: usize,
    pub strength: f64,
}

/// Detects line-like defects from edge geometry.
#[derive(Debug, Clone)]
pub struct EdgeDetector {
    common: DetectorCommon,
    mode: EdgeMode,
    low_threshold: f64,
    high_threshold: f64,
    sobel_threshold: f64,
    laplacian_threshold: f64,
    min_edge_length: f64,
    max_edge_length: f64,
    min_edge_angle: f64,
    max_edge_angle: f64,
    angle_filter_enabled: bool,
}

impl Default for EdgeDetector {
    fn default() -> Self {
        Self::new(EdgeMode::Canny)
    }
}

impl EdgeDetector {
    pub fn new(mode: EdgeMode) -> Self {
        Self {
            common: DetectorCommon::default(),
            mode,
            low_threshold: 50.0,
            high_threshold: 150.0,
            sobel_threshold: 50.0,
            laplacian_threshold: 30.0,
            min_edge_length: 10.0,
            max_edge_length: 1000.0,
            min_edge_angle: 0.0,
            max_edge_angle: 180.0,
            angle_filter_enabled: false,
        }
    }

    pub fn mode(&self) -> EdgeMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: EdgeMode) {
        self.mode = mode;
    }

    pub fn set_length_range(&mut self, min: f64, max: f64) {
        self.min_edge_length = min;
        self.max_edge_length = max;
    }

    /// Restrict edges to an angle band; enables the angle filter.
    pub fn set_angle_range(&mut self, min: f64, max: f64) {
        self.min_edge_angle = min;
        self.max_edge_angle = max;
        self.angle_filter_enabled = true;
    }

    fn blurred(gray: &GrayImage) -> GrayImage {
        preprocessing::gaussian_blur(gray, 5, 1.0)
    }

    fn canny_edges(&self, gray: &GrayImage) -> GrayImage {
        preprocessing::detect_edges(
            &Self::blurred(gray),
            self.low_threshold as f32,
            self.high_threshold as f32,
        )
    }

    fn sobel_edges(&self, gray: &GrayImage) -> GrayImage {
        let blurred = Self::blurred(gray);
        let gx = horizontal_sobel(&blurred);
        let gy = vertical_sobel(&blurred);
        GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            let ax = (gx.get_pixel(x, y)[0] as i32).unsigned_abs().min(255) as f64;
            let ay = (gy.get_pixel(x, y)[0] as i32).unsigned_abs().min(255) as f64;
            let magnitude = (0.5 * ax + 0.5 * ay).round();
            Luma([if magnitude > self.sobel_threshold { 255 } else { 0 }])
        })
    }

    fn laplacian_edges(&self, gray: &GrayImage) -> GrayImage {
        let response = laplacian_filter(&Self::blurred(gray));
        GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            let magnitude = (response.get_pixel(x, y)[0] as i32).unsigned_abs().min(255) as f64;
            Luma([if magnitude > self.laplacian_threshold { 255 } else { 0 }])
        })
    }

    /// Binary edge map for the current mode.
    pub fn edge_map(&self, gray: &GrayImage) -> GrayImage {
        match self.mode {
            EdgeMode::Canny => self.canny_edges(gray),
            EdgeMode::Sobel => self.sobel_edges(gray),
            EdgeMode::Laplacian => self.laplacian_edges(gray),
            EdgeMode::Combined => {
                let mut edges = self.canny_edges(gray);
                for (dst, src) in edges.pixels_mut().zip(self.sobel_edges(gray).pixels()) {
                    dst[0] |= src[0];
                }
                edges
            }
        }
    }

    /// Features of a traced edge. The border of a thin edge runs along both of its
    /// sides, so the edge length is half the closed border length.
    ///
    /// An edge that itself closes on a loop (a ring or a square outline) is traced on
    /// one side only, so its length comes out at half its real circumference and below
    /// the open arc length of the same points.
    pub fn edge_features(contour: &[Point], width: u32, height: u32) -> EdgeFeatures {
        let bbox = BoundingBox::from_points(contour).unwrap_or_default();
        let length = geometry::arc_length(contour, true) / 2.0;

        let (angle, straightness) = match geometry::fit_line(contour) {
            Some(line) => {
                let mean = contour.iter().map(|&p| line.distance(p)).sum::<f64>()
                    / contour.len() as f64;
                (line.angle_degrees(), (1.0 / (1.0 + mean / 10.0)).clamp(0.0, 1.0))
            }
            None => (0.0, 0.0),
        };

        let curvature = if bbox.width > 0 && bbox.height > 0 {
            (bbox.height as f64 / bbox.width as f64 - 1.0).abs()
        } else {
            0.0
        };

        let (w, h) = (width as i32, height as i32);
        let on_boundary =
            contour.iter().any(|p| p.x <= 1 || p.y <= 1 || p.x >= w - 2 || p.y >= h - 2);

        let gaps = contour
            .windows(2)
            .filter(|pair| {
                let (dx, dy) = ((pair[1].x - pair[0].x) as f64, (pair[1].y - pair[0].y) as f64);
                dx.hypot(dy) > GAP_DISTANCE
            })
            .count();

        EdgeFeatures {
            bbox,
            length,
            angle,
            straightness,
            curvature,
            on_boundary,
            gaps,
            strength: EDGE_STRENGTH,
        }
    }

    fn classify(features: &EdgeFeatures) -> DefectType {
        if features.length > 100.0 && features.straightness > 0.9 {
            DefectType::Scratch
        } else if features.length < 50.0 && features.gaps > 0 {
            DefectType::Scratch
        } else if features.on_boundary
            && (features.straightness < 0.5
                || features.curvature > 0.3
                || features.straightness > 0.8)
        {
            DefectType::Deformation
        } else {
            DefectType::Unknown
        }
    }

    fn confidence(features: &EdgeFeatures) -> f64 {
        let length_score = (features.length / 200.0).min(1.0);
        let strength_score = (features.strength / 150.0).min(1.0);
        (0.5 * length_score + 0.3 * features.straightness + 0.2 * strength_score).clamp(0.0, 1.0)
    }

    fn passes_filters(&self, features: &EdgeFeatures) -> bool {
        if features.length < self.min_edge_length || features.length > self.max_edge_length {
            return false;
        }
        !self.angle_filter_enabled
            || (features.angle >= self.min_edge_angle && features.angle <= self.max_edge_angle)
    }
}

impl Detector for EdgeDetector {
    fn analyze(&self, image: &DynamicImage) -> anyhow::Result<Detection> {
        let gray = preprocessing::to_grayscale(image);
        let edges = self.edge_map(&gray);

        let mut defects = Vec::new();
        for contour in find_contours_in(&edges, Retrieval::AllOuter) {
            if contour.len() < 3 {
                continue;
            }
            let features = Self::edge_features(&contour, gray.width(), gray.height());
            if !self.passes_filters(&features) {
                continue;
            }
            let confidence = Self::confidence(&features);
            if confidence < self.common.confidence_threshold() {
                continue;
            }
            let mut defect = Defect::new(Self::classify(&features), features.bbox, confidence);
            defect.area = features.length;
            defect.contour = contour;
            defects.push(defect);
        }
        Ok(Detection::new(defects, Some(edges)))
    }

    fn name(&self) -> &str {
        "EdgeDetector"
    }

    fn kind(&self) -> &'static str {
        "edge"
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
            "low_threshold": self.low_threshold,
            "high_threshold": self.high_threshold,
            "sobel_threshold": self.sobel_threshold,
            "laplacian_threshold": self.laplacian_threshold,
            "min_edge_length": self.min_edge_length,
            "max_edge_length": self.max_edge_length,
            "min_edge_angle": self.min_edge_angle,
            "max_edge_angle": self.max_edge_angle,
            "angle_filter_enabled": self.angle_filter_enabled,
        }))
    }

    fn set_algorithm_parameters(&mut self, params: &Params) {
        let owner = "EdgeDetector";
        config::apply_f64_pair(
            owner,
            params,
            ("low_threshold", "high_threshold"),
            0.0,
            f64::MAX,
            (&mut self.low_threshold, &mut self.high_threshold),
        );
        config::apply_f64(owner, params, "sobel_threshold", 0.0, 255.0, &mut self.sobel_threshold);
        config::apply_f64(
            owner,
            params,
            "laplacian_threshold",
            0.0,
            255.0,
            &mut self.laplacian_threshold,
        );
        config::apply_f64(owner, params, "min_edge_length", 0.0, f64::MAX, &mut self.min_edge_length);
        config::apply_f64(owner, params, "max_edge_length", 0.0, f64::MAX, &mut self.max_edge_length);
        config::apply_f64(owner, params, "min_edge_angle", 0.0, 180.0, &mut self.min_edge_angle);
        config::apply_f64(owner, params, "max_edge_angle", 0.0, 180.0, &mut self.max_edge_angle);
        config::apply_bool(owner, params, "angle_filter_enabled", &mut self.angle_filter_enabled);
        if let Some(mode) = config::param_str(params, "mode") {
            let result = mode.and_then(|m| {
                EdgeMode::parse(m)
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
