use image::{DynamicImage, GrayImage, Luma};
use serde_json::json;
use tracing::debug;

use crate::config::{self, Params};
use crate::detection::contours::{Retrieval, find_external_contours, trace_borders};
use crate::detection::geometry;
use crate::detection::preprocessing;
use crate::detection::{Detection, Detector, DetectorCommon};
use crate::models::{BoundingBox, Defect, DefectType, Point, PointF};

/// Multi-threshold blob extraction settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobParams {
    pub min_threshold: f64,
    pub max_threshold: f64,
    pub threshold_step: f64,
    pub filter_by_color: bool,
    /// 0 finds dark blobs, 255 bright ones.
    pub blob_color: u8,
    pub filter_by_area: bool,
    pub min_area: f64,
    pub max_area: f64,
    pub filter_by_circularity: bool,
    pub min_circularity: f64,
    pub max_circularity: f64,
    pub filter_by_convexity: bool,
    pub min_convexity: f64,
    pub max_convexity: f64,
    pub filter_by_inertia: bool,
    pub min_inertia_ratio: f64,
    pub max_inertia_ratio: f64,
    pub min_dist_between_blobs: f64,
    pub min_repeatability: usize,
}

impl Default for BlobParams {
    fn default() -> Self {
        Self {
            min_threshold: 10.0,
            max_threshold: 220.0,
            threshold_step: 10.0,
            filter_by_color: true,
            blob_color: 0,
            filter_by_area: true,
            min_area: 50.0,
            max_area: 50000.0,
            filter_by_circularity: true,
            min_circularity: 0.1,
            max_circularity: 1.0,
            filter_by_convexity: true,
            min_convexity: 0.5,
            max_convexity: 1.0,
            filter_by_inertia: true,
            min_inertia_ratio: 0.1,
            max_inertia_ratio: 1.0,
            min_dist_between_blobs: 10.0,
            min_repeatability: 2,
        }
    }
}

/// A blob that survived enough threshold levels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoint {
    pub center: PointF,
    /// Diameter in pixels.
    pub size: f32,
    /// Share of threshold levels the blob appeared in, scaled to `[0, 100]`.
    pub response: f32,
}

/// Shape features behind a blob's classification.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobFeatures {
    pub area: f64,
    pub circularity: f64,
    pub convexity: f64,
    pub inertia_ratio: f64,
    pub bbox: BoundingBox,
    /// Largest region in the blob's box, in image coordinates.
    pub contour: Vec<Point>,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    x: f64,
    y: f64,
    radius: f64,
}

fn within(value: f64, min: f64, max: f64) -> bool {
    value >= min && value <= max
}

/// Keypoint detector for compact regions, classified by shape.
#[derive(Debug, Clone)]
pub struct BlobDetector {
    common: DetectorCommon,
    params: BlobParams,
}

impl Default for BlobDetector {
    fn default() -> Self {
        Self::new(BlobParams::default())
    }
}

impl BlobDetector {
    pub fn new(params: BlobParams) -> Self {
        Self {
            common: DetectorCommon::default(),
            params,
        }
    }

    pub fn blob_params(&self) -> &BlobParams {
        &self.params
    }

    fn in_blob(&self, value: u8, threshold: f64) -> bool {
        if self.params.blob_color == 0 {
            value as f64 <= threshold
        } else {
            value as f64 > threshold
        }
    }

    fn candidates_at(&self, gray: &GrayImage, threshold: f64) -> Vec<Candidate> {
        let mask = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
            Luma([if self.in_blob(gray.get_pixel(x, y)[0], threshold) { 255 } else { 0 }])
        });
        let p = &self.params;
        let mut found = Vec::new();
        for contour in trace_borders(&mask, Retrieval::AllOuter) {
            let moments = geometry::polygon_moments(&contour);
            if p.filter_by_area && !within(moments.m00, p.min_area, p.max_area) {
                continue;
            }
            if p.filter_by_circularity
                && !within(geometry::circularity(&contour), p.min_circularity, p.max_circularity)
            {
                continue;
            }
            if p.filter_by_inertia
                && !within(moments.inertia_ratio(), p.min_inertia_ratio, p.max_inertia_ratio)
            {
                continue;
            }
            if p.filter_by_convexity {
                let hull_area = geometry::hull_area(&contour);
                if hull_area <= 0.0
                    || !within(moments.m00 / hull_area, p.min_convexity, p.max_convexity)
                {
                    continue;
                }
            }
            let Some((cx, cy)) = moments.centroid() else {
                continue;
            };
            if p.filter_by_color {
                let (px, py) = (cx.round() as i64, cy.round() as i64);
                let inside = px >= 0
                    && py >= 0
                    && (px as u32) < mask.width()
                    && (py as u32) < mask.height()
                    && mask.get_pixel(px as u32, py as u32)[0] > 0;
                if !inside {
                    continue;
                }
            }
            let mut dists: Vec<f64> = contour
                .iter()
                .map(|pt| ((pt.x as f64 - cx).powi(2) + (pt.y as f64 - cy).powi(2)).sqrt())
                .collect();
            dists.sort_by(f64::total_cmp);
            let radius = (dists[(dists.len() - 1) / 2] + dists[dists.len() / 2]) / 2.0;
            found.push(Candidate { x: cx, y: cy, radius });
        }
        found
    }

    /// Threshold the image at every level and keep blobs that repeat.
    pub fn find_keypoints(&self, gray: &GrayImage) -> Vec<KeyPoint> {
        let p = &self.params;
        let step = if p.threshold_step > 0.0 { p.threshold_step } else { 1.0 };
        let mut groups: Vec<Vec<Candidate>> = Vec::new();
        let mut levels = 0usize;
        let mut threshold = p.min_threshold;
        while threshold < p.max_threshold {
            levels += 1;
            for candidate in self.candidates_at(gray, threshold) {
                let existing = groups.iter_mut().find(|group| {
                    let median = group[group.len() / 2];
                    let dist = (candidate.x - median.x).hypot(candidate.y - median.y);
                    dist < p.min_dist_between_blobs
                        || dist < median.radius
                        || dist < candidate.radius
                });
                match existing {
                    Some(group) => {
                        let at = group.partition_point(|c| c.radius < candidate.radius);
                        group.insert(at, candidate);
                    }
                    None => groups.push(vec![candidate]),
                }
            }
            threshold += step;
        }

        groups
            .into_iter()
            .filter(|group| group.len() >= p.min_repeatability)
            .map(|group| {
                let n = group.len() as f64;
                let x = group.iter().map(|c| c.x).sum::<f64>() / n;
                let y = group.iter().map(|c| c.y).sum::<f64>() / n;
                KeyPoint {
                    center: PointF::new(x as f32, y as f32),
                    size: (group[group.len() / 2].radius * 2.0) as f32,
                    response: (100.0 * n / levels.max(1) as f64) as f32,
                }
            })
            .collect()
    }

    fn keypoint_box(kp: &KeyPoint, gray: &GrayImage) -> BoundingBox {
        let radius = kp.size / 2.0;
        let (cols, rows) = (gray.width() as i32, gray.height() as i32);
        let x = ((kp.center.x - radius) as i32).clamp(0, cols - 1);
        let y = ((kp.center.y - radius) as i32).clamp(0, rows - 1);
        let width = (kp.size as i32).min(cols - x);
        let height = (kp.size as i32).min(rows - y);
        BoundingBox::new(x, y, width, height)
    }

    /// Shape features of the region under a keypoint. Falls back to fixed convexity
    /// and inertia values when the region cannot be analysed.
    pub fn blob_features(&self, kp: &KeyPoint, gray: &GrayImage) -> BlobFeatures {
        let size = kp.size as f64;
        let radius = size / 2.0;
        let circle_area = std::f64::consts::PI * radius * radius;
        let mut features = BlobFeatures {
            area: size * size,
            circularity: if circle_area > 0.0 { (size * size / circle_area).min(1.0) } else { 0.0 },
            convexity: 0.8,
            inertia_ratio: 0.5,
            bbox: Self::keypoint_box(kp, gray),
            contour: Vec::new(),
        };
        if features.bbox.is_empty() {
            return features;
        }

        let roi = preprocessing::crop(gray, &features.bbox);
        let level = preprocessing::mean_in_box(gray, &features.bbox);
        let binary = GrayImage::from_fn(roi.width(), roi.height(), |x, y| {
            let v = roi.get_pixel(x, y)[0] as f64;
            let on = if self.params.blob_color == 0 { v <= level } else { v > level };
            Luma([if on { 255 } else { 0 }])
        });
        let Some(largest) = find_external_contours(&binary)
            .into_iter()
            .max_by(|a, b| geometry::contour_area(a).total_cmp(&geometry::contour_area(b)))
        else {
            return features;
        };

        if geometry::arc_length(&largest, true) > 0.0 {
            features.circularity = geometry::circularity(&largest);
        }
        let hull_area = geometry::hull_area(&largest);
        if hull_area > 0.0 {
            features.convexity = geometry::contour_area(&largest) / hull_area;
        }
        let moments = geometry::polygon_moments(&largest);
        if moments.mu20 + moments.mu02 > 0.0 {
            features.inertia_ratio = moments.inertia_ratio();
        }
        let (ox, oy) = (features.bbox.x, features.bbox.y);
        features.contour = largest
            .into_iter()
            .map(|p| Point::new(p.x + ox, p.y + oy))
            .collect();
        features
    }

    fn classify(features: &BlobFeatures) -> DefectType {
        if features.inertia_ratio < 0.3 && features.circularity < 0.5 {
            DefectType::Scratch
        } else if features.circularity > 0.7 && features.area < 1000.0 {
            DefectType::Stain
        } else if features.area > 5000.0 && features.convexity < 0.7 {
            DefectType::Deformation
        } else {
            DefectType::Discoloration
        }
    }

    /// Normalised response, halved when the blob area is outside the configured range.
    fn confidence(&self, kp: &KeyPoint) -> f64 {
        let base = (kp.response as f64 / 100.0).min(1.0);
        let radius = kp.size as f64 / 2.0;
        let area = std::f64::consts::PI * radius * radius;
        let size_score = if within(area, self.params.min_area, self.params.max_area) {
            1.0
        } else {
            0.5
        };
        (base * size_score).clamp(0.0, 1.0)
    }

    fn to_defect(&self, kp: &KeyPoint, gray: &GrayImage) -> Defect {
        let features = self.blob_features(kp, gray);
        Defect {
            defect_type: Self::classify(&features),
            bbox: features.bbox,
            confidence: self.confidence(kp),
            center: kp.center,
            area: features.area,
            circularity: features.circularity,
            contour: features.contour,
        }
    }
}

impl Detector for BlobDetector {
    fn analyze(&self, image: &DynamicImage) -> anyhow::Result<Detection> {
        let gray = preprocessing::to_grayscale(image);
        let keypoints = self.find_keypoints(&gray);
        debug!(blobs = keypoints.len(), "blob keypoints found");

        let defects = keypoints
            .iter()
            .map(|kp| self.to_defect(kp, &gray))
            .filter(|d| d.confidence >= self.common.confidence_threshold())
            .collect();
        Ok(Detection::new(defects, None))
    }

    fn name(&self) -> &str {
        "BlobDetector"
    }

    fn kind(&self) -> &'static str {
        "blob"
    }

    fn common(&self) -> &DetectorCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut DetectorCommon {
        &mut self.common
    }

    fn algorithm_parameters(&self) -> Params {
        let p = &self.params;
        config::params(json!({
            "min_threshold": p.min_threshold,
            "max_threshold": p.max_threshold,
            "threshold_step": p.threshold_step,
            "filter_by_color": p.filter_by_color,
            "blob_color": p.blob_color,
            "filter_by_area": p.filter_by_area,
            "min_area": p.min_area,
            "max_area": p.max_area,
            "filter_by_circularity": p.filter_by_circularity,
            "min_circularity": p.min_circularity,
            "max_circularity": p.max_circularity,
            "filter_by_convexity": p.filter_by_convexity,
            "min_convexity": p.min_convexity,
            "max_convexity": p.max_convexity,
            "filter_by_inertia": p.filter_by_inertia,
            "min_inertia_ratio": p.min_inertia_ratio,
            "max_inertia_ratio": p.max_inertia_ratio,
            "min_distance_between_blobs": p.min_dist_between_blobs,
            "min_repeatability": p.min_repeatability,
        }))
    }

    fn set_algorithm_parameters(&mut self, params: &Params) {
        let owner = "BlobDetector";
        let p = &mut self.params;
        config::apply_f64(owner, params, "min_threshold", 0.0, 255.0, &mut p.min_threshold);
        config::apply_f64(owner, params, "max_threshold", 0.0, 255.0, &mut p.max_threshold);
        config::apply_f64(owner, params, "threshold_step", 1.0, 255.0, &mut p.threshold_step);
        config::apply_bool(owner, params, "filter_by_color", &mut p.filter_by_color);
        if params.contains_key("blob_color") {
            let mut color = p.blob_color as u32;
            config::apply_u32(owner, params, "blob_color", 0, false, &mut color);
            if color <= 255 {
                p.blob_color = color as u8;
                p.filter_by_color = true;
            }
        }

        let ranges: [(&str, &str, &mut bool, &mut f64, &mut f64, f64); 4] = [
            ("min_area", "max_area", &mut p.filter_by_area, &mut p.min_area, &mut p.max_area, f64::MAX),
            (
                "min_circularity",
                "max_circularity",
                &mut p.filter_by_circularity,
                &mut p.min_circularity,
                &mut p.max_circularity,
                1.0,
            ),
            (
                "min_convexity",
                "max_convexity",
                &mut p.filter_by_convexity,
                &mut p.min_convexity,
                &mut p.max_convexity,
                1.0,
            ),
            (
                "min_inertia_ratio",
                "max_inertia_ratio",
                &mut p.filter_by_inertia,
                &mut p.min_inertia_ratio,
                &mut p.max_inertia_ratio,
                1.0,
            ),
        ];
        for (min_key, max_key, flag, min, max, limit) in ranges {
            if params.contains_key(min_key) || params.contains_key(max_key) {
                *flag = true;
            }
            config::apply_f64(owner, params, min_key, 0.0, limit, min);
            config::apply_f64(owner, params, max_key, 0.0, limit, max);
        }
        config::apply_bool(owner, params, "filter_by_area", &mut p.filter_by_area);
        config::apply_bool(owner, params, "filter_by_circularity", &mut p.filter_by_circularity);
        config::apply_bool(owner, params, "filter_by_convexity", &mut p.filter_by_convexity);
        config::apply_bool(owner, params, "filter_by_inertia", &mut p.filter_by_inertia);
        config::apply_f64(
            owner,
            params,
            "min_distance_between_blobs",
            0.0,
            f64::MAX,
            &mut p.min_dist_between_blobs,
        );
        let mut repeatability = p.min_repeatability as u32;
        config::apply_u32(owner, params, "min_repeatability", 1, false, &mut repeatability);
        p.min_repeatability = repeatability as usize;
    }

    fn box_clone(&self) -> Box<dyn Detector> {
        Box::new(self.clone())
    }
}
