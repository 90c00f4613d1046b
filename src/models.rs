use std::collections::BTreeMap;
use std::fmt;

use image::{DynamicImage, GrayImage, Rgb};
use serde::{Deserialize, Serialize};

/// Category assigned to a detected region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DefectType {
    Scratch,
    Stain,
    Discoloration,
    Deformation,
    #[serde(other)]
    Unknown,
}

impl DefectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefectType::Scratch => "Scratch",
            DefectType::Stain => "Stain",
            DefectType::Discoloration => "Discoloration",
            DefectType::Deformation => "Deformation",
            DefectType::Unknown => "Unknown",
        }
    }

    /// Parse a type name. Anything unrecognised maps to `Unknown`.
    pub fn parse(name: &str) -> Self {
        match name {
            "Scratch" => DefectType::Scratch,
            "Stain" => DefectType::Stain,
            "Discoloration" => DefectType::Discoloration,
            "Deformation" => DefectType::Deformation,
            _ => DefectType::Unknown,
        }
    }

    /// Overlay colour used by the visualizer.
    pub fn color(&self) -> Rgb<u8> {
        match self {
            DefectType::Scratch => Rgb([255, 0, 0]),
            DefectType::Stain => Rgb([255, 165, 0]),
            DefectType::Discoloration => Rgb([255, 255, 0]),
            DefectType::Deformation => Rgb([255, 0, 255]),
            DefectType::Unknown => Rgb([128, 128, 128]),
        }
    }
}

impl fmt::Display for DefectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Integer pixel coordinate, used for contour points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<imageproc::point::Point<i32>> for Point {
    fn from(p: imageproc::point::Point<i32>) -> Self {
        Self { x: p.x, y: p.y }
    }
}

/// Sub-pixel coordinate, used for defect centres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointF {
    pub x: f32,
    pub y: f32,
}

impl PointF {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned box in image coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Tight box around a point set (inclusive of the extreme pixels).
    pub fn from_points(points: &[Point]) -> Option<Self> {
        let first = points.first()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
        for p in &points[1..] {
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
        }
        Some(Self::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
    }

    pub fn area(&self) -> i64 {
        if self.width <= 0 || self.height <= 0 {
            return 0;
        }
        self.width as i64 * self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn center(&self) -> PointF {
        PointF::new(
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }

    /// Longer side over shorter side, `0` for a degenerate box.
    pub fn elongation(&self) -> f64 {
        let (w, h) = (self.width as f64, self.height as f64);
        if w <= 0.0 || h <= 0.0 {
            return 0.0;
        }
        w.max(h) / w.min(h)
    }

    /// Intersection with `[0, width) x [0, height)`.
    pub fn clip(&self, width: u32, height: u32) -> Self {
        let x0 = self.x.clamp(0, width as i32);
        let y0 = self.y.clamp(0, height as i32);
        let x1 = self.right().clamp(0, width as i32);
        let y1 = self.bottom().clamp(0, height as i32);
        Self::new(x0, y0, (x1 - x0).max(0), (y1 - y0).max(0))
    }
}

/// One located, classified and scored region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Defect {
    #[serde(rename = "type")]
    pub defect_type: DefectType,
    pub bbox: BoundingBox,
    pub confidence: f64,
    pub center: PointF,
    pub area: f64,
    pub circularity: f64,
    #[serde(default)]
    pub contour: Vec<Point>,
}

impl Default for Defect {
    fn default() -> Self {
        Self {
            defect_type: DefectType::Unknown,
            bbox: BoundingBox::default(),
            confidence: 0.0,
            center: PointF::default(),
            area: 0.0,
            circularity: 0.0,
            contour: Vec::new(),
        }
    }
}

impl Defect {
    pub fn new(defect_type: DefectType, bbox: BoundingBox, confidence: f64) -> Self {
        Self {
            defect_type,
            bbox,
            confidence,
            center: bbox.center(),
            ..Default::default()
        }
    }

    /// Box and centre taken from the contour's extent.
    pub fn from_contour(defect_type: DefectType, contour: Vec<Point>, confidence: f64) -> Self {
        let bbox = BoundingBox::from_points(&contour).unwrap_or_default();
        Self {
            contour,
            ..Self::new(defect_type, bbox, confidence)
        }
    }

    /// A defect worth surfacing has a score and a non-degenerate box.
    pub fn is_valid(&self) -> bool {
        self.confidence > 0.0 && self.bbox.area() > 0
    }

    pub fn color(&self) -> Rgb<u8> {
        self.defect_type.color()
    }
}

/// Outcome of one `Controller::inspect` call.
#[derive(Debug, Clone, Default)]
pub struct InspectionResult {
    pub success: bool,
    pub error_message: String,
    pub original_image: Option<DynamicImage>,
    pub processed_image: Option<DynamicImage>,
    pub visualized_image: Option<DynamicImage>,
    pub defects: Vec<Defect>,
    pub is_ok: bool,
    pub preprocessing_time_ms: f64,
    pub detection_time_ms: f64,
    pub total_time_ms: f64,
    pub timestamp: String,
    /// Binary masks produced by each detector during this call, keyed by detector name.
    pub debug_masks: Vec<(String, GrayImage)>,
}

impl InspectionResult {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error_message: message.into(),
            is_ok: false,
            timestamp: current_timestamp(),
            ..Default::default()
        }
    }

    pub fn defect_count(&self) -> usize {
        self.defects.len()
    }

    pub fn defect_counts_by_type(&self) -> BTreeMap<DefectType, usize> {
        let mut counts = BTreeMap::new();
        for defect in &self.defects {
            *counts.entry(defect.defect_type).or_insert(0) += 1;
        }
        counts
    }

    /// "OK" / "NG" / "ERROR"
    pub fn judgment(&self) -> &'static str {
        if !self.success {
            "ERROR"
        } else if self.is_ok {
            "OK"
        } else {
            "NG"
        }
    }

    pub fn summary(&self) -> InspectionSummary {
        InspectionSummary {
            success: self.success,
            error_message: self.error_message.clone(),
            is_ok: self.is_ok,
            defect_count: self.defects.len(),
            defects: self.defects.clone(),
            preprocessing_time: self.preprocessing_time_ms,
            detection_time: self.detection_time_ms,
            total_time: self.total_time_ms,
            timestamp: self.timestamp.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        // A summary holds only plain data, so serialising it cannot fail.
        serde_json::to_value(self.summary()).unwrap_or(serde_json::Value::Null)
    }
}

/// Image-free, serialisable view of an `InspectionResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectionSummary {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub error_message: String,
    #[serde(rename = "isOK", default = "default_is_ok")]
    pub is_ok: bool,
    #[serde(default)]
    pub defect_count: usize,
    #[serde(default)]
    pub defects: Vec<Defect>,
    #[serde(default)]
    pub preprocessing_time: f64,
    #[serde(default)]
    pub detection_time: f64,
    #[serde(default)]
    pub total_time: f64,
    #[serde(default)]
    pub timestamp: String,
}

fn default_is_ok() -> bool {
    true
}

impl From<InspectionSummary> for InspectionResult {
    fn from(summary: InspectionSummary) -> Self {
        Self {
            success: summary.success,
            error_message: summary.error_message,
            is_ok: summary.is_ok,
            defects: summary.defects,
            preprocessing_time_ms: summary.preprocessing_time,
            detection_time_ms: summary.detection_time,
            total_time_ms: summary.total_time,
            timestamp: summary.timestamp,
            ..Default::default()
        }
    }
}

/// Local wall-clock time as `YYYY-MM-DD HH:MM:SS.mmm`.
pub fn current_timestamp() -> String {
    let format = time::macros::format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]"
    );
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    now.format(&format).unwrap_or_default()
}

/// Compact timestamp for file names: `YYYYMMDD_HHMMSS_mmm`.
pub fn file_timestamp() -> String {
    let format = time::macros::format_description!(
        "[year][month][day]_[hour][minute][second]_[subsecond digits:3]"
    );
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    now.format(&format).unwrap_or_default()
}
