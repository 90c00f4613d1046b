pub mod blob;
pub mod contours;
pub mod edge;
pub mod feature;
pub mod geometry;
pub mod preprocessing;
pub mod template;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::config::{self, Params, StageConfig};
use crate::error::{InspectionError, Result};
use crate::models::Defect;

pub use blob::BlobDetector;
pub use edge::{EdgeDetector, EdgeMode};
pub use feature::{FeatureDetector, FeatureMode};
pub use template::TemplateMatcher;

/// Output of one detector call.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub defects: Vec<Defect>,
    /// Binary mask the defects were extracted from, when the algorithm has one.
    pub mask: Option<GrayImage>,
}

impl Detection {
    pub fn new(defects: Vec<Defect>, mask: Option<GrayImage>) -> Self {
        Self { defects, mask }
    }
}

/// Cumulative per-detector counters. Safe to update through `&self`.
#[derive(Debug, Default)]
pub struct DetectorStats {
    calls: AtomicU64,
    defects: AtomicU64,
    micros: AtomicU64,
}

impl DetectorStats {
    pub fn record(&self, defects: usize, elapsed: Duration) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.defects.fetch_add(defects as u64, Ordering::Relaxed);
        self.micros
            .fetch_add(elapsed.as_micros().min(u64::MAX as u128) as u64, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.calls.store(0, Ordering::Relaxed);
        self.defects.store(0, Ordering::Relaxed);
        self.micros.store(0, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn defects(&self) -> u64 {
        self.defects.load(Ordering::Relaxed)
    }

    pub fn total_time_ms(&self) -> f64 {
        self.micros.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

/// Snapshot returned by [`Detector::statistics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorStatistics {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub enabled: bool,
    pub confidence_threshold: f64,
    pub has_reference: bool,
    pub total_calls: u64,
    pub total_detections: u64,
    pub total_processing_time_ms: f64,
}

/// State every detector carries regardless of algorithm.
#[derive(Debug)]
pub struct DetectorCommon {
    pub enabled: bool,
    confidence_threshold: f64,
    reference: Option<Arc<DynamicImage>>,
    stats: DetectorStats,
}

impl Default for DetectorCommon {
    fn default() -> Self {
        Self::with_threshold(0.5)
    }
}

impl Clone for DetectorCommon {
    /// Same configuration, fresh statistics.
    fn clone(&self) -> Self {
        Self {
            enabled: self.enabled,
            confidence_threshold: self.confidence_threshold,
            reference: self.reference.clone(),
            stats: DetectorStats::default(),
        }
    }
}

impl DetectorCommon {
    pub fn with_threshold(confidence_threshold: f64) -> Self {
        Self {
            enabled: true,
            confidence_threshold: confidence_threshold.clamp(0.0, 1.0),
            reference: None,
            stats: DetectorStats::default(),
        }
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    pub fn set_confidence_threshold(&mut self, threshold: f64) -> Result<()> {
        self.confidence_threshold = config::in_range("confidence_threshold", threshold, 0.0, 1.0)?;
        Ok(())
    }

    pub fn reference(&self) -> Option<&DynamicImage> {
        self.reference.as_deref()
    }

    pub fn set_reference(&mut self, reference: Option<Arc<DynamicImage>>) {
        self.reference = reference.filter(|r| !preprocessing::is_empty(r));
    }

    pub fn stats(&self) -> &DetectorStats {
        &self.stats
    }

    fn write_parameters(&self, params: &mut Params) {
        params.insert("enabled".to_string(), Value::from(self.enabled));
        params.insert(
            "confidence_threshold".to_string(),
            Value::from(self.confidence_threshold),
        );
    }

    fn read_parameters(&mut self, owner: &str, params: &Params) {
        config::apply_bool(owner, params, "enabled", &mut self.enabled);
        if let Some(value) = config::param_f64(params, "confidence_threshold") {
            let result = value.and_then(|v| self.set_confidence_threshold(v));
            config::report_rejected(owner, result);
        }
    }
}

/// A pluggable defect-finding algorithm.
///
/// `detect` takes `&self`: per-call scratch data lives in the returned [`Detection`],
/// so one instance can serve concurrent callers. `box_clone` yields the same
/// configuration with independent statistics.
pub trait Detector: Send + Sync {
    /// Run the algorithm. Implementations must not touch statistics.
    fn analyze(&self, image: &DynamicImage) -> anyhow::Result<Detection>;

    fn name(&self) -> &str;

    /// Factory key, e.g. `"edge"`
    fn kind(&self) -> &'static str;

    fn common(&self) -> &DetectorCommon;

    fn common_mut(&mut self) -> &mut DetectorCommon;

    /// Algorithm-specific parameters (the common keys are added by [`Detector::parameters`]).
    fn algorithm_parameters(&self) -> Params;

    /// Apply algorithm-specific keys; invalid ones are logged and ignored.
    fn set_algorithm_parameters(&mut self, params: &Params);

    fn box_clone(&self) -> Box<dyn Detector>;

    /// Timed, statistics-recording entry point.
    fn detect(&self, image: &DynamicImage) -> anyhow::Result<Detection> {
        if preprocessing::is_empty(image) {
            warn!(detector = self.name(), "input image is empty");
            return Ok(Detection::default());
        }
        let start = Instant::now();
        let detection = self.analyze(image);
        let found = detection.as_ref().map(|d| d.defects.len()).unwrap_or(0);
        self.common().stats().record(found, start.elapsed());
        debug!(detector = self.name(), defects = found, "detection finished");
        detection
    }

    fn is_enabled(&self) -> bool {
        self.common().enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.common_mut().enabled = enabled;
    }

    fn confidence_threshold(&self) -> f64 {
        self.common().confidence_threshold()
    }

    fn set_confidence_threshold(&mut self, threshold: f64) -> Result<()> {
        self.common_mut().set_confidence_threshold(threshold)
    }

    fn set_reference_image(&mut self, reference: Option<Arc<DynamicImage>>) {
        self.common_mut().set_reference(reference);
    }

    fn has_reference_image(&self) -> bool {
        self.common().reference().is_some()
    }

    fn parameters(&self) -> Params {
        let mut params = self.algorithm_parameters();
        params.insert("type".to_string(), Value::from(self.kind()));
        params.insert("name".to_string(), Value::from(self.name()));
        self.common().write_parameters(&mut params);
        params
    }

    fn set_parameters(&mut self, params: &Params) {
        let owner = self.name().to_string();
        self.common_mut().read_parameters(&owner, params);
        self.set_algorithm_parameters(params);
    }

    fn statistics(&self) -> DetectorStatistics {
        let common = self.common();
        DetectorStatistics {
            name: self.name().to_string(),
            kind: self.kind().to_string(),
            enabled: common.enabled,
            confidence_threshold: common.confidence_threshold(),
            has_reference: common.reference().is_some(),
            total_calls: common.stats().calls(),
            total_detections: common.stats().defects(),
            total_processing_time_ms: common.stats().total_time_ms(),
        }
    }

    fn reset_statistics(&self) {
        self.common().stats().reset();
    }
}

impl Clone for Box<dyn Detector> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Build a configured detector from its descriptor.
pub fn create_detector(config: &StageConfig) -> Result<Box<dyn Detector>> {
    let mut detector: Box<dyn Detector> = match config.kind.as_str() {
        "template_matcher" | "template" => Box::new(TemplateMatcher::default()),
        "feature_detector" | "feature" => Box::new(FeatureDetector::default()),
        "blob_detector" | "blob" => Box::new(BlobDetector::default()),
        "edge_detector" | "edge" => Box::new(EdgeDetector::default()),
        other => {
            return Err(InspectionError::UnknownKind {
                category: "detector",
                kind: other.to_string(),
            });
        }
    };
    detector.set_parameters(&config.params);
    detector.set_enabled(config.enabled);
    Ok(detector)
}

/// Descriptor form of a detector, the inverse of [`create_detector`].
pub fn detector_config(detector: &dyn Detector) -> StageConfig {
    let mut params = detector.algorithm_parameters();
    params.insert(
        "confidence_threshold".to_string(),
        json!(detector.confidence_threshold()),
    );
    StageConfig {
        kind: detector.kind().to_string(),
        enabled: detector.is_enabled(),
        params,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_aliases_and_params() {
        let config = StageConfig::new("edge")
            .with_param("min_edge_length", 40.0)
            .with_param("confidence_threshold", 0.3);
        let detector = create_detector(&config).unwrap();
        assert_eq!(detector.kind(), "edge");
        assert_eq!(detector.confidence_threshold(), 0.3);
        assert_eq!(detector.parameters()["min_edge_length"], 40.0);

        for kind in ["template_matcher", "feature", "blob_detector"] {
            assert!(create_detector(&StageConfig::new(kind)).is_ok());
        }
        let err = create_detector(&StageConfig::new("laser")).err().unwrap();
        assert_eq!(err.to_string(), "Unknown detector type: laser");
    }

    #[test]
    fn out_of_range_confidence_keeps_previous() {
        let mut detector = FeatureDetector::default();
        detector.set_parameters(&config::params(json!({"confidence_threshold": 1.5})));
        assert_eq!(detector.confidence_threshold(), 0.5);
        assert!(detector.set_confidence_threshold(-0.1).is_err());
    }

    #[test]
    fn clone_has_fresh_statistics() {
        let detector = FeatureDetector::default();
        let image = DynamicImage::new_luma8(32, 32);
        detector.detect(&image).unwrap();
        assert_eq!(detector.statistics().total_calls, 1);

        let copy = detector.box_clone();
        assert_eq!(copy.statistics().total_calls, 0);
        assert_eq!(copy.parameters(), detector.parameters());

        detector.reset_statistics();
        assert_eq!(detector.statistics().total_calls, 0);
    }

    #[test]
    fn config_round_trip() {
        let mut detector = EdgeDetector::default();
        detector.set_mode(EdgeMode::Sobel);
        let config = detector_config(&detector);
        let rebuilt = create_detector(&config).unwrap();
        assert_eq!(rebuilt.parameters(), detector.parameters());
    }
}
