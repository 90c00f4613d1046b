use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use image::DynamicImage;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::InspectionConfig;
use crate::detection::{self, Detector, preprocessing};
use crate::error::{InspectionError, Result};
use crate::models::{Defect, InspectionResult, current_timestamp};
use crate::pipeline::Pipeline;
use crate::visualize;

/// OK/NG decision rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JudgmentCriteria {
    pub max_allowed_defects: usize,
    /// Defects scored below this are dropped before judging.
    pub min_defect_confidence: f64,
}

impl Default for JudgmentCriteria {
    fn default() -> Self {
        Self {
            max_allowed_defects: 0,
            min_defect_confidence: 0.5,
        }
    }
}

impl JudgmentCriteria {
    pub fn is_ok(&self, defect_count: usize) -> bool {
        defect_count <= self.max_allowed_defects
    }
}

/// Running totals across all inspections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerStatistics {
    pub total_inspections: u64,
    pub total_defects_found: u64,
    pub total_ng_count: u64,
    pub total_processing_time_ms: f64,
    pub average_processing_time_ms: f64,
    pub average_defects_per_inspection: f64,
    pub ng_rate: f64,
    pub detector_count: usize,
    pub pipeline_filter_count: usize,
}

/// Row of the detector listing served over REST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorInfo {
    pub index: usize,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub enabled: bool,
    pub confidence_threshold: f64,
}

#[derive(Debug, Default)]
struct Counters {
    inspections: AtomicU64,
    defects: AtomicU64,
    ng: AtomicU64,
    micros: AtomicU64,
}

impl Counters {
    fn record(&self, result: &InspectionResult) {
        self.inspections.fetch_add(1, Ordering::Relaxed);
        self.defects.fetch_add(result.defects.len() as u64, Ordering::Relaxed);
        if !result.is_ok {
            self.ng.fetch_add(1, Ordering::Relaxed);
        }
        self.micros
            .fetch_add((result.total_time_ms * 1000.0).round() as u64, Ordering::Relaxed);
    }

    fn reset(&self) {
        self.inspections.store(0, Ordering::Relaxed);
        self.defects.store(0, Ordering::Relaxed);
        self.ng.store(0, Ordering::Relaxed);
        self.micros.store(0, Ordering::Relaxed);
    }
}

/// Everything an inspection reads. Replaced or mutated only under the write lock.
#[derive(Clone, Default)]
struct Engine {
    pipeline: Pipeline,
    detectors: Vec<Box<dyn Detector>>,
    criteria: JudgmentCriteria,
    visualization_enabled: bool,
    capture_debug_masks: bool,
}

impl Engine {
    /// On a stage failure the result still carries the last good image and the time spent.
    fn preprocess(&self, image: &DynamicImage, result: &mut InspectionResult) -> Result<DynamicImage> {
        if self.pipeline.is_empty() {
            return Ok(image.clone());
        }
        let start = Instant::now();
        let output = self.pipeline.process_with_intermediates(image)?;
        result.preprocessing_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        if let Some(failure) = output.failure {
            result.processed_image = Some(output.final_image);
            return Err(failure.into());
        }
        Ok(output.final_image)
    }

    /// Run every enabled detector in order. A failing detector contributes nothing.
    fn detect(&self, image: &DynamicImage, result: &mut InspectionResult) -> Vec<Defect> {
        let start = Instant::now();
        let mut defects = Vec::new();
        for detector in self.detectors.iter().filter(|d| d.is_enabled()) {
            match detector.detect(image) {
                Ok(detection) => {
                    defects.extend(detection.defects);
                    if self.capture_debug_masks {
                        if let Some(mask) = detection.mask {
                            result.debug_masks.push((detector.name().to_string(), mask));
                        }
                    }
                }
                Err(e) => {
                    let err = InspectionError::Detector {
                        detector: detector.name().to_string(),
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "no defects taken from detector");
                }
            }
        }
        result.detection_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        defects
    }

    fn run(&self, image: &DynamicImage, result: &mut InspectionResult) -> Result<()> {
        let processed = self.preprocess(image, result)?;
        let found = self.detect(&processed, result);
        result.processed_image = Some(processed);

        let defects: Vec<Defect> = found
            .into_iter()
            .filter(|d| d.is_valid() && d.confidence >= self.criteria.min_defect_confidence)
            .collect();
        result.is_ok = self.criteria.is_ok(defects.len());

        if self.visualization_enabled {
            result.visualized_image = Some(if defects.is_empty() {
                image.clone()
            } else {
                visualize::render_defects(image, &defects)
            });
        }
        result.defects = defects;
        Ok(())
    }
}

/// Orchestrates preprocessing, detection, judgment and visualization.
///
/// `inspect` takes `&self` and may run on many threads at once: each call holds a
/// shared read lock on the engine, detectors keep no per-call state, and the
/// running totals are atomic. Configuration changes take the write lock and wait
/// for in-flight inspections to finish.
pub struct Controller {
    engine: RwLock<Engine>,
    counters: Counters,
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl Controller {
    /// Empty pipeline, no detectors, default criteria.
    pub fn new() -> Self {
        Self {
            engine: RwLock::new(Engine {
                visualization_enabled: true,
                ..Default::default()
            }),
            counters: Counters::default(),
        }
    }

    /// Build the pipeline and detectors described by `config`, loading its reference
    /// image when one is named.
    pub fn from_config(config: &InspectionConfig) -> Result<Self> {
        let controller = Self::new();
        {
            let mut engine = controller.engine.write();
            engine.pipeline = Pipeline::from_config(&config.pipeline)?;
            engine.detectors = config
                .detectors
                .iter()
                .map(detection::create_detector)
                .collect::<Result<_>>()?;
            engine.visualization_enabled = config.visualization_enabled;
            engine.capture_debug_masks = config.capture_debug_masks;
        }
        controller.set_judgment_criteria(config.max_allowed_defects, config.min_defect_confidence);
        if let Some(path) = &config.reference_image {
            let reference = image::open(path)?;
            info!(path = %path.display(), "reference image loaded");
            controller.set_reference_image(Some(reference));
        }
        info!(
            filters = controller.filter_count(),
            detectors = controller.detector_count(),
            "controller configured"
        );
        Ok(controller)
    }

    /// Independent copy with the same configuration and zeroed statistics.
    pub fn fork(&self) -> Self {
        Self {
            engine: RwLock::new(self.engine.read().clone()),
            counters: Counters::default(),
        }
    }

    pub fn set_pipeline(&self, pipeline: Pipeline) {
        self.engine.write().pipeline = pipeline;
    }

    /// Snapshot of the current pipeline.
    pub fn pipeline(&self) -> Pipeline {
        self.engine.read().pipeline.clone()
    }

    pub fn filter_count(&self) -> usize {
        self.engine.read().pipeline.len()
    }

    pub fn add_detector(&self, detector: Box<dyn Detector>) {
        info!(detector = detector.name(), "adding detector");
        self.engine.write().detectors.push(detector);
    }

    pub fn clear_detectors(&self) {
        self.engine.write().detectors.clear();
    }

    pub fn detector_count(&self) -> usize {
        self.engine.read().detectors.len()
    }

    /// Mutate the detector at `index` in place. Returns `None` when out of range.
    pub fn update_detector<R>(&self, index: usize, f: impl FnOnce(&mut dyn Detector) -> R) -> Option<R> {
        let mut engine = self.engine.write();
        engine.detectors.get_mut(index).map(|d| f(d.as_mut()))
    }

    pub fn detector_infos(&self) -> Vec<DetectorInfo> {
        self.engine
            .read()
            .detectors
            .iter()
            .enumerate()
            .map(|(index, d)| DetectorInfo {
                index,
                name: d.name().to_string(),
                kind: d.kind().to_string(),
                enabled: d.is_enabled(),
                confidence_threshold: d.confidence_threshold(),
            })
            .collect()
    }

    /// Give every detector the same reference image (or clear it).
    pub fn set_reference_image(&self, reference: Option<DynamicImage>) {
        let shared = reference.map(Arc::new);
        let mut engine = self.engine.write();
        for detector in &mut engine.detectors {
            detector.set_reference_image(shared.clone());
        }
    }

    /// A confidence outside `[0, 1]` is ignored; the defect limit always applies.
    pub fn set_judgment_criteria(&self, max_allowed_defects: usize, min_defect_confidence: f64) {
        let mut engine = self.engine.write();
        engine.criteria.max_allowed_defects = max_allowed_defects;
        if (0.0..=1.0).contains(&min_defect_confidence) {
            engine.criteria.min_defect_confidence = min_defect_confidence;
        } else {
            warn!(min_defect_confidence, "ignoring out-of-range confidence");
        }
    }

    pub fn judgment_criteria(&self) -> JudgmentCriteria {
        self.engine.read().criteria
    }

    pub fn set_visualization_enabled(&self, enabled: bool) {
        self.engine.write().visualization_enabled = enabled;
    }

    pub fn visualization_enabled(&self) -> bool {
        self.engine.read().visualization_enabled
    }

    pub fn set_capture_debug_masks(&self, enabled: bool) {
        self.engine.write().capture_debug_masks = enabled;
    }

    /// Inspect one image. Never panics on bad input; failures come back as a result
    /// with `success == false` and a message.
    pub fn inspect(&self, image: &DynamicImage) -> InspectionResult {
        let start = Instant::now();
        if preprocessing::is_empty(image) {
            warn!("inspection requested on an empty image");
            return InspectionResult::failed("Input image is empty");
        }

        let mut result = InspectionResult {
            original_image: Some(image.clone()),
            timestamp: current_timestamp(),
            ..Default::default()
        };
        let outcome = self.engine.read().run(image, &mut result);
        match outcome {
            Ok(()) => result.success = true,
            Err(e) => {
                error!(error = %e, "inspection failed");
                result.success = false;
                result.is_ok = false;
                result.error_message = format!("Preprocessing failed: {e}");
            }
        }
        result.total_time_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.counters.record(&result);

        debug!(
            judgment = result.judgment(),
            defects = result.defects.len(),
            total_ms = result.total_time_ms,
            "inspection complete"
        );
        result
    }

    pub fn inspect_batch(&self, images: &[DynamicImage]) -> Vec<InspectionResult> {
        images.iter().map(|image| self.inspect(image)).collect()
    }

    pub fn statistics(&self) -> ControllerStatistics {
        let inspections = self.counters.inspections.load(Ordering::Relaxed);
        let defects = self.counters.defects.load(Ordering::Relaxed);
        let ng = self.counters.ng.load(Ordering::Relaxed);
        let total_ms = self.counters.micros.load(Ordering::Relaxed) as f64 / 1000.0;
        let per = |value: f64| if inspections > 0 { value / inspections as f64 } else { 0.0 };
        let engine = self.engine.read();
        ControllerStatistics {
            total_inspections: inspections,
            total_defects_found: defects,
            total_ng_count: ng,
            total_processing_time_ms: total_ms,
            average_processing_time_ms: per(total_ms),
            average_defects_per_inspection: per(defects as f64),
            ng_rate: per(ng as f64),
            detector_count: engine.detectors.len(),
            pipeline_filter_count: engine.pipeline.len(),
        }
    }

    pub fn reset_statistics(&self) {
        self.counters.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::FeatureDetector;
    use image::{GrayImage, Luma};

    #[test]
    fn criteria_ignore_out_of_range_confidence() {
        let controller = Controller::new();
        controller.set_judgment_criteria(3, 1.5);
        assert_eq!(
            controller.judgment_criteria(),
            JudgmentCriteria { max_allowed_defects: 3, min_defect_confidence: 0.5 }
        );
    }

    #[test]
    fn empty_image_does_no_work() {
        let controller = Controller::new();
        let result = controller.inspect(&DynamicImage::new_luma8(0, 0));
        assert!(!result.success);
        assert_eq!(result.error_message, "Input image is empty");
        assert_eq!(controller.statistics().total_inspections, 0);
    }

    #[test]
    fn fork_copies_configuration_not_totals() {
        let controller = Controller::new();
        controller.add_detector(Box::new(FeatureDetector::default()));
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(32, 32, Luma([128])));
        controller.inspect(&image);

        let fork = controller.fork();
        assert_eq!(fork.detector_count(), 1);
        assert_eq!(fork.statistics().total_inspections, 0);
        assert_eq!(controller.statistics().total_inspections, 1);
    }

    #[test]
    fn no_detectors_means_ok() {
        let controller = Controller::new();
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(16, 16, Luma([10])));
        let result = controller.inspect(&image);
        assert!(result.success && result.is_ok);
        assert!(result.visualized_image.is_some());
        assert!(result.processed_image.is_some());
    }
}
