use std::time::Instant;

use image::DynamicImage;
use tracing::{debug, error, info, warn};

use crate::config::{Params, StageConfig};
use crate::detection::preprocessing;
use crate::error::{InspectionError, Result};
use crate::filters;

/// Trait that all preprocessing filters must implement
pub trait Filter: Send + Sync {
    /// Transform an image into a new image. The input is never modified.
    fn process(&self, image: &DynamicImage) -> anyhow::Result<DynamicImage>;

    /// Human-readable name (used in logs and error messages)
    fn name(&self) -> &str;

    /// Factory key, e.g. `"gaussian_blur"`
    fn kind(&self) -> &'static str;

    fn parameters(&self) -> Params;

    /// Apply every valid key; rejected keys are logged and leave the old value.
    fn set_parameters(&mut self, params: &Params);

    /// Independent copy with the same configuration.
    fn box_clone(&self) -> Box<dyn Filter>;

    fn description(&self) -> String {
        "No description available".to_string()
    }
}

impl Clone for Box<dyn Filter> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

#[derive(Clone)]
struct Stage {
    filter: Box<dyn Filter>,
    enabled: bool,
}

/// The stage that stopped a pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct StageFailure {
    pub stage: String,
    pub reason: String,
}

impl From<StageFailure> for InspectionError {
    fn from(failure: StageFailure) -> Self {
        InspectionError::Stage {
            stage: failure.stage,
            reason: failure.reason,
        }
    }
}

/// Per-stage audit trail of one pipeline run.
///
/// When a stage fails the run stops there: `final_image` is the last good image and
/// the lists cover only the stages that completed.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub final_image: DynamicImage,
    /// The input followed by the output of every applied stage.
    pub intermediate_images: Vec<DynamicImage>,
    pub filter_names: Vec<String>,
    pub processing_times_ms: Vec<f64>,
    pub total_time_ms: f64,
    pub failure: Option<StageFailure>,
}

impl PipelineOutput {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

/// Ordered chain of filters applied before detection
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Create a new empty pipeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Pipeline::add_filter`]
    pub fn with_filter(mut self, filter: Box<dyn Filter>) -> Self {
        self.add_filter(filter);
        self
    }

    pub fn add_filter(&mut self, filter: Box<dyn Filter>) {
        info!(filter = filter.name(), "adding filter to pipeline");
        self.stages.push(Stage { filter, enabled: true });
    }

    /// Remove the filter at `index`. Returns false when out of range.
    pub fn remove_filter(&mut self, index: usize) -> bool {
        if index >= self.stages.len() {
            warn!(index, "filter index out of range");
            return false;
        }
        let stage = self.stages.remove(index);
        info!(filter = stage.filter.name(), "removed filter from pipeline");
        true
    }

    pub fn clear(&mut self) {
        info!(count = self.stages.len(), "clearing pipeline");
        self.stages.clear();
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn filter(&self, index: usize) -> Option<&dyn Filter> {
        self.stages.get(index).map(|s| s.filter.as_ref())
    }

    pub fn filter_mut(&mut self, index: usize) -> Option<&mut Box<dyn Filter>> {
        self.stages.get_mut(index).map(|s| &mut s.filter)
    }

    pub fn is_enabled(&self, index: usize) -> Option<bool> {
        self.stages.get(index).map(|s| s.enabled)
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> bool {
        match self.stages.get_mut(index) {
            Some(stage) => {
                stage.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn filter_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.filter.name().to_string()).collect()
    }

    fn apply(stage: &Stage, image: &DynamicImage) -> Result<DynamicImage> {
        let name = stage.filter.name();
        let output = stage.filter.process(image).map_err(|e| {
            error!(filter = name, error = %e, "filter failed");
            InspectionError::Stage {
                stage: name.to_string(),
                reason: e.to_string(),
            }
        })?;
        if preprocessing::is_empty(&output) {
            error!(filter = name, "filter produced empty output");
            return Err(InspectionError::Stage {
                stage: name.to_string(),
                reason: "produced empty output".to_string(),
            });
        }
        Ok(output)
    }

    /// Run every enabled filter in order.
    pub fn process(&self, input: &DynamicImage) -> Result<DynamicImage> {
        if preprocessing::is_empty(input) {
            return Err(InspectionError::Input("Input image is empty".to_string()));
        }
        if self.stages.is_empty() {
            debug!("pipeline is empty, returning input unchanged");
            return Ok(input.clone());
        }

        let mut current = input.clone();
        for stage in &self.stages {
            if !stage.enabled {
                debug!(filter = stage.filter.name(), "skipping disabled filter");
                continue;
            }
            current = Self::apply(stage, &current)?;
        }
        Ok(current)
    }

    /// Like [`Pipeline::process`], also keeping every stage's output and timing.
    /// A failing stage is reported in [`PipelineOutput::failure`] rather than as an error.
    pub fn process_with_intermediates(&self, input: &DynamicImage) -> Result<PipelineOutput> {
        if preprocessing::is_empty(input) {
            return Err(InspectionError::Input("Input image is empty".to_string()));
        }

        let start_total = Instant::now();
        let mut output = PipelineOutput {
            final_image: input.clone(),
            intermediate_images: vec![input.clone()],
            filter_names: Vec::new(),
            processing_times_ms: Vec::new(),
            total_time_ms: 0.0,
            failure: None,
        };

        for stage in self.stages.iter().filter(|s| s.enabled) {
            let start = Instant::now();
            let image = match Self::apply(stage, &output.final_image) {
                Ok(image) => image,
                Err(e) => {
                    let reason = match e {
                        InspectionError::Stage { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    output.failure = Some(StageFailure {
                        stage: stage.filter.name().to_string(),
                        reason,
                    });
                    break;
                }
            };
            let elapsed = start.elapsed().as_secs_f64() * 1000.0;
            debug!(filter = stage.filter.name(), elapsed_ms = elapsed, "filter applied");

            output.intermediate_images.push(image.clone());
            output.filter_names.push(stage.filter.name().to_string());
            output.processing_times_ms.push(elapsed);
            output.final_image = image;
        }

        output.total_time_ms = start_total.elapsed().as_secs_f64() * 1000.0;
        match &output.failure {
            Some(failure) => warn!(
                filter = %failure.stage,
                completed = output.filter_names.len(),
                "pipeline stopped early"
            ),
            None => info!(
                filters = output.filter_names.len(),
                total_ms = output.total_time_ms,
                "pipeline processing complete"
            ),
        }
        Ok(output)
    }

    /// Build a pipeline from ordered `{type, enabled, params}` descriptors.
    pub fn from_config(configs: &[StageConfig]) -> Result<Self> {
        let mut pipeline = Self::new();
        for config in configs {
            let filter = filters::create_filter(config)?;
            pipeline.add_filter(filter);
            pipeline.set_enabled(pipeline.len() - 1, config.enabled);
        }
        Ok(pipeline)
    }

    pub fn to_config(&self) -> Vec<StageConfig> {
        self.stages
            .iter()
            .map(|s| StageConfig {
                kind: s.filter.kind().to_string(),
                enabled: s.enabled,
                params: s.filter.parameters(),
            })
            .collect()
    }
}
