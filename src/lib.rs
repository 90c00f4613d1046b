pub mod config;
pub mod controller;
pub mod detection;
pub mod error;
pub mod filters;
pub mod io;
pub mod models;
pub mod pipeline;
pub mod server;
pub mod visualize;

pub use config::{InspectionConfig, StageConfig};
pub use controller::{Controller, ControllerStatistics, JudgmentCriteria};
pub use detection::{
    BlobDetector, Detection, Detector, EdgeDetector, EdgeMode, FeatureDetector, FeatureMode,
    TemplateMatcher, create_detector,
};
pub use error::{InspectionError, Result};
pub use filters::create_filter;
pub use models::{BoundingBox, Defect, DefectType, InspectionResult, InspectionSummary};
pub use pipeline::{Filter, Pipeline, PipelineOutput, StageFailure};
