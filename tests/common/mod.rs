#![allow(dead_code)]

mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from visinspect for tests
pub use visinspect::{
    Controller, Defect, DefectType, InspectionConfig, InspectionResult, Pipeline, StageConfig,
};
