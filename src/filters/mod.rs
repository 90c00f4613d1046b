pub mod blur;
pub mod grayscale;
pub mod threshold;

pub use blur::GaussianFilter;
pub use grayscale::GrayscaleFilter;
pub use threshold::{ThresholdFilter, ThresholdMethod};

use crate::config::StageConfig;
use crate::error::{InspectionError, Result};
use crate::pipeline::Filter;

/// Build a configured filter from its descriptor.
pub fn create_filter(config: &StageConfig) -> Result<Box<dyn Filter>> {
    let mut filter: Box<dyn Filter> = match config.kind.as_str() {
        "grayscale" => Box::new(GrayscaleFilter::new()),
        "gaussian_blur" | "gaussian" => Box::new(GaussianFilter::default()),
        "threshold" => Box::new(ThresholdFilter::default()),
        other => {
            return Err(InspectionError::UnknownKind {
                category: "filter",
                kind: other.to_string(),
            });
        }
    };
    filter.set_parameters(&config.params);
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_applies_params() {
        let config = StageConfig::new("gaussian")
            .with_param("kernel_size", 7)
            .with_param("sigma", 2.0);
        let filter = create_filter(&config).unwrap();
        assert_eq!(filter.kind(), "gaussian_blur");
        assert_eq!(filter.parameters()["kernel_size"], 7);
        assert_eq!(filter.parameters()["sigma"], 2.0);
    }

    #[test]
    fn unknown_filter_type() {
        let err = create_filter(&StageConfig::new("sharpen")).err().unwrap();
        assert_eq!(err.to_string(), "Unknown filter type: sharpen");
    }
}
