use image::DynamicImage;
use serde_json::json;
use tracing::debug;

use crate::config::{self, Params};
use crate::detection::preprocessing;
use crate::error::{InspectionError, Result};
use crate::pipeline::Filter;

/// Gaussian smoothing with an odd square kernel.
#[derive(Debug, Clone)]
pub struct GaussianFilter {
    kernel_size: u32,
    sigma: f64,
}

impl Default for GaussianFilter {
    fn default() -> Self {
        Self {
            kernel_size: 5,
            sigma: 1.0,
        }
    }
}

impl GaussianFilter {
    /// Invalid arguments fall back to the defaults (5, 1.0).
    pub fn new(kernel_size: u32, sigma: f64) -> Self {
        let mut filter = Self::default();
        config::report_rejected("Gaussian Blur Filter", filter.set_kernel_size(kernel_size));
        config::report_rejected("Gaussian Blur Filter", filter.set_sigma(sigma));
        filter
    }

    pub fn kernel_size(&self) -> u32 {
        self.kernel_size
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Kernel size must be odd and at least 1.
    pub fn set_kernel_size(&mut self, size: u32) -> Result<()> {
        if size == 0 || size % 2 == 0 {
            return Err(InspectionError::Config {
                key: "kernel_size".to_string(),
                reason: format!("{size} is not an odd number >= 1"),
            });
        }
        self.kernel_size = size;
        Ok(())
    }

    /// `0` derives sigma from the kernel size.
    pub fn set_sigma(&mut self, sigma: f64) -> Result<()> {
        if !sigma.is_finite() || sigma < 0.0 {
            return Err(InspectionError::Config {
                key: "sigma".to_string(),
                reason: format!("{sigma} is negative"),
            });
        }
        self.sigma = sigma;
        Ok(())
    }
}

impl Filter for GaussianFilter {
    fn process(&self, image: &DynamicImage) -> anyhow::Result<DynamicImage> {
        debug!(kernel_size = self.kernel_size, sigma = self.sigma, "applying gaussian blur");
        Ok(preprocessing::gaussian_blur_dynamic(
            image,
            self.kernel_size,
            self.sigma as f32,
        ))
    }

    fn name(&self) -> &str {
        "Gaussian Blur Filter"
    }

    fn kind(&self) -> &'static str {
        "gaussian_blur"
    }

    fn parameters(&self) -> Params {
        config::params(json!({
            "kernel_size": self.kernel_size,
            "sigma": self.sigma,
        }))
    }

    fn set_parameters(&mut self, params: &Params) {
        if let Some(size) = config::param_i64(params, "kernel_size") {
            let result = size.and_then(|s| {
                let s = u32::try_from(s).map_err(|_| InspectionError::Config {
                    key: "kernel_size".to_string(),
                    reason: format!("{s} is out of range"),
                })?;
                self.set_kernel_size(s)
            });
            config::report_rejected(self.name(), result);
        }
        if let Some(sigma) = config::param_f64(params, "sigma") {
            let result = sigma.and_then(|s| self.set_sigma(s));
            config::report_rejected("Gaussian Blur Filter", result);
        }
    }

    fn box_clone(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }

    fn description(&self) -> String {
        "Applies Gaussian blur to reduce noise. Kernel size must be odd; sigma controls strength."
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_kernel_keeps_previous_value() {
        let mut filter = GaussianFilter::new(7, 1.5);
        assert!(filter.set_kernel_size(4).is_err());
        assert!(filter.set_kernel_size(0).is_err());
        assert_eq!(filter.kernel_size(), 7);

        filter.set_parameters(&config::params(json!({"kernel_size": 6, "sigma": 3.0})));
        assert_eq!(filter.kernel_size(), 7);
        assert_eq!(filter.sigma(), 3.0);
    }

    #[test]
    fn negative_sigma_rejected() {
        let mut filter = GaussianFilter::default();
        filter.set_parameters(&config::params(json!({"sigma": -1.0})));
        assert_eq!(filter.sigma(), 1.0);
    }

    #[test]
    fn constructor_falls_back_to_defaults() {
        let filter = GaussianFilter::new(2, -3.0);
        assert_eq!((filter.kernel_size(), filter.sigma()), (5, 1.0));
    }

    #[test]
    fn kernel_size_changes_the_output() {
        let stripes = DynamicImage::ImageRgb8(image::RgbImage::from_fn(48, 32, |x, _| {
            image::Rgb(if (x / 3) % 2 == 0 { [230, 200, 20] } else { [15, 40, 210] })
        }));
        let narrow = GaussianFilter::new(3, 2.0).process(&stripes).unwrap();
        let wide = GaussianFilter::new(15, 2.0).process(&stripes).unwrap();
        assert_ne!(narrow.as_bytes(), wide.as_bytes());
        assert_eq!(wide.color(), image::ColorType::Rgb8);
    }

    #[test]
    fn clone_is_independent() {
        let original = GaussianFilter::new(3, 0.5);
        let mut copy = original.box_clone();
        copy.set_parameters(&config::params(json!({"kernel_size": 9})));
        assert_eq!(original.kernel_size(), 3);
        assert_eq!(copy.parameters()["kernel_size"], 9);
    }
}
