use image::DynamicImage;
use serde_json::json;

use crate::config::{self, Params};
use crate::detection::preprocessing::{self, ThresholdType};
use crate::error::{InspectionError, Result};
use crate::pipeline::Filter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdMethod {
    Binary,
    BinaryInv,
    Truncate,
    ToZero,
    ToZeroInv,
    /// Level chosen automatically from the histogram.
    Otsu,
    /// Gaussian-weighted local mean minus a constant.
    Adaptive,
}

impl ThresholdMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdMethod::Binary => "binary",
            ThresholdMethod::BinaryInv => "binary_inv",
            ThresholdMethod::Truncate => "truncate",
            ThresholdMethod::ToZero => "tozero",
            ThresholdMethod::ToZeroInv => "tozero_inv",
            ThresholdMethod::Otsu => "otsu",
            ThresholdMethod::Adaptive => "adaptive",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "binary" => ThresholdMethod::Binary,
            "binary_inv" => ThresholdMethod::BinaryInv,
            "truncate" => ThresholdMethod::Truncate,
            "tozero" => ThresholdMethod::ToZero,
            "tozero_inv" => ThresholdMethod::ToZeroInv,
            "otsu" => ThresholdMethod::Otsu,
            "adaptive" => ThresholdMethod::Adaptive,
            _ => return None,
        })
    }
}

/// Binarisation stage. Color input is converted to grayscale first.
#[derive(Debug, Clone)]
pub struct ThresholdFilter {
    threshold: f64,
    method: ThresholdMethod,
    max_value: f64,
    adaptive_block_size: u32,
    adaptive_c: f64,
}

impl Default for ThresholdFilter {
    fn default() -> Self {
        Self::new(128.0, ThresholdMethod::Binary)
    }
}

impl ThresholdFilter {
    pub fn new(threshold: f64, method: ThresholdMethod) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 255.0),
            method,
            max_value: 255.0,
            adaptive_block_size: 11,
            adaptive_c: 2.0,
        }
    }

    pub fn method(&self) -> ThresholdMethod {
        self.method
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn set_method(&mut self, method: ThresholdMethod) {
        self.method = method;
    }

    /// Block size must be odd and at least 3.
    pub fn set_adaptive_block_size(&mut self, size: i64) -> Result<()> {
        if size < 3 || size % 2 == 0 {
            return Err(InspectionError::Config {
                key: "adaptive_block_size".to_string(),
                reason: format!("{size} is not an odd number >= 3"),
            });
        }
        self.adaptive_block_size = size as u32;
        Ok(())
    }
}

impl Filter for ThresholdFilter {
    fn process(&self, image: &DynamicImage) -> anyhow::Result<DynamicImage> {
        let gray = preprocessing::to_grayscale(image);
        let fixed = |kind| preprocessing::threshold(&gray, self.threshold, self.max_value, kind);
        let output = match self.method {
            ThresholdMethod::Binary => fixed(ThresholdType::Binary),
            ThresholdMethod::BinaryInv => fixed(ThresholdType::BinaryInv),
            ThresholdMethod::Truncate => fixed(ThresholdType::Truncate),
            ThresholdMethod::ToZero => fixed(ThresholdType::ToZero),
            ThresholdMethod::ToZeroInv => fixed(ThresholdType::ToZeroInv),
            ThresholdMethod::Otsu => preprocessing::otsu_threshold(&gray, self.max_value, false).1,
            ThresholdMethod::Adaptive => preprocessing::adaptive_threshold_gaussian(
                &gray,
                self.max_value,
                self.adaptive_block_size,
                self.adaptive_c,
                false,
            ),
        };
        Ok(DynamicImage::ImageLuma8(output))
    }

    fn name(&self) -> &str {
        "Threshold Filter"
    }

    fn kind(&self) -> &'static str {
        "threshold"
    }

    fn parameters(&self) -> Params {
        config::params(json!({
            "threshold": self.threshold,
            "max_value": self.max_value,
            "adaptive_block_size": self.adaptive_block_size,
            "adaptive_c": self.adaptive_c,
            "method": self.method.as_str(),
        }))
    }

    fn set_parameters(&mut self, params: &Params) {
        let owner = "Threshold Filter";
        config::apply_f64(owner, params, "threshold", 0.0, 255.0, &mut self.threshold);
        config::apply_f64(owner, params, "max_value", 0.0, 255.0, &mut self.max_value);
        config::apply_f64(owner, params, "adaptive_c", f64::MIN, f64::MAX, &mut self.adaptive_c);
        if let Some(size) = config::param_i64(params, "adaptive_block_size") {
            let result = size.and_then(|s| self.set_adaptive_block_size(s));
            config::report_rejected(owner, result);
        }
        if let Some(method) = config::param_str(params, "method") {
            let result = method.and_then(|m| {
                ThresholdMethod::parse(m)
                    .map(|parsed| self.method = parsed)
                    .ok_or_else(|| InspectionError::Config {
                        key: "method".to_string(),
                        reason: format!("unknown method '{m}'"),
                    })
            });
            config::report_rejected(owner, result);
        }
    }

    fn box_clone(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }

    fn description(&self) -> String {
        format!("Thresholds the grayscale image using the '{}' method.", self.method.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn split_image() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(10, 2, |x, _| {
            Luma([if x < 5 { 40 } else { 210 }])
        }))
    }

    #[test]
    fn otsu_separates_two_levels() {
        let filter = ThresholdFilter::new(0.0, ThresholdMethod::Otsu);
        let out = filter.process(&split_image()).unwrap().to_luma8();
        assert_eq!(out.get_pixel(0, 0)[0], 0);
        assert_eq!(out.get_pixel(9, 1)[0], 255);
    }

    #[test]
    fn method_and_block_size_from_params() {
        let mut filter = ThresholdFilter::default();
        filter.set_parameters(&config::params(json!({
            "method": "binary_inv",
            "threshold": 100.0,
            "adaptive_block_size": 4,
        })));
        assert_eq!(filter.method(), ThresholdMethod::BinaryInv);
        assert_eq!(filter.parameters()["adaptive_block_size"], 11);

        filter.set_parameters(&config::params(json!({"method": "fancy", "threshold": 300.0})));
        assert_eq!(filter.method(), ThresholdMethod::BinaryInv);
        assert_eq!(filter.threshold(), 100.0);

        let out = filter.process(&split_image()).unwrap().to_luma8();
        assert_eq!(out.get_pixel(0, 0)[0], 255);
        assert_eq!(out.get_pixel(9, 0)[0], 0);
    }
}
