use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::warn;

use crate::error::{InspectionError, Result};

/// Free-form parameter object of a filter or detector descriptor.
pub type Params = Map<String, Value>;

/// One entry of an ordered pipeline or detector list: `{type, enabled, params}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub params: Params,
}

impl StageConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            enabled: true,
            params: Params::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Listener settings for the network front ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub trigger_enabled: bool,
    pub trigger_port: u16,
    pub rest_enabled: bool,
    pub rest_port: u16,
    /// How long a trigger session waits for its next message.
    pub trigger_idle_timeout_secs: u64,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            trigger_enabled: true,
            trigger_port: 9000,
            rest_enabled: true,
            rest_port: 8080,
            trigger_idle_timeout_secs: 30,
            max_connections: 10,
        }
    }
}

/// Where callers hand finished results off to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub csv_path: PathBuf,
    pub image_dir: PathBuf,
    pub auto_save: bool,
    pub include_defect_details: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            csv_path: PathBuf::from("data/output/csv/server_results.csv"),
            image_dir: PathBuf::from("data/output/images"),
            auto_save: false,
            include_defect_details: true,
        }
    }
}

/// Complete configuration handed to the controller at construction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectionConfig {
    pub max_allowed_defects: usize,
    pub min_defect_confidence: f64,
    pub visualization_enabled: bool,
    /// Attach each detector's binary mask to the result.
    pub capture_debug_masks: bool,
    pub pipeline: Vec<StageConfig>,
    pub detectors: Vec<StageConfig>,
    pub reference_image: Option<PathBuf>,
    pub server: ServerConfig,
    pub output: OutputConfig,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            max_allowed_defects: 0,
            min_defect_confidence: 0.5,
            visualization_enabled: true,
            capture_debug_masks: false,
            pipeline: vec![
                StageConfig::new("grayscale"),
                StageConfig::new("gaussian_blur")
                    .with_param("kernel_size", 5)
                    .with_param("sigma", 1.0),
            ],
            detectors: vec![
                StageConfig::new("feature_detector")
                    .with_param("mode", "adaptive")
                    .with_param("min_area", 100.0)
                    .with_param("max_area", 50000.0),
            ],
            reference_image: None,
            server: ServerConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl InspectionConfig {
    /// Load a JSON configuration file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), data)?;
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

/// Log a rejected parameter. The caller has already kept the previous value.
pub(crate) fn report_rejected(owner: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!(owner, error = %e, "parameter rejected, keeping previous value");
    }
}

fn type_mismatch(key: &str, expected: &str, value: &Value) -> InspectionError {
    InspectionError::Config {
        key: key.to_string(),
        reason: format!("expected {expected}, got {value}"),
    }
}

/// Read an optional numeric parameter. `None` when the key is absent.
pub(crate) fn param_f64(params: &Params, key: &str) -> Option<Result<f64>> {
    params.get(key).map(|value| {
        value
            .as_f64()
            .ok_or_else(|| type_mismatch(key, "a number", value))
    })
}

pub(crate) fn param_i64(params: &Params, key: &str) -> Option<Result<i64>> {
    params.get(key).map(|value| {
        value
            .as_i64()
            .or_else(|| value.as_f64().filter(|v| v.fract() == 0.0).map(|v| v as i64))
            .ok_or_else(|| type_mismatch(key, "an integer", value))
    })
}

pub(crate) fn param_bool(params: &Params, key: &str) -> Option<Result<bool>> {
    params.get(key).map(|value| {
        value
            .as_bool()
            .ok_or_else(|| type_mismatch(key, "a boolean", value))
    })
}

pub(crate) fn param_str<'a>(params: &'a Params, key: &str) -> Option<Result<&'a str>> {
    params.get(key).map(|value| {
        value
            .as_str()
            .ok_or_else(|| type_mismatch(key, "a string", value))
    })
}

/// Reject values outside `[min, max]`.
pub(crate) fn in_range(key: &str, value: f64, min: f64, max: f64) -> Result<f64> {
    if value.is_finite() && value >= min && value <= max {
        Ok(value)
    } else {
        Err(InspectionError::Config {
            key: key.to_string(),
            reason: format!("{value} is outside [{min}, {max}]"),
        })
    }
}

/// Apply a numeric parameter when present and valid.
pub(crate) fn apply_f64(
    owner: &str,
    params: &Params,
    key: &str,
    min: f64,
    max: f64,
    slot: &mut f64,
) {
    if let Some(value) = param_f64(params, key) {
        report_rejected(
            owner,
            value.and_then(|v| in_range(key, v, min, max)).map(|v| *slot = v),
        );
    }
}

/// Apply a `low <= high` threshold pair. Either key may be absent; a pair that ends up
/// inverted is rejected as a whole.
pub(crate) fn apply_f64_pair(
    owner: &str,
    params: &Params,
    (low_key, high_key): (&str, &str),
    min: f64,
    max: f64,
    (low, high): (&mut f64, &mut f64),
) {
    if !params.contains_key(low_key) && !params.contains_key(high_key) {
        return;
    }
    let candidate = |key: &str, current: f64| match param_f64(params, key) {
        Some(value) => value.and_then(|v| in_range(key, v, min, max)),
        None => Ok(current),
    };
    let result = candidate(low_key, *low).and_then(|l| {
        let h = candidate(high_key, *high)?;
        if l > h {
            return Err(InspectionError::Config {
                key: format!("{low_key}/{high_key}"),
                reason: format!("{l} is above {h}"),
            });
        }
        *low = l;
        *high = h;
        Ok(())
    });
    report_rejected(owner, result);
}

pub(crate) fn apply_bool(owner: &str, params: &Params, key: &str, slot: &mut bool) {
    if let Some(value) = param_bool(params, key) {
        report_rejected(owner, value.map(|v| *slot = v));
    }
}

/// Apply an integer parameter that must be `>= min` (and odd when `odd`).
pub(crate) fn apply_u32(
    owner: &str,
    params: &Params,
    key: &str,
    min: u32,
    odd: bool,
    slot: &mut u32,
) {
    let Some(value) = param_i64(params, key) else {
        return;
    };
    let result = value.and_then(|v| {
        let valid = v >= min as i64 && v <= u32::MAX as i64 && (!odd || v % 2 == 1);
        if valid {
            *slot = v as u32;
            Ok(())
        } else {
            let parity = if odd { "an odd number " } else { "" };
            Err(InspectionError::Config {
                key: key.to_string(),
                reason: format!("{v} is not {parity}>= {min}"),
            })
        }
    });
    report_rejected(owner, result);
}

/// Convenience for building parameter objects in code and tests.
pub fn params(value: Value) -> Params {
    match value {
        Value::Object(map) => map,
        _ => Params::new(),
    }
}

impl From<StageConfig> for Value {
    fn from(config: StageConfig) -> Self {
        json!({
            "type": config.kind,
            "enabled": config.enabled,
            "params": config.params,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_config_defaults_enabled_and_empty_params() {
        let config: StageConfig = serde_json::from_str(r#"{"type": "grayscale"}"#).unwrap();
        assert_eq!(config.kind, "grayscale");
        assert!(config.enabled);
        assert!(config.params.is_empty());
    }

    #[test]
    fn partial_config_file_keeps_defaults() {
        let config: InspectionConfig =
            serde_json::from_str(r#"{"max_allowed_defects": 3, "server": {"rest_port": 9999}}"#)
                .unwrap();
        assert_eq!(config.max_allowed_defects, 3);
        assert_eq!(config.min_defect_confidence, 0.5);
        assert_eq!(config.server.rest_port, 9999);
        assert_eq!(config.server.trigger_port, 9000);
        assert_eq!(config.pipeline.len(), 2);
    }

    #[test]
    fn out_of_range_value_keeps_previous() {
        let mut slot = 0.5;
        let p = params(json!({"confidence_threshold": 1.5}));
        apply_f64("test", &p, "confidence_threshold", 0.0, 1.0, &mut slot);
        assert_eq!(slot, 0.5);

        let p = params(json!({"confidence_threshold": "high"}));
        apply_f64("test", &p, "confidence_threshold", 0.0, 1.0, &mut slot);
        assert_eq!(slot, 0.5);

        let p = params(json!({"confidence_threshold": 0.7}));
        apply_f64("test", &p, "confidence_threshold", 0.0, 1.0, &mut slot);
        assert_eq!(slot, 0.7);
    }

    #[test]
    fn inverted_threshold_pair_keeps_both() {
        let (mut low, mut high) = (50.0, 150.0);
        let keys = ("low", "high");

        let p = params(json!({"low": 200.0}));
        apply_f64_pair("test", &p, keys, 0.0, 1000.0, (&mut low, &mut high));
        assert_eq!((low, high), (50.0, 150.0));

        let p = params(json!({"low": 90.0, "high": 40.0}));
        apply_f64_pair("test", &p, keys, 0.0, 1000.0, (&mut low, &mut high));
        assert_eq!((low, high), (50.0, 150.0));

        let p = params(json!({"low": 200.0, "high": 300.0}));
        apply_f64_pair("test", &p, keys, 0.0, 1000.0, (&mut low, &mut high));
        assert_eq!((low, high), (200.0, 300.0));

        let p = params(json!({"high": 250.0}));
        apply_f64_pair("test", &p, keys, 0.0, 1000.0, (&mut low, &mut high));
        assert_eq!((low, high), (200.0, 250.0));
    }

    #[test]
    fn integer_param_accepts_whole_floats() {
        let p = params(json!({"kernel_size": 7.0, "bad": 2.5}));
        assert_eq!(param_i64(&p, "kernel_size").unwrap().unwrap(), 7);
        assert!(param_i64(&p, "bad").unwrap().is_err());
        assert!(param_i64(&p, "missing").is_none());
    }
}
