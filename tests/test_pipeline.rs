mod common;

use common::*;
use image::{DynamicImage, Rgb, RgbImage};
use visinspect::config::Params;
use visinspect::{Filter, create_filter};

fn gradient() -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_fn(80, 60, |x, y| {
        Rgb([(x * 3) as u8, (y * 4) as u8, ((x + y) * 2) as u8])
    }))
}

fn default_pipeline() -> Pipeline {
    Pipeline::from_config(&InspectionConfig::default().pipeline).unwrap()
}

struct Broken;

impl Filter for Broken {
    fn process(&self, _image: &DynamicImage) -> anyhow::Result<DynamicImage> {
        anyhow::bail!("sensor offline")
    }

    fn name(&self) -> &str {
        "Broken"
    }

    fn kind(&self) -> &'static str {
        "broken"
    }

    fn parameters(&self) -> Params {
        Params::new()
    }

    fn set_parameters(&mut self, _params: &Params) {}

    fn box_clone(&self) -> Box<dyn Filter> {
        Box::new(Broken)
    }
}

#[test]
fn test_processing_is_deterministic() {
    let pipeline = default_pipeline();
    let first = pipeline.process(&gradient()).unwrap();
    let second = pipeline.process(&gradient()).unwrap();
    assert_eq!(first.as_bytes(), second.as_bytes());
}

#[test]
fn test_input_is_not_modified() {
    let input = gradient();
    let copy = input.clone();
    default_pipeline().process(&input).unwrap();
    assert_eq!(input.as_bytes(), copy.as_bytes());
}

#[test]
fn test_all_disabled_is_identity() {
    let mut pipeline = default_pipeline();
    for i in 0..pipeline.len() {
        assert!(pipeline.set_enabled(i, false));
    }

    let output = pipeline.process(&gradient()).unwrap();

    assert_eq!(output.as_bytes(), gradient().as_bytes());
}

#[test]
fn test_intermediates_track_enabled_stages() {
    let mut pipeline = default_pipeline();
    pipeline.set_enabled(1, false);

    let output = pipeline.process_with_intermediates(&gradient()).unwrap();

    assert!(output.succeeded());
    assert_eq!(output.intermediate_images.len(), 2);
    assert_eq!(output.filter_names.len(), 1);
    assert_eq!(output.processing_times_ms.len(), 1);
    assert_eq!(
        output.final_image.as_bytes(),
        output.intermediate_images[1].as_bytes()
    );
}

#[test]
fn test_empty_input_is_an_error() {
    assert!(default_pipeline().process(&DynamicImage::new_rgb8(0, 0)).is_err());
}

#[test]
fn test_config_round_trip() {
    let original = vec![
        StageConfig::new("grayscale"),
        StageConfig::new("gaussian_blur")
            .with_param("kernel_size", 7)
            .with_param("sigma", 1.5),
        StageConfig::new("threshold").with_param("method", "otsu").disabled(),
    ];
    let pipeline = Pipeline::from_config(&original).unwrap();

    let rebuilt = Pipeline::from_config(&pipeline.to_config()).unwrap();

    assert_eq!(rebuilt.to_config(), pipeline.to_config());
    assert_eq!(rebuilt.is_enabled(2), Some(false));
    assert_eq!(rebuilt.filter(1).unwrap().parameters()["kernel_size"], 7);
}

#[test]
fn test_unknown_filter_is_rejected() {
    assert!(Pipeline::from_config(&[StageConfig::new("sharpen")]).is_err());
    assert!(create_filter(&StageConfig::new("grayscale")).is_ok());
}

#[test]
fn test_failing_filter_fails_the_inspection() {
    let controller = Controller::new();
    controller.set_pipeline(
        Pipeline::new()
            .with_filter(create_filter(&StageConfig::new("grayscale")).unwrap())
            .with_filter(Box::new(Broken)),
    );

    let result = controller.inspect(&gradient());

    assert!(!result.success);
    assert_eq!(
        result.error_message,
        "Preprocessing failed: Filter 'Broken' failed: sensor offline"
    );
    assert_eq!(controller.statistics().total_inspections, 1);
    let partial = result.processed_image.expect("last good image kept");
    assert_eq!(partial.color(), image::ColorType::L8);
    assert!(result.preprocessing_time_ms > 0.0);
    assert!(result.original_image.is_some());
}

#[test]
fn test_inspection_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("inspection.json");
    let mut config = InspectionConfig::default();
    config.max_allowed_defects = 3;
    config.detectors.push(StageConfig::new("edge").with_param("mode", "sobel"));
    config.server.trigger_port = 9100;

    config.save(&path).unwrap();
    let loaded = InspectionConfig::load(&path).unwrap();

    assert_eq!(
        serde_json::to_value(&loaded).unwrap(),
        serde_json::to_value(&config).unwrap()
    );
}

#[test]
fn test_partial_config_takes_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.json");
    std::fs::write(&path, r#"{"max_allowed_defects": 2, "server": {"rest_port": 8181}}"#).unwrap();

    let config = InspectionConfig::load(&path).unwrap();

    assert_eq!(config.max_allowed_defects, 2);
    assert_eq!(config.server.rest_port, 8181);
    assert_eq!(config.server.trigger_port, 9000);
    assert_eq!(config.pipeline.len(), 2);
}
