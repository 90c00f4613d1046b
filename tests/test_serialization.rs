mod common;

use common::*;
use serde_json::json;
use visinspect::InspectionSummary;
use visinspect::models::{BoundingBox, Point};

fn scratch() -> Defect {
    let contour = vec![Point::new(10, 10), Point::new(60, 12), Point::new(10, 14)];
    let mut defect = Defect::from_contour(DefectType::Scratch, contour, 0.75);
    defect.area = 120.0;
    defect.circularity = 0.1;
    defect
}

#[test]
fn test_defect_json_shape() {
    let value = serde_json::to_value(scratch()).unwrap();

    assert_eq!(value["type"], json!("Scratch"));
    assert_eq!(value["bbox"]["x"], json!(10));
    assert_eq!(value["bbox"]["width"], json!(51));
    assert_eq!(value["confidence"], json!(0.75));
    assert_eq!(value["contour"].as_array().unwrap().len(), 3);
}

#[test]
fn test_defect_json_round_trip() {
    let defect = scratch();
    let text = serde_json::to_string(&defect).unwrap();
    let parsed: Defect = serde_json::from_str(&text).unwrap();
    assert_eq!(parsed, defect);
}

#[test]
fn test_defect_without_contour_parses() {
    let mut value = serde_json::to_value(scratch()).unwrap();
    value.as_object_mut().unwrap().remove("contour");

    let parsed: Defect = serde_json::from_value(value).unwrap();

    assert!(parsed.contour.is_empty());
    assert_eq!(parsed.defect_type, DefectType::Scratch);
}

#[test]
fn test_summary_keys() {
    let result = InspectionResult {
        success: true,
        is_ok: false,
        defects: vec![scratch()],
        preprocessing_time_ms: 1.5,
        detection_time_ms: 2.5,
        total_time_ms: 4.0,
        timestamp: "2024-05-06 07:08:09.010".to_string(),
        ..Default::default()
    };

    let value = result.to_json();

    assert_eq!(value["success"], json!(true));
    assert_eq!(value["isOK"], json!(false));
    assert_eq!(value["defectCount"], json!(1));
    assert_eq!(value["errorMessage"], json!(""));
    assert_eq!(value["preprocessingTime"], json!(1.5));
    assert_eq!(value["detectionTime"], json!(2.5));
    assert_eq!(value["totalTime"], json!(4.0));
    assert_eq!(value["timestamp"], json!("2024-05-06 07:08:09.010"));
    assert_eq!(value["defects"][0]["type"], json!("Scratch"));
}

#[test]
fn test_summary_restores_result() {
    let original = InspectionResult {
        success: true,
        is_ok: true,
        defects: vec![scratch()],
        total_time_ms: 9.0,
        ..Default::default()
    };

    let summary: InspectionSummary = serde_json::from_value(original.to_json()).unwrap();
    let restored = InspectionResult::from(summary);

    assert!(restored.success);
    assert!(restored.is_ok);
    assert_eq!(restored.defects, original.defects);
    assert!(restored.original_image.is_none());
}

#[test]
fn test_defect_type_names() {
    for name in ["Scratch", "Stain", "Discoloration", "Deformation", "Unknown"] {
        assert_eq!(DefectType::parse(name).as_str(), name);
    }
    assert_eq!(DefectType::parse("Dent"), DefectType::Unknown);
    assert_eq!(format!("{:<9}|", DefectType::Stain), "Stain    |");
}

#[test]
fn test_failed_result_judgment() {
    let failed = InspectionResult::failed("camera timeout");
    assert_eq!(failed.judgment(), "ERROR");
    assert!(!failed.is_ok);
    assert!(!failed.timestamp.is_empty());

    let box_only = Defect::new(DefectType::Stain, BoundingBox::new(0, 0, 4, 4), 0.6);
    assert!(box_only.is_valid());
    assert!((box_only.center.x - 2.0).abs() < 1e-6);
}
