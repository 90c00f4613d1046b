mod common;

use common::*;
use visinspect::io::{CsvWriter, ImageArchiver, ImageVariant};

fn inspected(confidences: &[f64]) -> InspectionResult {
    let controller = Controller::new();
    controller.add_detector(Box::new(FixedDetector::with_confidences(confidences)));
    controller.inspect(&uniform(96, 64, 140))
}

fn read_records(path: &std::path::Path) -> Vec<csv::StringRecord> {
    let bytes = std::fs::read(path).unwrap();
    assert!(bytes.starts_with(b"\xEF\xBB\xBF"), "missing BOM");
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(&bytes[3..]);
    reader.records().map(|r| r.unwrap()).collect()
}

#[test]
fn test_append_writes_header_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("results.csv");
    let writer = CsvWriter::default();

    writer.append_result(&path, &inspected(&[0.9, 0.8]), "a.png").unwrap();
    writer.append_result(&path, &inspected(&[]), "b.png").unwrap();

    let records = read_records(&path);
    assert_eq!(records.len(), 4);
    assert_eq!(&records[0][0], "Timestamp");
    assert_eq!(records[0].len(), 14);
    assert_eq!(&records[1][1], "a.png");
    assert_eq!(&records[1][2], "NG");
    assert_eq!(&records[2][5], "1");
    assert_eq!(&records[3][1], "b.png");
    assert_eq!(&records[3][2], "OK");
    assert_eq!(&records[3][5], "");
    assert_eq!(records[3].len(), 14);
}

#[test]
fn test_summary_only_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("summary.csv");
    let a = inspected(&[0.9, 0.9, 0.9]);
    let b = inspected(&[]);

    CsvWriter::new(false)
        .write_results(&path, &[(&a, "a.png"), (&b, "b.png")])
        .unwrap();

    let records = read_records(&path);
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.len() == 5));
    assert_eq!(&records[1][3], "3");
    assert_eq!(&records[2][3], "0");
}

#[test]
fn test_write_results_replaces_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batch.csv");
    let writer = CsvWriter::new(false);
    let result = inspected(&[]);

    writer.write_results(&path, &[(&result, "x.png"), (&result, "y.png")]).unwrap();
    writer.write_results(&path, &[(&result, "z.png")]).unwrap();

    let records = read_records(&path);
    assert_eq!(records.len(), 2);
    assert_eq!(&records[1][1], "z.png");
}

#[test]
fn test_archiver_saves_every_variant() {
    let dir = tempfile::tempdir().unwrap();
    let archiver = ImageArchiver::new(dir.path(), "line1");

    let paths = archiver.save(&inspected(&[0.9])).unwrap();

    assert_eq!(paths.len(), 3);
    for (path, variant) in paths.iter().zip(ImageVariant::ALL) {
        assert!(path.exists());
        assert_eq!(path.parent().unwrap(), dir.path().join(variant.as_str()));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("line1_"));
        assert!(name.ends_with(&format!("_{}.png", variant.as_str())));
    }

    let stem = |p: &std::path::PathBuf| {
        let name = p.file_name().unwrap().to_str().unwrap().to_string();
        name.rsplit_once('_').unwrap().0.to_string()
    };
    assert_eq!(stem(&paths[0]), stem(&paths[1]));
    assert_eq!(stem(&paths[1]), stem(&paths[2]));
}

#[test]
fn test_archiver_only_requested_variants() {
    let dir = tempfile::tempdir().unwrap();
    let archiver = ImageArchiver::new(dir.path(), "line1");

    let paths = archiver
        .save_variants(&inspected(&[]), &[ImageVariant::Visualized])
        .unwrap();

    assert_eq!(paths.len(), 1);
    assert!(!dir.path().join("original").exists());
    let saved = image::open(&paths[0]).unwrap();
    assert_eq!((saved.width(), saved.height()), (96, 64));
}
