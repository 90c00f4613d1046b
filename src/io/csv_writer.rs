use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;

use anyhow::Context;
use tracing::{debug, info};

use crate::models::InspectionResult;

const BOM: &[u8] = b"\xEF\xBB\xBF";

const SUMMARY_COLUMNS: [&str; 5] = [
    "Timestamp",
    "Image Path",
    "Judgment",
    "Total Defects",
    "Processing Time (ms)",
];

const DEFECT_COLUMNS: [&str; 9] = [
    "Defect Index",
    "Defect Type",
    "Confidence",
    "X",
    "Y",
    "Width",
    "Height",
    "Area",
    "Circularity",
];

/// Writes inspection results as spreadsheet-friendly CSV (UTF-8 with BOM).
#[derive(Debug, Clone, Copy)]
pub struct CsvWriter {
    include_defect_details: bool,
}

impl Default for CsvWriter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CsvWriter {
    /// With defect details every defect gets its own row; otherwise one row per result.
    pub fn new(include_defect_details: bool) -> Self {
        Self { include_defect_details }
    }

    pub fn header(&self) -> Vec<&'static str> {
        let mut columns = SUMMARY_COLUMNS.to_vec();
        if self.include_defect_details {
            columns.extend(DEFECT_COLUMNS);
        }
        columns
    }

    fn rows(&self, result: &InspectionResult, image_path: &str) -> Vec<Vec<String>> {
        let summary = vec![
            result.timestamp.clone(),
            image_path.to_string(),
            result.judgment().to_string(),
            result.defects.len().to_string(),
            result.total_time_ms.to_string(),
        ];
        if !self.include_defect_details {
            return vec![summary];
        }
        if result.defects.is_empty() {
            let mut row = summary;
            row.extend(std::iter::repeat_n(String::new(), DEFECT_COLUMNS.len()));
            return vec![row];
        }
        result
            .defects
            .iter()
            .enumerate()
            .map(|(i, defect)| {
                let mut row = summary.clone();
                row.extend([
                    i.to_string(),
                    defect.defect_type.to_string(),
                    defect.confidence.to_string(),
                    defect.bbox.x.to_string(),
                    defect.bbox.y.to_string(),
                    defect.bbox.width.to_string(),
                    defect.bbox.height.to_string(),
                    defect.area.to_string(),
                    defect.circularity.to_string(),
                ]);
                row
            })
            .collect()
    }

    fn write_rows<W: Write>(
        &self,
        writer: W,
        results: &[(&InspectionResult, &str)],
        with_header: bool,
    ) -> anyhow::Result<W> {
        let mut csv = csv::WriterBuilder::new().has_headers(false).from_writer(writer);
        if with_header {
            csv.write_record(self.header())?;
        }
        for (result, image_path) in results {
            for row in self.rows(result, image_path) {
                csv.write_record(&row)?;
            }
        }
        csv.into_inner().map_err(|e| anyhow::anyhow!("Failed to flush CSV rows: {}", e.error()))
    }

    fn ensure_parent(path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }
        Ok(())
    }

    /// Write a new file (replacing any existing one) holding every result.
    pub fn write_results(
        &self,
        path: impl AsRef<Path>,
        results: &[(&InspectionResult, &str)],
    ) -> anyhow::Result<()> {
        let path = path.as_ref();
        Self::ensure_parent(path)?;
        let mut file =
            File::create(path).with_context(|| format!("Failed to create CSV file {:?}", path))?;
        file.write_all(BOM)?;
        self.write_rows(file, results, true)?;
        info!(path = %path.display(), results = results.len(), "CSV file written");
        Ok(())
    }

    /// Append one result, creating the file with BOM and header on first use.
    pub fn append_result(
        &self,
        path: impl AsRef<Path>,
        result: &InspectionResult,
        image_path: &str,
    ) -> anyhow::Result<()> {
        let path = path.as_ref();
        Self::ensure_parent(path)?;
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open CSV file {:?}", path))?;
        if is_new {
            file.write_all(BOM)?;
            info!(path = %path.display(), "new CSV file created");
        }
        self.write_rows(file, &[(result, image_path)], is_new)?;
        debug!(path = %path.display(), defects = result.defects.len(), "result appended to CSV");
        Ok(())
    }
}
