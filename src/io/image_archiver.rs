use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use image::DynamicImage;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{InspectionResult, file_timestamp};

/// Which image of a result to store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageVariant {
    Original,
    Processed,
    Visualized,
}

impl ImageVariant {
    pub const ALL: [ImageVariant; 3] =
        [ImageVariant::Original, ImageVariant::Processed, ImageVariant::Visualized];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageVariant::Original => "original",
            ImageVariant::Processed => "processed",
            ImageVariant::Visualized => "visualized",
        }
    }

    fn select(self, result: &InspectionResult) -> Option<&DynamicImage> {
        match self {
            ImageVariant::Original => result.original_image.as_ref(),
            ImageVariant::Processed => result.processed_image.as_ref(),
            ImageVariant::Visualized => result.visualized_image.as_ref(),
        }
    }
}

/// Stores result images as PNG under `<root>/<variant>/`.
#[derive(Debug, Clone)]
pub struct ImageArchiver {
    root: PathBuf,
    prefix: String,
}

impl ImageArchiver {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_name(&self, stem: &str, variant: ImageVariant) -> String {
        format!("{}_{}_{}.png", self.prefix, stem, variant.as_str())
    }

    /// Save every variant the result carries. Images of one call share a
    /// `<timestamp>_<uuid>` stem. Returns the written paths.
    pub fn save(&self, result: &InspectionResult) -> anyhow::Result<Vec<PathBuf>> {
        self.save_variants(result, &ImageVariant::ALL)
    }

    pub fn save_variants(
        &self,
        result: &InspectionResult,
        variants: &[ImageVariant],
    ) -> anyhow::Result<Vec<PathBuf>> {
        let stem = format!("{}_{}", file_timestamp(), Uuid::new_v4());
        let mut written = Vec::new();
        for &variant in variants {
            let Some(image) = variant.select(result).filter(|img| img.width() > 0 && img.height() > 0)
            else {
                warn!(variant = variant.as_str(), "no image to save");
                continue;
            };
            let dir = self.root.join(variant.as_str());
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory {:?}", dir))?;
            let path = dir.join(self.file_name(&stem, variant));
            image
                .save(&path)
                .with_context(|| format!("Failed to save image {:?}", path))?;
            info!(path = %path.display(), width = image.width(), height = image.height(), "image saved");
            written.push(path);
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn names_share_stem_and_carry_variant() {
        let archiver = ImageArchiver::new("out", "inspection");
        let name = archiver.file_name("20240101_000000_000_abc", ImageVariant::Processed);
        assert_eq!(name, "inspection_20240101_000000_000_abc_processed.png");
    }

    #[test]
    fn missing_images_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let archiver = ImageArchiver::new(dir.path(), "t");
        let result = InspectionResult {
            original_image: Some(DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 4, Luma([9])))),
            ..Default::default()
        };
        let paths = archiver.save(&result).unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].starts_with(dir.path().join("original")));
        assert!(paths[0].exists());
    }
}
