use image::{DynamicImage, GrayImage, Luma};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;
use tempfile::NamedTempFile;
use visinspect::config::Params;
use visinspect::detection::{Detection, Detector, DetectorCommon};
use visinspect::models::{BoundingBox, Defect, DefectType};

/// Uniform grey image of the given size.
pub fn uniform(width: u32, height: u32, level: u8) -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(width, height, Luma([level])))
}

/// Light 640x480 plate used as a known-good reference.
pub fn reference_plate() -> DynamicImage {
    uniform(640, 480, 210)
}

/// The reference plate with one filled dark circle.
pub fn plate_with_circle(center: (i32, i32), radius: i32) -> DynamicImage {
    let mut img = GrayImage::from_pixel(640, 480, Luma([210]));
    draw_filled_circle_mut(&mut img, center, radius, Luma([20]));
    DynamicImage::ImageLuma8(img)
}

/// Dark background with a 500px and a 20px bright line.
pub fn long_and_short_lines() -> DynamicImage {
    let mut img = GrayImage::from_pixel(640, 200, Luma([20]));
    draw_filled_rect_mut(&mut img, Rect::at(60, 60).of_size(500, 9), Luma([230]));
    draw_filled_rect_mut(&mut img, Rect::at(60, 140).of_size(20, 9), Luma([230]));
    DynamicImage::ImageLuma8(img)
}

/// Creates a PNG of `image` in a temp file that is removed on drop.
pub fn write_temp_png(image: &DynamicImage) -> NamedTempFile {
    let file = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .expect("Failed to create temp image file");
    image
        .save_with_format(file.path(), image::ImageFormat::Png)
        .expect("Failed to save test image");
    file
}

/// Detector that reports a fixed list of defects, or fails when asked to.
#[derive(Clone)]
pub struct FixedDetector {
    common: DetectorCommon,
    defects: Vec<Defect>,
    fail: bool,
}

impl FixedDetector {
    pub fn with_defects(defects: Vec<Defect>) -> Self {
        Self {
            common: DetectorCommon::default(),
            defects,
            fail: false,
        }
    }

    /// One Unknown defect per confidence, laid out left to right.
    pub fn with_confidences(confidences: &[f64]) -> Self {
        let defects = confidences
            .iter()
            .enumerate()
            .map(|(i, &confidence)| {
                let bbox = BoundingBox::new(10 + 20 * i as i32, 10, 10, 10);
                Defect::new(DefectType::Unknown, bbox, confidence)
            })
            .collect();
        Self::with_defects(defects)
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::with_defects(Vec::new())
        }
    }
}

impl Detector for FixedDetector {
    fn analyze(&self, _image: &DynamicImage) -> anyhow::Result<Detection> {
        if self.fail {
            anyhow::bail!("simulated detector failure");
        }
        Ok(Detection::new(self.defects.clone(), None))
    }

    fn name(&self) -> &str {
        "FixedDetector"
    }

    fn kind(&self) -> &'static str {
        "fixed"
    }

    fn common(&self) -> &DetectorCommon {
        &self.common
    }

    fn common_mut(&mut self) -> &mut DetectorCommon {
        &mut self.common
    }

    fn algorithm_parameters(&self) -> Params {
        Params::new()
    }

    fn set_algorithm_parameters(&mut self, _params: &Params) {}

    fn box_clone(&self) -> Box<dyn Detector> {
        Box::new(self.clone())
    }
}
