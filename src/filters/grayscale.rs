use image::DynamicImage;

use crate::config::Params;
use crate::detection::preprocessing;
use crate::pipeline::Filter;

/// Convert image to single-channel luminance
#[derive(Debug, Clone, Default)]
pub struct GrayscaleFilter;

impl GrayscaleFilter {
    pub fn new() -> Self {
        Self
    }
}

impl Filter for GrayscaleFilter {
    fn process(&self, image: &DynamicImage) -> anyhow::Result<DynamicImage> {
        if let DynamicImage::ImageLuma8(_) = image {
            return Ok(image.clone());
        }
        Ok(DynamicImage::ImageLuma8(preprocessing::to_grayscale(image)))
    }

    fn name(&self) -> &str {
        "Grayscale Filter"
    }

    fn kind(&self) -> &'static str {
        "grayscale"
    }

    fn parameters(&self) -> Params {
        Params::new()
    }

    fn set_parameters(&mut self, _params: &Params) {}

    fn box_clone(&self) -> Box<dyn Filter> {
        Box::new(self.clone())
    }

    fn description(&self) -> String {
        "Converts a color image to grayscale. Grayscale input is passed through.".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn color_becomes_single_channel() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 3, Rgb([200, 100, 50])));
        let out = GrayscaleFilter::new().process(&img).unwrap();
        assert_eq!(out.color(), image::ColorType::L8);
        assert_eq!((out.width(), out.height()), (4, 3));
    }

    #[test]
    fn gray_passes_through() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(4, 3, Luma([77])));
        assert_eq!(GrayscaleFilter::new().process(&img).unwrap(), img);
    }
}
