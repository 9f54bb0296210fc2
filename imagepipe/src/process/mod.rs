//! Image processors applied after decoding.
//!
//! Processors run in request order on the processing queue. Each one is
//! identified by a string that becomes part of the task key and the memory
//! cache key, so two processors with the same identifier must produce the
//! same output.

use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};

use crate::error::ProcessError;

/// A pure image transformation.
pub trait ImageProcessor: Send + Sync + 'static {
    /// Stable identifier including every parameter that affects the output.
    fn identifier(&self) -> &str;

    fn process(&self, image: &RgbaImage) -> Result<RgbaImage, ProcessError>;
}

/// Resizes to exact dimensions.
#[derive(Debug, Clone)]
pub struct Resize {
    width: u32,
    height: u32,
    filter: FilterType,
    id: String,
}

impl Resize {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            filter: FilterType::Triangle,
            id: format!("resize({}x{})", width, height),
        }
    }

    /// Uses a higher quality Lanczos filter.
    pub fn high_quality(mut self) -> Self {
        self.filter = FilterType::Lanczos3;
        self.id = format!("resize({}x{},lanczos3)", self.width, self.height);
        self
    }
}

impl ImageProcessor for Resize {
    fn identifier(&self) -> &str {
        &self.id
    }

    fn process(&self, image: &RgbaImage) -> Result<RgbaImage, ProcessError> {
        if self.width == 0 || self.height == 0 {
            return Err(ProcessError::InvalidInput(format!(
                "cannot resize to {}x{}",
                self.width, self.height
            )));
        }
        Ok(image::imageops::resize(
            image,
            self.width,
            self.height,
            self.filter,
        ))
    }
}

/// Converts to grayscale, keeping alpha.
#[derive(Debug, Clone, Copy, Default)]
pub struct Grayscale;

impl ImageProcessor for Grayscale {
    fn identifier(&self) -> &str {
        "grayscale"
    }

    fn process(&self, image: &RgbaImage) -> Result<RgbaImage, ProcessError> {
        let gray = image::imageops::grayscale_alpha(image);
        Ok(DynamicImage::ImageLumaA8(gray).to_rgba8())
    }
}

/// Gaussian blur.
#[derive(Debug, Clone)]
pub struct Blur {
    sigma: f32,
    id: String,
}

impl Blur {
    pub fn new(sigma: f32) -> Self {
        Self {
            sigma,
            id: format!("blur({})", sigma),
        }
    }
}

impl ImageProcessor for Blur {
    fn identifier(&self) -> &str {
        &self.id
    }

    fn process(&self, image: &RgbaImage) -> Result<RgbaImage, ProcessError> {
        if !self.sigma.is_finite() || self.sigma <= 0.0 {
            return Err(ProcessError::InvalidInput(format!(
                "blur sigma must be positive, got {}",
                self.sigma
            )));
        }
        Ok(image::imageops::blur(image, self.sigma))
    }
}

/// Runs `processors` in order, naming the processor that failed.
pub(crate) fn apply_all(
    processors: &[std::sync::Arc<dyn ImageProcessor>],
    image: &RgbaImage,
) -> Result<RgbaImage, (String, ProcessError)> {
    let mut current = image.clone();
    for processor in processors {
        current = processor
            .process(&current)
            .map_err(|e| (processor.identifier().to_string(), e))?;
    }
    Ok(current)
}
