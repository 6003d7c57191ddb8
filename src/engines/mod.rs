//! Interfaces to the PDF rasterizer and the OCR engine.
//!
//! The batch pipeline only ever talks to these traits. The real
//! implementations shell out to Poppler and Tesseract, and tests substitute
//! in-memory fakes.

use std::io::Cursor;

use image::{ImageFormat, RgbImage};

use crate::prelude::*;

#[cfg(test)]
pub mod fake;
pub mod poppler;
pub mod tesseract;

/// A rendered page, as packed 8-bit RGB pixels.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RgbRaster {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Row-major RGB triples. Always `width * height * 3` bytes.
    pub data: Vec<u8>,
}

impl RgbRaster {
    /// Create a raster, checking that `data` has the right length.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(anyhow!(
                "RGB raster of {}x{} needs {} bytes, got {}",
                width,
                height,
                expected,
                data.len()
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Encode this raster as a PNG file.
    pub fn to_png(&self) -> Result<Vec<u8>> {
        let image = RgbImage::from_raw(self.width, self.height, self.data.clone())
            .ok_or_else(|| anyhow!("raster buffer does not match its dimensions"))?;
        let mut png_bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png_bytes), ImageFormat::Png)
            .context("failed to encode raster as PNG")?;
        Ok(png_bytes)
    }
}

impl TryFrom<RgbImage> for RgbRaster {
    type Error = anyhow::Error;

    fn try_from(image: RgbImage) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::new(width, height, image.into_raw())
    }
}

/// Something which can open PDF files for rendering.
pub trait Rasterizer: Send + Sync + 'static {
    /// Open a PDF document.
    fn open(&self, pdf_path: &Path) -> Result<Box<dyn PdfDocument>>;
}

/// An open PDF document.
///
/// Dropping the document closes it and releases anything it holds.
pub trait PdfDocument: Send {
    /// The number of pages in the document.
    fn page_count(&self) -> usize;

    /// Render the page at the 0-based `page_index`.
    fn rasterize(&mut self, page_index: usize, dpi: u32) -> Result<RgbRaster>;
}

/// Interface to an OCR engine.
pub trait Recognizer: Send + Sync + 'static {
    /// Recognize the text in `raster`, using the language model named by
    /// `language` (for example, `por`).
    fn recognize(&self, raster: &RgbRaster, language: &str) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_rejects_mismatched_buffer() {
        assert!(RgbRaster::new(2, 2, vec![0; 12]).is_ok());
        assert!(RgbRaster::new(2, 2, vec![0; 11]).is_err());
    }

    #[test]
    fn raster_encodes_as_png() -> Result<()> {
        let raster = RgbRaster::new(3, 1, vec![255, 0, 0, 0, 255, 0, 0, 0, 255])?;
        let png = raster.to_png()?;
        assert_eq!(infer::get(&png).map(|t| t.mime_type()), Some("image/png"));

        let decoded = image::load_from_memory_with_format(&png, ImageFormat::Png)?;
        assert_eq!(RgbRaster::try_from(decoded.to_rgb8())?, raster);
        Ok(())
    }
}
