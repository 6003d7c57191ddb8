//! In-memory stand-ins for Poppler and Tesseract, for tests.
//!
//! A "PDF" here is a UTF-8 text file with one line per page. A file starting
//! with `CORRUPT` cannot be opened, a page reading `BADPAGE` cannot be
//! rendered, and a page reading `BADOCR` cannot be recognized. Rendering
//! smuggles each page's text through the raster, so the recognizer returns it
//! unchanged.

use std::{
    fs,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::prelude::*;

use super::{PdfDocument, Rasterizer, Recognizer, RgbRaster};

/// Callback run whenever a document is opened.
pub type OpenHook = Arc<dyn Fn(&Path) + Send + Sync>;

/// Opens fake PDFs.
#[derive(Clone, Default)]
pub struct FakeRasterizer {
    /// Number of documents currently open.
    open_documents: Arc<AtomicUsize>,
    /// Optional hook to run before opening each document.
    on_open: Option<OpenHook>,
}

impl FakeRasterizer {
    /// Create a rasterizer which calls `hook` before opening each document.
    pub fn with_open_hook(hook: impl Fn(&Path) + Send + Sync + 'static) -> Self {
        Self {
            open_documents: Arc::default(),
            on_open: Some(Arc::new(hook)),
        }
    }

    /// How many documents are open right now?
    pub fn open_documents(&self) -> usize {
        self.open_documents.load(Ordering::SeqCst)
    }
}

impl Rasterizer for FakeRasterizer {
    fn open(&self, pdf_path: &Path) -> Result<Box<dyn PdfDocument>> {
        if let Some(hook) = &self.on_open {
            hook(pdf_path);
        }
        let contents = fs::read_to_string(pdf_path)
            .with_context(|| format!("failed to read {:?}", pdf_path.display()))?;
        if contents.starts_with("CORRUPT") {
            return Err(anyhow!("{:?} is corrupt", pdf_path.display()));
        }
        self.open_documents.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeDocument {
            pages: contents.lines().map(str::to_owned).collect(),
            open_documents: self.open_documents.clone(),
        }))
    }
}

/// A fake PDF, one string per page.
struct FakeDocument {
    pages: Vec<String>,
    open_documents: Arc<AtomicUsize>,
}

impl PdfDocument for FakeDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn rasterize(&mut self, page_index: usize, _dpi: u32) -> Result<RgbRaster> {
        let text = self
            .pages
            .get(page_index)
            .ok_or_else(|| anyhow!("no page {}", page_index))?;
        if text == "BADPAGE" {
            return Err(anyhow!("cannot render page {}", page_index));
        }
        let data = text.bytes().flat_map(|b| [b, b, b]).collect::<Vec<_>>();
        let width = u32::try_from(text.len())?;
        RgbRaster::new(width, 1, data)
    }
}

impl Drop for FakeDocument {
    fn drop(&mut self) {
        self.open_documents.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Reads back the text hidden in rasters from [`FakeRasterizer`].
#[derive(Clone, Debug, Default)]
pub struct FakeRecognizer;

impl Recognizer for FakeRecognizer {
    fn recognize(&self, raster: &RgbRaster, language: &str) -> Result<String> {
        if language != "por" {
            return Err(anyhow!("language {} is not installed", language));
        }
        let bytes = raster.data.iter().step_by(3).copied().collect::<Vec<_>>();
        let text = String::from_utf8(bytes)?;
        if text == "BADOCR" {
            return Err(anyhow!("OCR engine crashed"));
        }
        Ok(text)
    }
}
