//! Convert one PDF into one text file.
//!
//! Each page is rendered, OCRed, and appended to an in-memory buffer. Nothing
//! touches the output directory until every page has been recognized, and the
//! final file is renamed into place, so a failed document never leaves a
//! partial `.txt` behind.

use std::{ffi::OsString, io, io::Write as _, sync::Arc};

use clap::Args;
use thiserror::Error;

use crate::{
    engines::{PdfDocument, Rasterizer, Recognizer},
    prelude::*,
};

/// The Tesseract language model used unless told otherwise.
pub const DEFAULT_LANGUAGE: &str = "por";

/// Options controlling how each document is OCRed.
#[derive(Args, Clone, Debug)]
pub struct ExtractOptions {
    /// The DPI to use when rendering pages for OCR.
    #[clap(long, default_value = "300")]
    pub dpi: u32,

    /// The OCR language model to use.
    #[clap(long, default_value = DEFAULT_LANGUAGE)]
    pub language: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            dpi: 300,
            language: DEFAULT_LANGUAGE.to_owned(),
        }
    }
}

/// Why a single document could not be converted.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("cannot open {path:?}: {source:#}")]
    Open {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("cannot render page {page} of {path:?}: {source:#}")]
    Rasterize {
        path: PathBuf,
        page: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("cannot recognize text on page {page} of {path:?}: {source:#}")]
    Recognize {
        path: PathBuf,
        page: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("cannot write {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Turns PDFs into text files.
#[derive(Clone)]
pub struct DocumentExtractor {
    rasterizer: Arc<dyn Rasterizer>,
    recognizer: Arc<dyn Recognizer>,
    options: ExtractOptions,
}

impl DocumentExtractor {
    /// Create a new extractor.
    pub fn new(
        rasterizer: Arc<dyn Rasterizer>,
        recognizer: Arc<dyn Recognizer>,
        options: ExtractOptions,
    ) -> Self {
        Self {
            rasterizer,
            recognizer,
            options,
        }
    }

    /// OCR `pdf_path` and write `<stem>.txt` into `output_dir`, replacing any
    /// existing file. Returns the path written.
    #[instrument(level = "debug", skip_all, fields(path = %pdf_path.display()))]
    pub fn extract(
        &self,
        pdf_path: &Path,
        output_dir: &Path,
    ) -> Result<PathBuf, ExtractionError> {
        let text = {
            // The document is closed when it goes out of scope, whether or not
            // OCR succeeded.
            let mut document = self.rasterizer.open(pdf_path).map_err(|source| {
                ExtractionError::Open {
                    path: pdf_path.to_owned(),
                    source,
                }
            })?;
            self.recognize_pages(pdf_path, &mut *document)?
        };

        let output_path = output_path_for(pdf_path, output_dir);
        write_replacing(&output_path, &text).map_err(|source| ExtractionError::Write {
            path: output_path.clone(),
            source,
        })?;
        debug!(output = %output_path.display(), "Wrote OCR text");
        Ok(output_path)
    }

    /// Render and OCR every page, in order, returning the combined text.
    fn recognize_pages(
        &self,
        pdf_path: &Path,
        document: &mut dyn PdfDocument,
    ) -> Result<String, ExtractionError> {
        let mut text = String::new();
        for page_idx in 0..document.page_count() {
            let page = page_idx + 1;
            let raster = document
                .rasterize(page_idx, self.options.dpi)
                .map_err(|source| ExtractionError::Rasterize {
                    path: pdf_path.to_owned(),
                    page,
                    source,
                })?;
            let page_text = self
                .recognizer
                .recognize(&raster, &self.options.language)
                .map_err(|source| ExtractionError::Recognize {
                    path: pdf_path.to_owned(),
                    page,
                    source,
                })?;
            trace!(page, chars = page_text.len(), "Recognized page");
            text.push_str(&page_header(page));
            text.push_str(&page_text);
            text.push('\n');
        }
        Ok(text)
    }
}

/// The separator written before each page's text. `page` is 1-based.
pub fn page_header(page: usize) -> String {
    format!("\n\n--- Página {} ---\n\n", page)
}

/// Where the text for `pdf_path` goes: its file name, minus the final
/// extension, plus `.txt`.
pub fn output_path_for(pdf_path: &Path, output_dir: &Path) -> PathBuf {
    let mut file_name = pdf_path
        .file_stem()
        .map(|stem| stem.to_owned())
        .unwrap_or_else(|| OsString::from("document"));
    file_name.push(".txt");
    output_dir.join(file_name)
}

/// Write `text` to a temporary file next to `path`, then rename it over
/// `path`.
fn write_replacing(path: &Path, text: &str) -> io::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut builder = tempfile::Builder::new();
    // Temp files default to 0600. Let the umask decide, like a plain create.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt as _;
        builder.permissions(std::fs::Permissions::from_mode(0o666));
    }
    let mut tmp = builder.tempfile_in(dir)?;
    tmp.write_all(text.as_bytes())?;
    tmp.flush()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
