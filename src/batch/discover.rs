//! Finding the PDFs in an input directory.

use std::fs;

use crate::prelude::*;

use super::BatchSetupError;

/// Does this file name look like a PDF?
pub fn has_pdf_extension(file_name: &str) -> bool {
    file_name.to_lowercase().ends_with(".pdf")
}

/// List the PDF files directly inside `input_dir`.
///
/// Subdirectories are not searched. Paths are returned in whatever order the
/// filesystem lists them.
#[instrument(level = "debug", skip_all, fields(input_dir = %input_dir.display()))]
pub fn discover_pdfs(input_dir: &Path) -> Result<Vec<PathBuf>, BatchSetupError> {
    let read_error = |source| BatchSetupError::ReadInputDir {
        path: input_dir.to_owned(),
        source,
    };
    let mut pdfs = vec![];
    for entry in fs::read_dir(input_dir).map_err(read_error)? {
        let entry = entry.map_err(read_error)?;
        let path = entry.path();
        // `is_file` follows symlinks.
        if has_pdf_extension(&entry.file_name().to_string_lossy()) && path.is_file() {
            pdfs.push(path);
        }
    }
    debug!(count = pdfs.len(), "Found PDF files");
    Ok(pdfs)
}
