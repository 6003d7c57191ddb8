//! PDF rasterization using Poppler's `pdfinfo` and `pdftocairo` CLI tools.

use std::{collections::BTreeMap, fs, process::Command, sync::LazyLock};

use image::ImageFormat;
use regex::Regex;

use crate::{async_utils::check_for_command_failure, prelude::*};

use super::{PdfDocument, Rasterizer, RgbRaster};

/// Lines which look like errors.
static ERROR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error").expect("failed to compile regex"));

/// Poppler complains about broken cross-reference tables, but then recovers.
static DOWNGRADE_TO_WARNING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)error: xref num").expect("failed to compile regex")
});

/// Does this line contain an error?
fn is_error_line(line: &str) -> bool {
    ERROR_REGEX.is_match(line) && !DOWNGRADE_TO_WARNING_REGEX.is_match(line)
}

/// Opens PDFs using Poppler.
#[derive(Clone, Debug, Default)]
pub struct PopplerRasterizer;

impl Rasterizer for PopplerRasterizer {
    #[instrument(level = "debug", skip_all, fields(path = %pdf_path.display()))]
    fn open(&self, pdf_path: &Path) -> Result<Box<dyn PdfDocument>> {
        let mime_type = get_mime_type(pdf_path)?;
        if mime_type != "application/pdf" {
            return Err(anyhow!(
                "{:?} is not a PDF file (detected {})",
                pdf_path.display(),
                mime_type
            ));
        }
        let page_count = get_pdf_page_count(pdf_path)?;
        let tmpdir = tempfile::TempDir::with_prefix("pages")
            .context("failed to create temporary directory for pages")?;
        Ok(Box::new(PopplerDocument {
            path: pdf_path.to_owned(),
            page_count,
            tmpdir: Some(tmpdir),
        }))
    }
}

/// A PDF opened by [`PopplerRasterizer`].
struct PopplerDocument {
    /// The PDF on disk.
    path: PathBuf,
    /// Number of pages, according to `pdfinfo`.
    page_count: usize,
    /// Scratch space for rendered pages.
    ///
    /// This is released by [`Drop`].
    tmpdir: Option<tempfile::TempDir>,
}

impl PdfDocument for PopplerDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    #[instrument(level = "debug", skip_all, fields(path = %self.path.display(), page = page_index + 1, dpi = dpi))]
    fn rasterize(&mut self, page_index: usize, dpi: u32) -> Result<RgbRaster> {
        if page_index >= self.page_count {
            return Err(anyhow!(
                "page index {} out of range for {:?} ({} pages)",
                page_index,
                self.path.display(),
                self.page_count
            ));
        }
        let tmpdir_path = self
            .tmpdir
            .as_ref()
            .context("document has already been closed")?
            .path();

        // The command-line tools use 1-based, inclusive page ranges. With
        // `-singlefile`, `pdftocairo` appends only the extension to our prefix.
        let page_number = (page_index + 1).to_string();
        let out_prefix = tmpdir_path.join(format!("page-{}", page_number));
        let output = Command::new("pdftocairo")
            .arg("-png")
            .arg("-singlefile")
            .arg("-r")
            .arg(dpi.to_string())
            .arg("-f")
            .arg(&page_number)
            .arg("-l")
            .arg(&page_number)
            .arg(&self.path)
            .arg(&out_prefix)
            .output()
            .with_context(|| {
                format!(
                    "failed to run pdftocairo on {:?} (is poppler-utils installed?)",
                    self.path.display()
                )
            })?;
        check_for_command_failure("pdftocairo", &output, Some(&is_error_line))?;

        let png_path = out_prefix.with_extension("png");
        let png_bytes = fs::read(&png_path)
            .with_context(|| format!("failed to read file {:?}", png_path.display()))?;
        // Delete the file to recover space a bit early.
        fs::remove_file(&png_path)
            .with_context(|| format!("failed to delete file {:?}", png_path.display()))?;

        let image = image::load_from_memory_with_format(&png_bytes, ImageFormat::Png)
            .with_context(|| {
                format!("failed to decode rendered page {}", page_number)
            })?;
        RgbRaster::try_from(image.to_rgb8())
    }
}

impl Drop for PopplerDocument {
    fn drop(&mut self) {
        // Delete our temporary directory, if we have one.
        if let Some(tmpdir) = self.tmpdir.take() {
            let tmpdir_path = tmpdir.path().to_owned();
            if let Err(err) = tmpdir.close() {
                error!(
                    directory = ?tmpdir_path.display(),
                    "failed to delete temporary directory: {}",
                    err
                );
            }
        }
    }
}

/// Get the number of pages in a PDF file.
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub fn get_pdf_page_count(path: &Path) -> Result<usize> {
    let output = Command::new("pdfinfo").arg(path).output().with_context(|| {
        format!(
            "failed to run pdfinfo on {:?} (is poppler-utils installed?)",
            path.display()
        )
    })?;
    check_for_command_failure("pdfinfo", &output, None)?;

    // Parse the output of pdfinfo into properties.
    let output =
        String::from_utf8(output.stdout).context("pdfinfo output was not valid UTF-8")?;
    parse_page_count(&output).with_context(|| {
        format!(
            "failed to parse page count for {:?} from pdfinfo output",
            path.display()
        )
    })
}

/// Extract the `Pages:` property from `pdfinfo` output.
fn parse_page_count(pdfinfo_output: &str) -> Result<usize> {
    let mut properties = BTreeMap::new();
    for line in pdfinfo_output.lines() {
        let mut parts = line.splitn(2, ':');
        let key = parts.next().unwrap_or("").trim();
        let value = parts.next().unwrap_or("").trim();
        properties.insert(key, value);
    }
    let page_count_str = properties
        .get("Pages")
        .ok_or_else(|| anyhow!("failed to find page count in pdfinfo output"))?;
    Ok(page_count_str.parse::<usize>()?)
}

/// Get the MIME type of a file by sniffing its contents.
pub fn get_mime_type(path: &Path) -> Result<String> {
    Ok(infer::get_from_path(path)
        .with_context(|| format!("failed to get MIME type for {:?}", path.display()))?
        .ok_or_else(|| anyhow!("unknown MIME type for {:?}", path.display()))?
        .mime_type()
        .to_string())
}
