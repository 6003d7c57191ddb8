//! Tesseract OCR engine.

use std::{fs, process::Command};

use clap::Args;

use crate::{async_utils::check_for_command_failure, prelude::*};

use super::{Recognizer, RgbRaster};

/// How to find and run Tesseract.
///
/// This is passed explicitly to [`TesseractRecognizer::new`], so that separate
/// runs can use separate installations without touching process-wide state.
#[derive(Args, Clone, Debug)]
pub struct TesseractConfig {
    /// The `tesseract` executable to run.
    #[clap(
        long = "tesseract",
        value_name = "PATH",
        env = "TESSERACT_PATH",
        default_value = "tesseract"
    )]
    pub binary: PathBuf,

    /// Directory containing Tesseract's `*.traineddata` language files.
    #[clap(long, value_name = "DIR", env = "TESSDATA_DIR")]
    pub tessdata_dir: Option<PathBuf>,
}

impl Default for TesseractConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("tesseract"),
            tessdata_dir: None,
        }
    }
}

/// OCR engine wrapping the `tesseract` CLI tool.
#[derive(Clone, Debug)]
pub struct TesseractRecognizer {
    config: TesseractConfig,
}

impl TesseractRecognizer {
    /// Create a new `tesseract` engine.
    pub fn new(config: TesseractConfig) -> Self {
        Self { config }
    }

    /// Build the command line for one recognition.
    fn command(&self, input_path: &Path, language: &str) -> Command {
        let mut cmd = Command::new(&self.config.binary);
        cmd.arg(input_path).arg("stdout").arg("-l").arg(language);
        if let Some(tessdata_dir) = &self.config.tessdata_dir {
            cmd.arg("--tessdata-dir").arg(tessdata_dir);
        }
        cmd
    }
}

impl Recognizer for TesseractRecognizer {
    #[instrument(level = "debug", skip_all, fields(width = raster.width, height = raster.height, language = language))]
    fn recognize(&self, raster: &RgbRaster, language: &str) -> Result<String> {
        // Write our input to a temporary file.
        let tmpdir = tempfile::TempDir::with_prefix("tesseract")?;
        let input_path = tmpdir.path().join("input.png");
        fs::write(&input_path, raster.to_png()?)
            .context("cannot write tesseract input file")?;

        let output = self
            .command(&input_path, language)
            .output()
            .with_context(|| {
                format!("cannot run {:?}", self.config.binary.display())
            })?;
        check_for_command_failure("tesseract", &output, None)?;

        String::from_utf8(output.stdout).context("tesseract output was not valid UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    #[test]
    fn command_passes_language_and_tessdata_dir() {
        let recognizer = TesseractRecognizer::new(TesseractConfig {
            binary: PathBuf::from("/opt/ocr/bin/tesseract"),
            tessdata_dir: Some(PathBuf::from("/opt/ocr/tessdata")),
        });
        let cmd = recognizer.command(Path::new("in.png"), "por");
        assert_eq!(cmd.get_program(), "/opt/ocr/bin/tesseract");
        let args = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        assert_eq!(
            args,
            ["in.png", "stdout", "-l", "por", "--tessdata-dir", "/opt/ocr/tessdata"]
        );
    }

    #[test]
    fn missing_binary_is_an_error() -> Result<()> {
        let recognizer = TesseractRecognizer::new(TesseractConfig {
            binary: PathBuf::from("/nonexistent/tesseract"),
            tessdata_dir: None,
        });
        let raster = RgbRaster::new(1, 1, vec![255, 255, 255])?;
        let err = recognizer.recognize(&raster, "por").unwrap_err();
        assert!(format!("{:?}", err).contains("/nonexistent/tesseract"));
        Ok(())
    }

    #[test]
    #[ignore = "Requires tesseract to be installed"]
    fn blank_page_recognizes_as_whitespace() -> Result<()> {
        let image = RgbImage::from_pixel(200, 100, Rgb([255, 255, 255]));
        let text = TesseractRecognizer::new(TesseractConfig::default())
            .recognize(&RgbRaster::try_from(image)?, "eng")?;
        assert!(text.trim().is_empty());
        Ok(())
    }
}
