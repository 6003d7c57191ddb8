//! The `ocr` subcommand.

use std::{
    future,
    io::{self, Write},
    sync::Arc,
};

use clap::Args;
use indicatif::ProgressBar;
use tokio::sync::oneshot;

use crate::{
    batch::{
        BatchEvent, BatchHandle, BatchObserver, BatchOutcome, BatchProgress,
        BatchRunner, BatchSummary,
    },
    engines::{
        poppler::PopplerRasterizer,
        tesseract::{TesseractConfig, TesseractRecognizer},
    },
    extract::{DocumentExtractor, ExtractOptions},
    prelude::*,
    ui::Ui,
};

/// Name of the output directory created inside the input directory by default.
const DEFAULT_OUTPUT_SUBDIR: &str = "output";

/// `ocr` command line arguments.
#[derive(Debug, Args)]
pub struct OcrOpts {
    /// Directory containing the PDFs to OCR. Subdirectories are ignored.
    #[clap(value_name = "INPUT_DIR")]
    pub input_dir: PathBuf,

    /// Directory to write text files to. Defaults to `INPUT_DIR/output`.
    #[clap(short = 'o', long = "out", value_name = "OUTPUT_DIR")]
    pub output_dir: Option<PathBuf>,

    #[clap(flatten)]
    pub extract_opts: ExtractOptions,

    #[clap(flatten)]
    pub tesseract: TesseractConfig,

    /// Print progress as JSON lines on standard output, instead of showing a
    /// progress bar.
    #[clap(long)]
    pub json_events: bool,

    /// What portion of files should we allow to fail? Specified as a number
    /// between 0.0 and 1.0.
    #[clap(long, default_value = "1.0")]
    pub allowed_failure_rate: f32,
}

impl OcrOpts {
    /// Where text files should be written.
    pub fn output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| self.input_dir.join(DEFAULT_OUTPUT_SUBDIR))
    }
}

/// The `ocr` subcommand.
#[instrument(level = "debug", skip_all, fields(input_dir = %opts.input_dir.display()))]
pub async fn cmd_ocr(ui: Ui, opts: &OcrOpts) -> Result<()> {
    let extractor = DocumentExtractor::new(
        Arc::new(PopplerRasterizer),
        Arc::new(TesseractRecognizer::new(opts.tesseract.clone())),
        opts.extract_opts.clone(),
    );
    let output_dir = opts.output_dir();
    let handle = BatchRunner::new(extractor)
        .start(&opts.input_dir, &output_dir)
        .context("could not start OCR batch")?;
    info!(
        files_total = handle.files_total(),
        output_dir = %output_dir.display(),
        "OCRing PDFs"
    );

    let (cancel_tx, cancel_rx) = oneshot::channel();
    let ctrl_c = tokio::spawn(watch_ctrl_c(ui.clone(), cancel_tx));
    let cancel_requested = async {
        if cancel_rx.await.is_err() {
            future::pending::<()>().await;
        }
    };
    let outcome = if opts.json_events {
        let mut observer = JsonEventObserver::new(io::stdout());
        let outcome = handle.run_until_done(&mut observer, cancel_requested).await;
        observer.finish().and(outcome)
    } else {
        let mut observer = ProgressBarObserver::new(ui.clone(), &handle);
        handle.run_until_done(&mut observer, cancel_requested).await
    };
    ctrl_c.abort();

    let outcome = outcome?;
    let summary = outcome.summary();
    info!(
        files_completed = summary.files_completed,
        files_failed = summary.files_failed,
        canceled = matches!(outcome, BatchOutcome::Canceled(_)),
        "OCR batch ended"
    );
    check_failure_rate(&outcome, opts.allowed_failure_rate)
}

/// Treat the first Ctrl-C as a cancel request, and the second as "quit now".
async fn watch_ctrl_c(ui: Ui, cancel_tx: oneshot::Sender<()>) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    ui.display_message(
        "🛑",
        "Canceling after the current file. Press Ctrl-C again to quit immediately.",
    );
    if cancel_tx.send(()).is_err() {
        return;
    }
    if tokio::signal::ctrl_c().await.is_ok() {
        std::process::exit(130);
    }
}

/// Fail if too many files could not be converted. Canceled runs always pass.
fn check_failure_rate(outcome: &BatchOutcome, allowed_failure_rate: f32) -> Result<()> {
    let BatchOutcome::Finished(summary) = outcome else {
        return Ok(());
    };
    if summary.files_completed == 0 {
        return Ok(());
    }
    let failure_rate = summary.files_failed as f32 / summary.files_completed as f32;
    if failure_rate > allowed_failure_rate {
        Err(anyhow!(
            "{}/{} ({:.2}%) of files failed, but only {:.2}% were allowed",
            summary.files_failed,
            summary.files_completed,
            failure_rate * 100.0,
            allowed_failure_rate * 100.0
        ))
    } else {
        Ok(())
    }
}

/// Shows batch progress as a progress bar on stderr.
struct ProgressBarObserver {
    ui: Ui,
    pb: ProgressBar,
}

impl ProgressBarObserver {
    fn new(ui: Ui, handle: &BatchHandle) -> Self {
        let pb = ui.new_file_progress_bar(handle.files_total() as u64);
        Self { ui, pb }
    }
}

impl BatchObserver for ProgressBarObserver {
    fn on_progress(&mut self, progress: &BatchProgress) {
        self.pb.set_position(progress.files_completed as u64);
        if let Some(failure) = &progress.failure {
            self.ui.display_message(
                "⚠️",
                &format!("Skipped {}: {}", failure.path.display(), failure.error),
            );
        }
    }

    fn on_finished(&mut self, summary: &BatchSummary) {
        self.pb.finish_with_message("OCRed PDFs");
        self.ui.display_message(
            "✅",
            &format!(
                "Processing complete: {}/{} files converted",
                summary.files_completed - summary.files_failed,
                summary.files_total
            ),
        );
        if summary.files_failed > 0 {
            self.ui.display_message(
                "❌",
                &format!("{} files could not be processed", summary.files_failed),
            );
        }
    }

    fn on_canceled(&mut self, summary: &BatchSummary) {
        self.pb.abandon_with_message("Canceled");
        self.ui.display_message(
            "🛑",
            &format!(
                "Processing canceled after {}/{} files",
                summary.files_completed, summary.files_total
            ),
        );
    }
}

/// Writes each batch event as a line of JSON.
struct JsonEventObserver<W: Write> {
    writer: W,
    /// The first write error, if any. Reported by [`JsonEventObserver::finish`].
    error: Option<anyhow::Error>,
}

impl<W: Write> JsonEventObserver<W> {
    fn new(writer: W) -> Self {
        Self {
            writer,
            error: None,
        }
    }

    fn write_event(&mut self, event: BatchEvent) {
        if self.error.is_some() {
            return;
        }
        let result = serde_json::to_string(&event)
            .context("failed to serialize batch event")
            .and_then(|json| {
                writeln!(self.writer, "{}", json)?;
                self.writer.flush()?;
                Ok(())
            });
        if let Err(err) = result {
            error!("failed to write batch event: {:?}", err);
            self.error = Some(err);
        }
    }

    /// Report any error which happened while writing events.
    fn finish(self) -> Result<()> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl<W: Write> BatchObserver for JsonEventObserver<W> {
    fn on_progress(&mut self, progress: &BatchProgress) {
        self.write_event(BatchEvent::Progress(progress.clone()));
    }

    fn on_finished(&mut self, summary: &BatchSummary) {
        self.write_event(BatchEvent::Finished(summary.clone()));
    }

    fn on_canceled(&mut self, summary: &BatchSummary) {
        self.write_event(BatchEvent::Canceled(summary.clone()));
    }
}
