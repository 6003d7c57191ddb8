//! Running OCR over a whole directory of PDFs.
//!
//! [`BatchRunner::start`] does the quick setup work on the caller's thread,
//! then hands the file list to a single blocking worker which processes the
//! files one at a time. The worker reports back over a channel of
//! [`BatchEvent`]s, and checks a [`CancellationFlag`] before each file.
//!
//! Per-file failures are logged, reported in the next progress event, and
//! skipped. Only setup failures abort a batch.

use std::{
    any::Any,
    fs, io,
    panic::{self, AssertUnwindSafe},
    pin::pin,
};

use schemars::JsonSchema;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{
    async_utils::{JoinWorker, spawn_blocking_worker},
    extract::DocumentExtractor,
    prelude::*,
};

pub use self::{
    cancel::CancellationFlag,
    discover::discover_pdfs,
};

pub mod cancel;
pub mod discover;

/// Errors which stop a batch before any file is processed.
#[derive(Debug, Error)]
pub enum BatchSetupError {
    #[error("cannot create output directory {path:?}: {source}")]
    CreateOutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot list input directory {path:?}: {source}")]
    ReadInputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A file which could not be converted.
#[derive(Clone, Debug, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct FileFailure {
    /// The PDF which failed.
    pub path: PathBuf,

    /// What went wrong.
    pub error: String,
}

/// Progress after one more file has been attempted.
#[derive(Clone, Debug, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct BatchProgress {
    /// `files_completed * 100 / files_total`, rounded down.
    pub percent_complete: u8,

    /// How many files have been attempted, including failures.
    pub files_completed: usize,

    /// How many files are in the batch.
    pub files_total: usize,

    /// How many of the attempted files failed.
    pub files_failed: usize,

    /// Set if the file which was just attempted failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FileFailure>,
}

impl BatchProgress {
    /// Progress after attempting `files_completed` of `files_total` files.
    fn new(
        files_completed: usize,
        files_total: usize,
        files_failed: usize,
        failure: Option<FileFailure>,
    ) -> Self {
        Self {
            percent_complete: percent_complete(files_completed, files_total),
            files_completed,
            files_total,
            files_failed,
            failure,
        }
    }
}

/// Integer percentage, rounded down. An empty batch counts as complete.
fn percent_complete(files_completed: usize, files_total: usize) -> u8 {
    if files_total == 0 {
        return 100;
    }
    let percent = files_completed.min(files_total) * 100 / files_total;
    u8::try_from(percent).unwrap_or(100)
}

/// Counts reported when a batch stops.
#[derive(Clone, Debug, Default, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub struct BatchSummary {
    /// How many files were attempted, including failures.
    pub files_completed: usize,

    /// How many files were in the batch.
    pub files_total: usize,

    /// How many of the attempted files failed.
    pub files_failed: usize,
}

/// Notifications sent from a running batch.
///
/// Every run ends with exactly one `Finished` or `Canceled` event, and nothing
/// follows it.
#[derive(Clone, Debug, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    /// Another file has been attempted.
    Progress(BatchProgress),

    /// Every file was attempted.
    Finished(BatchSummary),

    /// The batch stopped early because it was canceled.
    Canceled(BatchSummary),
}

/// How a batch ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BatchOutcome {
    Finished(BatchSummary),
    Canceled(BatchSummary),
}

impl BatchOutcome {
    /// The final counts, however the batch ended.
    pub fn summary(&self) -> &BatchSummary {
        match self {
            BatchOutcome::Finished(summary) | BatchOutcome::Canceled(summary) => summary,
        }
    }
}

/// Receives events from a batch, via [`BatchHandle::run_until_done`].
pub trait BatchObserver {
    /// Another file has been attempted.
    fn on_progress(&mut self, progress: &BatchProgress);

    /// The batch finished normally.
    fn on_finished(&mut self, summary: &BatchSummary);

    /// The batch was canceled.
    fn on_canceled(&mut self, summary: &BatchSummary);
}

/// Runs a [`DocumentExtractor`] over every PDF in a directory.
#[derive(Clone)]
pub struct BatchRunner {
    extractor: DocumentExtractor,
}

impl BatchRunner {
    /// Create a new runner.
    pub fn new(extractor: DocumentExtractor) -> Self {
        Self { extractor }
    }

    /// Start processing `input_dir`, writing text files to `output_dir`.
    ///
    /// Returns as soon as the worker has been started. Must be called from
    /// inside a Tokio runtime.
    pub fn start(
        &self,
        input_dir: &Path,
        output_dir: &Path,
    ) -> Result<BatchHandle, BatchSetupError> {
        self.start_with_cancellation(input_dir, output_dir, CancellationFlag::new())
    }

    /// Like [`BatchRunner::start`], but using a cancellation flag supplied by
    /// the caller.
    #[instrument(level = "debug", skip_all, fields(input_dir = %input_dir.display()))]
    pub fn start_with_cancellation(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        cancel: CancellationFlag,
    ) -> Result<BatchHandle, BatchSetupError> {
        // The batch is fixed now. Files added later are not picked up. The
        // output directory may live inside the input, so list before creating.
        let batch = discover_pdfs(input_dir)?;
        fs::create_dir_all(output_dir).map_err(|source| {
            BatchSetupError::CreateOutputDir {
                path: output_dir.to_owned(),
                source,
            }
        })?;
        let files_total = batch.len();
        let (tx, rx) = mpsc::unbounded_channel();

        let worker = if batch.is_empty() {
            info!("No PDF files found in {:?}", input_dir.display());
            emit(
                &tx,
                BatchEvent::Finished(BatchSummary {
                    files_completed: 0,
                    files_total: 0,
                    files_failed: 0,
                }),
            );
            JoinWorker::noop()
        } else {
            info!(files_total, "Starting batch");
            let extractor = self.extractor.clone();
            let output_dir = output_dir.to_owned();
            let cancel = cancel.clone();
            spawn_blocking_worker(move || {
                run_batch(&extractor, &batch, &output_dir, &cancel, &tx);
                Ok(())
            })
        };

        Ok(BatchHandle {
            files_total,
            cancel,
            events: rx,
            worker,
        })
    }
}

/// The worker loop. Runs on a blocking thread.
fn run_batch(
    extractor: &DocumentExtractor,
    batch: &[PathBuf],
    output_dir: &Path,
    cancel: &CancellationFlag,
    tx: &mpsc::UnboundedSender<BatchEvent>,
) {
    let files_total = batch.len();
    let mut files_failed = 0;
    let canceled = |files_completed: usize, files_failed: usize| {
        info!(files_completed, files_total, "Batch canceled");
        BatchEvent::Canceled(BatchSummary {
            files_completed,
            files_total,
            files_failed,
        })
    };

    for (idx, pdf_path) in batch.iter().enumerate() {
        // Checkpoint between files.
        if cancel.is_set() {
            emit(tx, canceled(idx, files_failed));
            return;
        }
        info!(
            path = %pdf_path.display(),
            "Processing file {}/{}",
            idx + 1,
            files_total
        );

        // Checkpoint just before the expensive part.
        if cancel.is_set() {
            emit(tx, canceled(idx, files_failed));
            return;
        }
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            extractor.extract(pdf_path, output_dir)
        }));
        let error = match result {
            Ok(Ok(output_path)) => {
                debug!(output = %output_path.display(), "Finished file");
                None
            }
            Ok(Err(err)) => Some(err.to_string()),
            Err(payload) => Some(format!("panicked: {}", panic_message(&*payload))),
        };
        let failure = error.map(|error| {
            warn!(path = %pdf_path.display(), "Skipping file: {}", error);
            files_failed += 1;
            FileFailure {
                path: pdf_path.clone(),
                error,
            }
        });

        emit(
            tx,
            BatchEvent::Progress(BatchProgress::new(
                idx + 1,
                files_total,
                files_failed,
                failure,
            )),
        );
    }

    info!(files_total, files_failed, "Batch finished");
    emit(
        tx,
        BatchEvent::Finished(BatchSummary {
            files_completed: files_total,
            files_total,
            files_failed,
        }),
    );
}

/// Extract the message from a panic payload, if it has one.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}

/// Send an event. If nobody is listening any more, we keep going anyway,
/// because the text files are still useful.
fn emit(tx: &mpsc::UnboundedSender<BatchEvent>, event: BatchEvent) {
    if tx.send(event).is_err() {
        debug!("failed to send batch event because receiver was dropped");
    }
}

/// A running batch.
pub struct BatchHandle {
    files_total: usize,
    cancel: CancellationFlag,
    events: mpsc::UnboundedReceiver<BatchEvent>,
    worker: JoinWorker,
}

impl BatchHandle {
    /// How many PDFs were found when the batch started.
    pub fn files_total(&self) -> usize {
        self.files_total
    }

    /// Ask the batch to stop before its next file. Does not interrupt the
    /// file currently being processed.
    pub fn cancel(&self) {
        self.cancel.set();
    }

    /// Wait for the next event. Returns `None` once the terminal event has
    /// been received and the worker has exited.
    pub async fn next_event(&mut self) -> Option<BatchEvent> {
        self.events.recv().await
    }

    /// [`BatchHandle::run_until_done`], without any way to cancel.
    #[cfg(test)]
    pub async fn run_to_completion(
        self,
        observer: &mut dyn BatchObserver,
    ) -> Result<BatchOutcome> {
        self.run_until_done(observer, std::future::pending()).await
    }

    /// Deliver all remaining events to `observer`, wait for the worker to
    /// exit, and report how the batch ended. Calls [`BatchHandle::cancel`]
    /// once `cancel_requested` resolves.
    pub async fn run_until_done(
        mut self,
        observer: &mut dyn BatchObserver,
        cancel_requested: impl Future<Output = ()>,
    ) -> Result<BatchOutcome> {
        let mut cancel_requested = pin!(cancel_requested);
        let mut cancel_sent = false;
        let mut outcome = None;
        loop {
            // `None` means a cancel was requested.
            let received = tokio::select! {
                event = self.next_event() => Some(event),
                () = &mut cancel_requested, if !cancel_sent => None,
            };
            let Some(event) = received else {
                cancel_sent = true;
                self.cancel();
                continue;
            };
            let Some(event) = event else {
                break;
            };
            match event {
                BatchEvent::Progress(progress) => observer.on_progress(&progress),
                BatchEvent::Finished(summary) => {
                    observer.on_finished(&summary);
                    outcome = Some(BatchOutcome::Finished(summary));
                }
                BatchEvent::Canceled(summary) => {
                    observer.on_canceled(&summary);
                    outcome = Some(BatchOutcome::Canceled(summary));
                }
            }
        }
        self.worker.join().await?;
        outcome.ok_or_else(|| anyhow!("batch worker exited without finishing"))
    }
}
