//! The `list` subcommand.

use std::io::{self, Write as _};

use clap::Args;

use crate::{batch::discover_pdfs, prelude::*, ui::Ui};

/// `list` command line arguments.
#[derive(Debug, Args)]
pub struct ListOpts {
    /// Directory to look for PDFs in.
    #[clap(value_name = "INPUT_DIR")]
    pub input_dir: PathBuf,
}

/// Print the PDFs which `ocr` would process, one per line.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_list(ui: Ui, opts: &ListOpts) -> Result<()> {
    let pdfs = discover_pdfs(&opts.input_dir)?;

    let mut stdout = io::stdout().lock();
    for pdf in &pdfs {
        writeln!(stdout, "{}", pdf.display()).context("failed to write to stdout")?;
    }
    stdout.flush().context("failed to flush stdout")?;

    if pdfs.is_empty() {
        ui.display_message(
            "📂",
            &format!("No PDF files found in {}", opts.input_dir.display()),
        );
    } else {
        ui.display_message("📂", &format!("{} PDF files found", pdfs.len()));
    }
    Ok(())
}
