// SPDX-License-Identifier: MIT OR Apache-2.0

use std::path::PathBuf;
use std::process::ExitCode;
use clap::Parser;
use log::LevelFilter;
use mp4_gpx::{ check_output, convert_files, inputs, OnFileError, RunOutcome };

#[derive(Parser)]
#[command(author, version, about = "Extracts GPS data from Novatek MP4 files and writes it as GPX", long_about = None)]
struct Cli {
    /// Input file(s) or directory(ies)
    #[arg(short, long = "input", num_args = 1.., required = true)]
    input: Vec<PathBuf>,
    /// Output file, defaults to the first input + ".gpx"
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Overwrite the output file if it exists
    #[arg(short, long)]
    force: bool,
    /// Continue with the remaining inputs when one can't be read
    #[arg(long)]
    keep_going: bool,
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { LevelFilter::Debug } else if cli.quiet { LevelFilter::Warn } else { LevelFilter::Info };
    env_logger::Builder::new().filter_level(level).parse_default_env().init();

    let files = inputs::collect_inputs(&cli.input);
    if files.is_empty() {
        log::error!("No MP4 input files found");
        return ExitCode::FAILURE;
    }
    let output = cli.output.unwrap_or_else(|| {
        let mut name = files[0].clone().into_os_string();
        name.push(".gpx");
        PathBuf::from(name)
    });
    if let Err(e) = check_output(&output, cli.force) {
        log::error!("{e}, use -f to overwrite it");
        return ExitCode::FAILURE;
    }

    let on_error = if cli.keep_going { OnFileError::Skip } else { OnFileError::Abort };
    match convert_files(&files, &output, on_error) {
        Ok(outcome) => {
            let summary = outcome.summary();
            let (chunk_index, raw_scan) = summary.totals();
            log::info!("GPS index: {chunk_index}");
            log::info!("Raw scan: {raw_scan}");
            for (path, reason) in &summary.failed {
                log::warn!("Not processed: '{}': {reason}", path.display());
            }
            match outcome {
                RunOutcome::Written(summary) => {
                    log::info!("Success! Wrote {} points to '{}'", summary.samples.len(), output.display());
                    ExitCode::SUCCESS
                }
                RunOutcome::NoGpsData(_) => {
                    log::error!("GPS data not found...");
                    ExitCode::FAILURE
                }
            }
        }
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
