//! This file defines the chunkbeam binary entry point.

use chunkbeam::app;
use chunkbeam::cli::{self, Command};
use chunkbeam::error::{ErrorReport, RechunkError};
use chunkbeam::metrics;
use chunkbeam::tracing;

use serde::Serialize;
use std::process::ExitCode;

/// Print a value to stdout as pretty JSON.
fn print_json<T: Serialize>(value: &T) -> Result<(), RechunkError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Application entry point
fn main() -> ExitCode {
    let args = cli::parse();
    tracing::init_tracing();
    metrics::register_metrics();

    let result = match &args.command {
        Command::Plan(plan_args) => app::plan(plan_args).and_then(|plan| print_json(&plan)),
        Command::Run(run_args) => app::run(run_args).and_then(|summary| print_json(&summary)),
    };

    if args.print_metrics {
        print!("{}", metrics::gather());
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let report = ErrorReport::from(error);
            match serde_json::to_string_pretty(&report) {
                Ok(json) => eprintln!("{}", json),
                Err(_) => eprintln!("{}", report.message),
            }
            ExitCode::FAILURE
        }
    }
}
