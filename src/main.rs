mod bridge;
mod cli;
mod detach;
mod error;
#[cfg(feature = "gui")]
mod gui;
mod instance;
mod logging;
mod model;
mod ports;
mod preflight;
#[cfg(feature = "gui")]
mod session;

use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = cli::Cli::parse();

    // The detached worker has no terminal; its diagnostics go to a file.
    let target = if detach::is_detached_worker() {
        logging::LogTarget::File
    } else {
        logging::LogTarget::Stderr
    };
    if let Some(path) = logging::init(target) {
        tracing::debug!("logging to {}", path.display());
    }

    match cli::run(args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
