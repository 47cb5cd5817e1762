use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const APP_DIR: &str = "serial-bridge-launcher";
const LOG_FILE: &str = "launcher.log";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    /// Terminal invocations.
    Stderr,
    /// Detached workers and windows, which have no usable stderr.
    File,
}

pub fn log_file_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join(LOG_FILE)
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Falls back to stderr if the log file cannot be opened.
pub fn init(target: LogTarget) -> Option<PathBuf> {
    if target == LogTarget::File {
        let path = log_file_path();
        let opened = path
            .parent()
            .map(std::fs::create_dir_all)
            .transpose()
            .and_then(|_| OpenOptions::new().create(true).append(true).open(&path));
        match opened {
            Ok(file) => {
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(filter())
                    .with_ansi(false)
                    .with_writer(Mutex::new(file))
                    .try_init();
                return Some(path);
            }
            Err(e) => eprintln!("cannot open log file {}: {e}", path.display()),
        }
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(std::io::stderr)
        .try_init();
    None
}
