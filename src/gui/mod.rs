mod app;
mod dialog;

use crate::bridge::BridgeCommand;
use crate::ports::PortEnumerator;
use anyhow::Result;
use eframe::egui;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use dialog::show_error;

const WIDTH: f32 = 700.0;
const HEIGHT: f32 = 380.0;

pub struct GuiConfig {
    pub initial_serial_port: Option<String>,
    /// TCP port fixed on the command line; the entry is read-only when set.
    pub locked_tcp_port: Option<u16>,
    pub command: BridgeCommand,
    pub enumerator: Box<dyn PortEnumerator>,
}

/// Show the launcher window until it is closed.
///
/// Returns whether a bridge was launched at least once.
pub fn run(config: GuiConfig) -> Result<bool> {
    let launched = Arc::new(AtomicBool::new(false));
    let app = app::LauncherApp::new(config, launched.clone());

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Serial Bridge Launcher")
            .with_inner_size([WIDTH, HEIGHT])
            .with_min_inner_size([WIDTH, HEIGHT]),
        centered: true,
        ..Default::default()
    };

    eframe::run_native(
        "serial-bridge-launcher",
        native_options,
        Box::new(|_cc| Ok(Box::new(app))),
    )
    .map_err(|e| anyhow::anyhow!("launcher window failed: {e}"))?;

    Ok(launched.load(Ordering::Relaxed))
}
