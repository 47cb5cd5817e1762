use anyhow::Result;
use eframe::egui;

struct ErrorDialog {
    title: String,
    message: String,
}

impl eframe::App for ErrorDialog {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading(&self.title);
            ui.add_space(8.0);
            ui.label(&self.message);
            ui.add_space(12.0);
            if ui.button("OK").clicked() {
                ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            }
        });
    }
}

/// Blocking error window shown before the launcher itself.
pub fn show_error(title: &str, message: &str) -> Result<()> {
    let app = ErrorDialog {
        title: title.to_string(),
        message: message.to_string(),
    };
    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title(title)
            .with_inner_size([460.0, 180.0])
            .with_resizable(false),
        centered: true,
        ..Default::default()
    };
    eframe::run_native(
        "serial-bridge-launcher-error",
        native_options,
        Box::new(|_cc| Ok(Box::new(app))),
    )
    .map_err(|e| anyhow::anyhow!("error dialog failed: {e}"))
}
