use super::GuiConfig;
use crate::bridge::BridgeState;
use crate::error::LauncherError;
use crate::model::DEFAULT_TCP_PORT;
use crate::ports::{PortEnumerator, PortList};
use crate::session::Session;
use eframe::egui;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound between frames so worker output shows up without input events.
const TICK: Duration = Duration::from_millis(100);

struct Warning {
    title: &'static str,
    message: String,
}

pub(super) struct LauncherApp {
    enumerator: Box<dyn PortEnumerator>,
    initial_serial_port: Option<String>,
    ports: PortList,
    tcp_input: String,
    tcp_locked: bool,
    session: Session,
    warning: Option<Warning>,
    launched: Arc<AtomicBool>,
}

impl LauncherApp {
    pub(super) fn new(config: GuiConfig, launched: Arc<AtomicBool>) -> Self {
        let ports = PortList::refresh(
            config.enumerator.as_ref(),
            config.initial_serial_port.as_deref(),
        );
        Self {
            initial_serial_port: config.initial_serial_port,
            tcp_input: config.locked_tcp_port.unwrap_or(DEFAULT_TCP_PORT).to_string(),
            tcp_locked: config.locked_tcp_port.is_some(),
            session: Session::new(config.command),
            enumerator: config.enumerator,
            ports,
            warning: None,
            launched,
        }
    }

    fn refresh_ports(&mut self) {
        // Keep the current choice across refreshes when it is still present.
        let preferred = self
            .ports
            .selected_port()
            .map(|p| p.device.clone())
            .or_else(|| self.initial_serial_port.clone());
        self.ports = PortList::refresh(self.enumerator.as_ref(), preferred.as_deref());
    }

    fn on_start(&mut self) {
        let Some(port) = self.ports.selected_port().map(|p| p.device.clone()) else {
            self.warning = Some(Warning {
                title: "No port selected",
                message: "Please select a serial port first.".into(),
            });
            return;
        };

        match self.session.start(&port, &self.tcp_input) {
            Ok(pid) => {
                tracing::info!(
                    "bridge pid {pid} serving {}",
                    self.session.launched_port().unwrap_or(&port)
                );
                self.launched.store(true, Ordering::Relaxed);
            }
            Err(e @ LauncherError::Validation(_)) => {
                self.warning = Some(Warning {
                    title: "Invalid TCP port",
                    message: e.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!("{e}");
                let mut message = e.to_string();
                if let Some(remedy) = e.remedy() {
                    message.push('\n');
                    message.push_str(remedy);
                }
                self.warning = Some(Warning {
                    title: e.title(),
                    message,
                });
            }
        }
    }

    fn draw_controls(&mut self, ui: &mut egui::Ui) {
        ui.label("Select a serial port:");
        ui.horizontal(|ui| {
            let labels = self.ports.labels();
            let selected_text = self.ports.selected_text();
            let selected = &mut self.ports.selected;
            egui::ComboBox::from_label("")
                .width(ui.available_width() - 90.0)
                .selected_text(selected_text)
                .show_ui(ui, |ui| {
                    for (idx, label) in labels.iter().enumerate() {
                        ui.selectable_value(selected, Some(idx), label);
                    }
                });
            if ui.button("Refresh").clicked() {
                self.refresh_ports();
            }
        });

        ui.add_space(8.0);
        ui.horizontal(|ui| {
            let label = if self.tcp_locked {
                "TCP Port (Locked):"
            } else {
                "TCP Port:"
            };
            ui.label(label);
            ui.add(
                egui::TextEdit::singleline(&mut self.tcp_input)
                    .desired_width(64.0)
                    .interactive(!self.tcp_locked),
            );

            ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                let controls = self.session.controls();
                if ui
                    .add_enabled(controls.stop_enabled, egui::Button::new("Stop"))
                    .clicked()
                {
                    self.session.stop();
                }
                if ui
                    .add_enabled(controls.start_enabled, egui::Button::new("Start"))
                    .clicked()
                {
                    self.on_start();
                }
                if let BridgeState::Stopping { pid } = self.session.state() {
                    ui.weak(format!("stopping pid {pid}…"));
                }
            });
        });
    }

    fn draw_log(&self, ui: &mut egui::Ui) {
        let row_height = ui.text_style_height(&egui::TextStyle::Monospace);
        let log = self.session.log();
        egui::Frame::none()
            .fill(egui::Color32::from_rgb(0x1e, 0x1e, 0x1e))
            .inner_margin(6.0)
            .show(ui, |ui| {
                egui::ScrollArea::vertical()
                    .auto_shrink([false, false])
                    .stick_to_bottom(true)
                    .show_rows(ui, row_height, log.len(), |ui, range| {
                        for line in log.range(range) {
                            ui.label(
                                egui::RichText::new(line)
                                    .monospace()
                                    .color(egui::Color32::from_rgb(0xcc, 0xcc, 0xcc)),
                            );
                        }
                    });
            });
    }

    fn draw_warning(&mut self, ctx: &egui::Context) {
        let Some(warning) = &self.warning else {
            return;
        };
        let mut dismissed = false;
        egui::Window::new(warning.title)
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(&warning.message);
                ui.add_space(8.0);
                if ui.button("OK").clicked() {
                    dismissed = true;
                }
            });
        if dismissed {
            self.warning = None;
        }
    }
}

impl eframe::App for LauncherApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // All worker output is applied here, on the UI thread.
        self.session.pump();
        ctx.request_repaint_after(TICK);

        let modal = self.warning.is_some();
        egui::TopBottomPanel::top("controls")
            .frame(egui::Frame::side_top_panel(&ctx.style()).inner_margin(16.0))
            .show(ctx, |ui| {
                ui.add_enabled_ui(!modal, |ui| self.draw_controls(ui));
            });
        egui::CentralPanel::default().show(ctx, |ui| self.draw_log(ui));
        self.draw_warning(ctx);
    }
}
