use crate::bridge::{validate_tcp_port, BridgeCommand, BridgeState, BridgeSupervisor};
use crate::error::LauncherError;
use crate::model::{exit_status_line, BridgeEvent};
use std::collections::VecDeque;
use tokio::sync::mpsc::{self, UnboundedReceiver};

/// Oldest lines are dropped beyond this many.
const MAX_LOG_LINES: usize = 10_000;

/// Enable state of the Start/Stop controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub start_enabled: bool,
    pub stop_enabled: bool,
}

/// Interaction-loop state: the supervisor, its event channel and the log view.
///
/// Owned by the UI thread only; the output worker talks to it exclusively
/// through the channel drained by [`Session::pump`].
pub struct Session {
    supervisor: BridgeSupervisor,
    event_rx: UnboundedReceiver<BridgeEvent>,
    log: VecDeque<String>,
    launched_port: Option<String>,
}

impl Session {
    pub fn new(command: BridgeCommand) -> Self {
        // Unbounded so the output worker never blocks on a slow frame.
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            supervisor: BridgeSupervisor::new(command, event_tx),
            event_rx,
            log: VecDeque::new(),
            launched_port: None,
        }
    }

    pub fn log(&self) -> &VecDeque<String> {
        &self.log
    }

    pub fn state(&self) -> BridgeState {
        self.supervisor.state()
    }

    /// Serial port of the most recent successful launch, if any.
    pub fn launched_port(&self) -> Option<&str> {
        self.launched_port.as_deref()
    }

    pub fn controls(&self) -> Controls {
        match self.supervisor.state() {
            BridgeState::Idle => Controls {
                start_enabled: true,
                stop_enabled: false,
            },
            BridgeState::Running { .. } | BridgeState::Stopping { .. } => Controls {
                start_enabled: false,
                stop_enabled: true,
            },
        }
    }

    /// Launch the bridge. Launch failures are also written to the log.
    ///
    /// The TCP port is normalized first, so the echoed command line is the
    /// one actually spawned.
    pub fn start(&mut self, serial_port: &str, tcp_port: &str) -> Result<u32, LauncherError> {
        let tcp_port = validate_tcp_port(tcp_port)?.to_string();
        if self.supervisor.state() == BridgeState::Idle && !serial_port.trim().is_empty() {
            let line = format!(
                "> {}",
                self.supervisor.command().display(serial_port, &tcp_port)
            );
            self.push_log(line);
        }

        match self.supervisor.start(serial_port, &tcp_port) {
            Ok(pid) => {
                self.launched_port = Some(serial_port.to_string());
                Ok(pid)
            }
            Err(e) => {
                if let LauncherError::Launch { .. } = e {
                    self.push_log(e.to_string());
                    if let Some(remedy) = e.remedy() {
                        self.push_log(format!("  {remedy}"));
                    }
                }
                Err(e)
            }
        }
    }

    pub fn stop(&mut self) -> bool {
        let requested = self.supervisor.stop();
        if requested {
            self.push_log("[Stopping...]".to_string());
        }
        requested
    }

    /// Drain pending worker events without blocking. Returns how many were applied.
    pub fn pump(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(ev) = self.event_rx.try_recv() {
            tracing::trace!(pid = ev.pid(), "bridge event");
            self.apply(ev);
            applied += 1;
        }
        applied
    }

    fn apply(&mut self, ev: BridgeEvent) {
        match ev {
            BridgeEvent::Line { text, .. } => self.push_log(text),
            BridgeEvent::Exited { pid, code } => {
                if self.supervisor.finish(pid) {
                    self.push_log(exit_status_line(code));
                } else {
                    tracing::debug!("ignoring exit of untracked pid {pid}");
                }
            }
        }
    }

    fn push_log(&mut self, line: String) {
        if self.log.len() == MAX_LOG_LINES {
            self.log.pop_front();
        }
        self.log.push_back(line);
    }
}
