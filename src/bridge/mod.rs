//! Supervision of the single serial-to-TCP bridge child process.
//!
//! The supervisor lives on the interaction loop. Output is drained by one
//! worker thread per child (see `worker`) which reports back over a channel;
//! the loop hands `Exited` events to [`BridgeSupervisor::finish`].

mod worker;

use crate::error::LauncherError;
use crate::model::BridgeEvent;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Bridge executable used when none is configured.
pub const DEFAULT_BRIDGE_PROGRAM: &str = "esp_rfc2217_server";

/// How to invoke the bridge: `<program> <args..> -p <tcp_port> <serial_port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for BridgeCommand {
    fn default() -> Self {
        Self::new(DEFAULT_BRIDGE_PROGRAM)
    }
}

impl BridgeCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    fn argv(&self, serial_port: &str, tcp_port: &str) -> Vec<String> {
        let mut argv = self.args.clone();
        argv.extend(["-p".to_string(), tcp_port.to_string(), serial_port.to_string()]);
        argv
    }

    /// Command line as echoed into the log before launching.
    pub fn display(&self, serial_port: &str, tcp_port: &str) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.argv(serial_port, tcp_port));
        parts.join(" ")
    }
}

/// Check a user-supplied TCP port: ASCII digits only, within the TCP range.
pub fn validate_tcp_port(input: &str) -> Result<u16, LauncherError> {
    let input = input.trim();
    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(LauncherError::Validation("TCP port must be a number.".into()));
    }
    input.parse::<u16>().map_err(|_| {
        LauncherError::Validation(format!("TCP port {input} is out of range (0-65535)."))
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Idle,
    Running { pid: u32 },
    Stopping { pid: u32 },
}

impl BridgeState {
    pub fn pid(&self) -> Option<u32> {
        match self {
            BridgeState::Idle => None,
            BridgeState::Running { pid } | BridgeState::Stopping { pid } => Some(*pid),
        }
    }
}

pub struct BridgeSupervisor {
    command: BridgeCommand,
    state: BridgeState,
    /// Set by the output worker once the current child has been reaped.
    reaped: Arc<AtomicBool>,
    event_tx: UnboundedSender<BridgeEvent>,
}

impl BridgeSupervisor {
    pub fn new(command: BridgeCommand, event_tx: UnboundedSender<BridgeEvent>) -> Self {
        Self {
            command,
            state: BridgeState::Idle,
            reaped: Arc::new(AtomicBool::new(false)),
            event_tx,
        }
    }

    pub fn command(&self) -> &BridgeCommand {
        &self.command
    }

    #[cfg(any(test, feature = "gui"))]
    pub fn state(&self) -> BridgeState {
        self.state
    }

    /// Validate inputs and spawn the bridge. Returns the child's PID.
    pub fn start(&mut self, serial_port: &str, tcp_port: &str) -> Result<u32, LauncherError> {
        if let Some(pid) = self.state.pid() {
            return Err(LauncherError::AlreadyRunning(pid));
        }
        let tcp_port = validate_tcp_port(tcp_port)?.to_string();
        if serial_port.trim().is_empty() {
            return Err(LauncherError::Validation(
                "Please select a serial port first.".into(),
            ));
        }

        let (reader, writer) = std::io::pipe().map_err(|e| self.launch_failed(e))?;
        let stderr_writer = writer.try_clone().map_err(|e| self.launch_failed(e))?;

        let mut cmd = Command::new(&self.command.program);
        cmd.args(self.command.argv(serial_port, &tcp_port))
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null())
            .stdout(writer)
            .stderr(stderr_writer);
        no_window(&mut cmd);

        let spawned = cmd.spawn();
        // Drop our copies of the write end so the reader sees EOF when the child exits.
        drop(cmd);
        let child = spawned.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                LauncherError::Launch {
                    message: format!("ERROR: {} not found.", self.command.program),
                    remedy: Some(format!(
                        "Install esptool (pip install esptool) or pass --bridge <path>; \
                         it provides {DEFAULT_BRIDGE_PROGRAM}."
                    )),
                }
            } else {
                self.launch_failed(e)
            }
        })?;

        let pid = child.id();
        let reaped = Arc::new(AtomicBool::new(false));
        if let Err(e) =
            worker::spawn_output_reader(reader, child, reaped.clone(), self.event_tx.clone())
        {
            // The child was moved into the failed closure and dropped; make sure it does not linger.
            terminate(pid);
            return Err(self.launch_failed(e));
        }

        tracing::info!(
            "bridge started (pid {pid}): {}",
            self.command.display(serial_port, &tcp_port)
        );
        self.reaped = reaped;
        self.state = BridgeState::Running { pid };
        Ok(pid)
    }

    /// Ask the running bridge to terminate. Never force-kills and never blocks.
    ///
    /// Returns false when no child is alive.
    pub fn stop(&mut self) -> bool {
        match self.state {
            BridgeState::Idle => false,
            BridgeState::Running { pid } | BridgeState::Stopping { pid } => {
                match self.live_pid() {
                    Some(pid) => {
                        tracing::info!("requesting bridge pid {pid} to terminate");
                        terminate(pid);
                    }
                    None => tracing::debug!("bridge pid {pid} already exited"),
                }
                self.state = BridgeState::Stopping { pid };
                true
            }
        }
    }

    /// Record the exit reported by the worker. Returns true if `pid` was the
    /// supervised child, in which case the supervisor is idle again.
    pub fn finish(&mut self, pid: u32) -> bool {
        if self.state.pid() == Some(pid) {
            self.state = BridgeState::Idle;
            true
        } else {
            false
        }
    }

    /// PID of the child if it has not been reaped yet; only such a PID is safe to signal.
    fn live_pid(&self) -> Option<u32> {
        self.state
            .pid()
            .filter(|_| !self.reaped.load(Ordering::Acquire))
    }

    fn launch_failed(&self, e: std::io::Error) -> LauncherError {
        LauncherError::Launch {
            message: format!("ERROR: failed to start {}: {e}", self.command.program),
            remedy: None,
        }
    }
}

impl Drop for BridgeSupervisor {
    fn drop(&mut self) {
        if let Some(pid) = self.live_pid() {
            terminate(pid);
        }
    }
}

#[cfg(target_os = "windows")]
fn no_window(cmd: &mut Command) -> &mut Command {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;
    cmd.creation_flags(CREATE_NO_WINDOW)
}

#[cfg(not(target_os = "windows"))]
fn no_window(cmd: &mut Command) -> &mut Command {
    cmd
}

#[cfg(unix)]
fn terminate(pid: u32) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;
    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        tracing::warn!("failed to signal bridge pid {pid}: {e}");
    }
}

#[cfg(windows)]
fn terminate(pid: u32) {
    use winapi::um::handleapi::CloseHandle;
    use winapi::um::processthreadsapi::{OpenProcess, TerminateProcess};
    use winapi::um::winnt::PROCESS_TERMINATE;
    // SAFETY: the handle is checked for null and closed before returning.
    unsafe {
        let handle = OpenProcess(PROCESS_TERMINATE, 0, pid);
        if handle.is_null() {
            tracing::warn!("failed to open bridge pid {pid} for termination");
            return;
        }
        if TerminateProcess(handle, 1) == 0 {
            tracing::warn!("failed to terminate bridge pid {pid}");
        }
        CloseHandle(handle);
    }
}
