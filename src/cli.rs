use crate::bridge::{BridgeCommand, BridgeSupervisor, DEFAULT_BRIDGE_PROGRAM};
use crate::detach::{self, RelaunchArgs};
use crate::instance::{self, InstanceLock};
use crate::model::{exit_status_line, BridgeEvent, DEFAULT_TCP_PORT};
use crate::ports::{PortList, SystemPorts};
use crate::preflight;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "serial-bridge-launcher",
    version,
    about = "Pick a serial port and run an RFC2217 serial-to-TCP bridge for it"
)]
pub struct Cli {
    /// Serial port to preselect (e.g. COM3, /dev/ttyUSB0)
    #[arg(long, short = 's')]
    pub serial_port: Option<String>,

    /// TCP port for the bridge; also prevents duplicate launches for this port
    #[arg(long, short = 't', value_parser = clap::value_parser!(u16).range(1..))]
    pub tcp_port: Option<u16>,

    /// Bridge executable (default: esp_rfc2217_server on PATH)
    #[arg(long, env = "SERIAL_BRIDGE_PROGRAM")]
    pub bridge: Option<String>,

    /// Directory holding the per-port lock files (default: next to the executable)
    #[arg(long, env = "SERIAL_BRIDGE_LOCK_DIR")]
    pub lock_dir: Option<PathBuf>,

    /// Stay attached to the invoking terminal instead of relaunching in the background
    #[arg(long)]
    pub foreground: bool,

    /// Run the bridge for --serial-port without a window, streaming its log to stdout
    #[arg(long, conflicts_with = "list")]
    pub headless: bool,

    /// Print the available serial ports and exit
    #[arg(long)]
    pub list: bool,

    /// With --list, print JSON instead of text
    #[arg(long, requires = "list")]
    pub json: bool,
}

impl Cli {
    pub fn bridge_command(&self) -> BridgeCommand {
        BridgeCommand::new(self.bridge.as_deref().unwrap_or(DEFAULT_BRIDGE_PROGRAM))
    }

    pub fn lock_dir(&self) -> PathBuf {
        self.lock_dir.clone().unwrap_or_else(instance::default_lock_dir)
    }

    pub fn instance_lock(&self) -> Option<InstanceLock> {
        self.tcp_port
            .map(|port| InstanceLock::new(&self.lock_dir(), port))
    }

    fn relaunch_args(&self) -> RelaunchArgs {
        RelaunchArgs {
            serial_port: self.serial_port.clone(),
            tcp_port: self.tcp_port,
            bridge: self.bridge.clone(),
            lock_dir: self.lock_dir.clone(),
        }
    }
}

/// What a single execution of the program does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    ListPorts,
    Headless,
    /// Another instance owns the TCP port; exit 0 without doing anything.
    AlreadyActive,
    Relaunch,
    Interactive,
}

/// Decide the execution path.
///
/// `detached` tells whether this is the worker spawned by a relaunch;
/// `instance_active` is consulted only for initial invocations.
pub fn plan(args: &Cli, detached: bool, instance_active: impl FnOnce() -> bool) -> Plan {
    if args.list {
        return Plan::ListPorts;
    }
    if args.headless || !cfg!(feature = "gui") {
        return Plan::Headless;
    }
    if detached {
        return Plan::Interactive;
    }
    if args.tcp_port.is_some() && instance_active() {
        return Plan::AlreadyActive;
    }
    if args.foreground {
        Plan::Interactive
    } else {
        Plan::Relaunch
    }
}

/// Run the program and return its exit code.
pub fn run(args: Cli) -> Result<u8> {
    let lock = args.instance_lock();
    let decided = plan(&args, detach::is_detached_worker(), || {
        lock.as_ref().is_some_and(InstanceLock::is_instance_active)
    });
    tracing::debug!("execution plan: {decided:?}");

    match decided {
        Plan::ListPorts => list_ports(args.json),
        Plan::Headless => run_headless(args),
        Plan::AlreadyActive => {
            if let Some(port) = args.tcp_port {
                println!("Serial bridge launcher already running for TCP port {port}");
            }
            Ok(0)
        }
        Plan::Relaunch => Ok(detach::relaunch_detached(&args.relaunch_args())),
        Plan::Interactive => run_interactive(args),
    }
}

fn list_ports(json: bool) -> Result<u8> {
    let list = PortList::refresh(&SystemPorts, None);
    if json {
        let out = serde_json::to_string_pretty(list.ports()).context("serialize port list")?;
        println!("{out}");
    } else if list.is_empty() {
        eprintln!("No serial ports detected.");
    } else {
        for label in list.labels() {
            println!("{label}");
        }
    }
    Ok(0)
}

#[cfg(feature = "gui")]
fn run_interactive(args: Cli) -> Result<u8> {
    let command = args.bridge_command();
    if let Err(e) = preflight::ensure_dependencies(&command) {
        tracing::error!("{e}");
        crate::gui::show_error(e.title(), &e.to_string())?;
        return Ok(1);
    }

    // Released on drop, after the window and the bridge are gone.
    let held = args.instance_lock().map(InstanceLock::hold);
    if let Some(held) = &held {
        tracing::info!("holding {}", held.lock().path().display());
    }

    let launched = crate::gui::run(crate::gui::GuiConfig {
        initial_serial_port: args.serial_port.clone(),
        locked_tcp_port: args.tcp_port,
        command,
        enumerator: Box::new(SystemPorts),
    })?;

    if launched {
        Ok(0)
    } else {
        tracing::info!("window closed without launching a bridge");
        Ok(1)
    }
}

#[cfg(not(feature = "gui"))]
fn run_interactive(args: Cli) -> Result<u8> {
    run_headless(args)
}

fn run_headless(args: Cli) -> Result<u8> {
    let Some(serial_port) = args.serial_port.clone() else {
        eprintln!("--headless requires --serial-port (see --list)");
        return Ok(1);
    };
    let command = args.bridge_command();
    if let Err(e) = preflight::ensure_dependencies(&command) {
        tracing::error!("{e}");
        eprintln!("{e}");
        return Ok(1);
    }

    let lock = args.instance_lock();
    if lock.as_ref().is_some_and(InstanceLock::is_instance_active) {
        println!("Serial bridge already running for this TCP port");
        return Ok(0);
    }
    let _held = lock.map(InstanceLock::hold);

    let tcp_port = args.tcp_port.unwrap_or(DEFAULT_TCP_PORT);
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build tokio runtime")?;
    rt.block_on(stream_bridge(command, serial_port, tcp_port))
}

/// Run one bridge to completion, relaying its output to stdout.
async fn stream_bridge(command: BridgeCommand, serial_port: String, tcp_port: u16) -> Result<u8> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<BridgeEvent>();
    let mut supervisor = BridgeSupervisor::new(command, event_tx);
    let (out_tx, out_handle) = spawn_output_writer();
    let tcp_port = tcp_port.to_string();

    let _ = out_tx.send(OutputLine::Stderr(format!(
        "> {}",
        supervisor.command().display(&serial_port, &tcp_port)
    )));

    let code = match supervisor.start(&serial_port, &tcp_port) {
        Err(e) => {
            let _ = out_tx.send(OutputLine::Stderr(e.to_string()));
            if let Some(remedy) = e.remedy() {
                let _ = out_tx.send(OutputLine::Stderr(format!("  {remedy}")));
            }
            None
        }
        Ok(_) => {
            let mut stopping = false;
            loop {
                tokio::select! {
                    ev = event_rx.recv() => match ev {
                        Some(BridgeEvent::Line { text, .. }) => {
                            let _ = out_tx.send(OutputLine::Stdout(text));
                        }
                        Some(BridgeEvent::Exited { pid, code }) => {
                            supervisor.finish(pid);
                            let _ = out_tx.send(OutputLine::Stderr(exit_status_line(code)));
                            break Some(code);
                        }
                        None => break None,
                    },
                    // Stop is advisory: keep draining until the bridge actually exits.
                    Ok(()) = tokio::signal::ctrl_c(), if !stopping => {
                        stopping = true;
                        supervisor.stop();
                        let _ = out_tx.send(OutputLine::Stderr("[Stopping...]".into()));
                    }
                }
            }
        }
    };

    drop(out_tx);
    let _ = out_handle.await;
    Ok(if code == Some(0) { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> Cli {
        let mut full = vec!["serial-bridge-launcher"];
        full.extend_from_slice(argv);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn parses_short_and_long_flags() {
        let args = parse(&["-s", "/dev/ttyUSB0", "--tcp-port", "2217"]);
        assert_eq!(args.serial_port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(args.tcp_port, Some(2217));
        assert!(!args.foreground);
    }

    #[test]
    fn rejects_bad_tcp_port() {
        for bad in ["abc", "-1", "0", "70000"] {
            assert!(
                Cli::try_parse_from(["serial-bridge-launcher", "--tcp-port", bad]).is_err(),
                "{bad}"
            );
        }
    }

    #[test]
    fn json_requires_list() {
        assert!(Cli::try_parse_from(["serial-bridge-launcher", "--json"]).is_err());
        assert!(Cli::try_parse_from(["serial-bridge-launcher", "--list", "--json"]).is_ok());
    }

    #[cfg(feature = "gui")]
    #[test]
    fn initial_invocation_with_active_instance_exits() {
        let args = parse(&["-t", "2217"]);
        assert_eq!(plan(&args, false, || true), Plan::AlreadyActive);
        assert_eq!(plan(&args, false, || false), Plan::Relaunch);
    }

    #[cfg(feature = "gui")]
    #[test]
    fn without_tcp_port_the_guard_is_not_consulted() {
        let args = parse(&["-s", "COM3"]);
        assert_eq!(
            plan(&args, false, || panic!("guard must not run without a TCP port")),
            Plan::Relaunch
        );
    }

    #[cfg(feature = "gui")]
    #[test]
    fn detached_worker_skips_guard_and_detach() {
        let args = parse(&["-t", "2217"]);
        assert_eq!(
            plan(&args, true, || panic!("worker must not re-check the guard")),
            Plan::Interactive
        );
    }

    #[cfg(feature = "gui")]
    #[test]
    fn foreground_runs_in_place_after_guard() {
        let args = parse(&["--foreground", "-t", "2217"]);
        assert_eq!(plan(&args, false, || false), Plan::Interactive);
        assert_eq!(plan(&args, false, || true), Plan::AlreadyActive);
    }

    #[test]
    fn list_and_headless_take_precedence() {
        assert_eq!(plan(&parse(&["--list"]), true, || true), Plan::ListPorts);
        assert_eq!(
            plan(&parse(&["--headless", "-s", "COM1"]), false, || true),
            Plan::Headless
        );
    }

    #[test]
    fn relaunch_forwards_overrides() {
        let args = parse(&["-s", "COM3", "-t", "4000", "--bridge", "b", "--lock-dir", "/x"]);
        let r = args.relaunch_args();
        assert_eq!(r.serial_port.as_deref(), Some("COM3"));
        assert_eq!(r.tcp_port, Some(4000));
        assert_eq!(r.bridge.as_deref(), Some("b"));
        assert_eq!(r.lock_dir, Some(PathBuf::from("/x")));
    }

    #[test]
    fn lock_dir_override_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let args = parse(&["-t", "2217", "--lock-dir", dir.path().to_str().unwrap()]);
        let lock = args.instance_lock().unwrap();
        assert_eq!(lock.path(), dir.path().join(".serial-bridge-tcp2217.lock"));
    }

    #[cfg(unix)]
    #[test]
    fn headless_stream_reports_bridge_exit() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let ok = BridgeCommand {
            program: "sh".into(),
            args: vec!["-c".into(), "echo streaming".into(), "bridge".into()],
        };
        assert_eq!(rt.block_on(stream_bridge(ok, "/dev/null".into(), 2217)).unwrap(), 0);

        let failing = BridgeCommand {
            program: "sh".into(),
            args: vec!["-c".into(), "exit 2".into(), "bridge".into()],
        };
        assert_eq!(rt.block_on(stream_bridge(failing, "/dev/null".into(), 2217)).unwrap(), 1);

        let missing = BridgeCommand::new("serial-bridge-missing-binary-xyz");
        assert_eq!(rt.block_on(stream_bridge(missing, "/dev/null".into(), 2217)).unwrap(), 1);
    }
}
