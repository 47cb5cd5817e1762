//! Re-executing the launcher as a background process detached from the
//! invoking terminal.

use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Environment marker set on the detached copy so it does not detach again.
pub const DETACHED_ENV: &str = "SERIAL_BRIDGE_DETACHED";

/// Whether this process is the detached worker spawned by an earlier invocation.
pub fn is_detached_worker() -> bool {
    std::env::var_os(DETACHED_ENV).is_some_and(|v| v == OsStr::new("1"))
}

/// Arguments forwarded to the detached copy.
#[derive(Debug, Clone, Default)]
pub struct RelaunchArgs {
    pub serial_port: Option<String>,
    pub tcp_port: Option<u16>,
    pub bridge: Option<String>,
    pub lock_dir: Option<PathBuf>,
}

impl RelaunchArgs {
    fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(serial) = &self.serial_port {
            args.push("--serial-port".to_string());
            args.push(serial.clone());
        }
        if let Some(tcp) = self.tcp_port {
            args.push("--tcp-port".to_string());
            args.push(tcp.to_string());
        }
        if let Some(bridge) = &self.bridge {
            args.push("--bridge".to_string());
            args.push(bridge.clone());
        }
        if let Some(dir) = &self.lock_dir {
            args.push("--lock-dir".to_string());
            args.push(dir.to_string_lossy().into_owned());
        }
        args
    }

    fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(serial) = &self.serial_port {
            parts.push(format!("serial={serial}"));
        }
        if let Some(tcp) = self.tcp_port {
            parts.push(format!("TCP={tcp}"));
        }
        if parts.is_empty() {
            String::new()
        } else {
            format!(" ({})", parts.join(", "))
        }
    }
}

/// Build the command that starts `program` as a detached worker.
pub fn detached_command(program: &Path, args: &RelaunchArgs) -> Command {
    let mut cmd = Command::new(program);
    cmd.args(args.to_args())
        .env(DETACHED_ENV, "1")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    detach_from_console(&mut cmd);
    cmd
}

#[cfg(unix)]
fn detach_from_console(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    // SAFETY: setsid is async-signal-safe and touches no parent state.
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()
                .map(|_| ())
                .map_err(std::io::Error::from)
        });
    }
}

#[cfg(windows)]
fn detach_from_console(cmd: &mut Command) {
    use std::os::windows::process::CommandExt;
    const DETACHED_PROCESS: u32 = 0x0000_0008;
    const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
    cmd.creation_flags(DETACHED_PROCESS | CREATE_NEW_PROCESS_GROUP);
}

#[cfg(not(any(unix, windows)))]
fn detach_from_console(_cmd: &mut Command) {}

/// Spawn `program` detached and return immediately without waiting for it.
pub fn spawn_detached(program: &Path, args: &RelaunchArgs) -> Result<u32> {
    let child = detached_command(program, args)
        .spawn()
        .with_context(|| format!("spawn detached {}", program.display()))?;
    // The child is intentionally not waited on; it outlives this process.
    Ok(child.id())
}

/// Re-launch the current executable detached. Returns the process exit code.
pub fn relaunch_detached(args: &RelaunchArgs) -> u8 {
    let exe = match std::env::current_exe().context("locate current executable") {
        Ok(exe) => exe,
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Failed to relaunch: {e:#}");
            return 1;
        }
    };
    match spawn_detached(&exe, args) {
        Ok(pid) => {
            tracing::info!("detached worker started (pid {pid})");
            println!(
                "Launched serial bridge launcher on {}{}",
                std::env::consts::OS,
                args.summary()
            );
            0
        }
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("Failed to relaunch: {e:#}");
            1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_args() -> RelaunchArgs {
        RelaunchArgs {
            serial_port: Some("/dev/ttyUSB0".into()),
            tcp_port: Some(2217),
            ..Default::default()
        }
    }

    #[test]
    fn command_forwards_ports_and_marker() {
        let cmd = detached_command(Path::new("launcher"), &scenario_args());
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, ["--serial-port", "/dev/ttyUSB0", "--tcp-port", "2217"]);

        let marker = cmd
            .get_envs()
            .find(|(k, _)| *k == OsStr::new(DETACHED_ENV))
            .and_then(|(_, v)| v);
        assert_eq!(marker, Some(OsStr::new("1")));
    }

    #[test]
    fn command_without_ports_has_no_arguments() {
        let cmd = detached_command(Path::new("launcher"), &RelaunchArgs::default());
        assert_eq!(cmd.get_args().count(), 0);
    }

    #[test]
    fn overrides_are_forwarded() {
        let args = RelaunchArgs {
            bridge: Some("my-bridge".into()),
            lock_dir: Some(PathBuf::from("/tmp/locks")),
            ..Default::default()
        };
        let cmd = detached_command(Path::new("launcher"), &args);
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, ["--bridge", "my-bridge", "--lock-dir", "/tmp/locks"]);
    }

    #[test]
    fn summary_lists_given_ports() {
        assert_eq!(scenario_args().summary(), " (serial=/dev/ttyUSB0, TCP=2217)");
        assert_eq!(RelaunchArgs::default().summary(), "");
    }

    #[cfg(unix)]
    #[test]
    fn spawn_returns_without_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("worker.sh");
        let out = dir.path().join("out");
        std::fs::write(
            &script,
            format!(
                "#!/bin/sh\nsleep 1\necho \"$@ $SERIAL_BRIDGE_DETACHED\" > {0}.tmp && mv {0}.tmp {0}\n",
                out.display()
            ),
        )
        .unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let started = std::time::Instant::now();
        let pid = spawn_detached(&script, &scenario_args()).unwrap();
        assert!(pid > 0);
        assert!(started.elapsed() < std::time::Duration::from_millis(900));

        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while !out.exists() && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(50));
        }
        let written = std::fs::read_to_string(&out).unwrap();
        assert_eq!(written.trim(), "--serial-port /dev/ttyUSB0 --tcp-port 2217 1");
    }
}
