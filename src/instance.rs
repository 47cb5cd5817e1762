//! Single-instance coordination through per-TCP-port PID files.
//!
//! A lock file holds the decimal PID of the instance that owns the port and
//! nothing else. Readers that find a dead or unparsable PID remove the file; a
//! file naming a live process is never removed, even if the PID may have been
//! reused. Filesystem errors are logged and otherwise ignored.

use crate::error::LauncherError;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use sysinfo::{Pid, System};

/// Lock file name for a TCP port.
pub fn lock_file_name(tcp_port: u16) -> String {
    format!(".serial-bridge-tcp{tcp_port}.lock")
}

/// Default lock directory: the directory holding the running executable.
pub fn default_lock_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(std::env::temp_dir)
}

#[derive(Debug, Clone)]
pub struct InstanceLock {
    tcp_port: u16,
    path: PathBuf,
}

impl InstanceLock {
    pub fn new(dir: &Path, tcp_port: u16) -> Self {
        Self {
            tcp_port,
            path: dir.join(lock_file_name(tcp_port)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a live instance currently owns this port.
    ///
    /// Stale or corrupt records are removed as a side effect.
    pub fn is_instance_active(&self) -> bool {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return false,
            Err(e) => {
                tracing::warn!(
                    "{}",
                    LauncherError::LockIo {
                        path: self.path.clone(),
                        source: e
                    }
                );
                self.remove_stale("unreadable");
                return false;
            }
        };

        let pid = match contents.trim().parse::<u32>() {
            Ok(pid) => pid,
            Err(_) => {
                self.remove_stale("corrupt");
                return false;
            }
        };

        if self.owner_alive(pid) {
            tracing::info!(
                "instance already running for TCP port {} (pid {})",
                self.tcp_port,
                pid
            );
            return true;
        }

        self.remove_stale("stale");
        false
    }

    /// Record the current process as owner of the port. Best-effort.
    pub fn acquire(&self) {
        let pid = std::process::id();
        match fs::write(&self.path, pid.to_string()) {
            Ok(()) => tracing::debug!("lock {} acquired by pid {}", self.path.display(), pid),
            Err(e) => tracing::warn!(
                "{}",
                LauncherError::LockIo {
                    path: self.path.clone(),
                    source: e
                }
            ),
        }
    }

    /// Remove the lock file if present. Best-effort.
    pub fn release(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("lock {} released", self.path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                "{}",
                LauncherError::LockIo {
                    path: self.path.clone(),
                    source: e
                }
            ),
        }
    }

    /// Acquire and hand back a guard that releases on drop.
    pub fn hold(self) -> HeldLock {
        self.acquire();
        HeldLock { lock: self }
    }

    fn remove_stale(&self, reason: &str) {
        tracing::info!("removing {} lock file {}", reason, self.path.display());
        let _ = fs::remove_file(&self.path);
    }

    fn owner_alive(&self, pid: u32) -> bool {
        let mut sys = System::new();
        let pid = Pid::from_u32(pid);
        sys.refresh_process(pid) && sys.process(pid).is_some()
    }
}

/// Ownership of a lock for the lifetime of the running instance.
#[derive(Debug)]
pub struct HeldLock {
    lock: InstanceLock,
}

impl HeldLock {
    #[cfg(any(test, feature = "gui"))]
    pub fn lock(&self) -> &InstanceLock {
        &self.lock
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        self.lock.release();
    }
}
