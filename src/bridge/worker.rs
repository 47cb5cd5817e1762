use crate::model::BridgeEvent;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::UnboundedSender;

/// Drain the child's combined output on a dedicated thread.
///
/// Sends one `Line` per line read, then exactly one `Exited` once the stream
/// has ended and the child has been reaped. `reaped` is raised before that
/// event is sent.
pub(crate) fn spawn_output_reader<R>(
    reader: R,
    mut child: Child,
    reaped: Arc<AtomicBool>,
    event_tx: UnboundedSender<BridgeEvent>,
) -> std::io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let pid = child.id();
    std::thread::Builder::new()
        .name(format!("bridge-output-{pid}"))
        .spawn(move || {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf) {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&buf)
                            .trim_end_matches(['\r', '\n'])
                            .to_string();
                        // Keep draining even if the receiver is gone so the child never blocks on a full pipe.
                        let _ = event_tx.send(BridgeEvent::Line { pid, text });
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        tracing::warn!("reading bridge output (pid {pid}) failed: {e}");
                        break;
                    }
                }
            }

            let code = match child.wait() {
                Ok(status) => exit_code(status),
                Err(e) => {
                    tracing::warn!("waiting for bridge (pid {pid}) failed: {e}");
                    -1
                }
            };
            reaped.store(true, Ordering::Release);
            tracing::info!("bridge pid {pid} exited with code {code}");
            let _ = event_tx.send(BridgeEvent::Exited { pid, code });
        })
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|sig| -sig))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
