use serde::{Deserialize, Serialize};

/// Default TCP port offered in the picker when none was given on the command line.
pub const DEFAULT_TCP_PORT: u16 = 2217;

/// Snapshot of one serial device visible to the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDescriptor {
    pub device: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl PortDescriptor {
    pub fn new(device: impl Into<String>, description: Option<String>) -> Self {
        Self {
            device: device.into(),
            description,
        }
    }

    /// Human-readable label used by the picker and `--list`.
    pub fn label(&self) -> String {
        match self.description.as_deref().map(str::trim) {
            Some(desc) if !desc.is_empty() && desc != "n/a" => {
                format!("{} – {}", self.device, desc)
            }
            _ => self.device.clone(),
        }
    }
}

/// Events produced by the bridge output worker and consumed by the interaction loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// One line of combined stdout/stderr, terminator stripped.
    Line { pid: u32, text: String },
    /// The child exited; always sent after every `Line` of the same pid.
    Exited { pid: u32, code: i32 },
}

impl BridgeEvent {
    #[cfg(any(test, feature = "gui"))]
    pub fn pid(&self) -> u32 {
        match self {
            BridgeEvent::Line { pid, .. } | BridgeEvent::Exited { pid, .. } => *pid,
        }
    }
}

/// Final log line appended once a bridge process has exited.
pub fn exit_status_line(code: i32) -> String {
    format!("[Process exited with code {code}]")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_includes_meaningful_description() {
        let p = PortDescriptor::new("/dev/ttyUSB0", Some("CP2102 USB to UART".into()));
        assert_eq!(p.label(), "/dev/ttyUSB0 – CP2102 USB to UART");
    }

    #[test]
    fn label_skips_placeholder_description() {
        assert_eq!(PortDescriptor::new("COM3", Some("n/a".into())).label(), "COM3");
        assert_eq!(PortDescriptor::new("COM4", Some("  ".into())).label(), "COM4");
        assert_eq!(PortDescriptor::new("COM5", None).label(), "COM5");
    }

    #[test]
    fn status_line_carries_code() {
        assert_eq!(exit_status_line(-15), "[Process exited with code -15]");
    }
}
