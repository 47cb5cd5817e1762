use crate::model::PortDescriptor;
use anyhow::{Context, Result};
use serialport::SerialPortType;

/// Source of serial device snapshots. Injected so the picker never binds a
/// system API directly.
pub trait PortEnumerator {
    fn enumerate(&self) -> Result<Vec<PortDescriptor>>;
}

/// Enumerates devices through the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn enumerate(&self) -> Result<Vec<PortDescriptor>> {
        let ports = serialport::available_ports().context("enumerate serial ports")?;
        Ok(ports
            .into_iter()
            .map(|p| PortDescriptor::new(p.port_name, describe(&p.port_type)))
            .collect())
    }
}

fn describe(port_type: &SerialPortType) -> Option<String> {
    match port_type {
        SerialPortType::UsbPort(info) => Some(
            info.product
                .clone()
                .or_else(|| info.manufacturer.clone())
                .unwrap_or_else(|| format!("USB VID:PID={:04X}:{:04X}", info.vid, info.pid)),
        ),
        SerialPortType::PciPort => Some("PCI serial device".into()),
        SerialPortType::BluetoothPort => Some("Bluetooth serial device".into()),
        SerialPortType::Unknown => None,
    }
}

/// Sorted port snapshot plus the picker's current selection.
#[derive(Debug, Clone, Default)]
pub struct PortList {
    ports: Vec<PortDescriptor>,
    #[cfg_attr(not(feature = "gui"), allow(dead_code))]
    pub selected: Option<usize>,
}

impl PortList {
    /// Re-scan ports. Enumeration failures yield an empty list.
    ///
    /// `preferred` is selected when present; otherwise the first port is.
    pub fn refresh(enumerator: &dyn PortEnumerator, preferred: Option<&str>) -> Self {
        let mut ports = match enumerator.enumerate() {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("{e:#}");
                Vec::new()
            }
        };
        ports.sort_by(|a, b| a.device.cmp(&b.device));

        let selected = preferred
            .and_then(|want| ports.iter().position(|p| p.device == want))
            .or(if ports.is_empty() { None } else { Some(0) });
        tracing::debug!("found {} serial port(s)", ports.len());
        Self { ports, selected }
    }

    pub fn ports(&self) -> &[PortDescriptor] {
        &self.ports
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn labels(&self) -> Vec<String> {
        self.ports.iter().map(PortDescriptor::label).collect()
    }

    #[cfg(any(test, feature = "gui"))]
    pub fn selected_port(&self) -> Option<&PortDescriptor> {
        self.selected.and_then(|idx| self.ports.get(idx))
    }

    /// Text shown in the closed picker.
    #[cfg(any(test, feature = "gui"))]
    pub fn selected_text(&self) -> String {
        match self.selected_port() {
            Some(p) => p.label(),
            None if self.ports.is_empty() => "No serial ports detected.".into(),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakePorts(Vec<PortDescriptor>);

    impl PortEnumerator for FakePorts {
        fn enumerate(&self) -> Result<Vec<PortDescriptor>> {
            Ok(self.0.clone())
        }
    }

    struct BrokenPorts;

    impl PortEnumerator for BrokenPorts {
        fn enumerate(&self) -> Result<Vec<PortDescriptor>> {
            anyhow::bail!("no access")
        }
    }

    fn fake() -> FakePorts {
        FakePorts(vec![
            PortDescriptor::new("/dev/ttyUSB1", Some("CP2102".into())),
            PortDescriptor::new("/dev/ttyACM0", None),
            PortDescriptor::new("/dev/ttyUSB0", Some("n/a".into())),
        ])
    }

    #[test]
    fn refresh_sorts_by_device_and_selects_first() {
        let list = PortList::refresh(&fake(), None);
        let devices: Vec<_> = list.ports().iter().map(|p| p.device.as_str()).collect();
        assert_eq!(devices, ["/dev/ttyACM0", "/dev/ttyUSB0", "/dev/ttyUSB1"]);
        assert_eq!(list.selected, Some(0));
        assert_eq!(
            list.labels(),
            ["/dev/ttyACM0", "/dev/ttyUSB0", "/dev/ttyUSB1 – CP2102"]
        );
    }

    #[test]
    fn preferred_port_is_preselected() {
        let list = PortList::refresh(&fake(), Some("/dev/ttyUSB1"));
        assert_eq!(list.selected_port().unwrap().device, "/dev/ttyUSB1");
    }

    #[test]
    fn unknown_preferred_port_falls_back_to_first() {
        let list = PortList::refresh(&fake(), Some("COM9"));
        assert_eq!(list.selected, Some(0));
    }

    #[test]
    fn empty_or_failing_enumeration_has_no_selection() {
        for list in [
            PortList::refresh(&FakePorts(Vec::new()), Some("COM1")),
            PortList::refresh(&BrokenPorts, None),
        ] {
            assert!(list.is_empty());
            assert_eq!(list.selected, None);
            assert_eq!(list.selected_text(), "No serial ports detected.");
        }
    }

    #[test]
    fn non_usb_descriptions() {
        assert_eq!(
            describe(&SerialPortType::PciPort).as_deref(),
            Some("PCI serial device")
        );
        assert_eq!(describe(&SerialPortType::Unknown), None);
    }
}
