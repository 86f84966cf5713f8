//! Serial port watcher
//!
//! Polls the operating system's list of serial ports and turns USB ports
//! appearing and disappearing into arrivals and departures on a virtual bus.
//! The watcher's polling loop acts as the detection thread, so callbacks run
//! on it.

use std::collections::HashMap;

use anyhow::Context;
use hotplug::usb_ids::class;
use hotplug::DeviceId;
use hotplug_sim::{VirtualBus, VirtualDeviceConfig};
use serialport::{available_ports, SerialPortType};
use tracing::{debug, info, warn};

/// A USB serial port seen by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbSerialPort {
    /// Port name (e.g., /dev/ttyUSB0, COM3)
    pub port: String,
    /// USB Vendor ID
    pub vid: u16,
    /// USB Product ID
    pub pid: u16,
    /// USB serial number (if available)
    pub serial_number: Option<String>,
    /// USB product string
    pub product: Option<String>,
}

impl UsbSerialPort {
    /// Create from serialport crate's port info; non-USB ports are ignored
    fn from_serialport(name: String, port_type: &SerialPortType) -> Option<Self> {
        match port_type {
            SerialPortType::UsbPort(usb) => Some(Self {
                port: name,
                vid: usb.vid,
                pid: usb.pid,
                serial_number: usb.serial_number.clone(),
                product: usb.product.clone(),
            }),
            _ => None,
        }
    }

    /// Virtual device standing in for this port
    ///
    /// The port API exposes no bDeviceClass, so the class is reported as
    /// defined per interface.
    pub fn device_config(&self) -> VirtualDeviceConfig {
        VirtualDeviceConfig {
            label: self.port.clone(),
            ..VirtualDeviceConfig::new(self.vid, self.pid, class::PER_INTERFACE)
        }
    }

    /// Whether two observations describe the same physical device
    fn same_device(&self, other: &UsbSerialPort) -> bool {
        self.vid == other.vid && self.pid == other.pid && self.serial_number == other.serial_number
    }
}

/// Changes applied by one poll
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollChanges {
    pub arrived: Vec<DeviceId>,
    pub left: Vec<DeviceId>,
}

impl PollChanges {
    pub fn is_empty(&self) -> bool {
        self.arrived.is_empty() && self.left.is_empty()
    }
}

/// Tracks attached USB serial ports between polls
#[derive(Debug, Default)]
pub struct PortWatcher {
    skip_patterns: Vec<String>,
    attached: HashMap<String, (UsbSerialPort, DeviceId)>,
}

impl PortWatcher {
    pub fn new(skip_patterns: Vec<String>) -> Self {
        Self {
            skip_patterns,
            attached: HashMap::new(),
        }
    }

    /// Number of ports currently attached to the bus
    pub fn attached(&self) -> usize {
        self.attached.len()
    }

    /// Enumerate USB serial ports
    pub fn enumerate(&self) -> anyhow::Result<Vec<UsbSerialPort>> {
        let ports = available_ports().context("failed to enumerate serial ports")?;

        let result: Vec<_> = ports
            .into_iter()
            .filter_map(|p| UsbSerialPort::from_serialport(p.port_name, &p.port_type))
            .filter(|p| !self.should_skip_port(p))
            .collect();

        debug!("Found {} USB serial port(s)", result.len());
        Ok(result)
    }

    /// Enumerate and apply the difference to `bus`
    pub fn poll(&mut self, bus: &VirtualBus) -> anyhow::Result<PollChanges> {
        let ports = self.enumerate()?;
        Ok(self.apply(bus, ports))
    }

    /// Apply a port listing to `bus`
    ///
    /// Departures are delivered before arrivals, so a port whose device was
    /// swapped between polls reports the old device leaving first.
    pub fn apply(&mut self, bus: &VirtualBus, ports: Vec<UsbSerialPort>) -> PollChanges {
        let mut changes = PollChanges::default();

        let gone: Vec<String> = self
            .attached
            .iter()
            .filter(|(name, (seen, _))| {
                !ports
                    .iter()
                    .any(|p| &p.port == *name && p.same_device(seen))
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in gone {
            let Some((_, id)) = self.attached.remove(&name) else {
                continue;
            };
            match bus.unplug(id) {
                Ok(_) => {
                    info!("Port {} removed", name);
                    changes.left.push(id);
                }
                Err(e) => warn!("Port {} vanished from the bus: {}", name, e),
            }
        }

        for port in ports {
            if self.attached.contains_key(&port.port) {
                continue;
            }
            let (device, _) = bus.plug(&port.device_config());
            info!(
                "Port {} added ({})",
                port.port,
                port.product.as_deref().unwrap_or("Unknown")
            );
            changes.arrived.push(device.id());
            self.attached.insert(port.port.clone(), (port, device.id()));
        }

        changes
    }

    /// Check if a port should be skipped
    fn should_skip_port(&self, port: &UsbSerialPort) -> bool {
        self.skip_patterns
            .iter()
            .any(|pattern| port.port.contains(pattern))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serialport::UsbPortInfo;

    fn port(name: &str, vid: u16, pid: u16) -> UsbSerialPort {
        UsbSerialPort {
            port: name.to_string(),
            vid,
            pid,
            serial_number: None,
            product: None,
        }
    }

    #[test]
    fn test_from_usb_port() {
        let usb_info = SerialPortType::UsbPort(UsbPortInfo {
            vid: 0x0403,
            pid: 0x6001,
            serial_number: Some("12345".to_string()),
            manufacturer: Some("FTDI".to_string()),
            product: Some("FT232R".to_string()),
        });

        let info = UsbSerialPort::from_serialport("/dev/ttyUSB0".to_string(), &usb_info).unwrap();

        assert_eq!(info.vid, 0x0403);
        assert_eq!(info.pid, 0x6001);
        assert_eq!(info.product.as_deref(), Some("FT232R"));
        assert_eq!(info.device_config().label, "/dev/ttyUSB0");
    }

    #[test]
    fn test_non_usb_port_ignored() {
        assert!(UsbSerialPort::from_serialport("/dev/ttyS0".into(), &SerialPortType::Unknown).is_none());
    }

    #[test]
    fn test_skip_patterns() {
        let watcher = PortWatcher::new(vec!["Bluetooth".into()]);
        assert!(watcher.should_skip_port(&port("/dev/cu.Bluetooth-Incoming-Port", 1, 1)));
        assert!(!watcher.should_skip_port(&port("/dev/ttyUSB0", 1, 1)));
    }

    #[test]
    fn test_arrival_and_departure() {
        let bus = VirtualBus::new();
        let mut watcher = PortWatcher::default();

        let changes = watcher.apply(&bus, vec![port("/dev/ttyUSB0", 0x0403, 0x6001)]);
        assert_eq!(changes.arrived.len(), 1);
        assert_eq!(bus.devices().len(), 1);

        let changes = watcher.apply(&bus, vec![port("/dev/ttyUSB0", 0x0403, 0x6001)]);
        assert!(changes.is_empty());

        let changes = watcher.apply(&bus, Vec::new());
        assert_eq!(changes.left.len(), 1);
        assert!(bus.devices().is_empty());
        assert_eq!(watcher.attached(), 0);
    }

    #[test]
    fn test_swapped_device_on_same_port() {
        let bus = VirtualBus::new();
        let mut watcher = PortWatcher::default();
        watcher.apply(&bus, vec![port("/dev/ttyUSB0", 0x0403, 0x6001)]);

        let changes = watcher.apply(&bus, vec![port("/dev/ttyUSB0", 0x10C4, 0xEA60)]);

        assert_eq!(changes.left.len(), 1);
        assert_eq!(changes.arrived.len(), 1);
        assert_eq!(bus.devices()[0].vendor_id(), 0x10C4);
    }

    proptest! {
        #[test]
        fn bus_mirrors_latest_listing(
            listings in prop::collection::vec(prop::collection::btree_set(0u8..6, 0..6), 1..12)
        ) {
            let bus = VirtualBus::new();
            let mut watcher = PortWatcher::default();

            for listing in &listings {
                let ports = listing
                    .iter()
                    .map(|n| port(&format!("/dev/ttyUSB{}", n), 0x0403, 0x6000 + *n as u16))
                    .collect();
                watcher.apply(&bus, ports);

                prop_assert_eq!(bus.devices().len(), listing.len());
                prop_assert_eq!(watcher.attached(), listing.len());
            }
        }
    }
}
