//! BLE Scanner Module
//!
//! Turns advertisement reports into scanned devices and keeps the list of
//! peripherals seen during the current scan.

use crate::domain::models::{DeviceId, ScannedDevice};
use crate::infrastructure::bluetooth::protocol::UART_SERVICE_UUID;
use crate::infrastructure::bluetooth::transport::Advertisement;
use tracing::{debug, trace};

/// Name shown for peripherals that do not advertise one
pub const UNNAMED_DEVICE: &str = "N/A";

impl From<Advertisement> for ScannedDevice {
    fn from(adv: Advertisement) -> Self {
        let name = adv
            .local_name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| UNNAMED_DEVICE.to_string());
        let is_uart = adv.service_uuids.contains(&UART_SERVICE_UUID);
        Self {
            id: adv.device,
            name,
            rssi: adv.rssi,
            connectable: adv.connectable,
            service_uuids: adv.service_uuids,
            is_uart,
        }
    }
}

/// Peripherals seen since the scan started, in discovery order.
#[derive(Debug, Default)]
pub struct DeviceList {
    devices: Vec<ScannedDevice>,
}

impl DeviceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an advertisement. Returns `true` when the device is new.
    ///
    /// Repeated reports refresh RSSI and fill in a name or services the
    /// first report did not carry.
    pub fn upsert(&mut self, device: ScannedDevice) -> bool {
        match self.devices.iter_mut().find(|d| d.id == device.id) {
            Some(known) => {
                trace!("Updating {} rssi {:?}", known.id, device.rssi);
                if device.rssi.is_some() {
                    known.rssi = device.rssi;
                }
                if known.name == UNNAMED_DEVICE && device.name != UNNAMED_DEVICE {
                    known.name = device.name;
                }
                for uuid in device.service_uuids {
                    if !known.service_uuids.contains(&uuid) {
                        known.service_uuids.push(uuid);
                    }
                }
                known.is_uart = known.is_uart || device.is_uart;
                known.connectable = device.connectable;
                false
            }
            None => {
                debug!("Discovered {} ({})", device.name, device.id);
                self.devices.push(device);
                true
            }
        }
    }

    pub fn get(&self, id: &DeviceId) -> Option<&ScannedDevice> {
        self.devices.iter().find(|d| &d.id == id)
    }

    pub fn devices(&self) -> &[ScannedDevice] {
        &self.devices
    }

    /// UART-capable devices, strongest signal first
    pub fn uart_devices(&self) -> Vec<&ScannedDevice> {
        let mut uart: Vec<&ScannedDevice> = self.devices.iter().filter(|d| d.is_uart).collect();
        uart.sort_by_key(|d| std::cmp::Reverse(d.rssi.unwrap_or(i16::MIN)));
        uart
    }

    pub fn clear(&mut self) {
        self.devices.clear();
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn advertisement(id: &str, name: Option<&str>, rssi: i16, uart: bool) -> Advertisement {
        Advertisement {
            device: DeviceId::new(id),
            local_name: name.map(str::to_string),
            rssi: Some(rssi),
            connectable: true,
            service_uuids: if uart {
                vec![UART_SERVICE_UUID]
            } else {
                vec![Uuid::from_u128(0x1234)]
            },
        }
    }

    #[test]
    fn test_advertisement_conversion() {
        let device: ScannedDevice = advertisement("a", Some("Bluefruit52"), -60, true).into();
        assert_eq!(device.name, "Bluefruit52");
        assert!(device.is_uart);

        let unnamed: ScannedDevice = advertisement("b", Some("  "), -80, false).into();
        assert_eq!(unnamed.name, UNNAMED_DEVICE);
        assert!(!unnamed.is_uart);
    }

    #[test]
    fn test_device_list_dedup_and_rssi_update() {
        let mut list = DeviceList::new();
        assert!(list.upsert(advertisement("a", None, -70, true).into()));
        assert!(list.upsert(advertisement("b", Some("Other"), -40, false).into()));
        assert!(!list.upsert(advertisement("a", Some("Feather"), -50, true).into()));

        assert_eq!(list.len(), 2);
        let a = list.get(&DeviceId::new("a")).unwrap();
        assert_eq!(a.rssi, Some(-50));
        assert_eq!(a.name, "Feather");

        let uart: Vec<&str> = list.uart_devices().iter().map(|d| d.id.0.as_str()).collect();
        assert_eq!(uart, vec!["a"]);

        list.clear();
        assert!(list.is_empty());
    }
}
