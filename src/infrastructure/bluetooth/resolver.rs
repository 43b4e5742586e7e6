//! GATT Resolver
//!
//! Walks a connected peripheral's GATT tree for the selected mode and says
//! when the session is ready.
//!
//! - Data modes only need the UART TX/RX pair; resolution finishes the
//!   moment both are assigned. DFU mode also reads the Device Information
//!   strings on the way.
//! - Info mode enumerates everything. Outstanding characteristic and
//!   descriptor discoveries are counted and resolution finishes when both
//!   counts reach zero.
//!
//! The first discovery error ends resolution; later completions are ignored.

use crate::domain::models::{ConnectionMode, DeviceId, DeviceInformation};
use crate::error::{SessionError, TransportError};
use crate::infrastructure::bluetooth::gatt::{
    CharProperties, CharacteristicRef, GattCharacteristic, GattService,
};
use crate::infrastructure::bluetooth::protocol::{
    DEVICE_INFO_CHAR_UUIDS, DEVICE_INFO_SERVICE_UUID, DFU_SERVICE_UUID,
    FIRMWARE_REVISION_CHAR_UUID, HARDWARE_REVISION_CHAR_UUID, MANUFACTURER_NAME_CHAR_UUID,
    MODEL_NUMBER_CHAR_UUID, SOFTWARE_REVISION_CHAR_UUID, UART_RX_CHAR_UUID, UART_SERVICE_UUID,
    UART_TX_CHAR_UUID,
};
use crate::infrastructure::bluetooth::transport::Transport;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Characteristics carrying a data mode's traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataChannel {
    /// Written by the central
    pub tx: GattCharacteristic,
    /// Notified by the peripheral
    pub rx: GattCharacteristic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Pending,
    Data(DataChannel),
    Info,
}

#[derive(Debug, Clone, Copy)]
struct DataRoles {
    service: Uuid,
    tx: Uuid,
    rx: Uuid,
}

/// Every data mode, DFU included, talks over the UART pair.
fn data_roles(mode: ConnectionMode) -> Option<DataRoles> {
    mode.is_data_mode().then_some(DataRoles {
        service: UART_SERVICE_UUID,
        tx: UART_TX_CHAR_UUID,
        rx: UART_RX_CHAR_UUID,
    })
}

#[derive(Debug)]
pub struct GattResolver {
    mode: ConnectionMode,
    services: Option<Vec<GattService>>,
    tx: Option<GattCharacteristic>,
    rx: Option<GattCharacteristic>,
    pending_services: usize,
    pending_descriptors: usize,
    /// Finalized or failed
    done: bool,
}

impl GattResolver {
    pub fn new(mode: ConnectionMode) -> Self {
        Self {
            mode,
            services: None,
            tx: None,
            rx: None,
            pending_services: 0,
            pending_descriptors: 0,
            done: false,
        }
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    /// Services to discover after connecting; `None` means all of them.
    pub fn service_filter(&self) -> Option<Vec<Uuid>> {
        self.mode.is_data_mode().then(|| {
            vec![UART_SERVICE_UUID, DFU_SERVICE_UUID, DEVICE_INFO_SERVICE_UUID]
        })
    }

    pub fn has_services(&self) -> bool {
        self.services.is_some()
    }

    pub fn services(&self) -> &[GattService] {
        self.services.as_deref().unwrap_or(&[])
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn on_services<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        device: &DeviceId,
        result: Result<Vec<GattService>, String>,
    ) -> Result<Resolution, SessionError> {
        if self.done {
            return Ok(Resolution::Pending);
        }
        if self.services.is_some() {
            debug!("Services already known for {}, ignoring repeat", device);
            return Ok(Resolution::Pending);
        }
        let services = result.map_err(|e| self.fail(e))?;
        info!("{} services discovered on {}", services.len(), device);
        self.services = Some(services.clone());

        match data_roles(self.mode) {
            Some(roles) => self.resolve_data_services(transport, device, roles, &services),
            None => self.resolve_info_services(transport, device, &services),
        }
    }

    pub fn on_characteristics<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        device: &DeviceId,
        service: Uuid,
        result: Result<Vec<GattCharacteristic>, String>,
    ) -> Result<Resolution, SessionError> {
        if self.done {
            return Ok(Resolution::Pending);
        }
        let characteristics = result.map_err(|e| self.fail(e))?;
        let Some(known) = self
            .services
            .as_mut()
            .and_then(|services| services.iter_mut().find(|s| s.uuid == service))
        else {
            debug!("Characteristics for unknown service {}, ignoring", service);
            return Ok(Resolution::Pending);
        };
        debug!(
            "{} characteristics discovered for service {}",
            characteristics.len(),
            service
        );
        known.characteristics = Some(characteristics.clone());

        match data_roles(self.mode) {
            Some(roles) if service == roles.service => {
                self.assign_data_channel(transport, device, roles, &characteristics)
            }
            Some(_) if service == DEVICE_INFO_SERVICE_UUID => {
                read_device_information(transport, device, &characteristics)
                    .map_err(|e| self.fail(e.message))?;
                Ok(Resolution::Pending)
            }
            Some(_) => Ok(Resolution::Pending),
            None => {
                self.pending_services = self.pending_services.saturating_sub(1);
                self.enumerate(transport, device, &characteristics)?;
                Ok(self.check_info_complete())
            }
        }
    }

    pub fn on_descriptors(
        &mut self,
        characteristic: CharacteristicRef,
        result: Result<Vec<Uuid>, String>,
    ) -> Result<Resolution, SessionError> {
        if self.done || data_roles(self.mode).is_some() {
            return Ok(Resolution::Pending);
        }
        let descriptors = result.map_err(|e| self.fail(e))?;
        if let Some(known) = self.characteristic_mut(characteristic) {
            known.descriptors = Some(descriptors);
        }
        self.pending_descriptors = self.pending_descriptors.saturating_sub(1);
        Ok(self.check_info_complete())
    }

    /// Caches a value read from or notified by the peripheral.
    pub fn record_value(&mut self, characteristic: CharacteristicRef, value: &[u8]) {
        if let Some(known) = self.characteristic_mut(characteristic) {
            known.value = Some(value.to_vec());
        }
    }

    fn characteristic_mut(
        &mut self,
        characteristic: CharacteristicRef,
    ) -> Option<&mut GattCharacteristic> {
        self.services
            .as_mut()?
            .iter_mut()
            .find(|s| s.uuid == characteristic.service)?
            .characteristic_mut(characteristic.characteristic)
    }

    fn fail(&mut self, reason: impl Into<String>) -> SessionError {
        let reason = reason.into();
        warn!("GATT discovery failed: {}", reason);
        self.done = true;
        SessionError::DiscoveryFailed(reason)
    }

    fn resolve_data_services<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        device: &DeviceId,
        roles: DataRoles,
        services: &[GattService],
    ) -> Result<Resolution, SessionError> {
        if self.mode == ConnectionMode::Dfu {
            if let Some(dis) = services.iter().find(|s| s.uuid == DEVICE_INFO_SERVICE_UUID) {
                let submitted = match &dis.characteristics {
                    Some(chars) => read_device_information(transport, device, chars),
                    None => transport.discover_characteristics(
                        device,
                        DEVICE_INFO_SERVICE_UUID,
                        Some(&DEVICE_INFO_CHAR_UUIDS[..]),
                    ),
                };
                submitted.map_err(|e| self.fail(e.message))?;
            }
        }

        let Some(service) = services.iter().find(|s| s.uuid == roles.service) else {
            let reason = format!("{} service {} not found", self.mode, roles.service);
            return Err(self.fail(reason));
        };
        match &service.characteristics {
            Some(chars) => self.assign_data_channel(transport, device, roles, chars),
            None => {
                transport
                    .discover_characteristics(device, roles.service, Some(&[roles.tx, roles.rx][..]))
                    .map_err(|e| self.fail(e.message))?;
                Ok(Resolution::Pending)
            }
        }
    }

    fn assign_data_channel<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        device: &DeviceId,
        roles: DataRoles,
        characteristics: &[GattCharacteristic],
    ) -> Result<Resolution, SessionError> {
        for characteristic in characteristics {
            if characteristic.uuid == roles.rx && self.rx.is_none() {
                transport
                    .set_notify(device, characteristic.reference(), true)
                    .map_err(|e| self.fail(e.message))?;
                self.rx = Some(characteristic.clone());
            } else if characteristic.uuid == roles.tx && self.tx.is_none() {
                self.tx = Some(characteristic.clone());
            }
        }

        if let (Some(tx), Some(rx)) = (self.tx.clone(), self.rx.clone()) {
            self.done = true;
            return Ok(Resolution::Data(DataChannel { tx, rx }));
        }
        let reason = format!(
            "{} characteristics missing (tx: {}, rx: {})",
            self.mode,
            self.tx.is_some(),
            self.rx.is_some()
        );
        Err(self.fail(reason))
    }

    fn resolve_info_services<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        device: &DeviceId,
        services: &[GattService],
    ) -> Result<Resolution, SessionError> {
        for service in services {
            match &service.characteristics {
                Some(chars) => self.enumerate(transport, device, chars)?,
                None => {
                    transport
                        .discover_characteristics(device, service.uuid, None)
                        .map_err(|e| self.fail(e.message))?;
                    self.pending_services += 1;
                }
            }
        }
        Ok(self.check_info_complete())
    }

    /// Reads every readable characteristic and asks for every descriptor list.
    fn enumerate<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        device: &DeviceId,
        characteristics: &[GattCharacteristic],
    ) -> Result<(), SessionError> {
        for characteristic in characteristics {
            let reference = characteristic.reference();
            if characteristic.properties.contains(CharProperties::READ) {
                transport
                    .read_value(device, reference)
                    .map_err(|e| self.fail(e.message))?;
            }
            transport
                .discover_descriptors(device, reference)
                .map_err(|e| self.fail(e.message))?;
            self.pending_descriptors += 1;
        }
        Ok(())
    }

    fn check_info_complete(&mut self) -> Resolution {
        if self.done || self.pending_services > 0 || self.pending_descriptors > 0 {
            return Resolution::Pending;
        }
        info!("GATT tree fully enumerated");
        self.done = true;
        Resolution::Info
    }
}

fn read_device_information<T: Transport + ?Sized>(
    transport: &mut T,
    device: &DeviceId,
    characteristics: &[GattCharacteristic],
) -> Result<(), TransportError> {
    for characteristic in characteristics {
        if DEVICE_INFO_CHAR_UUIDS.contains(&characteristic.uuid)
            && characteristic.properties.contains(CharProperties::READ)
        {
            transport.read_value(device, characteristic.reference())?;
        }
    }
    Ok(())
}

/// Stores a Device Information string. Returns `false` for other
/// characteristics.
pub fn apply_device_information(
    info: &mut DeviceInformation,
    characteristic: CharacteristicRef,
    value: &[u8],
) -> bool {
    if characteristic.service != DEVICE_INFO_SERVICE_UUID {
        return false;
    }
    let slot = match characteristic.characteristic {
        MANUFACTURER_NAME_CHAR_UUID => &mut info.manufacturer_name,
        MODEL_NUMBER_CHAR_UUID => &mut info.model_number,
        HARDWARE_REVISION_CHAR_UUID => &mut info.hardware_revision,
        FIRMWARE_REVISION_CHAR_UUID => &mut info.firmware_revision,
        SOFTWARE_REVISION_CHAR_UUID => &mut info.software_revision,
        _ => return false,
    };
    let text = String::from_utf8_lossy(value);
    *slot = Some(text.trim_end_matches('\0').to_string());
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::testing::{RecordingTransport, Request};

    fn device() -> DeviceId {
        DeviceId::new("board")
    }

    fn uart_characteristics() -> Vec<GattCharacteristic> {
        vec![
            GattCharacteristic::new(
                UART_SERVICE_UUID,
                UART_TX_CHAR_UUID,
                CharProperties::WRITE_WITHOUT_RESPONSE | CharProperties::WRITE,
            ),
            GattCharacteristic::new(UART_SERVICE_UUID, UART_RX_CHAR_UUID, CharProperties::NOTIFY),
        ]
    }

    #[test]
    fn test_service_filters() {
        let uart = GattResolver::new(ConnectionMode::Uart).service_filter().unwrap();
        assert_eq!(
            uart,
            vec![UART_SERVICE_UUID, DFU_SERVICE_UUID, DEVICE_INFO_SERVICE_UUID]
        );
        let dfu = GattResolver::new(ConnectionMode::Dfu).service_filter().unwrap();
        assert_eq!(dfu, uart);
        assert!(GattResolver::new(ConnectionMode::Info).service_filter().is_none());
    }

    #[test]
    fn test_uart_targeted_discovery() {
        let mut transport = RecordingTransport::new();
        let mut resolver = GattResolver::new(ConnectionMode::Uart);
        let services = vec![
            GattService::new(UART_SERVICE_UUID),
            GattService::new(DFU_SERVICE_UUID),
            GattService::new(DEVICE_INFO_SERVICE_UUID),
        ];

        let resolution = resolver
            .on_services(&mut transport, &device(), Ok(services))
            .unwrap();
        assert_eq!(resolution, Resolution::Pending);
        // Only the UART service, and only TX and RX
        assert_eq!(
            transport.take_requests(),
            vec![Request::DiscoverCharacteristics {
                service: UART_SERVICE_UUID,
                filter: Some(vec![UART_TX_CHAR_UUID, UART_RX_CHAR_UUID]),
            }]
        );

        let resolution = resolver
            .on_characteristics(
                &mut transport,
                &device(),
                UART_SERVICE_UUID,
                Ok(uart_characteristics()),
            )
            .unwrap();
        let channel = match resolution {
            Resolution::Data(channel) => channel,
            other => panic!("expected data channel, got {:?}", other),
        };
        assert_eq!(channel.tx.uuid, UART_TX_CHAR_UUID);
        assert_eq!(channel.rx.uuid, UART_RX_CHAR_UUID);
        assert_eq!(
            transport.take_requests(),
            vec![Request::SetNotify {
                characteristic: CharacteristicRef::new(UART_SERVICE_UUID, UART_RX_CHAR_UUID),
                enabled: true,
            }]
        );
    }

    #[test]
    fn test_cached_characteristics_resolve_immediately() {
        let mut transport = RecordingTransport::new();
        let mut resolver = GattResolver::new(ConnectionMode::Controller);
        let services = vec![GattService::with_characteristics(
            UART_SERVICE_UUID,
            uart_characteristics(),
        )];

        let resolution = resolver
            .on_services(&mut transport, &device(), Ok(services))
            .unwrap();
        assert!(matches!(resolution, Resolution::Data(_)));
        assert!(resolver.is_done());
    }

    #[test]
    fn test_missing_service_fails_once() {
        let mut transport = RecordingTransport::new();
        let mut resolver = GattResolver::new(ConnectionMode::Uart);

        let err = resolver
            .on_services(&mut transport, &device(), Ok(vec![]))
            .unwrap_err();
        assert!(matches!(err, SessionError::DiscoveryFailed(_)));

        // Later completions are ignored
        let again = resolver.on_characteristics(
            &mut transport,
            &device(),
            UART_SERVICE_UUID,
            Ok(uart_characteristics()),
        );
        assert_eq!(again, Ok(Resolution::Pending));
    }

    #[test]
    fn test_discovery_error_is_reported() {
        let mut transport = RecordingTransport::new();
        let mut resolver = GattResolver::new(ConnectionMode::Info);
        let err = resolver
            .on_services(&mut transport, &device(), Err("insufficient auth".into()))
            .unwrap_err();
        assert_eq!(err, SessionError::DiscoveryFailed("insufficient auth".into()));
    }

    #[test]
    fn test_info_counts_outstanding_discoveries() {
        let mut transport = RecordingTransport::new();
        let mut resolver = GattResolver::new(ConnectionMode::Info);
        let battery = protocol_uuid(0x180F);
        let level = protocol_uuid(0x2A19);

        let resolution = resolver
            .on_services(
                &mut transport,
                &device(),
                Ok(vec![
                    GattService::new(DEVICE_INFO_SERVICE_UUID),
                    GattService::new(battery),
                ]),
            )
            .unwrap();
        assert_eq!(resolution, Resolution::Pending);
        assert_eq!(transport.take_requests().len(), 2);

        // Battery answers first
        let resolution = resolver
            .on_characteristics(
                &mut transport,
                &device(),
                battery,
                Ok(vec![GattCharacteristic::new(
                    battery,
                    level,
                    CharProperties::READ | CharProperties::NOTIFY,
                )]),
            )
            .unwrap();
        assert_eq!(resolution, Resolution::Pending);
        let battery_level = CharacteristicRef::new(battery, level);
        assert_eq!(
            transport.take_requests(),
            vec![
                Request::Read {
                    characteristic: battery_level
                },
                Request::DiscoverDescriptors {
                    characteristic: battery_level
                },
            ]
        );

        // Its descriptors arrive before the other service's characteristics
        let resolution = resolver
            .on_descriptors(battery_level, Ok(vec![protocol_uuid(0x2902)]))
            .unwrap();
        assert_eq!(resolution, Resolution::Pending);

        let manufacturer = CharacteristicRef::new(DEVICE_INFO_SERVICE_UUID, MANUFACTURER_NAME_CHAR_UUID);
        let model = CharacteristicRef::new(DEVICE_INFO_SERVICE_UUID, MODEL_NUMBER_CHAR_UUID);
        resolver
            .on_characteristics(
                &mut transport,
                &device(),
                DEVICE_INFO_SERVICE_UUID,
                Ok(vec![
                    GattCharacteristic::new(
                        DEVICE_INFO_SERVICE_UUID,
                        MANUFACTURER_NAME_CHAR_UUID,
                        CharProperties::READ,
                    ),
                    GattCharacteristic::new(
                        DEVICE_INFO_SERVICE_UUID,
                        MODEL_NUMBER_CHAR_UUID,
                        CharProperties::READ,
                    ),
                ]),
            )
            .unwrap();

        assert_eq!(
            resolver.on_descriptors(model, Ok(vec![])),
            Ok(Resolution::Pending)
        );
        assert_eq!(
            resolver.on_descriptors(manufacturer, Ok(vec![])),
            Ok(Resolution::Info)
        );
        // Finalizes only once
        assert_eq!(
            resolver.on_descriptors(manufacturer, Ok(vec![])),
            Ok(Resolution::Pending)
        );

        let stored = resolver.services()[1].characteristic(level).unwrap();
        assert_eq!(stored.descriptors, Some(vec![protocol_uuid(0x2902)]));
    }

    #[test]
    fn test_info_without_services_finishes_immediately() {
        let mut transport = RecordingTransport::new();
        let mut resolver = GattResolver::new(ConnectionMode::Info);
        assert_eq!(
            resolver.on_services(&mut transport, &device(), Ok(vec![])),
            Ok(Resolution::Info)
        );
    }

    #[test]
    fn test_dfu_uses_uart_and_reads_device_information() {
        let mut transport = RecordingTransport::new();
        let mut resolver = GattResolver::new(ConnectionMode::Dfu);

        resolver
            .on_services(
                &mut transport,
                &device(),
                Ok(vec![
                    GattService::new(UART_SERVICE_UUID),
                    GattService::new(DEVICE_INFO_SERVICE_UUID),
                ]),
            )
            .unwrap();
        assert_eq!(
            transport.take_requests(),
            vec![
                Request::DiscoverCharacteristics {
                    service: DEVICE_INFO_SERVICE_UUID,
                    filter: Some(DEVICE_INFO_CHAR_UUIDS.to_vec()),
                },
                Request::DiscoverCharacteristics {
                    service: UART_SERVICE_UUID,
                    filter: Some(vec![UART_TX_CHAR_UUID, UART_RX_CHAR_UUID]),
                },
            ]
        );

        let firmware = GattCharacteristic::new(
            DEVICE_INFO_SERVICE_UUID,
            FIRMWARE_REVISION_CHAR_UUID,
            CharProperties::READ,
        );
        resolver
            .on_characteristics(
                &mut transport,
                &device(),
                DEVICE_INFO_SERVICE_UUID,
                Ok(vec![firmware.clone()]),
            )
            .unwrap();
        assert_eq!(
            transport.take_requests(),
            vec![Request::Read {
                characteristic: firmware.reference()
            }]
        );

        let resolution = resolver
            .on_characteristics(
                &mut transport,
                &device(),
                UART_SERVICE_UUID,
                Ok(uart_characteristics()),
            )
            .unwrap();
        let Resolution::Data(channel) = resolution else {
            panic!("expected data channel");
        };
        assert_eq!(channel.tx.uuid, UART_TX_CHAR_UUID);
        assert_eq!(channel.rx.uuid, UART_RX_CHAR_UUID);
    }

    #[test]
    fn test_dfu_without_device_information() {
        let mut transport = RecordingTransport::new();
        let mut resolver = GattResolver::new(ConnectionMode::Dfu);
        let resolution = resolver
            .on_services(
                &mut transport,
                &device(),
                Ok(vec![GattService::with_characteristics(
                    UART_SERVICE_UUID,
                    uart_characteristics(),
                )]),
            )
            .unwrap();
        assert!(matches!(resolution, Resolution::Data(_)));
    }

    #[test]
    fn test_apply_device_information() {
        let mut info = DeviceInformation::default();
        let firmware = CharacteristicRef::new(DEVICE_INFO_SERVICE_UUID, FIRMWARE_REVISION_CHAR_UUID);
        assert!(apply_device_information(&mut info, firmware, b"S110 8.0.0\0"));
        assert_eq!(info.firmware_revision.as_deref(), Some("S110 8.0.0"));

        let other = CharacteristicRef::new(UART_SERVICE_UUID, UART_RX_CHAR_UUID);
        assert!(!apply_device_information(&mut info, other, b"x"));
    }

    fn protocol_uuid(short: u16) -> Uuid {
        crate::infrastructure::bluetooth::protocol::uuid_from_u16(short)
    }
}
