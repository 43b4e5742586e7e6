//! btleplug Transport
//!
//! [`Transport`] on top of the platform BLE stack. Each connection attempt
//! owns a [`SerialQueue`]: its connect, discovery, read, write and subscribe
//! requests run one at a time and report back as [`TransportEvent`]s.
//! Replacing or cancelling the attempt drops the queue, so nothing from an
//! abandoned attempt is delivered. Must be created and used from within a
//! tokio runtime.

use crate::domain::models::DeviceId;
use crate::error::TransportError;
use crate::infrastructure::bluetooth::gatt::{
    CharProperties, CharacteristicRef, GattCharacteristic, GattService, WriteType,
};
use crate::infrastructure::bluetooth::transport::{
    Advertisement, SerialQueue, Transport, TransportEvent,
};
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType as BleWriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

type PeripheralMap = Arc<Mutex<HashMap<DeviceId, Peripheral>>>;

/// Stack requests that belong to one connection attempt
enum PeripheralRequest {
    Connect,
    DiscoverServices(Option<Vec<Uuid>>),
    Write {
        target: Characteristic,
        reference: CharacteristicRef,
        data: Vec<u8>,
        write_type: BleWriteType,
    },
    Read {
        target: Characteristic,
        reference: CharacteristicRef,
    },
    SetNotify {
        target: Characteristic,
        reference: CharacteristicRef,
        enabled: bool,
    },
}

/// One connection attempt. Dropping it abandons its pending requests and
/// stops its notification forwarding.
struct Attempt {
    requests: SerialQueue<PeripheralRequest>,
    notifications: JoinHandle<()>,
}

impl Drop for Attempt {
    fn drop(&mut self) {
        self.notifications.abort();
    }
}

pub struct BtleplugTransport {
    adapter: Adapter,
    peripherals: PeripheralMap,
    attempts: HashMap<DeviceId, Attempt>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl BtleplugTransport {
    /// Opens the first Bluetooth adapter and starts forwarding its events.
    pub async fn new(events: mpsc::UnboundedSender<TransportEvent>) -> anyhow::Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No Bluetooth adapter found"))?;
        info!("Using Bluetooth adapter {}", adapter.adapter_info().await?);

        let transport = Self {
            adapter,
            peripherals: PeripheralMap::default(),
            attempts: HashMap::new(),
            events,
        };
        transport.forward_central_events().await?;
        Ok(transport)
    }

    async fn forward_central_events(&self) -> anyhow::Result<()> {
        let mut stream = self.adapter.events().await?;
        let adapter = self.adapter.clone();
        let peripherals = self.peripherals.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                let forwarded = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => {
                        let Ok(peripheral) = adapter.peripheral(&id).await else {
                            continue;
                        };
                        let Ok(Some(properties)) = peripheral.properties().await else {
                            continue;
                        };
                        let device = DeviceId::new(id.to_string());
                        if let Ok(mut map) = peripherals.lock() {
                            map.insert(device.clone(), peripheral);
                        }
                        TransportEvent::DeviceDiscovered(Advertisement {
                            device,
                            local_name: properties.local_name,
                            rssi: properties.rssi,
                            connectable: true,
                            service_uuids: properties.services,
                        })
                    }
                    CentralEvent::DeviceDisconnected(id) => TransportEvent::Disconnected {
                        device: DeviceId::new(id.to_string()),
                        error: None,
                    },
                    other => {
                        trace!("Unhandled central event {:?}", other);
                        continue;
                    }
                };
                if events.send(forwarded).is_err() {
                    break;
                }
            }
            debug!("Central event stream ended");
        });
        Ok(())
    }

    fn peripheral(&self, device: &DeviceId) -> Result<Peripheral, TransportError> {
        self.peripherals
            .lock()
            .map_err(|_| TransportError::new("Peripheral table poisoned"))?
            .get(device)
            .cloned()
            .ok_or_else(|| TransportError::new(format!("Unknown peripheral {}", device)))
    }

    /// Queues `request` on the current attempt for `device`.
    fn submit(
        &self,
        device: &DeviceId,
        request: PeripheralRequest,
    ) -> Result<(), TransportError> {
        self.attempts
            .get(device)
            .ok_or_else(|| TransportError::new(format!("No connection to {}", device)))?
            .requests
            .submit(request)
    }

    fn send(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

impl Transport for BtleplugTransport {
    /// The adapter was found at construction; btleplug reports no power
    /// state portably.
    fn is_powered_on(&self) -> bool {
        true
    }

    fn start_scan(
        &mut self,
        services: &[Uuid],
        allow_duplicates: bool,
    ) -> Result<(), TransportError> {
        debug!(
            "Starting scan for {:?} (duplicates: {})",
            services, allow_duplicates
        );
        let adapter = self.adapter.clone();
        let filter = ScanFilter {
            services: services.to_vec(),
        };
        tokio::spawn(async move {
            if let Err(e) = adapter.start_scan(filter).await {
                warn!("Failed to start scan: {}", e);
            }
        });
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), TransportError> {
        let adapter = self.adapter.clone();
        tokio::spawn(async move {
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        });
        Ok(())
    }

    fn connect(&mut self, device: &DeviceId) -> Result<(), TransportError> {
        let peripheral = self.peripheral(device)?;
        let owner = device.clone();
        let target = peripheral.clone();
        let requests = SerialQueue::spawn(self.events.clone(), move |request| {
            perform(target.clone(), owner.clone(), request)
        });
        let notifications =
            forward_notifications(self.events.clone(), device.clone(), peripheral);
        // Replacing an earlier attempt abandons it
        self.attempts.insert(
            device.clone(),
            Attempt {
                requests,
                notifications,
            },
        );
        self.submit(device, PeripheralRequest::Connect)
    }

    fn cancel_connection(&mut self, device: &DeviceId) -> Result<(), TransportError> {
        self.attempts.remove(device);
        let Ok(peripheral) = self.peripheral(device) else {
            return Ok(());
        };
        let device = device.clone();
        tokio::spawn(async move {
            if let Err(e) = peripheral.disconnect().await {
                warn!("Failed to disconnect {}: {}", device, e);
            }
        });
        Ok(())
    }

    fn cached_services(&self, device: &DeviceId) -> Option<Vec<GattService>> {
        let services = self.peripheral(device).ok()?.services();
        if services.is_empty() {
            return None;
        }
        Some(services.iter().map(gatt_service).collect())
    }

    fn discover_services(
        &mut self,
        device: &DeviceId,
        filter: Option<&[Uuid]>,
    ) -> Result<(), TransportError> {
        let filter = filter.map(<[Uuid]>::to_vec);
        self.submit(device, PeripheralRequest::DiscoverServices(filter))
    }

    fn discover_characteristics(
        &mut self,
        device: &DeviceId,
        service: Uuid,
        filter: Option<&[Uuid]>,
    ) -> Result<(), TransportError> {
        let peripheral = self.peripheral(device)?;
        let characteristics = peripheral
            .characteristics()
            .iter()
            .filter(|c| c.service_uuid == service)
            .filter(|c| filter.map_or(true, |f| f.contains(&c.uuid)))
            .map(gatt_characteristic)
            .collect();
        self.send(TransportEvent::CharacteristicsDiscovered {
            device: device.clone(),
            service,
            result: Ok(characteristics),
        });
        Ok(())
    }

    fn discover_descriptors(
        &mut self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
    ) -> Result<(), TransportError> {
        let peripheral = self.peripheral(device)?;
        let result = find_characteristic(&peripheral, characteristic)
            .map(|c| c.descriptors.iter().map(|d| d.uuid).collect())
            .map_err(|e| e.message);
        self.send(TransportEvent::DescriptorsDiscovered {
            device: device.clone(),
            characteristic,
            result,
        });
        Ok(())
    }

    fn write_value(
        &mut self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<(), TransportError> {
        let target = find_characteristic(&self.peripheral(device)?, characteristic)?;
        let write_type = match write_type {
            WriteType::WithResponse => BleWriteType::WithResponse,
            WriteType::WithoutResponse => BleWriteType::WithoutResponse,
        };
        self.submit(
            device,
            PeripheralRequest::Write {
                target,
                reference: characteristic,
                data: data.to_vec(),
                write_type,
            },
        )
    }

    fn set_notify(
        &mut self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
        enabled: bool,
    ) -> Result<(), TransportError> {
        let target = find_characteristic(&self.peripheral(device)?, characteristic)?;
        self.submit(
            device,
            PeripheralRequest::SetNotify {
                target,
                reference: characteristic,
                enabled,
            },
        )
    }

    fn read_value(
        &mut self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
    ) -> Result<(), TransportError> {
        let target = find_characteristic(&self.peripheral(device)?, characteristic)?;
        self.submit(
            device,
            PeripheralRequest::Read {
                target,
                reference: characteristic,
            },
        )
    }
}

/// Runs one queued request against the stack.
async fn perform(
    peripheral: Peripheral,
    device: DeviceId,
    request: PeripheralRequest,
) -> TransportEvent {
    match request {
        PeripheralRequest::Connect => match peripheral.connect().await {
            Ok(()) => TransportEvent::Connected { device },
            Err(e) => TransportEvent::ConnectFailed {
                device,
                error: e.to_string(),
            },
        },
        PeripheralRequest::DiscoverServices(filter) => {
            let result = match peripheral.discover_services().await {
                Ok(()) => Ok(peripheral
                    .services()
                    .iter()
                    .filter(|s| filter.as_ref().map_or(true, |f| f.contains(&s.uuid)))
                    .map(gatt_service)
                    .collect()),
                Err(e) => Err(e.to_string()),
            };
            TransportEvent::ServicesDiscovered { device, result }
        }
        PeripheralRequest::Write {
            target,
            reference,
            data,
            write_type,
        } => {
            let result = peripheral
                .write(&target, &data, write_type)
                .await
                .map_err(|e| e.to_string());
            TransportEvent::WriteComplete {
                device,
                characteristic: reference,
                result,
            }
        }
        PeripheralRequest::Read { target, reference } => {
            let result = peripheral.read(&target).await.map_err(|e| e.to_string());
            TransportEvent::ValueUpdated {
                device,
                characteristic: reference,
                result,
            }
        }
        PeripheralRequest::SetNotify {
            target,
            reference,
            enabled,
        } => {
            let result = if enabled {
                peripheral.subscribe(&target).await
            } else {
                peripheral.unsubscribe(&target).await
            };
            TransportEvent::NotifyStateChanged {
                device,
                characteristic: reference,
                result: result.map_err(|e| e.to_string()),
            }
        }
    }
}

fn find_characteristic(
    peripheral: &Peripheral,
    reference: CharacteristicRef,
) -> Result<Characteristic, TransportError> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.service_uuid == reference.service && c.uuid == reference.characteristic)
        .ok_or_else(|| {
            TransportError::new(format!(
                "Characteristic {} not found",
                reference.characteristic
            ))
        })
}

fn gatt_characteristic(characteristic: &Characteristic) -> GattCharacteristic {
    let mut converted = GattCharacteristic::new(
        characteristic.service_uuid,
        characteristic.uuid,
        CharProperties::from_bits(characteristic.properties.bits()),
    );
    converted.descriptors = Some(characteristic.descriptors.iter().map(|d| d.uuid).collect());
    converted
}

fn gatt_service(service: &btleplug::api::Service) -> GattService {
    GattService::with_characteristics(
        service.uuid,
        service
            .characteristics
            .iter()
            .map(gatt_characteristic)
            .collect(),
    )
}

/// Forwards notifications of a peripheral until it goes away or the
/// returned task is aborted.
fn forward_notifications(
    events: mpsc::UnboundedSender<TransportEvent>,
    device: DeviceId,
    peripheral: Peripheral,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut notifications = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!("No notification stream for {}: {}", device, e);
                return;
            }
        };
        while let Some(notification) = notifications.next().await {
            let service = peripheral
                .characteristics()
                .iter()
                .find(|c| c.uuid == notification.uuid)
                .map(|c| c.service_uuid)
                .unwrap_or_default();
            let event = TransportEvent::ValueUpdated {
                device: device.clone(),
                characteristic: CharacteristicRef::new(service, notification.uuid),
                result: Ok(notification.value),
            };
            if events.send(event).is_err() {
                break;
            }
        }
    })
}
