//! Recording transport shared by the Bluetooth unit tests.

use crate::domain::models::DeviceId;
use crate::error::TransportError;
use crate::infrastructure::bluetooth::gatt::{CharacteristicRef, GattService, WriteType};
use crate::infrastructure::bluetooth::transport::Transport;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    StartScan {
        services: Vec<Uuid>,
        allow_duplicates: bool,
    },
    StopScan,
    Connect {
        device: DeviceId,
    },
    CancelConnection {
        device: DeviceId,
    },
    DiscoverServices {
        filter: Option<Vec<Uuid>>,
    },
    DiscoverCharacteristics {
        service: Uuid,
        filter: Option<Vec<Uuid>>,
    },
    DiscoverDescriptors {
        characteristic: CharacteristicRef,
    },
    Write {
        characteristic: CharacteristicRef,
        data: Vec<u8>,
        write_type: WriteType,
    },
    SetNotify {
        characteristic: CharacteristicRef,
        enabled: bool,
    },
    Read {
        characteristic: CharacteristicRef,
    },
}

/// Accepts every request and records it. Clones share the same log.
#[derive(Debug, Clone)]
pub struct RecordingTransport {
    pub powered_on: bool,
    pub cached: HashMap<DeviceId, Vec<GattService>>,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            powered_on: true,
            cached: HashMap::new(),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn take_requests(&self) -> Vec<Request> {
        std::mem::take(&mut *self.requests.lock().unwrap())
    }

    /// Payloads of the recorded writes, in order
    pub fn take_writes(&self) -> Vec<Vec<u8>> {
        self.take_requests()
            .into_iter()
            .filter_map(|r| match r {
                Request::Write { data, .. } => Some(data),
                _ => None,
            })
            .collect()
    }

    fn record(&self, request: Request) -> Result<(), TransportError> {
        self.requests.lock().unwrap().push(request);
        Ok(())
    }
}

impl Transport for RecordingTransport {
    fn is_powered_on(&self) -> bool {
        self.powered_on
    }

    fn start_scan(
        &mut self,
        services: &[Uuid],
        allow_duplicates: bool,
    ) -> Result<(), TransportError> {
        self.record(Request::StartScan {
            services: services.to_vec(),
            allow_duplicates,
        })
    }

    fn stop_scan(&mut self) -> Result<(), TransportError> {
        self.record(Request::StopScan)
    }

    fn connect(&mut self, device: &DeviceId) -> Result<(), TransportError> {
        self.record(Request::Connect {
            device: device.clone(),
        })
    }

    fn cancel_connection(&mut self, device: &DeviceId) -> Result<(), TransportError> {
        self.record(Request::CancelConnection {
            device: device.clone(),
        })
    }

    fn cached_services(&self, device: &DeviceId) -> Option<Vec<GattService>> {
        self.cached.get(device).cloned()
    }

    fn discover_services(
        &mut self,
        _device: &DeviceId,
        filter: Option<&[Uuid]>,
    ) -> Result<(), TransportError> {
        self.record(Request::DiscoverServices {
            filter: filter.map(<[Uuid]>::to_vec),
        })
    }

    fn discover_characteristics(
        &mut self,
        _device: &DeviceId,
        service: Uuid,
        filter: Option<&[Uuid]>,
    ) -> Result<(), TransportError> {
        self.record(Request::DiscoverCharacteristics {
            service,
            filter: filter.map(<[Uuid]>::to_vec),
        })
    }

    fn discover_descriptors(
        &mut self,
        _device: &DeviceId,
        characteristic: CharacteristicRef,
    ) -> Result<(), TransportError> {
        self.record(Request::DiscoverDescriptors { characteristic })
    }

    fn write_value(
        &mut self,
        _device: &DeviceId,
        characteristic: CharacteristicRef,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<(), TransportError> {
        self.record(Request::Write {
            characteristic,
            data: data.to_vec(),
            write_type,
        })
    }

    fn set_notify(
        &mut self,
        _device: &DeviceId,
        characteristic: CharacteristicRef,
        enabled: bool,
    ) -> Result<(), TransportError> {
        self.record(Request::SetNotify {
            characteristic,
            enabled,
        })
    }

    fn read_value(
        &mut self,
        _device: &DeviceId,
        characteristic: CharacteristicRef,
    ) -> Result<(), TransportError> {
        self.record(Request::Read { characteristic })
    }
}
