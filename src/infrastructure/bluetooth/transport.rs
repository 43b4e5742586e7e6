//! BLE Transport Boundary
//!
//! Every request to the BLE stack is submitted without waiting; its outcome
//! comes back later as a [`TransportEvent`] on the session's event queue.
//! A request only fails synchronously when it could not be submitted.
//!
//! Completions of requests submitted to one peripheral arrive in submission
//! order, and nothing submitted before the last `connect` or
//! `cancel_connection` for that peripheral completes afterwards.

use crate::domain::models::DeviceId;
use crate::error::TransportError;
use crate::infrastructure::bluetooth::gatt::{
    CharacteristicRef, GattCharacteristic, GattService, WriteType,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One advertisement report seen while scanning.
#[derive(Debug, Clone, PartialEq)]
pub struct Advertisement {
    pub device: DeviceId,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
    pub connectable: bool,
    pub service_uuids: Vec<Uuid>,
}

/// Request side of the BLE stack.
pub trait Transport {
    fn is_powered_on(&self) -> bool;

    /// Starts scanning for peripherals advertising any of `services`
    /// (all peripherals when empty).
    fn start_scan(&mut self, services: &[Uuid], allow_duplicates: bool)
        -> Result<(), TransportError>;

    fn stop_scan(&mut self) -> Result<(), TransportError>;

    fn connect(&mut self, device: &DeviceId) -> Result<(), TransportError>;

    /// Cancels a pending or established connection.
    fn cancel_connection(&mut self, device: &DeviceId) -> Result<(), TransportError>;

    /// Services the stack already knows for `device`, if any.
    fn cached_services(&self, device: &DeviceId) -> Option<Vec<GattService>>;

    /// `None` discovers every service.
    fn discover_services(
        &mut self,
        device: &DeviceId,
        filter: Option<&[Uuid]>,
    ) -> Result<(), TransportError>;

    /// `None` discovers every characteristic of `service`.
    fn discover_characteristics(
        &mut self,
        device: &DeviceId,
        service: Uuid,
        filter: Option<&[Uuid]>,
    ) -> Result<(), TransportError>;

    fn discover_descriptors(
        &mut self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
    ) -> Result<(), TransportError>;

    fn write_value(
        &mut self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
        data: &[u8],
        write_type: WriteType,
    ) -> Result<(), TransportError>;

    fn set_notify(
        &mut self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
        enabled: bool,
    ) -> Result<(), TransportError>;

    fn read_value(
        &mut self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
    ) -> Result<(), TransportError>;
}

/// Completion side of the BLE stack.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    PowerStateChanged {
        powered_on: bool,
    },
    DeviceDiscovered(Advertisement),
    Connected {
        device: DeviceId,
    },
    ConnectFailed {
        device: DeviceId,
        error: String,
    },
    Disconnected {
        device: DeviceId,
        error: Option<String>,
    },
    ServicesDiscovered {
        device: DeviceId,
        result: Result<Vec<GattService>, String>,
    },
    CharacteristicsDiscovered {
        device: DeviceId,
        service: Uuid,
        result: Result<Vec<GattCharacteristic>, String>,
    },
    DescriptorsDiscovered {
        device: DeviceId,
        characteristic: CharacteristicRef,
        result: Result<Vec<Uuid>, String>,
    },
    /// A read completed or a notification arrived
    ValueUpdated {
        device: DeviceId,
        characteristic: CharacteristicRef,
        result: Result<Vec<u8>, String>,
    },
    WriteComplete {
        device: DeviceId,
        characteristic: CharacteristicRef,
        result: Result<(), String>,
    },
    NotifyStateChanged {
        device: DeviceId,
        characteristic: CharacteristicRef,
        result: Result<(), String>,
    },
}

impl TransportEvent {
    /// Peripheral the event belongs to; `None` for adapter-wide events.
    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            Self::PowerStateChanged { .. } => None,
            Self::DeviceDiscovered(adv) => Some(&adv.device),
            Self::Connected { device }
            | Self::ConnectFailed { device, .. }
            | Self::Disconnected { device, .. }
            | Self::ServicesDiscovered { device, .. }
            | Self::CharacteristicsDiscovered { device, .. }
            | Self::DescriptorsDiscovered { device, .. }
            | Self::ValueUpdated { device, .. }
            | Self::WriteComplete { device, .. }
            | Self::NotifyStateChanged { device, .. } => Some(device),
        }
    }
}

/// Callbacks for a connected peripheral, implemented by the session.
pub trait PeripheralDelegate {
    fn on_connected(&mut self, device: &DeviceId);

    fn on_connect_failed(&mut self, device: &DeviceId, error: &str);

    fn on_disconnected(&mut self, device: &DeviceId, error: Option<&str>);

    fn on_services_discovered(&mut self, device: &DeviceId, result: Result<Vec<GattService>, String>);

    fn on_characteristics_discovered(
        &mut self,
        device: &DeviceId,
        service: Uuid,
        result: Result<Vec<GattCharacteristic>, String>,
    );

    fn on_descriptors_discovered(
        &mut self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
        result: Result<Vec<Uuid>, String>,
    );

    fn on_value_updated(
        &mut self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
        result: Result<Vec<u8>, String>,
    );

    fn on_write_complete(
        &mut self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
        result: Result<(), String>,
    );

    fn on_notify_state_changed(
        &mut self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
        result: Result<(), String>,
    );
}

/// Routes a peripheral event to its delegate callback. Adapter-wide events
/// are handed back to the caller.
pub fn dispatch<D: PeripheralDelegate + ?Sized>(
    delegate: &mut D,
    event: TransportEvent,
) -> Option<TransportEvent> {
    match event {
        TransportEvent::Connected { device } => delegate.on_connected(&device),
        TransportEvent::ConnectFailed { device, error } => {
            delegate.on_connect_failed(&device, &error)
        }
        TransportEvent::Disconnected { device, error } => {
            delegate.on_disconnected(&device, error.as_deref())
        }
        TransportEvent::ServicesDiscovered { device, result } => {
            delegate.on_services_discovered(&device, result)
        }
        TransportEvent::CharacteristicsDiscovered {
            device,
            service,
            result,
        } => delegate.on_characteristics_discovered(&device, service, result),
        TransportEvent::DescriptorsDiscovered {
            device,
            characteristic,
            result,
        } => delegate.on_descriptors_discovered(&device, characteristic, result),
        TransportEvent::ValueUpdated {
            device,
            characteristic,
            result,
        } => delegate.on_value_updated(&device, characteristic, result),
        TransportEvent::WriteComplete {
            device,
            characteristic,
            result,
        } => delegate.on_write_complete(&device, characteristic, result),
        TransportEvent::NotifyStateChanged {
            device,
            characteristic,
            result,
        } => delegate.on_notify_state_changed(&device, characteristic, result),
        other => return Some(other),
    }
    None
}

/// Runs the requests of one peripheral one at a time, in submission order,
/// and queues each completion event.
///
/// Dropping the queue abandons it: pending requests are skipped and a
/// request still running never reports back.
pub struct SerialQueue<R> {
    requests: mpsc::UnboundedSender<R>,
    abandoned: Arc<AtomicBool>,
}

impl<R: Send + 'static> SerialQueue<R> {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn<F, Fut>(events: mpsc::UnboundedSender<TransportEvent>, mut perform: F) -> Self
    where
        F: FnMut(R) -> Fut + Send + 'static,
        Fut: Future<Output = TransportEvent> + Send + 'static,
    {
        let (requests, mut pending) = mpsc::unbounded_channel();
        let abandoned = Arc::new(AtomicBool::new(false));
        let flag = abandoned.clone();
        tokio::spawn(async move {
            while let Some(request) = pending.recv().await {
                if flag.load(Ordering::Acquire) {
                    break;
                }
                let completion = perform(request).await;
                if flag.load(Ordering::Acquire) || events.send(completion).is_err() {
                    break;
                }
            }
        });
        Self {
            requests,
            abandoned,
        }
    }

    pub fn submit(&self, request: R) -> Result<(), TransportError> {
        self.requests
            .send(request)
            .map_err(|_| TransportError::new("Request queue closed"))
    }
}

impl<R> Drop for SerialQueue<R> {
    fn drop(&mut self) {
        self.abandoned.store(true, Ordering::Release);
    }
}
