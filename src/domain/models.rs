use crate::domain::pins::PinDescriptor;
use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque handle identifying a peripheral as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the session is used for once connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionMode {
    #[default]
    None,
    PinIo,
    Uart,
    Info,
    Controller,
    Dfu,
}

impl ConnectionMode {
    /// Modes that exchange data over a TX/RX characteristic pair.
    pub fn is_data_mode(self) -> bool {
        matches!(self, Self::Uart | Self::PinIo | Self::Controller | Self::Dfu)
    }

    /// Any mode that owns a screen in the consumer; losing the link while
    /// connected in one of these is an unexpected disconnect.
    pub fn is_module_mode(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "None",
            Self::PinIo => "Pin I/O",
            Self::Uart => "UART",
            Self::Info => "Info",
            Self::Controller => "Controller",
            Self::Dfu => "DFU",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Connected,
}

/// A peripheral seen while scanning.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedDevice {
    pub id: DeviceId,
    pub name: String,
    pub rssi: Option<i16>,
    pub connectable: bool,
    pub service_uuids: Vec<Uuid>,
    /// Advertises the Nordic UART service
    pub is_uart: bool,
}

/// Strings read from the Device Information service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInformation {
    pub manufacturer_name: Option<String>,
    pub model_number: Option<String>,
    pub hardware_revision: Option<String>,
    pub firmware_revision: Option<String>,
    pub software_revision: Option<String>,
}

impl DeviceInformation {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Events delivered to the consumer of a session.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    DeviceFound(ScannedDevice),
    ConnectionStatus(ConnectionStatus),
    ConnectionFinalized {
        device: DeviceId,
        mode: ConnectionMode,
    },
    /// Link closed by the user or while still connecting
    Disconnected {
        device: DeviceId,
    },
    /// Link lost while a module mode was connected
    UnexpectedDisconnect {
        device: DeviceId,
        mode: ConnectionMode,
        reason: Option<String>,
    },
    ConnectionTimedOut {
        device: DeviceId,
    },
    DataReceived(Vec<u8>),
    PinStateChanged {
        pin: u8,
        value: u16,
    },
    PinLayoutReady(Vec<PinDescriptor>),
    DeviceInformation(DeviceInformation),
    /// Info mode: a characteristic value was read
    CharacteristicValue {
        service: Uuid,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// Info mode: descriptors enumerated for a characteristic
    Descriptors {
        service: Uuid,
        characteristic: Uuid,
        descriptors: Vec<Uuid>,
    },
    /// Message received on the subscribed MQTT topic
    MqttMessage {
        topic: String,
        payload: String,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_classification() {
        assert!(ConnectionMode::Uart.is_data_mode());
        assert!(ConnectionMode::Dfu.is_data_mode());
        assert!(!ConnectionMode::Info.is_data_mode());
        assert!(ConnectionMode::Info.is_module_mode());
        assert!(!ConnectionMode::None.is_module_mode());
    }
}
