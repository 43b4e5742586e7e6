//! GATT tree nodes as reported by the transport.

use std::fmt;
use std::ops::BitOr;
use uuid::Uuid;

/// Characteristic properties bitmask with the ATT bit values.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CharProperties(u8);

impl CharProperties {
    pub const BROADCAST: Self = Self(0x01);
    pub const READ: Self = Self(0x02);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CharProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for CharProperties {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::BROADCAST, "BROADCAST"),
            (Self::READ, "READ"),
            (Self::WRITE_WITHOUT_RESPONSE, "WRITE_WITHOUT_RESPONSE"),
            (Self::WRITE, "WRITE"),
            (Self::NOTIFY, "NOTIFY"),
            (Self::INDICATE, "INDICATE"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "CharProperties({})", set.join(" | "))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteType {
    WithResponse,
    WithoutResponse,
}

/// Addresses a characteristic within a peripheral's GATT tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl CharacteristicRef {
    pub fn new(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub service_uuid: Uuid,
    pub properties: CharProperties,
    /// Last value read or notified
    pub value: Option<Vec<u8>>,
    /// Known only after descriptor discovery
    pub descriptors: Option<Vec<Uuid>>,
}

impl GattCharacteristic {
    pub fn new(service_uuid: Uuid, uuid: Uuid, properties: CharProperties) -> Self {
        Self {
            uuid,
            service_uuid,
            properties,
            value: None,
            descriptors: None,
        }
    }

    pub fn reference(&self) -> CharacteristicRef {
        CharacteristicRef::new(self.service_uuid, self.uuid)
    }

    /// Picks the write type for outbound data, preferring writes without
    /// response.
    pub fn preferred_write_type(&self) -> Option<WriteType> {
        if self.properties.contains(CharProperties::WRITE_WITHOUT_RESPONSE) {
            Some(WriteType::WithoutResponse)
        } else if self.properties.contains(CharProperties::WRITE) {
            Some(WriteType::WithResponse)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    /// `None` until characteristic discovery has completed for this service
    pub characteristics: Option<Vec<GattCharacteristic>>,
}

impl GattService {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid,
            characteristics: None,
        }
    }

    pub fn with_characteristics(uuid: Uuid, characteristics: Vec<GattCharacteristic>) -> Self {
        Self {
            uuid,
            characteristics: Some(characteristics),
        }
    }

    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.characteristics
            .as_ref()
            .and_then(|chars| chars.iter().find(|c| c.uuid == uuid))
    }

    pub fn characteristic_mut(&mut self, uuid: Uuid) -> Option<&mut GattCharacteristic> {
        self.characteristics
            .as_mut()
            .and_then(|chars| chars.iter_mut().find(|c| c.uuid == uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_type_preference() {
        let service = Uuid::from_u128(1);
        let both = GattCharacteristic::new(
            service,
            Uuid::from_u128(2),
            CharProperties::WRITE | CharProperties::WRITE_WITHOUT_RESPONSE,
        );
        assert_eq!(both.preferred_write_type(), Some(WriteType::WithoutResponse));

        let with_response = GattCharacteristic::new(service, Uuid::from_u128(3), CharProperties::WRITE);
        assert_eq!(
            with_response.preferred_write_type(),
            Some(WriteType::WithResponse)
        );

        let notify_only = GattCharacteristic::new(service, Uuid::from_u128(4), CharProperties::NOTIFY);
        assert_eq!(notify_only.preferred_write_type(), None);
    }

    #[test]
    fn test_properties_debug() {
        let props = CharProperties::READ | CharProperties::NOTIFY;
        assert_eq!(format!("{:?}", props), "CharProperties(READ | NOTIFY)");
        assert!(props.contains(CharProperties::READ));
        assert!(!props.contains(CharProperties::WRITE));
    }
}
