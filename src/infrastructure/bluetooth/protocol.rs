//! Bluefruit Protocol
//!
//! GATT identifiers used by Bluefruit boards, outbound write fragmentation
//! and the Controller packet format.

use tracing::trace;
use uuid::Uuid;

/// Expands a 16-bit assigned number onto the Bluetooth base UUID
/// (0000xxxx-0000-1000-8000-00805f9b34fb).
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

/// Nordic UART service
pub const UART_SERVICE_UUID: Uuid = Uuid::from_u128(0x6e400001_b5a3_f393_e0a9_e50e24dcca9e);
/// UART TX: central to peripheral
pub const UART_TX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
/// UART RX: peripheral to central, notified
pub const UART_RX_CHAR_UUID: Uuid = Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Nordic legacy DFU service
pub const DFU_SERVICE_UUID: Uuid = Uuid::from_u128(0x00001530_1212_efde_1523_785feabcd123);

/// Device Information service and its string characteristics
pub const DEVICE_INFO_SERVICE_UUID: Uuid = uuid_from_u16(0x180A);
pub const MANUFACTURER_NAME_CHAR_UUID: Uuid = uuid_from_u16(0x2A29);
pub const MODEL_NUMBER_CHAR_UUID: Uuid = uuid_from_u16(0x2A24);
pub const HARDWARE_REVISION_CHAR_UUID: Uuid = uuid_from_u16(0x2A27);
pub const FIRMWARE_REVISION_CHAR_UUID: Uuid = uuid_from_u16(0x2A26);
pub const SOFTWARE_REVISION_CHAR_UUID: Uuid = uuid_from_u16(0x2A28);

pub const DEVICE_INFO_CHAR_UUIDS: [Uuid; 5] = [
    MANUFACTURER_NAME_CHAR_UUID,
    MODEL_NUMBER_CHAR_UUID,
    HARDWARE_REVISION_CHAR_UUID,
    FIRMWARE_REVISION_CHAR_UUID,
    SOFTWARE_REVISION_CHAR_UUID,
];

/// Largest payload the peripheral accepts in one write
pub const DEFAULT_WRITE_CHUNK_LIMIT: usize = 20;

/// Splits an outbound payload into writes of at most `limit` bytes, in order.
///
/// An empty payload produces no writes.
pub fn fragment(data: &[u8], limit: usize) -> impl Iterator<Item = &[u8]> {
    data.chunks(limit.max(1))
}

/// One-byte checksum: the complement of the 8-bit sum of `data`.
pub fn checksum(data: &[u8]) -> u8 {
    !data.iter().fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// Returns `data` followed by its checksum byte.
pub fn append_checksum(data: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(data.len() + 1);
    framed.extend_from_slice(data);
    framed.push(checksum(data));
    framed
}

/// Checks a checksummed frame: all bytes including the trailer sum to 0xFF.
pub fn verify_checksum(frame: &[u8]) -> bool {
    !frame.is_empty() && frame.iter().fold(0u8, |sum, b| sum.wrapping_add(*b)) == 0xFF
}

/// Sensor streams of the Controller module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Quaternion,
    Accelerometer,
    Gyroscope,
    Magnetometer,
    Location,
}

impl SensorKind {
    pub fn prefix(self) -> &'static [u8; 2] {
        match self {
            Self::Quaternion => b"!Q",
            Self::Accelerometer => b"!A",
            Self::Gyroscope => b"!G",
            Self::Magnetometer => b"!M",
            Self::Location => b"!L",
        }
    }
}

/// Packets sent to the peripheral by the Controller module
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerPacket {
    /// Control pad button, `id` is the pad number
    Button { id: u8, pressed: bool },
    Color { red: u8, green: u8, blue: u8 },
    /// Sensor sample, three or four values depending on the sensor
    Sensor { kind: SensorKind, values: Vec<f32> },
}

impl ControllerPacket {
    /// Encodes the packet body without the checksum.
    ///
    /// # Packet Structure
    ///
    /// ```text
    /// Button : '!' 'B' <id as ASCII digits> <'1' pressed | '0' released>
    /// Color  : '!' 'C' r g b
    /// Sensor : '!' <Q|A|G|M|L> f32 (little-endian) x N
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Button { id, pressed } => {
                format!("!B{}{}", id, if *pressed { '1' } else { '0' }).into_bytes()
            }
            Self::Color { red, green, blue } => vec![b'!', b'C', *red, *green, *blue],
            Self::Sensor { kind, values } => {
                let mut bytes = Vec::with_capacity(2 + values.len() * 4);
                bytes.extend_from_slice(kind.prefix());
                for value in values {
                    bytes.extend_from_slice(&value.to_le_bytes());
                }
                bytes
            }
        }
    }

    /// Encodes the packet with its trailing checksum, ready to write.
    pub fn to_frame(&self) -> Vec<u8> {
        let frame = append_checksum(&self.encode());
        trace!("Controller frame: {:02X?}", frame);
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_constants() {
        assert_eq!(
            UART_SERVICE_UUID.to_string(),
            "6e400001-b5a3-f393-e0a9-e50e24dcca9e"
        );
        assert_eq!(
            DEVICE_INFO_SERVICE_UUID.to_string(),
            "0000180a-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            FIRMWARE_REVISION_CHAR_UUID.to_string(),
            "00002a26-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_fragment_boundaries() {
        let data: Vec<u8> = (0..45).collect();
        let sizes: Vec<usize> = fragment(&data, 20).map(|c| c.len()).collect();
        assert_eq!(sizes, vec![20, 20, 5]);

        let exact: Vec<u8> = vec![0xAA; 20];
        assert_eq!(fragment(&exact, 20).count(), 1);
        assert_eq!(fragment(&[], 20).count(), 0);
    }

    #[test]
    fn test_fragment_concat_identity() {
        for len in [1usize, 19, 20, 21, 39, 40, 41, 100, 257] {
            let data: Vec<u8> = (0..len).map(|i| (i * 7) as u8).collect();
            let chunks: Vec<&[u8]> = fragment(&data, 20).collect();
            assert_eq!(chunks.len(), len.div_ceil(20));
            assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= 20));
            assert_eq!(chunks.concat(), data);
        }
    }

    #[test]
    fn test_checksum_sum_property() {
        for payload in [&b"!B11"[..], &[0u8][..], &[0xFF, 0xFF, 0x10][..], &b""[..]] {
            let framed = append_checksum(payload);
            assert_eq!(framed.len(), payload.len() + 1);
            let sum = framed.iter().fold(0u8, |s, b| s.wrapping_add(*b));
            assert_eq!(sum, 0xFF);
            assert!(verify_checksum(&framed));
        }
        assert_eq!(checksum(&[]), 0xFF);
    }

    #[test]
    fn test_button_packet() {
        let packet = ControllerPacket::Button {
            id: 5,
            pressed: true,
        };
        assert_eq!(packet.encode(), b"!B51".to_vec());
        let frame = packet.to_frame();
        assert_eq!(&frame[..4], b"!B51");
        assert!(verify_checksum(&frame));

        let released = ControllerPacket::Button {
            id: 5,
            pressed: false,
        };
        assert_eq!(released.encode(), b"!B50".to_vec());
    }

    #[test]
    fn test_color_and_sensor_packets() {
        let color = ControllerPacket::Color {
            red: 0xFF,
            green: 0x80,
            blue: 0x00,
        };
        assert_eq!(color.encode(), vec![b'!', b'C', 0xFF, 0x80, 0x00]);

        let accel = ControllerPacket::Sensor {
            kind: SensorKind::Accelerometer,
            values: vec![1.0, -1.0, 0.5],
        };
        let encoded = accel.encode();
        assert_eq!(encoded.len(), 2 + 12);
        assert_eq!(&encoded[..2], b"!A");
        assert_eq!(&encoded[2..6], &1.0f32.to_le_bytes());
        assert_eq!(accel.to_frame().len(), 15);
    }
}
