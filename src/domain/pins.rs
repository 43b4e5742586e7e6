//! Pin model for Firmata-style boards.

use std::collections::BTreeMap;
use std::fmt;

/// Modes a board pin can be put in, with their Firmata mode ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PinMode {
    Input,
    Output,
    Analog,
    Pwm,
    Servo,
    I2c,
}

impl PinMode {
    pub fn id(self) -> u8 {
        match self {
            Self::Input => 0x00,
            Self::Output => 0x01,
            Self::Analog => 0x02,
            Self::Pwm => 0x03,
            Self::Servo => 0x04,
            Self::I2c => 0x06,
        }
    }

    /// Maps a mode id from the wire; ids this client does not drive are ignored.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x00 => Some(Self::Input),
            0x01 => Some(Self::Output),
            0x02 => Some(Self::Analog),
            0x03 => Some(Self::Pwm),
            0x04 => Some(Self::Servo),
            0x06 => Some(Self::I2c),
            _ => None,
        }
    }

    /// Digital modes whose value follows the port reports.
    pub fn is_digital(self) -> bool {
        matches!(self, Self::Input | Self::Output)
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Input => "Input",
            Self::Output => "Output",
            Self::Analog => "Analog",
            Self::Pwm => "PWM",
            Self::Servo => "Servo",
            Self::I2c => "I2C",
        };
        f.write_str(name)
    }
}

/// One I/O pin of the remote board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinDescriptor {
    pub index: u8,
    /// Supported modes with the resolution the board reported for each
    pub capabilities: BTreeMap<PinMode, u8>,
    pub analog_channel: Option<u8>,
    /// `None` only for pins the board reported as unavailable
    pub mode: Option<PinMode>,
    pub value: u16,
}

impl PinDescriptor {
    /// Builds a pin in its default mode: Input when supported, else the
    /// first supported mode.
    pub fn new(index: u8, capabilities: BTreeMap<PinMode, u8>, analog_channel: Option<u8>) -> Self {
        let mode = if capabilities.contains_key(&PinMode::Input) {
            Some(PinMode::Input)
        } else {
            capabilities.keys().next().copied()
        };
        Self {
            index,
            capabilities,
            analog_channel,
            mode,
            value: 0,
        }
    }

    pub fn supports(&self, mode: PinMode) -> bool {
        self.capabilities.contains_key(&mode)
    }

    pub fn is_available(&self) -> bool {
        !self.capabilities.is_empty()
    }

    pub fn port(&self) -> u8 {
        self.index / 8
    }

    pub fn is_analog(&self) -> bool {
        self.analog_channel.is_some()
    }
}

pub const FIRST_DIGITAL_PIN: u8 = 3;
pub const LAST_DIGITAL_PIN: u8 = 8;
pub const FIRST_ANALOG_PIN: u8 = 14;
pub const LAST_ANALOG_PIN: u8 = 19;
const DEFAULT_PWM_PINS: [u8; 3] = [3, 5, 6];

/// Layout installed when the board does not answer the capability query
/// (an Uno running firmware without capability support).
pub fn default_layout() -> Vec<PinDescriptor> {
    let mut pins = Vec::new();

    for index in FIRST_DIGITAL_PIN..=LAST_DIGITAL_PIN {
        let mut capabilities = BTreeMap::from([(PinMode::Input, 1), (PinMode::Output, 1)]);
        if DEFAULT_PWM_PINS.contains(&index) {
            capabilities.insert(PinMode::Pwm, 8);
        }
        pins.push(PinDescriptor::new(index, capabilities, None));
    }

    for index in FIRST_ANALOG_PIN..=LAST_ANALOG_PIN {
        let channel = index - FIRST_ANALOG_PIN;
        let capabilities = BTreeMap::from([
            (PinMode::Input, 1),
            (PinMode::Output, 1),
            (PinMode::Analog, 10),
        ]);
        let mut pin = PinDescriptor::new(index, capabilities, Some(channel));
        // A5 starts out reading analog values
        if channel == 5 {
            pin.mode = Some(PinMode::Analog);
        }
        pins.push(pin);
    }

    pins
}
