//! Firmata Codec
//!
//! Pin discovery and pin I/O for boards running StandardFirmata behind the
//! UART service. The codec never touches the link itself: bytes received on
//! RX go into [`FirmataCodec::process_input`], frames to send are taken from
//! [`FirmataCodec::poll_transmit`] and consumer events from
//! [`FirmataCodec::poll_event`].
//!
//! ## Pin discovery
//!
//! ```text
//! NotStarted ──(settle)──► CapabilityInProgress ──(F7)──► AnalogMappingInProgress ──(F7)──► Complete
//!      │                            │                               │                         ▲
//!      └─ sends FF                  └─ sends F0 6B F7               └─ sends F0 69 F7         │
//!                                   └──────────── query timeout: default layout ──────────────┘
//! ```

use crate::domain::models::AppEvent;
use crate::domain::pins::{self, PinDescriptor, PinMode};
use crate::domain::settings::PinIoSettings;
use crate::error::{FirmataError, SessionError};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

pub const DIGITAL_MESSAGE: u8 = 0x90;
pub const ANALOG_MESSAGE: u8 = 0xE0;
pub const REPORT_ANALOG: u8 = 0xC0;
pub const REPORT_DIGITAL: u8 = 0xD0;
pub const START_SYSEX: u8 = 0xF0;
pub const SET_PIN_MODE: u8 = 0xF4;
pub const END_SYSEX: u8 = 0xF7;
pub const REPORT_VERSION: u8 = 0xF9;
pub const SYSTEM_RESET: u8 = 0xFF;

pub const ANALOG_MAPPING_QUERY: u8 = 0x69;
pub const ANALOG_MAPPING_RESPONSE: u8 = 0x6A;
pub const CAPABILITY_QUERY: u8 = 0x6B;
pub const CAPABILITY_RESPONSE: u8 = 0x6C;
pub const PIN_STATE_RESPONSE: u8 = 0x6E;
pub const REPORT_FIRMWARE: u8 = 0x79;

/// Ends a capability record; as an analog mapping entry, "no channel"
const NONE_MARKER: u8 = 0x7F;
/// Ports with a tracked output mask
const PORT_COUNT: usize = 3;
/// Bound on buffered bytes outside a SysEx frame
const MAX_INPUT_LEN: usize = 512;
/// Bound on an open SysEx frame; a 128-pin capability report fits
const MAX_SYSEX_LEN: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    NotStarted,
    CapabilityInProgress,
    AnalogMappingInProgress,
    Complete,
}

/// Firmata protocol state for one Pin I/O session.
#[derive(Debug)]
pub struct FirmataCodec {
    settings: PinIoSettings,
    state: QueryState,
    /// Settle delay before the query, then the query timeout
    deadline: Option<Instant>,
    capabilities: Vec<BTreeMap<PinMode, u8>>,
    pins: Vec<PinDescriptor>,
    port_masks: [u8; PORT_COUNT],
    input: Vec<u8>,
    protocol_version: Option<(u8, u8)>,
    transmits: VecDeque<Vec<u8>>,
    events: VecDeque<AppEvent>,
}

impl FirmataCodec {
    pub fn new(settings: PinIoSettings) -> Self {
        Self {
            settings,
            state: QueryState::NotStarted,
            deadline: None,
            capabilities: Vec::new(),
            pins: Vec::new(),
            port_masks: [0; PORT_COUNT],
            input: Vec::new(),
            protocol_version: None,
            transmits: VecDeque::new(),
            events: VecDeque::new(),
        }
    }

    pub fn state(&self) -> QueryState {
        self.state
    }

    pub fn pins(&self) -> &[PinDescriptor] {
        &self.pins
    }

    pub fn pin(&self, index: u8) -> Option<&PinDescriptor> {
        self.pins.iter().find(|p| p.index == index)
    }

    pub fn port_mask(&self, port: u8) -> Option<u8> {
        self.port_masks.get(port as usize).copied()
    }

    /// `(major, minor)` from the last version report
    pub fn protocol_version(&self) -> Option<(u8, u8)> {
        self.protocol_version
    }

    /// Resets the board and schedules the capability query.
    pub fn start(&mut self, now: Instant) {
        info!("Starting Firmata pin discovery");
        self.state = QueryState::NotStarted;
        self.capabilities.clear();
        self.pins.clear();
        self.port_masks = [0; PORT_COUNT];
        self.input.clear();
        self.transmit(vec![SYSTEM_RESET]);
        self.deadline = Some(now + Duration::from_millis(self.settings.reset_settle_ms));
    }

    pub fn poll_timeout(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        match self.deadline {
            Some(deadline) if deadline <= now => self.deadline = None,
            _ => return,
        }

        match self.state {
            QueryState::NotStarted => self.send_capability_query(now),
            QueryState::CapabilityInProgress | QueryState::AnalogMappingInProgress => {
                warn!(
                    "No answer to the pin capability query ({:?}), using the default layout",
                    self.state
                );
                self.install_layout(pins::default_layout());
            }
            QueryState::Complete => {}
        }
    }

    pub fn poll_transmit(&mut self) -> Option<Vec<u8>> {
        self.transmits.pop_front()
    }

    pub fn poll_event(&mut self) -> Option<AppEvent> {
        self.events.pop_front()
    }

    /// Feeds bytes received from the board. Records may be split across
    /// link packets; incomplete tails are kept until the next call.
    pub fn process_input(&mut self, data: &[u8]) {
        trace!("Firmata input: {:02X?}", data);
        self.input.extend_from_slice(data);

        loop {
            let Some(&head) = self.input.first() else {
                break;
            };

            // While a query is outstanding only SysEx frames matter
            if self.state != QueryState::Complete && head != START_SYSEX {
                trace!("Discarding {:02X} while querying pins", head);
                self.input.remove(0);
                continue;
            }

            let consumed = match head {
                START_SYSEX => {
                    let Some(end) = self.input.iter().position(|b| *b == END_SYSEX) else {
                        break;
                    };
                    let frame = self.input[1..end].to_vec();
                    if frame.iter().any(|b| b & 0x80 != 0) {
                        self.report_malformed(&frame);
                        1
                    } else {
                        self.handle_sysex(&frame);
                        end + 1
                    }
                }
                0x90..=0x9F | 0xE0..=0xEF | REPORT_VERSION => {
                    if self.input.len() < 3 {
                        break;
                    }
                    let record = [self.input[0], self.input[1], self.input[2]];
                    if record[1] & 0x80 != 0 || record[2] & 0x80 != 0 {
                        self.report_malformed(&record);
                        1
                    } else {
                        self.handle_record(record);
                        3
                    }
                }
                _ => {
                    debug!("Skipping unexpected Firmata byte {:02X}", head);
                    1
                }
            };
            self.input.drain(..consumed);
        }
        self.bound_input();
    }

    /// Whatever is left is an incomplete record or an open SysEx frame.
    fn bound_input(&mut self) {
        let limit = match self.input.first() {
            Some(&START_SYSEX) => MAX_SYSEX_LEN,
            _ => MAX_INPUT_LEN,
        };
        if self.input.len() > limit {
            warn!(
                "Firmata input buffer over {} bytes, dropping {} bytes",
                limit,
                self.input.len()
            );
            self.input.clear();
        }
    }

    /// Installs a pin layout and marks discovery complete.
    pub fn install_layout(&mut self, pins: Vec<PinDescriptor>) {
        self.state = QueryState::Complete;
        self.deadline = None;
        self.port_masks = [0; PORT_COUNT];
        info!("Pin layout ready: {} pins", pins.len());
        self.pins = pins;
        self.events
            .push_back(AppEvent::PinLayoutReady(self.pins.clone()));

        if self.settings.auto_enable_reports {
            self.enable_read_reports();
        }
    }

    /// Turns on digital reporting for every used port and writes each pin's
    /// current mode, enabling analog reporting for analog pins.
    pub fn enable_read_reports(&mut self) {
        let ports: BTreeSet<u8> = self
            .pins
            .iter()
            .filter(|p| p.is_available())
            .map(|p| p.port())
            .collect();
        for port in ports {
            self.transmit(vec![REPORT_DIGITAL | port, 1]);
        }

        let modes: Vec<(u8, PinMode, Option<u8>)> = self
            .pins
            .iter()
            .filter_map(|p| p.mode.map(|mode| (p.index, mode, p.analog_channel)))
            .collect();
        for (index, mode, channel) in modes {
            self.transmit(vec![SET_PIN_MODE, index, mode.id()]);
            if let (PinMode::Analog, Some(channel)) = (mode, channel) {
                self.transmit(vec![REPORT_ANALOG | channel, 1]);
            }
        }
    }

    pub fn set_pin_mode(&mut self, index: u8, mode: PinMode) -> Result<(), FirmataError> {
        let pin = self.pin_mut(index)?;
        if !pin.supports(mode) {
            return Err(FirmataError::UnsupportedMode {
                pin: index,
                mode: mode.to_string(),
            });
        }
        let channel = pin.analog_channel;
        if mode == PinMode::Analog && channel.is_none() {
            return Err(FirmataError::NoAnalogChannel(index));
        }

        let previous = pin.mode.replace(mode);
        pin.value = 0;
        debug!("Pin {} mode {:?} -> {}", index, previous, mode);
        self.transmit(vec![SET_PIN_MODE, index, mode.id()]);

        if let Some(channel) = channel {
            if mode == PinMode::Analog && previous != Some(PinMode::Analog) {
                self.transmit(vec![REPORT_ANALOG | channel, 1]);
            } else if mode != PinMode::Analog && previous == Some(PinMode::Analog) {
                self.transmit(vec![REPORT_ANALOG | channel, 0]);
            }
        }
        Ok(())
    }

    /// Drives an output pin, re-sending the whole port mask.
    pub fn set_digital_output(&mut self, index: u8, high: bool) -> Result<(), FirmataError> {
        let pin = self.pin_mut(index)?;
        if pin.mode != Some(PinMode::Output) {
            return Err(FirmataError::UnsupportedMode {
                pin: index,
                mode: PinMode::Output.to_string(),
            });
        }
        let port = pin.port();
        if port as usize >= PORT_COUNT {
            return Err(FirmataError::PortOutOfRange(index));
        }
        pin.value = u16::from(high);

        let bit = 1u8 << (index % 8);
        let mask = &mut self.port_masks[port as usize];
        *mask &= !bit;
        if high {
            *mask |= bit;
        }
        let mask = *mask;
        self.transmit(vec![DIGITAL_MESSAGE | port, mask & 0x7F, mask >> 7]);
        Ok(())
    }

    /// Writes a PWM duty cycle or servo position (14 bits at most).
    pub fn set_pwm_value(&mut self, index: u8, value: u16) -> Result<(), FirmataError> {
        if index > 0x0F {
            return Err(FirmataError::NotAddressable(index));
        }
        if value > 0x3FFF {
            return Err(FirmataError::ValueOutOfRange { pin: index, value });
        }
        let pin = self.pin_mut(index)?;
        if !matches!(pin.mode, Some(PinMode::Pwm) | Some(PinMode::Servo)) {
            return Err(FirmataError::UnsupportedMode {
                pin: index,
                mode: PinMode::Pwm.to_string(),
            });
        }
        pin.value = value;
        self.transmit(vec![
            ANALOG_MESSAGE | index,
            (value & 0x7F) as u8,
            ((value >> 7) & 0x7F) as u8,
        ]);
        Ok(())
    }

    fn pin_mut(&mut self, index: u8) -> Result<&mut PinDescriptor, FirmataError> {
        if self.state != QueryState::Complete {
            return Err(FirmataError::LayoutPending);
        }
        self.pins
            .iter_mut()
            .find(|p| p.index == index)
            .ok_or(FirmataError::UnknownPin(index))
    }

    /// Malformed input is skipped one byte at a time; the consumer is told
    /// but the session carries on.
    fn report_malformed(&mut self, bytes: &[u8]) {
        warn!("Malformed Firmata input {:02X?}, resyncing", bytes);
        let err = SessionError::MalformedFrame(format!("{:02X?}", bytes));
        self.events.push_back(AppEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    fn transmit(&mut self, frame: Vec<u8>) {
        trace!("Firmata output: {:02X?}", frame);
        self.transmits.push_back(frame);
    }

    fn send_capability_query(&mut self, now: Instant) {
        debug!("Sending pin capability query");
        self.state = QueryState::CapabilityInProgress;
        self.capabilities.clear();
        self.transmit(vec![START_SYSEX, CAPABILITY_QUERY, END_SYSEX]);
        self.deadline = Some(now + Duration::from_millis(self.settings.capability_timeout_ms));
    }

    /// `frame` is the SysEx payload between F0 and F7.
    fn handle_sysex(&mut self, frame: &[u8]) {
        let Some((&command, body)) = frame.split_first() else {
            debug!("Empty SysEx frame");
            return;
        };

        match (command, self.state) {
            (CAPABILITY_RESPONSE, QueryState::CapabilityInProgress) => {
                self.capabilities = parse_capabilities(body);
                debug!("Capability response for {} pins", self.capabilities.len());
                self.state = QueryState::AnalogMappingInProgress;
                self.transmit(vec![START_SYSEX, ANALOG_MAPPING_QUERY, END_SYSEX]);
            }
            (ANALOG_MAPPING_RESPONSE, QueryState::AnalogMappingInProgress) => {
                let capabilities = std::mem::take(&mut self.capabilities);
                let pins = capabilities
                    .into_iter()
                    .enumerate()
                    .map(|(index, caps)| {
                        let channel = body.get(index).copied().filter(|c| *c != NONE_MARKER);
                        PinDescriptor::new(index as u8, caps, channel)
                    })
                    .collect();
                self.install_layout(pins);
            }
            (PIN_STATE_RESPONSE, _) => self.handle_pin_state(body),
            (REPORT_FIRMWARE, _) => debug!("Ignoring firmware name report"),
            (command, state) => debug!("Ignoring SysEx {:02X} in state {:?}", command, state),
        }
    }

    /// `pin mode value...`, value in 7-bit groups, least significant first.
    fn handle_pin_state(&mut self, body: &[u8]) {
        let [index, mode, value_bytes @ ..] = body else {
            warn!("Truncated pin state response {:02X?}", body);
            return;
        };
        let value = value_bytes
            .iter()
            .take(3)
            .enumerate()
            .fold(0u32, |acc, (i, b)| acc | (u32::from(*b) << (7 * i)));
        let value = value.min(u32::from(u16::MAX)) as u16;

        let Some(pin) = self.pins.iter_mut().find(|p| p.index == *index) else {
            debug!("Pin state for unknown pin {}", index);
            return;
        };
        match PinMode::from_id(*mode) {
            Some(mode) if pin.supports(mode) => pin.mode = Some(mode),
            _ => debug!("Pin {} reports unsupported mode {:02X}", index, mode),
        }
        pin.value = value;
        self.events.push_back(AppEvent::PinStateChanged {
            pin: *index,
            value,
        });
    }

    fn handle_record(&mut self, record: [u8; 3]) {
        let [status, low, high] = record;
        match status {
            0x90..=0x9F => {
                let states = u16::from(low) | (u16::from(high) << 7);
                self.update_port(status & 0x0F, states);
            }
            0xE0..=0xEF => {
                let channel = status & 0x0F;
                let value = u16::from(low) | (u16::from(high) << 7);
                let Some(pin) = self
                    .pins
                    .iter_mut()
                    .find(|p| p.analog_channel == Some(channel))
                else {
                    debug!("Analog report for unmapped channel {}", channel);
                    return;
                };
                if pin.value != value {
                    pin.value = value;
                    self.events.push_back(AppEvent::PinStateChanged {
                        pin: pin.index,
                        value,
                    });
                }
            }
            REPORT_VERSION => {
                info!("Firmata protocol version {}.{}", low, high);
                self.protocol_version = Some((low, high));
            }
            _ => {}
        }
    }

    fn update_port(&mut self, port: u8, states: u16) {
        for bit in 0..8u8 {
            let index = port * 8 + bit;
            let Some(pin) = self.pins.iter_mut().find(|p| p.index == index) else {
                continue;
            };
            if !pin.mode.is_some_and(PinMode::is_digital) {
                continue;
            }
            let value = (states >> bit) & 1;
            if pin.value != value {
                pin.value = value;
                self.events
                    .push_back(AppEvent::PinStateChanged { pin: index, value });
            }
        }

        if let Some(mask) = self.port_masks.get_mut(port as usize) {
            *mask = states as u8;
        }
    }
}

/// One capability map per pin; unavailable pins get an empty map.
fn parse_capabilities(body: &[u8]) -> Vec<BTreeMap<PinMode, u8>> {
    let mut pins = Vec::new();
    let mut current = BTreeMap::new();
    let mut i = 0;
    while i < body.len() {
        if body[i] == NONE_MARKER {
            pins.push(std::mem::take(&mut current));
            i += 1;
            continue;
        }
        let Some(&resolution) = body.get(i + 1) else {
            warn!("Truncated capability record at byte {}", i);
            break;
        };
        match PinMode::from_id(body[i]) {
            Some(mode) => {
                current.insert(mode, resolution);
            }
            None => trace!("Ignoring pin mode {:02X}", body[i]),
        }
        i += 2;
    }
    pins
}
