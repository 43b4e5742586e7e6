//! BLE Connection Module
//!
//! The peripheral session state machine: scanning, connecting with a
//! timeout guard, GATT resolution per mode, the established data link and
//! teardown. The session is driven entirely from the outside:
//!
//! - transport completions go in through [`PeripheralSession::handle_event`],
//! - the next deadline is read from [`PeripheralSession::poll_timeout`] and
//!   reported back with [`PeripheralSession::handle_timeout`],
//! - consumer events come out of [`PeripheralSession::poll_event`].

use crate::domain::models::{
    AppEvent, ConnectionMode, ConnectionStatus, DeviceId, DeviceInformation, MessageSeverity,
    ScannedDevice, StatusMessage,
};
use crate::domain::pins::{PinDescriptor, PinMode};
use crate::domain::settings::{BleSettings, PinIoSettings, Settings};
use crate::error::{SessionError, TransportError};
use crate::infrastructure::bluetooth::firmata::FirmataCodec;
use crate::infrastructure::bluetooth::gatt::{CharacteristicRef, GattCharacteristic, GattService};
use crate::infrastructure::bluetooth::protocol::{self, ControllerPacket, UART_SERVICE_UUID};
use crate::infrastructure::bluetooth::resolver::{self, GattResolver, Resolution};
use crate::infrastructure::bluetooth::scanner::DeviceList;
use crate::infrastructure::bluetooth::transport::{
    self, Advertisement, PeripheralDelegate, Transport, TransportEvent,
};
use std::collections::VecDeque;
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Configuration for connection behavior
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub ble: BleSettings,
    pub pin_io: PinIoSettings,
}

impl From<&Settings> for ConnectionConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            ble: settings.ble.clone(),
            pin_io: settings.pin_io.clone(),
        }
    }
}

/// The tracked peripheral of a connection attempt or established link
#[derive(Debug)]
struct Peripheral {
    device: DeviceId,
    mode: ConnectionMode,
    resolver: GattResolver,
    device_info: DeviceInformation,
    discovery_requested: bool,
}

impl Peripheral {
    fn new(device: DeviceId, mode: ConnectionMode) -> Self {
        Self {
            device,
            mode,
            resolver: GattResolver::new(mode),
            device_info: DeviceInformation::default(),
            discovery_requested: false,
        }
    }
}

#[derive(Debug)]
enum Link {
    /// TX/RX pair; Pin I/O sessions also run the Firmata codec
    Data {
        tx: GattCharacteristic,
        rx: CharacteristicRef,
        pins: Option<FirmataCodec>,
    },
    Info,
}

#[derive(Debug)]
enum SessionState {
    Idle,
    Scanning {
        mode: ConnectionMode,
    },
    Connecting {
        peripheral: Peripheral,
        deadline: Instant,
    },
    Connected {
        peripheral: Peripheral,
        link: Link,
    },
}

impl SessionState {
    fn status(&self) -> ConnectionStatus {
        match self {
            Self::Idle => ConnectionStatus::Idle,
            Self::Scanning { .. } => ConnectionStatus::Scanning,
            Self::Connecting { .. } => ConnectionStatus::Connecting,
            Self::Connected { .. } => ConnectionStatus::Connected,
        }
    }

    fn peripheral(&self) -> Option<&Peripheral> {
        match self {
            Self::Connecting { peripheral, .. } | Self::Connected { peripheral, .. } => {
                Some(peripheral)
            }
            _ => None,
        }
    }

    fn peripheral_mut(&mut self) -> Option<&mut Peripheral> {
        match self {
            Self::Connecting { peripheral, .. } | Self::Connected { peripheral, .. } => {
                Some(peripheral)
            }
            _ => None,
        }
    }
}

/// One BLE peripheral session. At most one peripheral is tracked at a time.
pub struct PeripheralSession<T: Transport> {
    transport: T,
    config: ConnectionConfig,
    state: SessionState,
    devices: DeviceList,
    events: VecDeque<AppEvent>,
    /// Time of the event being handled
    now: Instant,
}

impl<T: Transport> PeripheralSession<T> {
    pub fn new(transport: T, config: ConnectionConfig) -> Self {
        Self {
            transport,
            config,
            state: SessionState::Idle,
            devices: DeviceList::new(),
            events: VecDeque::new(),
            now: Instant::now(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    pub fn mode(&self) -> ConnectionMode {
        match &self.state {
            SessionState::Idle => ConnectionMode::None,
            SessionState::Scanning { mode } => *mode,
            SessionState::Connecting { peripheral, .. }
            | SessionState::Connected { peripheral, .. } => peripheral.mode,
        }
    }

    pub fn device(&self) -> Option<&DeviceId> {
        self.state.peripheral().map(|p| &p.device)
    }

    pub fn devices(&self) -> &DeviceList {
        &self.devices
    }

    pub fn device_information(&self) -> Option<&DeviceInformation> {
        self.state.peripheral().map(|p| &p.device_info)
    }

    /// GATT tree as discovered so far
    pub fn services(&self) -> &[GattService] {
        self.state
            .peripheral()
            .map(|p| p.resolver.services())
            .unwrap_or(&[])
    }

    /// Board layout of a Pin I/O session; empty until the layout is known.
    pub fn pins(&self) -> &[PinDescriptor] {
        match &self.state {
            SessionState::Connected {
                link: Link::Data {
                    pins: Some(codec), ..
                },
                ..
            } => codec.pins(),
            _ => &[],
        }
    }

    pub fn poll_event(&mut self) -> Option<AppEvent> {
        self.events.pop_front()
    }

    /// Scans for peripherals to use in `mode`.
    ///
    /// UART based modes only look for the UART service and, with
    /// auto-connect, connect to the first one found. Any other mode lists
    /// every advertising peripheral.
    pub fn begin_scan(&mut self, mode: ConnectionMode) -> Result<(), SessionError> {
        if !self.transport.is_powered_on() {
            return Err(self.radio_unavailable());
        }
        if self.state.peripheral().is_some() {
            self.abort();
        }

        let (services, allow_duplicates) = if uses_uart_service(mode) {
            (vec![UART_SERVICE_UUID], self.config.ble.scan_allow_duplicates)
        } else {
            (Vec::new(), true)
        };

        self.devices.clear();
        if let Err(e) = self.transport.start_scan(&services, allow_duplicates) {
            let err = SessionError::from(e);
            self.report_error(&err);
            return Err(err);
        }
        info!("Scanning for peripherals ({} mode)", mode);
        self.send_log("Scanning…", MessageSeverity::Info);
        self.transition(SessionState::Scanning { mode });
        Ok(())
    }

    pub fn stop_scan(&mut self) {
        if !matches!(self.state, SessionState::Scanning { .. }) {
            return;
        }
        if let Err(e) = self.transport.stop_scan() {
            warn!("Failed to stop scan: {}", e);
        }
        info!("Scan stopped");
        self.transition(SessionState::Idle);
    }

    /// Starts connecting to `device` for use in `mode`.
    pub fn begin_connect(
        &mut self,
        device: &DeviceId,
        mode: ConnectionMode,
        now: Instant,
    ) -> Result<(), SessionError> {
        self.now = now;
        if !self.transport.is_powered_on() {
            self.abort();
            return Err(self.radio_unavailable());
        }

        if matches!(self.state, SessionState::Scanning { .. }) {
            if let Err(e) = self.transport.stop_scan() {
                warn!("Failed to stop scan: {}", e);
            }
        }
        // One session at a time: drop whatever was tracked before
        if let Some(previous) = self.state.peripheral().map(|p| p.device.clone()) {
            self.cancel_connection(&previous);
            if matches!(self.state, SessionState::Connected { .. }) {
                self.events.push_back(AppEvent::Disconnected { device: previous });
            }
        }

        if let Err(e) = self.transport.connect(device) {
            let err = SessionError::from(e);
            self.transition(SessionState::Idle);
            self.report_error(&err);
            return Err(err);
        }

        info!("Connecting to {} in {} mode", device, mode);
        let name = self.display_name(device);
        self.send_log(format!("Connecting to {}…", name), MessageSeverity::Info);
        self.transition(SessionState::Connecting {
            peripheral: Peripheral::new(device.clone(), mode),
            deadline: now + self.config.ble.connect_timeout(),
        });
        Ok(())
    }

    /// Drops the current attempt or link without reporting a disconnect.
    pub fn abort(&mut self) {
        match &self.state {
            SessionState::Idle => return,
            SessionState::Scanning { .. } => {
                if let Err(e) = self.transport.stop_scan() {
                    warn!("Failed to stop scan: {}", e);
                }
            }
            SessionState::Connecting { peripheral, .. }
            | SessionState::Connected { peripheral, .. } => {
                let device = peripheral.device.clone();
                self.cancel_connection(&device);
            }
        }
        debug!("Session aborted");
        self.transition(SessionState::Idle);
    }

    /// User-requested disconnect.
    pub fn disconnect(&mut self) {
        let Some(device) = self.device().cloned() else {
            self.stop_scan();
            return;
        };
        self.cancel_connection(&device);
        info!("Disconnected from {}", device);
        self.send_log("Disconnected from device", MessageSeverity::Info);
        self.events.push_back(AppEvent::Disconnected { device });
        self.transition(SessionState::Idle);
    }

    /// Writes `data` to the TX characteristic in link-sized chunks.
    pub fn write_raw_data(&mut self, data: &[u8]) -> Result<(), SessionError> {
        let SessionState::Connected {
            peripheral,
            link: Link::Data { tx, .. },
        } = &self.state
        else {
            return Err(SessionError::NotReady);
        };
        let write_type = tx.preferred_write_type().ok_or(SessionError::Unwritable)?;
        let characteristic = tx.reference();
        let device = peripheral.device.clone();

        trace!("Sending {:02X?}", data);
        for chunk in protocol::fragment(data, self.config.ble.write_chunk_limit) {
            self.transport
                .write_value(&device, characteristic, chunk, write_type)?;
        }
        Ok(())
    }

    /// Sends consumer data. Writing before the link is ready is only logged;
    /// other failures are reported as error events.
    pub fn send_application_data(&mut self, data: &[u8]) {
        match self.write_raw_data(data) {
            Ok(()) => {}
            Err(SessionError::NotReady) => {
                warn!("No TX characteristic, dropping {} bytes", data.len());
            }
            Err(err) => self.report_error(&err),
        }
    }

    pub fn send_text(&mut self, text: &str) {
        self.send_application_data(text.as_bytes());
    }

    /// Sends a Controller packet with its checksum.
    pub fn send_controller_packet(&mut self, packet: &ControllerPacket) {
        self.send_application_data(&packet.to_frame());
    }

    pub fn set_pin_mode(&mut self, pin: u8, mode: PinMode) -> Result<(), SessionError> {
        self.pin_io()?.set_pin_mode(pin, mode)?;
        self.flush_pin_io();
        Ok(())
    }

    pub fn set_digital_output(&mut self, pin: u8, high: bool) -> Result<(), SessionError> {
        self.pin_io()?.set_digital_output(pin, high)?;
        self.flush_pin_io();
        Ok(())
    }

    pub fn set_pwm_value(&mut self, pin: u8, value: u16) -> Result<(), SessionError> {
        self.pin_io()?.set_pwm_value(pin, value)?;
        self.flush_pin_io();
        Ok(())
    }

    pub fn handle_event(&mut self, event: TransportEvent, now: Instant) {
        self.now = now;
        match transport::dispatch(self, event) {
            Some(TransportEvent::PowerStateChanged { powered_on }) => {
                self.on_power_state(powered_on)
            }
            Some(TransportEvent::DeviceDiscovered(adv)) => self.on_advertisement(adv),
            _ => {}
        }
    }

    /// Earliest instant at which [`Self::handle_timeout`] has work to do.
    pub fn poll_timeout(&self) -> Option<Instant> {
        match &self.state {
            SessionState::Connecting { deadline, .. } => Some(*deadline),
            SessionState::Connected {
                link: Link::Data {
                    pins: Some(codec), ..
                },
                ..
            } => codec.poll_timeout(),
            _ => None,
        }
    }

    pub fn handle_timeout(&mut self, now: Instant) {
        self.now = now;
        if matches!(&self.state, SessionState::Connecting { deadline, .. } if *deadline <= now) {
            self.on_connect_timeout();
            return;
        }
        if let SessionState::Connected {
            link: Link::Data {
                pins: Some(codec), ..
            },
            ..
        } = &mut self.state
        {
            codec.handle_timeout(now);
            self.flush_pin_io();
        }
    }

    fn on_connect_timeout(&mut self) {
        let SessionState::Connecting { peripheral, .. } = self.transition(SessionState::Idle)
        else {
            return;
        };
        warn!("Connection to {} timed out", peripheral.device);
        self.cancel_connection(&peripheral.device);
        self.send_log(
            SessionError::ConnectionTimedOut.to_string(),
            MessageSeverity::Error,
        );
        self.events.push_back(AppEvent::ConnectionTimedOut {
            device: peripheral.device,
        });
    }

    /// Moves a resolved connection attempt to Connected. Anything other
    /// than Connecting is left untouched.
    fn on_finalized(&mut self, resolution: Resolution) {
        let state = std::mem::replace(&mut self.state, SessionState::Idle);
        let (peripheral, deadline) = match state {
            SessionState::Connecting {
                peripheral,
                deadline,
            } => (peripheral, deadline),
            other => {
                debug!("Ignoring finalize while {:?}", other.status());
                self.state = other;
                return;
            }
        };

        let link = match resolution {
            Resolution::Data(channel) => {
                let pins = (peripheral.mode == ConnectionMode::PinIo).then(|| {
                    let mut codec = FirmataCodec::new(self.config.pin_io.clone());
                    codec.start(self.now);
                    codec
                });
                Link::Data {
                    tx: channel.tx,
                    rx: channel.rx.reference(),
                    pins,
                }
            }
            Resolution::Info => Link::Info,
            Resolution::Pending => {
                self.state = SessionState::Connecting {
                    peripheral,
                    deadline,
                };
                return;
            }
        };

        info!(
            "Connection to {} finalized in {} mode",
            peripheral.device, peripheral.mode
        );
        self.send_log("Connection established!", MessageSeverity::Success);
        let finalized = AppEvent::ConnectionFinalized {
            device: peripheral.device.clone(),
            mode: peripheral.mode,
        };
        self.state = SessionState::Connected { peripheral, link };
        self.events
            .push_back(AppEvent::ConnectionStatus(ConnectionStatus::Connected));
        self.events.push_back(finalized);
        self.flush_pin_io();
    }

    fn on_power_state(&mut self, powered_on: bool) {
        if powered_on {
            info!("Bluetooth powered on");
            return;
        }
        warn!("Bluetooth powered off");
        match self.state.peripheral().map(|p| p.device.clone()) {
            Some(device) => self.on_disconnected(&device, Some("Bluetooth powered off")),
            None => {
                self.transition(SessionState::Idle);
            }
        }
        self.report_error(&SessionError::RadioUnavailable);
    }

    fn on_advertisement(&mut self, adv: Advertisement) {
        let SessionState::Scanning { mode } = self.state else {
            trace!("Advertisement from {} outside of a scan", adv.device);
            return;
        };
        let device = ScannedDevice::from(adv);
        if !self.devices.upsert(device.clone()) {
            return;
        }
        let auto_connect = self.config.ble.auto_connect
            && uses_uart_service(mode)
            && device.is_uart
            && device.connectable;
        let id = device.id.clone();
        self.events.push_back(AppEvent::DeviceFound(device));

        if auto_connect {
            info!("Auto-connecting to first UART peripheral {}", id);
            // Errors are already reported as events
            let _ = self.begin_connect(&id, mode, self.now);
        }
    }

    /// Feeds a resolver step for `device`, finalizing or reporting its
    /// outcome. Results for anything but the tracked peripheral are dropped.
    fn resolve(
        &mut self,
        device: &DeviceId,
        step: impl FnOnce(&mut GattResolver, &mut T) -> Result<Resolution, SessionError>,
    ) {
        let peripheral = match self.state.peripheral_mut() {
            Some(peripheral) if &peripheral.device == device => peripheral,
            _ => {
                debug!("Ignoring stale discovery result for {}", device);
                return;
            }
        };
        match step(&mut peripheral.resolver, &mut self.transport) {
            Ok(Resolution::Pending) => {}
            Ok(resolution) => self.on_finalized(resolution),
            Err(err) => self.report_error(&err),
        }
    }

    fn is_tracked(&self, device: &DeviceId) -> bool {
        self.device() == Some(device)
    }

    fn pin_io(&mut self) -> Result<&mut FirmataCodec, SessionError> {
        match &mut self.state {
            SessionState::Connected {
                link: Link::Data {
                    pins: Some(codec), ..
                },
                ..
            } => Ok(codec),
            _ => Err(SessionError::NotReady),
        }
    }

    /// Moves codec output to the link and codec events to the consumer.
    fn flush_pin_io(&mut self) {
        let SessionState::Connected {
            link: Link::Data {
                pins: Some(codec), ..
            },
            ..
        } = &mut self.state
        else {
            return;
        };
        let frames: Vec<Vec<u8>> = std::iter::from_fn(|| codec.poll_transmit()).collect();
        while let Some(event) = codec.poll_event() {
            self.events.push_back(event);
        }
        for frame in frames {
            if let Err(e) = self.write_raw_data(&frame) {
                warn!("Failed to send Firmata frame {:02X?}: {}", frame, e);
            }
        }
    }

    fn cancel_connection(&mut self, device: &DeviceId) {
        if let Err(e) = self.transport.cancel_connection(device) {
            warn!("Failed to cancel connection to {}: {}", device, e);
        }
    }

    /// Replaces the state, reporting status changes. Returns the old state.
    fn transition(&mut self, next: SessionState) -> SessionState {
        let status = next.status();
        let previous = std::mem::replace(&mut self.state, next);
        if previous.status() != status {
            debug!("Status {:?} -> {:?}", previous.status(), status);
            self.events.push_back(AppEvent::ConnectionStatus(status));
        }
        previous
    }

    fn radio_unavailable(&mut self) -> SessionError {
        let err = SessionError::RadioUnavailable;
        self.report_error(&err);
        err
    }

    fn report_error(&mut self, err: &SessionError) {
        error!("{}", err);
        self.events.push_back(AppEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        });
    }

    fn display_name(&self, device: &DeviceId) -> String {
        self.devices
            .get(device)
            .map(|d| d.name.clone())
            .unwrap_or_else(|| device.to_string())
    }

    /// Send a log message
    fn send_log(&mut self, message: impl Into<String>, severity: MessageSeverity) {
        self.events
            .push_back(AppEvent::LogMessage(StatusMessage::new(message, severity)));
    }
}

impl<T: Transport> PeripheralDelegate for PeripheralSession<T> {
    fn on_connected(&mut self, device: &DeviceId) {
        let SessionState::Connecting { peripheral, .. } = &mut self.state else {
            debug!("Ignoring connect event for {} while not connecting", device);
            return;
        };
        if &peripheral.device != device {
            debug!("Ignoring connect event for untracked {}", device);
            return;
        }
        if peripheral.discovery_requested || peripheral.resolver.has_services() {
            debug!("Discovery already under way for {}", device);
            return;
        }
        peripheral.discovery_requested = true;
        info!("Connected to {}", device);

        if let Some(services) = self.transport.cached_services(device) {
            debug!("Using {} cached services", services.len());
            self.resolve(device, |resolver, transport| {
                resolver.on_services(transport, device, Ok(services))
            });
            return;
        }

        let filter = peripheral.resolver.service_filter();
        if let Err(e) = self.transport.discover_services(device, filter.as_deref()) {
            self.report_error(&SessionError::DiscoveryFailed(e.message));
        }
    }

    fn on_connect_failed(&mut self, device: &DeviceId, error: &str) {
        if !matches!(&self.state, SessionState::Connecting { peripheral, .. } if &peripheral.device == device)
        {
            return;
        }
        warn!("Failed to connect to {}: {}", device, error);
        self.transition(SessionState::Idle);
        self.report_error(&SessionError::Transport(TransportError::new(
            error,
        )));
    }

    fn on_disconnected(&mut self, device: &DeviceId, error: Option<&str>) {
        if !self.is_tracked(device) {
            debug!("Ignoring disconnect of untracked {}", device);
            return;
        }
        let previous = self.transition(SessionState::Idle);
        match previous {
            SessionState::Connected { peripheral, .. } if peripheral.mode.is_module_mode() => {
                warn!(
                    "Lost connection to {} in {} mode: {}",
                    device,
                    peripheral.mode,
                    error.unwrap_or("no reason given")
                );
                self.send_log(
                    SessionError::UnexpectedDisconnect.to_string(),
                    MessageSeverity::Warning,
                );
                self.events.push_back(AppEvent::UnexpectedDisconnect {
                    device: peripheral.device,
                    mode: peripheral.mode,
                    reason: error.map(str::to_string),
                });
            }
            _ => {
                info!("Disconnected from {}", device);
                self.events.push_back(AppEvent::Disconnected {
                    device: device.clone(),
                });
            }
        }
    }

    fn on_services_discovered(
        &mut self,
        device: &DeviceId,
        result: Result<Vec<GattService>, String>,
    ) {
        self.resolve(device, |resolver, transport| {
            resolver.on_services(transport, device, result)
        });
    }

    fn on_characteristics_discovered(
        &mut self,
        device: &DeviceId,
        service: Uuid,
        result: Result<Vec<GattCharacteristic>, String>,
    ) {
        self.resolve(device, |resolver, transport| {
            resolver.on_characteristics(transport, device, service, result)
        });
    }

    fn on_descriptors_discovered(
        &mut self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
        result: Result<Vec<Uuid>, String>,
    ) {
        if self.is_tracked(device) && self.mode() == ConnectionMode::Info {
            if let Ok(descriptors) = &result {
                self.events.push_back(AppEvent::Descriptors {
                    service: characteristic.service,
                    characteristic: characteristic.characteristic,
                    descriptors: descriptors.clone(),
                });
            }
        }
        self.resolve(device, |resolver, _| {
            resolver.on_descriptors(characteristic, result)
        });
    }

    fn on_value_updated(
        &mut self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
        result: Result<Vec<u8>, String>,
    ) {
        if !self.is_tracked(device) {
            trace!("Ignoring value from untracked {}", device);
            return;
        }
        let value = match result {
            Ok(value) => value,
            Err(e) => {
                warn!("Read of {} failed: {}", characteristic.characteristic, e);
                self.report_error(&SessionError::Transport(TransportError::new(
                    format!("Read failed: {}", e),
                )));
                return;
            }
        };
        trace!("Value from {}: {:02X?}", characteristic.characteristic, value);

        let mode = self.mode();
        let Some(peripheral) = self.state.peripheral_mut() else {
            return;
        };
        peripheral.resolver.record_value(characteristic, &value);
        if resolver::apply_device_information(&mut peripheral.device_info, characteristic, &value)
        {
            let info = peripheral.device_info.clone();
            self.events.push_back(AppEvent::DeviceInformation(info));
        }

        if mode == ConnectionMode::Info {
            self.events.push_back(AppEvent::CharacteristicValue {
                service: characteristic.service,
                characteristic: characteristic.characteristic,
                value,
            });
            return;
        }

        match &mut self.state {
            SessionState::Connected {
                link: Link::Data { rx, pins, .. },
                ..
            } if *rx == characteristic => match pins {
                Some(codec) => {
                    codec.process_input(&value);
                    self.flush_pin_io();
                }
                None => self.events.push_back(AppEvent::DataReceived(value)),
            },
            _ => {}
        }
    }

    fn on_write_complete(
        &mut self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
        result: Result<(), String>,
    ) {
        if !self.is_tracked(device) {
            return;
        }
        if let Err(e) = result {
            warn!("Write to {} failed: {}", characteristic.characteristic, e);
            self.report_error(&SessionError::Transport(TransportError::new(
                format!("Write failed: {}", e),
            )));
        }
    }

    /// A failed subscribe leaves RX silent, so it is reported like a
    /// failed write.
    fn on_notify_state_changed(
        &mut self,
        device: &DeviceId,
        characteristic: CharacteristicRef,
        result: Result<(), String>,
    ) {
        if !self.is_tracked(device) {
            return;
        }
        if let Err(e) = result {
            warn!(
                "Notify setup on {} failed: {}",
                characteristic.characteristic, e
            );
            self.report_error(&SessionError::Transport(TransportError::new(
                format!("Enabling notifications failed: {}", e),
            )));
        }
    }
}

fn uses_uart_service(mode: ConnectionMode) -> bool {
    matches!(
        mode,
        ConnectionMode::Uart | ConnectionMode::PinIo | ConnectionMode::Controller
    )
}
