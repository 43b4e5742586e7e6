//! Bluetooth Service Module
//!
//! Main service that owns the peripheral session and drives it from one
//! task: consumer commands, transport completions and session deadlines all
//! arrive here, and the resulting events go out over the app channel.

use crate::domain::models::{AppEvent, ConnectionMode, ConnectionStatus, DeviceId};
use crate::domain::pins::PinMode;
use crate::domain::settings::SettingsService;
use crate::error::SessionError;
use crate::infrastructure::bluetooth::{
    connection::{ConnectionConfig, PeripheralSession},
    mqtt::UartMqttBridge,
    protocol::ControllerPacket,
    transport::{Transport, TransportEvent},
};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Requests from the consumer to the Bluetooth task
#[derive(Debug, Clone, PartialEq)]
pub enum BluetoothCommand {
    Scan(ConnectionMode),
    StopScan,
    Connect {
        device: DeviceId,
        mode: ConnectionMode,
    },
    Disconnect,
    Send(Vec<u8>),
    SendText(String),
    SendControllerPacket(ControllerPacket),
    SetPinMode {
        pin: u8,
        mode: PinMode,
    },
    SetDigitalOutput {
        pin: u8,
        high: bool,
    },
    SetPwmValue {
        pin: u8,
        value: u16,
    },
    /// Message delivered by the MQTT client
    MqttMessage {
        topic: String,
        payload: String,
    },
    Shutdown,
}

/// Main Bluetooth service coordinating all BLE operations
pub struct BluetoothService<T: Transport> {
    session: PeripheralSession<T>,
    transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    settings: Arc<Mutex<SettingsService>>,
    mqtt: Option<UartMqttBridge>,
}

impl<T: Transport> BluetoothService<T> {
    /// Create a new Bluetooth service around `transport`, whose completions
    /// arrive on `transport_events`.
    pub fn new(
        transport: T,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
        settings: Arc<Mutex<SettingsService>>,
    ) -> anyhow::Result<Self> {
        let config = {
            let settings = settings
                .lock()
                .map_err(|_| anyhow::anyhow!("Lock error"))?;
            ConnectionConfig::from(settings.get())
        };

        Ok(Self {
            session: PeripheralSession::new(transport, config),
            transport_events,
            event_sender,
            settings,
            mqtt: None,
        })
    }

    /// Mirror UART traffic through `bridge`
    pub fn with_mqtt(mut self, bridge: UartMqttBridge) -> Self {
        self.mqtt = Some(bridge);
        self
    }

    pub fn session(&self) -> &PeripheralSession<T> {
        &self.session
    }

    /// Runs until [`BluetoothCommand::Shutdown`] or until the command
    /// channel closes.
    pub async fn run(mut self, mut commands: mpsc::UnboundedReceiver<BluetoothCommand>) {
        info!("Bluetooth service started");
        loop {
            let deadline = self.session.poll_timeout().map(Instant::from_std);
            tokio::select! {
                command = commands.recv() => match command {
                    Some(BluetoothCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.transport_events.recv() => {
                    self.session.handle_event(event, Instant::now().into_std());
                }
                _ = sleep_until(deadline) => {
                    self.session.handle_timeout(Instant::now().into_std());
                }
            }
            self.forward_events();
        }

        self.session.abort();
        self.forward_events();
        info!("Bluetooth service stopped");
    }

    fn handle_command(&mut self, command: BluetoothCommand) {
        debug!("Command: {:?}", command);
        let now = Instant::now().into_std();
        let result = match command {
            BluetoothCommand::Scan(mode) => self.session.begin_scan(mode),
            BluetoothCommand::StopScan => {
                self.session.stop_scan();
                Ok(())
            }
            BluetoothCommand::Connect { device, mode } => {
                self.session.begin_connect(&device, mode, now)
            }
            BluetoothCommand::Disconnect => {
                self.session.disconnect();
                Ok(())
            }
            BluetoothCommand::Send(data) => {
                self.send(&data);
                Ok(())
            }
            BluetoothCommand::SendText(text) => {
                self.send(text.as_bytes());
                Ok(())
            }
            BluetoothCommand::SendControllerPacket(packet) => {
                self.session.send_controller_packet(&packet);
                Ok(())
            }
            BluetoothCommand::SetPinMode { pin, mode } => self.session.set_pin_mode(pin, mode),
            BluetoothCommand::SetDigitalOutput { pin, high } => {
                self.session.set_digital_output(pin, high)
            }
            BluetoothCommand::SetPwmValue { pin, value } => {
                self.session.set_pwm_value(pin, value)
            }
            BluetoothCommand::MqttMessage { topic, payload } => {
                self.on_mqtt_message(&topic, &payload);
                Ok(())
            }
            BluetoothCommand::Shutdown => Ok(()),
        };

        // Session-level failures are already reported as events
        if let Err(err) = result {
            if let SessionError::Firmata(_) | SessionError::NotReady = err {
                self.emit(AppEvent::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                });
            }
        }
    }

    fn send(&mut self, data: &[u8]) {
        self.session.send_application_data(data);
        if self.is_uart_connected() {
            if let Some(mqtt) = self.mqtt.as_mut() {
                mqtt.on_sent(data);
            }
        }
    }

    fn on_mqtt_message(&mut self, topic: &str, payload: &str) {
        let Some(mqtt) = self.mqtt.as_mut() else {
            warn!("MQTT message on {} without a bridge", topic);
            return;
        };
        let (event, transmit) = mqtt.on_message(topic, payload);
        self.emit(event);
        if let Some(data) = transmit {
            self.session.send_application_data(&data);
        }
    }

    fn is_uart_connected(&self) -> bool {
        self.session.status() == ConnectionStatus::Connected
            && self.session.mode() == ConnectionMode::Uart
    }

    /// Moves session events to the consumer
    fn forward_events(&mut self) {
        while let Some(event) = self.session.poll_event() {
            match &event {
                AppEvent::DataReceived(data) if self.is_uart_connected() => {
                    if let Some(mqtt) = self.mqtt.as_mut() {
                        mqtt.on_received(data);
                    }
                }
                AppEvent::ConnectionFinalized { device, .. } => self.remember(device),
                _ => {}
            }
            self.emit(event);
        }
    }

    fn remember(&self, device: &DeviceId) {
        match self.settings.lock() {
            Ok(mut settings) => {
                if let Err(e) = settings.remember_device(device) {
                    warn!("Failed to save last connected device: {}", e);
                }
            }
            Err(_) => warn!("Settings lock poisoned"),
        }
    }

    fn emit(&self, event: AppEvent) {
        if self.event_sender.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
