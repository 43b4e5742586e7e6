use crate::domain::models::{ConnectionMode, DeviceId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "bluefruit_connect".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Link-level behaviour of the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BleSettings {
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Largest payload issued in a single characteristic write
    #[serde(default = "default_write_chunk_limit")]
    pub write_chunk_limit: usize,
    #[serde(default = "default_false")]
    pub scan_allow_duplicates: bool,
    /// Connect to the first UART device found while scanning
    #[serde(default = "default_true")]
    pub auto_connect: bool,
    #[serde(default = "default_mode")]
    pub default_mode: ConnectionMode,
}

impl Default for BleSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            write_chunk_limit: default_write_chunk_limit(),
            scan_allow_duplicates: default_false(),
            auto_connect: default_true(),
            default_mode: default_mode(),
        }
    }
}

impl BleSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

fn default_connect_timeout_ms() -> u64 {
    30_000
}
fn default_write_chunk_limit() -> usize {
    20
}
fn default_mode() -> ConnectionMode {
    ConnectionMode::Uart
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinIoSettings {
    /// Pause between the system reset and the capability query
    #[serde(default = "default_reset_settle_ms")]
    pub reset_settle_ms: u64,
    #[serde(default = "default_capability_timeout_ms")]
    pub capability_timeout_ms: u64,
    /// Turn on pin reporting as soon as the layout is known
    #[serde(default = "default_true")]
    pub auto_enable_reports: bool,
}

impl Default for PinIoSettings {
    fn default() -> Self {
        Self {
            reset_settle_ms: default_reset_settle_ms(),
            capability_timeout_ms: default_capability_timeout_ms(),
            auto_enable_reports: default_true(),
        }
    }
}

fn default_reset_settle_ms() -> u64 {
    250
}
fn default_capability_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MqttQos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// What to do with messages arriving on the subscribed topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SubscribeBehaviour {
    /// Only report them to the consumer
    #[default]
    LocalOnly,
    /// Also transmit them to the peripheral
    Transmit,
}

/// Which UART direction a publish topic mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishFeed {
    Rx,
    Tx,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttSettings {
    #[serde(default = "default_server_address")]
    pub server_address: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub clean_session: bool,
    #[serde(default = "default_true")]
    pub publish_enabled: bool,
    #[serde(default)]
    pub rx_publish_topic: Option<String>,
    #[serde(default)]
    pub rx_publish_qos: MqttQos,
    #[serde(default)]
    pub tx_publish_topic: Option<String>,
    #[serde(default)]
    pub tx_publish_qos: MqttQos,
    #[serde(default = "default_true")]
    pub subscribe_enabled: bool,
    #[serde(default)]
    pub subscribe_topic: Option<String>,
    #[serde(default)]
    pub subscribe_qos: MqttQos,
    #[serde(default)]
    pub subscribe_behaviour: SubscribeBehaviour,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            server_port: default_server_port(),
            username: None,
            password: None,
            clean_session: true,
            publish_enabled: true,
            rx_publish_topic: None,
            rx_publish_qos: MqttQos::default(),
            tx_publish_topic: None,
            tx_publish_qos: MqttQos::default(),
            subscribe_enabled: true,
            subscribe_topic: None,
            subscribe_qos: MqttQos::default(),
            subscribe_behaviour: SubscribeBehaviour::default(),
        }
    }
}

impl MqttSettings {
    pub fn publish_topic(&self, feed: PublishFeed) -> Option<(&str, MqttQos)> {
        match feed {
            PublishFeed::Rx => self
                .rx_publish_topic
                .as_deref()
                .map(|t| (t, self.rx_publish_qos)),
            PublishFeed::Tx => self
                .tx_publish_topic
                .as_deref()
                .map(|t| (t, self.tx_publish_qos)),
        }
    }
}

fn default_server_address() -> String {
    "io.adafruit.com".to_string()
}
fn default_server_port() -> u16 {
    1883
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,
    #[serde(default)]
    pub ble: BleSettings,
    #[serde(default)]
    pub pin_io: PinIoSettings,
    #[serde(default)]
    pub mqtt: MqttSettings,
    #[serde(default)]
    pub known_devices: Vec<DeviceId>,
    #[serde(default)]
    pub last_connected_device: Option<DeviceId>,
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::from_path(settings_path))
    }

    /// Loads settings from `path`, falling back to defaults when the file is
    /// missing or unreadable.
    pub fn from_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BluefruitConnect");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn remember_device(&mut self, device: &DeviceId) -> anyhow::Result<()> {
        if !self.settings.known_devices.contains(device) {
            self.settings.known_devices.push(device.clone());
        }
        self.settings.last_connected_device = Some(device.clone());
        self.save()
    }
}
