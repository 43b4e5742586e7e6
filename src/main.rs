use bluefruit_connect::domain::models::{AppEvent, ConnectionMode, DeviceId, MessageSeverity};
use bluefruit_connect::domain::settings::SettingsService;
use bluefruit_connect::infrastructure::bluetooth::platform::BtleplugTransport;
use bluefruit_connect::infrastructure::bluetooth::{BluetoothCommand, BluetoothService};
use bluefruit_connect::infrastructure::logging::init_logger;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = SettingsService::new()?;
    let _log_guard = init_logger(&settings.get().log_settings)?;
    info!("Starting Bluefruit Connect");

    // bluefruit-connect [mode] [device-id]
    let mut args = std::env::args().skip(1);
    let mode = match args.next() {
        Some(arg) => parse_mode(&arg)?,
        None => settings.get().ble.default_mode,
    };
    let mut target = args.next().map(DeviceId::new);
    let settings = Arc::new(Mutex::new(settings));

    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let transport = BtleplugTransport::new(transport_tx).await?;
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::unbounded_channel();

    let service = BluetoothService::new(transport, transport_rx, event_tx, settings)?;
    let service_task = tokio::spawn(service.run(command_rx));
    command_tx.send(BluetoothCommand::Scan(scan_mode(mode, target.as_ref())))?;

    // Lines typed on stdin are sent as UART text
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => command_tx.send(BluetoothCommand::SendText(line + "\n"))?,
                Ok(None) => break,
                Err(e) => {
                    warn!("stdin: {}", e);
                    break;
                }
            },
            event = event_rx.recv() => match event {
                Some(AppEvent::DeviceFound(device)) if target.as_ref() == Some(&device.id) => {
                    info!("Found {}, connecting in {} mode", device.id, mode);
                    target = None;
                    command_tx.send(BluetoothCommand::Connect { device: device.id, mode })?;
                }
                Some(event) => log_event(event),
                None => break,
            },
        }
    }

    info!("Shutting down");
    let _ = command_tx.send(BluetoothCommand::Shutdown);
    service_task.await?;
    Ok(())
}

fn parse_mode(arg: &str) -> anyhow::Result<ConnectionMode> {
    let mode = match arg.to_lowercase().as_str() {
        "scan" | "none" => ConnectionMode::None,
        "uart" => ConnectionMode::Uart,
        "pinio" | "pin-io" => ConnectionMode::PinIo,
        "controller" => ConnectionMode::Controller,
        "info" => ConnectionMode::Info,
        "dfu" => ConnectionMode::Dfu,
        other => anyhow::bail!("Unknown mode '{}'", other),
    };
    Ok(mode)
}

/// A named device is connected as soon as a listing scan reports it;
/// otherwise the mode's own scan policy applies.
fn scan_mode(mode: ConnectionMode, target: Option<&DeviceId>) -> ConnectionMode {
    match target {
        Some(_) => ConnectionMode::None,
        None => mode,
    }
}

fn log_event(event: AppEvent) {
    match event {
        AppEvent::DeviceFound(device) => info!(
            "Found {} ({}) rssi {:?}{}",
            device.name,
            device.id,
            device.rssi,
            if device.is_uart { " [UART]" } else { "" }
        ),
        AppEvent::DataReceived(data) => info!("RX: {}", String::from_utf8_lossy(&data)),
        AppEvent::Error { kind, message } => error!("{}: {}", kind, message),
        AppEvent::LogMessage(message) => match message.severity {
            MessageSeverity::Error => error!("{}", message.message),
            MessageSeverity::Warning => warn!("{}", message.message),
            _ => info!("{}", message.message),
        },
        other => info!("{:?}", other),
    }
}
