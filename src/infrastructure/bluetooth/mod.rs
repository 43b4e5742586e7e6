//! Bluetooth Module
//!
//! BLE peripheral sessions for Bluefruit boards: UART, Pin I/O (Firmata),
//! Controller, Info and DFU.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    BluetoothService                      │
//! │  (one task: commands, transport events, deadlines)       │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │                  PeripheralSession                       │
//! │  Idle → Scanning → Connecting → Connected                │
//! └───────┬─────────────┬──────────────┬────────────────────┘
//!         │             │              │
//!         ▼             ▼              ▼
//! ┌───────────┐  ┌────────────┐  ┌────────────┐
//! │  Scanner  │  │  Resolver  │  │  Firmata   │
//! │ - devices │  │ - UART/DFU │  │ - pin query│
//! │ - RSSI    │  │ - DIS/Info │  │ - reports  │
//! └───────────┘  └────────────┘  └────────────┘
//!                       │
//!                       ▼
//!               ┌───────────────┐
//!               │   Transport   │  (btleplug or a test double)
//!               └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`transport`] - Request/completion boundary to the BLE stack
//! - [`gatt`] - Services, characteristics and their properties
//! - [`protocol`] - UUIDs, write fragmentation, checksum and Controller packets
//! - [`scanner`] - Scan results
//! - [`resolver`] - Per-mode GATT discovery
//! - [`firmata`] - Pin I/O codec
//! - [`connection`] - The session state machine
//! - [`mqtt`] - UART to MQTT bridge
//! - [`service`] - Main service task

pub mod connection;
pub mod firmata;
pub mod gatt;
pub mod mqtt;
#[cfg(feature = "btleplug")]
pub mod platform;
pub mod protocol;
pub mod resolver;
pub mod scanner;
pub mod service;
pub mod transport;

#[cfg(test)]
pub mod testing;

// Re-export main service for convenience
pub use service::{BluetoothCommand, BluetoothService};
