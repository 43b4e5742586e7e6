//! Bluefruit Connect
//!
//! Session manager for Bluefruit BLE boards: scanning, connecting with a
//! timeout guard, GATT resolution per mode, UART traffic, Controller packets,
//! Firmata pin I/O and an MQTT bridge for UART data.

pub mod domain;
pub mod error;
pub mod infrastructure;
