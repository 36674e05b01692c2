//! BLE scanner and connector with C-callable entry points.
//!
//! Scanning, connecting, and GATT discovery are delegated to the platform
//! Bluetooth stack through btleplug. This crate adds the session handling
//! around it (bounded scan windows, per-scan deduplication, a single active
//! connection) and exports it to host applications via [`bridge`].

pub mod bridge;
pub mod config;
pub mod connection;
pub mod device;
pub mod device_info;
pub mod device_scanner;
pub mod error;
pub mod gatt;
pub mod session;

pub use config::Config;
pub use connection::{ConnectionCommand, ConnectionEvent, ConnectionManager};
pub use device::DiscoveredDevice;
