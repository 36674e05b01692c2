//! # Error Types Module
//!
//! Centralized error handling for the scanner library and its C bridge.
//! Each concern gets its own error type with context and error chaining.
//!
//! ## Error Types
//! - `ScanError`: Bluetooth manager, adapter, and scan failures
//! - `ConnectionError`: Connecting, service discovery, and runtime failures
//! - `ConfigError`: Configuration file I/O and parsing errors
//! - `BridgeError`: Problems at the C boundary (strings, serialization, worker)
//!
//! ## Usage Examples
//! ```rust,ignore
//! // Config module uses ConfigError
//! pub fn load() -> Result<Config, ConfigError> { ... }
//!
//! // Scanner module uses ScanError
//! pub async fn scan_devices(...) -> Result<Vec<DiscoveredDevice>, ScanError> { ... }
//!
//! // Connection module uses ConnectionError
//! async fn connect(&self, device_id: &str, ...) -> Result<(), ConnectionError> { ... }
//! ```
//!
//! At the C boundary none of these cross over: they are logged and turned
//! into empty results, NULL, or no-ops.

use std::fmt;

/// Errors that can occur during device scanning
#[derive(Debug, Clone)]
pub enum ScanError {
    /// Bluetooth manager initialization failed
    ManagerInit(String),
    /// No Bluetooth adapters available
    NoAdapters,
    /// Scan operation failed
    ScanFailed(String),
    /// The scan worker did not answer in time
    TimedOut,
    /// The scan worker has shut down
    WorkerUnavailable,
}

impl fmt::Display for ScanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanError::ManagerInit(msg) => {
                write!(f, "Failed to initialize Bluetooth manager: {}", msg)
            }
            ScanError::NoAdapters => {
                write!(f, "No Bluetooth adapters found. Please ensure Bluetooth is enabled.")
            }
            ScanError::ScanFailed(msg) => {
                write!(f, "Scan operation failed: {}", msg)
            }
            ScanError::TimedOut => {
                write!(f, "Scan did not complete within its window")
            }
            ScanError::WorkerUnavailable => {
                write!(f, "Scan worker is not running")
            }
        }
    }
}

impl std::error::Error for ScanError {}

/// Errors that can occur during connection management
#[derive(Debug)]
pub enum ConnectionError {
    /// Failed to create Tokio runtime
    RuntimeCreation(String),
    /// Adapter could not be acquired or scanning for the target failed
    Scan(ScanError),
    /// Identifier passed in by the caller is unusable
    InvalidIdentifier(String),
    /// Target never showed up while scanning for it
    DeviceNotFound { device_id: String },
    /// Failed to connect to specific device
    DeviceConnection { device_id: String, reason: String },
    /// Service or characteristic discovery failed
    Discovery { device_id: String, reason: String },
    /// Connection attempt was superseded by a newer command
    Interrupted,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::RuntimeCreation(msg) => {
                write!(f, "Failed to create async runtime: {}", msg)
            }
            ConnectionError::Scan(e) => {
                write!(f, "Bluetooth unavailable: {}", e)
            }
            ConnectionError::InvalidIdentifier(id) => {
                write!(f, "Invalid device identifier: {:?}", id)
            }
            ConnectionError::DeviceNotFound { device_id } => {
                write!(f, "Failed to discover peripheral {} within timeout", device_id)
            }
            ConnectionError::DeviceConnection { device_id, reason } => {
                write!(f, "Failed to connect to device {}: {}", device_id, reason)
            }
            ConnectionError::Discovery { device_id, reason } => {
                write!(f, "Failed to discover services on {}: {}", device_id, reason)
            }
            ConnectionError::Interrupted => {
                write!(f, "Connection was interrupted by a newer request")
            }
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectionError::Scan(e) => Some(e),
            _ => None,
        }
    }
}

/// Errors that can occur during configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read config file
    ReadFailed(std::io::Error),
    /// Failed to write config file
    WriteFailed(std::io::Error),
    /// Failed to parse config file
    ParseFailed(toml::de::Error),
    /// Failed to serialize config
    SerializeFailed(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ReadFailed(e) => {
                write!(f, "Failed to read config file: {}", e)
            }
            ConfigError::WriteFailed(e) => {
                write!(f, "Failed to write config file: {}", e)
            }
            ConfigError::ParseFailed(e) => {
                write!(f, "Failed to parse config file: {}", e)
            }
            ConfigError::SerializeFailed(e) => {
                write!(f, "Failed to serialize config: {}", e)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadFailed(e) => Some(e),
            ConfigError::WriteFailed(e) => Some(e),
            ConfigError::ParseFailed(e) => Some(e),
            ConfigError::SerializeFailed(e) => Some(e),
        }
    }
}

/// Errors raised while adapting between C callers and the scanner
#[derive(Debug)]
pub enum BridgeError {
    /// A NULL pointer was passed where a string was expected
    NullPointer,
    /// Incoming string was not valid UTF-8
    InvalidUtf8(std::str::Utf8Error),
    /// Outgoing string contained an interior NUL byte
    InteriorNul(std::ffi::NulError),
    /// Scan results could not be encoded as JSON
    Serialize(serde_json::Error),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::NullPointer => write!(f, "Received a NULL string pointer"),
            BridgeError::InvalidUtf8(e) => write!(f, "String is not valid UTF-8: {}", e),
            BridgeError::InteriorNul(e) => write!(f, "String contains a NUL byte: {}", e),
            BridgeError::Serialize(e) => write!(f, "Failed to serialize device list: {}", e),
        }
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::NullPointer => None,
            BridgeError::InvalidUtf8(e) => Some(e),
            BridgeError::InteriorNul(e) => Some(e),
            BridgeError::Serialize(e) => Some(e),
        }
    }
}
