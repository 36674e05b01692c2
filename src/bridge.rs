//! # C Bridge Module
//!
//! `extern "C"` entry points for host applications. Every export shares one
//! process-wide `ConnectionManager`, started lazily on first use together
//! with a thread that forwards connection events to the registered callback.
//!
//! Errors never cross the boundary: they are logged and turned into empty
//! results, NULL, or no-ops. Strings returned to the host are owned by Rust
//! and must be released with `FreeBLEString`.

#![allow(non_snake_case)]

use crate::config::Config;
use crate::connection::{await_scan, ConnectionCommand, ConnectionEvent, ConnectionManager};
use crate::device::DiscoveredDevice;
use crate::device_info::device_infos;
use crate::error::{BridgeError, ScanError};
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::{Mutex, OnceLock};
use std::thread;
use std::time::Duration;

/// Invoked with the identifier of a freshly connected peripheral.
///
/// The string is only valid for the duration of the call.
pub type BLEConnectionCallback = extern "C" fn(device_id: *const c_char);

static BRIDGE: OnceLock<Bridge> = OnceLock::new();
static CONNECTION_CALLBACK: Mutex<Option<BLEConnectionCallback>> = Mutex::new(None);

struct Bridge {
    config: Config,
    commands: Sender<ConnectionCommand>,
}

impl Bridge {
    fn start() -> Self {
        // The host may already own a logger
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init();

        let config = Config::load_or_default();
        let (event_sender, event_receiver) = unbounded();
        let (manager, commands) = ConnectionManager::new(config.clone(), event_sender);

        thread::spawn(move || manager.run());
        thread::spawn(move || forward_events(event_receiver));

        Self { config, commands }
    }

    fn send(&self, command: ConnectionCommand) {
        if self.commands.send(command).is_err() {
            log::error!("{}", ScanError::WorkerUnavailable);
        }
    }

    /// Scan for `window` and block until the results come back.
    ///
    /// The window wait only starts once the scan owns the adapter, so a
    /// background scan or connect search ahead of it delays rather than
    /// empties the result.
    fn scan_blocking(&self, window: Duration) -> Result<Vec<DiscoveredDevice>, ScanError> {
        let (reply, progress) = unbounded();
        self.commands
            .send(ConnectionCommand::Scan {
                window,
                reply: Some(reply),
            })
            .map_err(|_| ScanError::WorkerUnavailable)?;

        await_scan(&progress, self.config.scan_queue_wait(), self.config.scan_wait(window))
    }

    /// Blocking scan whose failures collapse into an empty result
    fn scan_or_empty(&self) -> Vec<DiscoveredDevice> {
        log::info!("Starting synchronous BLE scan...");
        match self.scan_blocking(self.config.scan_duration()) {
            Ok(devices) => devices,
            Err(e) => {
                log::error!("{}", e);
                Vec::new()
            }
        }
    }
}

fn bridge() -> &'static Bridge {
    BRIDGE.get_or_init(Bridge::start)
}

fn forward_events(events: Receiver<ConnectionEvent>) {
    for event in events {
        match &event {
            ConnectionEvent::Connected { device_id } => notify_connected(device_id),
            ConnectionEvent::ConnectionFailed { .. } | ConnectionEvent::Error(_) => {
                log::warn!("{}", event)
            }
            _ => log::debug!("{}", event),
        }
    }
}

fn registered_callback() -> Option<BLEConnectionCallback> {
    match CONNECTION_CALLBACK.lock() {
        Ok(guard) => *guard,
        Err(poisoned) => *poisoned.into_inner(),
    }
}

fn set_callback(callback: Option<BLEConnectionCallback>) {
    match CONNECTION_CALLBACK.lock() {
        Ok(mut guard) => *guard = callback,
        Err(poisoned) => *poisoned.into_inner() = callback,
    }
}

/// Hand `device_id` to the registered connection callback, if any
fn notify_connected(device_id: &str) {
    let Some(callback) = registered_callback() else {
        log::debug!("No connection callback registered");
        return;
    };

    match CString::new(device_id) {
        Ok(id) => callback(id.as_ptr()),
        Err(e) => log::error!("{}", BridgeError::InteriorNul(e)),
    }
}

/// Borrow a C string as UTF-8
///
/// # Safety
/// `ptr` must be NULL or point to a NUL-terminated string that stays valid
/// for the returned lifetime.
unsafe fn read_c_str<'a>(ptr: *const c_char) -> Result<&'a str, BridgeError> {
    if ptr.is_null() {
        return Err(BridgeError::NullPointer);
    }
    CStr::from_ptr(ptr).to_str().map_err(BridgeError::InvalidUtf8)
}

/// Serialize `value` into a string owned by the caller
fn to_json_c_string<T: Serialize + ?Sized>(value: &T) -> Result<CString, BridgeError> {
    let json = serde_json::to_string(value).map_err(BridgeError::Serialize)?;
    CString::new(json).map_err(BridgeError::InteriorNul)
}

fn into_raw_or_null(result: Result<CString, BridgeError>) -> *mut c_char {
    match result {
        Ok(json) => json.into_raw(),
        Err(e) => {
            log::error!("{}", e);
            std::ptr::null_mut()
        }
    }
}

/// Start a background scan; discoveries are logged.
#[no_mangle]
pub extern "C" fn StartBLEScan() {
    let bridge = bridge();
    log::info!("StartBLEScan() called from host");
    bridge.send(ConnectionCommand::Scan {
        window: bridge.config.background_scan_duration(),
        reply: None,
    });
}

/// Scan synchronously and return the results as a JSON array of
/// `{"name", "uuid", "rssi"}` objects.
///
/// Returns `"[]"` when Bluetooth is unavailable and NULL if encoding fails.
/// Release the string with `FreeBLEString`.
#[no_mangle]
pub extern "C" fn StartBLEScanAndReturnJSON() -> *mut c_char {
    let devices = bridge().scan_or_empty();
    into_raw_or_null(to_json_c_string(&devices))
}

/// Like `StartBLEScanAndReturnJSON`, with results shaped as device-info records.
#[no_mangle]
pub extern "C" fn StartBLEScanAndReturnDeviceInfoJSON() -> *mut c_char {
    let devices = bridge().scan_or_empty();
    into_raw_or_null(to_json_c_string(&device_infos(&devices)))
}

/// Connect to the peripheral with the given identifier.
///
/// Returns immediately; success is reported through the connection callback.
///
/// # Safety
/// `device_id` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn ConnectToBLEDevice(device_id: *const c_char) {
    let device_id = match read_c_str(device_id) {
        Ok(id) => id.to_string(),
        Err(e) => {
            log::error!("ConnectToBLEDevice: {}", e);
            return;
        }
    };

    log::info!("Attempting to connect to device: {}", device_id);
    bridge().send(ConnectionCommand::Connect(device_id));
}

/// Register the callback fired when a connection completes; NULL clears it.
#[no_mangle]
pub extern "C" fn RegisterBLEConnectionCallback(callback: Option<BLEConnectionCallback>) {
    set_callback(callback);
}

/// Disconnect the currently connected peripheral, if any.
#[no_mangle]
pub extern "C" fn DisconnectBLEDevice() {
    bridge().send(ConnectionCommand::Disconnect);
}

/// Release a string returned by this library. NULL is ignored.
///
/// # Safety
/// `ptr` must be NULL or a pointer previously returned by one of the
/// JSON-returning exports, not yet freed.
#[no_mangle]
pub unsafe extern "C" fn FreeBLEString(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    static CALLBACK_SEEN: Mutex<Vec<String>> = Mutex::new(Vec::new());

    extern "C" fn record_connection(device_id: *const c_char) {
        let id = unsafe { CStr::from_ptr(device_id) }.to_str().unwrap().to_string();
        CALLBACK_SEEN.lock().unwrap().push(id);
    }

    #[test]
    #[serial]
    fn test_callback_registration() {
        RegisterBLEConnectionCallback(Some(record_connection));
        notify_connected("AAAA-BBBB");
        RegisterBLEConnectionCallback(None);
        notify_connected("CCCC-DDDD");

        let seen = CALLBACK_SEEN.lock().unwrap();
        assert!(seen.contains(&"AAAA-BBBB".to_string()));
        assert!(!seen.contains(&"CCCC-DDDD".to_string()));
    }

    #[test]
    #[serial]
    fn test_forwarded_connection_fires_callback() {
        let (events, receiver) = unbounded();
        events
            .send(ConnectionEvent::Connected {
                device_id: "FORWARDED-1".to_string(),
            })
            .unwrap();
        events
            .send(ConnectionEvent::Disconnected {
                device_id: "FORWARDED-2".to_string(),
            })
            .unwrap();
        drop(events);

        RegisterBLEConnectionCallback(Some(record_connection));
        // Returns once every sender is gone and the queue is drained
        forward_events(receiver);
        RegisterBLEConnectionCallback(None);

        let seen = CALLBACK_SEEN.lock().unwrap();
        assert!(seen.contains(&"FORWARDED-1".to_string()));
        assert!(!seen.contains(&"FORWARDED-2".to_string()));
    }

    #[test]
    fn test_read_c_str() {
        let owned = CString::new("E621E1F8").unwrap();
        assert_eq!(unsafe { read_c_str(owned.as_ptr()) }.unwrap(), "E621E1F8");
        assert!(matches!(
            unsafe { read_c_str(std::ptr::null()) },
            Err(BridgeError::NullPointer)
        ));
    }

    #[test]
    fn test_read_c_str_rejects_invalid_utf8() {
        let bytes = [0xffu8, 0xfe, 0x00];
        let result = unsafe { read_c_str(bytes.as_ptr() as *const c_char) };
        assert!(matches!(result, Err(BridgeError::InvalidUtf8(_))));
    }

    #[test]
    fn test_json_string_round_trips_through_raw_pointer() {
        let devices = vec![DiscoveredDevice::new(
            "AAAA".to_string(),
            "Sensor".to_string(),
            Some(-42),
        )];
        let raw = into_raw_or_null(to_json_c_string(&devices));
        assert!(!raw.is_null());

        let json = unsafe { CStr::from_ptr(raw) }.to_str().unwrap().to_string();
        unsafe { FreeBLEString(raw) };
        assert_eq!(json, r#"[{"name":"Sensor","uuid":"AAAA","rssi":-42}]"#);
    }

    #[test]
    fn test_empty_scan_is_empty_array() {
        let devices: Vec<DiscoveredDevice> = Vec::new();
        let json = to_json_c_string(&devices).unwrap();
        assert_eq!(json.to_str().unwrap(), "[]");
    }

    #[test]
    fn test_free_null_is_noop() {
        unsafe { FreeBLEString(std::ptr::null_mut()) };
    }
}
