//! # Device Scanner Module
//!
//! Timed BLE discovery on top of btleplug. Radio control and advertisement
//! parsing stay inside the platform stack; this module only drives a scan
//! window and turns discovery events into session records.

use crate::device::same_identifier;
use crate::error::ScanError;
use crate::session::ScanSession;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::stream::StreamExt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const CANCEL_POLL: Duration = Duration::from_millis(100);

/// First Bluetooth adapter reported by the platform manager
pub async fn default_adapter() -> Result<Adapter, ScanError> {
    let manager = Manager::new()
        .await
        .map_err(|e| ScanError::ManagerInit(e.to_string()))?;

    let adapters = manager
        .adapters()
        .await
        .map_err(|e| ScanError::ManagerInit(e.to_string()))?;

    let central = adapters.into_iter().next().ok_or(ScanError::NoAdapters)?;

    match central.adapter_info().await {
        Ok(info) => log::info!("Using Bluetooth adapter: {}", info),
        Err(e) => log::debug!("Adapter info unavailable: {}", e),
    }

    Ok(central)
}

/// Run one scan window on `central`, collecting sightings into `session`
pub async fn scan_devices(central: &Adapter, session: &mut ScanSession) -> Result<(), ScanError> {
    log::info!("Starting BLE scan for {}s...", session.window().as_secs());

    scan_until::<(), _>(central, session.window(), None, |id, properties| {
        let (name, rssi) = match properties {
            Some(props) => (props.local_name.as_deref(), props.rssi),
            None => (None, None),
        };
        session.record(&id.to_string(), name, rssi);
        ControlFlow::Continue(())
    })
    .await?;

    Ok(())
}

/// Scan until the peripheral named by `device_id` shows up, `timeout`
/// elapses, or `should_stop` is set
pub async fn find_peripheral(
    central: &Adapter,
    device_id: &str,
    timeout: Duration,
    should_stop: &AtomicBool,
) -> Result<Option<Peripheral>, ScanError> {
    log::info!("Peripheral {} not among known devices. Scanning for it...", device_id);

    let found = scan_until(central, timeout, Some(should_stop), |id, _| {
        if same_identifier(&id.to_string(), device_id) {
            ControlFlow::Break(id.clone())
        } else {
            ControlFlow::Continue(())
        }
    })
    .await?;

    match found {
        Some(id) => {
            log::info!("Found target peripheral {}", device_id);
            let peripheral = central
                .peripheral(&id)
                .await
                .map_err(|e| ScanError::ScanFailed(e.to_string()))?;
            Ok(Some(peripheral))
        }
        None => Ok(None),
    }
}

/// Peripheral the platform already knows under `device_id`, without scanning
pub async fn known_peripheral(
    central: &Adapter,
    device_id: &str,
) -> Result<Option<Peripheral>, ScanError> {
    let peripherals = central
        .peripherals()
        .await
        .map_err(|e| ScanError::ScanFailed(e.to_string()))?;

    Ok(peripherals
        .into_iter()
        .find(|peripheral| same_identifier(&peripheral.id().to_string(), device_id)))
}

/// Drive a scan, feeding every discovery or advertisement update to `on_seen`.
///
/// The scan stops when the window elapses, when the event stream ends, when
/// `cancel` is set, or when `on_seen` breaks; the break value is returned.
async fn scan_until<B, F>(
    central: &Adapter,
    window: Duration,
    cancel: Option<&AtomicBool>,
    mut on_seen: F,
) -> Result<Option<B>, ScanError>
where
    F: FnMut(&PeripheralId, Option<&PeripheralProperties>) -> ControlFlow<B>,
{
    // Subscribe before starting so no early advertisement is missed
    let mut events = central
        .events()
        .await
        .map_err(|e| ScanError::ScanFailed(e.to_string()))?;

    central
        .start_scan(ScanFilter::default())
        .await
        .map_err(|e| ScanError::ScanFailed(e.to_string()))?;

    let deadline = tokio::time::sleep(window);
    tokio::pin!(deadline);
    let mut cancel_check = tokio::time::interval(CANCEL_POLL);

    let mut outcome = None;
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = cancel_check.tick() => {
                if cancel.map(|flag| flag.load(Ordering::Relaxed)).unwrap_or(false) {
                    log::info!("Scan cancelled");
                    break;
                }
            }
            event = events.next() => match event {
                Some(CentralEvent::DeviceDiscovered(id)) | Some(CentralEvent::DeviceUpdated(id)) => {
                    let properties = match central.peripheral(&id).await {
                        Ok(peripheral) => peripheral.properties().await.unwrap_or_else(|e| {
                            log::debug!("No properties for {}: {}", id, e);
                            None
                        }),
                        Err(e) => {
                            log::debug!("Peripheral {} vanished: {}", id, e);
                            continue;
                        }
                    };
                    if let ControlFlow::Break(value) = on_seen(&id, properties.as_ref()) {
                        outcome = Some(value);
                        break;
                    }
                }
                Some(_) => {}
                None => {
                    log::warn!("Bluetooth event stream ended before the scan window closed");
                    break;
                }
            }
        }
    }

    central
        .stop_scan()
        .await
        .map_err(|e| ScanError::ScanFailed(e.to_string()))?;

    Ok(outcome)
}
