//! # GATT Exploration Module
//!
//! After a link comes up, walks the peripheral's services and
//! characteristics, subscribes to the ones that notify and reads the ones
//! that are readable. Values are logged as hex; the protocol work itself
//! is left to the platform stack.

use crate::config::Config;
use crate::error::ConnectionError;
use btleplug::api::{CharPropFlags, Peripheral as _};
use btleplug::platform::Peripheral;
use futures::stream::StreamExt;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicSummary {
    pub uuid: String,
    pub readable: bool,
    pub notifiable: bool,
    pub subscribed: bool,
    pub value: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSummary {
    pub uuid: String,
    pub primary: bool,
    pub characteristics: Vec<CharacteristicSummary>,
}

/// What to do with a characteristic once it has been discovered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicActions {
    pub subscribe: bool,
    pub read: bool,
}

impl CharacteristicActions {
    pub fn for_properties(properties: CharPropFlags, config: &Config) -> Self {
        Self {
            subscribe: config.subscribe_notifications && is_notifiable(properties),
            read: config.read_characteristics && properties.contains(CharPropFlags::READ),
        }
    }
}

fn is_notifiable(properties: CharPropFlags) -> bool {
    properties.intersects(CharPropFlags::NOTIFY | CharPropFlags::INDICATE)
}

/// Render bytes the way they are logged: `<0a1b2c>`
pub fn format_value(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2 + 2);
    out.push('<');
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out.push('>');
    out
}

/// Discover services and characteristics on a connected peripheral
pub async fn explore(
    peripheral: &Peripheral,
    device_id: &str,
    config: &Config,
) -> Result<Vec<ServiceSummary>, ConnectionError> {
    peripheral
        .discover_services()
        .await
        .map_err(|e| ConnectionError::Discovery {
            device_id: device_id.to_string(),
            reason: e.to_string(),
        })?;

    let mut summaries = Vec::new();

    for service in peripheral.services() {
        log::info!("Discovered service: {}", service.uuid);

        let mut characteristics = Vec::new();
        for characteristic in &service.characteristics {
            log::info!(
                "Discovered characteristic: {} for service {}",
                characteristic.uuid,
                service.uuid
            );

            let actions = CharacteristicActions::for_properties(characteristic.properties, config);
            let mut summary = CharacteristicSummary {
                uuid: characteristic.uuid.to_string(),
                readable: characteristic.properties.contains(CharPropFlags::READ),
                notifiable: is_notifiable(characteristic.properties),
                subscribed: false,
                value: None,
            };

            if actions.subscribe {
                match peripheral.subscribe(characteristic).await {
                    Ok(()) => {
                        log::info!("Subscribed to notifications for {}", characteristic.uuid);
                        summary.subscribed = true;
                    }
                    Err(e) => log::warn!("Could not subscribe to {}: {}", characteristic.uuid, e),
                }
            }

            if actions.read {
                match peripheral.read(characteristic).await {
                    Ok(value) => {
                        log::info!("Read value for {}: {}", characteristic.uuid, format_value(&value));
                        summary.value = Some(value);
                    }
                    Err(e) => log::warn!("Could not read {}: {}", characteristic.uuid, e),
                }
            }

            characteristics.push(summary);
        }

        summaries.push(ServiceSummary {
            uuid: service.uuid.to_string(),
            primary: service.primary,
            characteristics,
        });
    }

    Ok(summaries)
}

/// Log notifications from `peripheral` until the stream ends or `should_stop` is set
pub async fn log_notifications(peripheral: Peripheral, should_stop: Arc<AtomicBool>) {
    let mut notifications = match peripheral.notifications().await {
        Ok(stream) => stream,
        Err(e) => {
            log::warn!("Notification stream unavailable: {}", e);
            return;
        }
    };

    while let Some(notification) = notifications.next().await {
        if should_stop.load(Ordering::Relaxed) {
            break;
        }
        log::info!(
            "Received update from {}: {}",
            notification.uuid,
            format_value(&notification.value)
        );
    }

    log::debug!("Notification stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&[0x0a, 0x1b, 0xff]), "<0a1bff>");
        assert_eq!(format_value(&[]), "<>");
    }

    #[test]
    fn test_notify_and_read_actions() {
        let config = Config::default();
        let actions =
            CharacteristicActions::for_properties(CharPropFlags::NOTIFY | CharPropFlags::READ, &config);
        assert!(actions.subscribe);
        assert!(actions.read);
    }

    #[test]
    fn test_indicate_counts_as_notifiable() {
        let config = Config::default();
        let actions = CharacteristicActions::for_properties(CharPropFlags::INDICATE, &config);
        assert!(actions.subscribe);
        assert!(!actions.read);
    }

    #[test]
    fn test_write_only_needs_no_action() {
        let config = Config::default();
        let actions = CharacteristicActions::for_properties(CharPropFlags::WRITE, &config);
        assert_eq!(
            actions,
            CharacteristicActions {
                subscribe: false,
                read: false
            }
        );
    }

    #[test]
    fn test_actions_respect_config() {
        let config = Config {
            subscribe_notifications: false,
            read_characteristics: false,
            ..Config::default()
        };
        let actions =
            CharacteristicActions::for_properties(CharPropFlags::NOTIFY | CharPropFlags::READ, &config);
        assert!(!actions.subscribe);
        assert!(!actions.read);
    }
}
