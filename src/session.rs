//! # Scan Session Module
//!
//! A scan session is one bounded discovery window. It owns the device
//! records collected during that window and guarantees each identifier is
//! reported at most once, no matter how many advertisements arrive.
//!
//! A new session is created for every scan, so records never leak from one
//! scan into the next.

use crate::config::Config;
use crate::device::DiscoveredDevice;
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug)]
pub struct ScanSession {
    started_at: DateTime<Local>,
    window: Duration,
    placeholder: String,
    named_only: bool,
    /// Position of each identifier in `devices`
    index: HashMap<String, usize>,
    devices: Vec<DiscoveredDevice>,
}

impl ScanSession {
    pub fn new(window: Duration, placeholder: impl Into<String>, named_only: bool) -> Self {
        Self {
            started_at: Local::now(),
            window,
            placeholder: placeholder.into(),
            named_only,
            index: HashMap::new(),
            devices: Vec::new(),
        }
    }

    /// Session whose naming rules come from `config`
    pub fn with_config(window: Duration, config: &Config) -> Self {
        Self::new(window, config.unnamed_placeholder.clone(), config.named_only)
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn started_at(&self) -> DateTime<Local> {
        self.started_at
    }

    /// Record a sighting. Returns `true` only for the first sighting of `id`.
    ///
    /// Repeat sightings refresh the RSSI and replace a placeholder name once
    /// the device advertises a real one.
    pub fn record(&mut self, id: &str, name: Option<&str>, rssi: Option<i16>) -> bool {
        let name = name.map(str::trim).filter(|name| !name.is_empty());

        if let Some(&position) = self.index.get(id) {
            let device = &mut self.devices[position];
            if rssi.is_some() {
                device.rssi = rssi;
            }
            if let Some(name) = name {
                if device.name == self.placeholder {
                    device.name = name.to_string();
                }
            }
            return false;
        }

        if name.is_none() && self.named_only {
            return false;
        }

        let name = name.unwrap_or(&self.placeholder).to_string();
        log::info!(
            "Discovered: {} ({}) - RSSI: {}",
            name,
            id,
            rssi.map(|r| r.to_string()).unwrap_or_else(|| "n/a".to_string())
        );

        self.index.insert(id.to_string(), self.devices.len());
        self.devices
            .push(DiscoveredDevice::new(id.to_string(), name, rssi));
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn devices(&self) -> &[DiscoveredDevice] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Close the session, yielding its records in discovery order
    pub fn finish(self) -> Vec<DiscoveredDevice> {
        log::info!(
            "Scan complete: {} device(s) in a {}s window started {}",
            self.devices.len(),
            self.window.as_secs(),
            self.started_at.format("%H:%M:%S")
        );
        self.devices
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ScanSession {
        ScanSession::new(Duration::from_secs(5), "Unnamed", false)
    }

    #[test]
    fn test_first_sighting_is_recorded() {
        let mut session = session();
        assert!(session.record("AAAA", Some("Sensor"), Some(-50)));
        assert!(session.contains("AAAA"));
        assert_eq!(session.len(), 1);
    }

    #[test]
    fn test_identifier_reported_once() {
        let mut session = session();
        assert!(session.record("AAAA", Some("Sensor"), Some(-50)));
        assert!(!session.record("AAAA", Some("Sensor"), Some(-48)));
        assert!(!session.record("AAAA", None, None));
        assert!(session.record("BBBB", None, None));

        let devices = session.finish();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].id, "AAAA");
        assert_eq!(devices[1].id, "BBBB");
    }

    #[test]
    fn test_missing_name_uses_placeholder() {
        let mut session = session();
        session.record("AAAA", None, None);
        session.record("BBBB", Some("   "), None);
        assert_eq!(session.devices()[0].name, "Unnamed");
        assert_eq!(session.devices()[1].name, "Unnamed");
    }

    #[test]
    fn test_repeat_sighting_refreshes_rssi() {
        let mut session = session();
        session.record("AAAA", Some("Sensor"), Some(-80));
        session.record("AAAA", Some("Sensor"), Some(-55));
        session.record("AAAA", Some("Sensor"), None);
        assert_eq!(session.devices()[0].rssi, Some(-55));
    }

    #[test]
    fn test_later_name_replaces_placeholder() {
        let mut session = session();
        session.record("AAAA", None, Some(-70));
        session.record("AAAA", Some("Thermometer"), None);
        session.record("AAAA", Some("Renamed"), None);
        assert_eq!(session.devices()[0].name, "Thermometer");
    }

    #[test]
    fn test_named_only_skips_nameless_until_named() {
        let mut session = ScanSession::new(Duration::from_secs(15), "Unknown", true);
        assert!(!session.record("AAAA", None, Some(-40)));
        assert!(session.is_empty());
        assert!(session.record("AAAA", Some("Speaker"), Some(-41)));
        assert_eq!(session.devices()[0].name, "Speaker");
    }

    #[test]
    fn test_with_config_takes_naming_rules() {
        let config = Config {
            unnamed_placeholder: "???".to_string(),
            ..Config::default()
        };
        let mut session = ScanSession::with_config(config.scan_duration(), &config);
        session.record("AAAA", None, None);
        assert_eq!(session.devices()[0].name, "???");
        assert_eq!(session.window(), Duration::from_secs(5));
    }
}
