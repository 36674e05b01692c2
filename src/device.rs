use serde::{Deserialize, Serialize};

/// A peripheral seen during a scan.
///
/// Serializes as `{"name": ..., "uuid": ..., "rssi": ...}`, the shape host
/// applications read from the JSON-returning scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub name: String,
    #[serde(rename = "uuid")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
}

impl DiscoveredDevice {
    pub fn new(id: String, name: String, rssi: Option<i16>) -> Self {
        Self { name, id, rssi }
    }
}

/// Whether two identifier strings name the same peripheral.
///
/// Platform identifiers are UUIDs on some stacks, printed lowercase by the
/// stack but often stored uppercase by hosts, so case is ignored.
pub fn same_identifier(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

/// Devices whose identifier or name contains `keyword`, ignoring case.
///
/// An empty keyword matches everything.
pub fn filter_by_keyword<'a>(
    devices: &'a [DiscoveredDevice],
    keyword: &str,
) -> Vec<&'a DiscoveredDevice> {
    let keyword = keyword.trim().to_lowercase();
    devices
        .iter()
        .filter(|device| {
            keyword.is_empty()
                || device.id.to_lowercase().contains(&keyword)
                || device.name.to_lowercase().contains(&keyword)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<DiscoveredDevice> {
        vec![
            DiscoveredDevice::new("A1B2-0001".to_string(), "Polar H10".to_string(), Some(-60)),
            DiscoveredDevice::new("C3D4-0002".to_string(), "Unnamed".to_string(), None),
            DiscoveredDevice::new("E5F6-0003".to_string(), "Desk Lamp".to_string(), Some(-82)),
        ]
    }

    #[test]
    fn test_json_shape() {
        let device = DiscoveredDevice::new("A1B2".to_string(), "Sensor".to_string(), Some(-70));
        let json = serde_json::to_value(&device).unwrap();
        assert_eq!(json["name"], "Sensor");
        assert_eq!(json["uuid"], "A1B2");
        assert_eq!(json["rssi"], -70);
    }

    #[test]
    fn test_json_omits_missing_rssi() {
        let device = DiscoveredDevice::new("A1B2".to_string(), "Sensor".to_string(), None);
        let json = serde_json::to_string(&device).unwrap();
        assert_eq!(json, r#"{"name":"Sensor","uuid":"A1B2"}"#);
    }

    #[test]
    fn test_filter_matches_id_and_name() {
        let devices = sample();
        let by_id = filter_by_keyword(&devices, "c3d4");
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0].id, "C3D4-0002");

        let by_name = filter_by_keyword(&devices, "polar");
        assert_eq!(by_name.len(), 1);
        assert_eq!(by_name[0].name, "Polar H10");
    }

    #[test]
    fn test_empty_keyword_matches_all() {
        let devices = sample();
        assert_eq!(filter_by_keyword(&devices, "  ").len(), 3);
    }

    #[test]
    fn test_same_identifier_ignores_case() {
        assert!(same_identifier(
            "e621e1f8-c36c-495a-93fc-0c247a3e6e5f",
            "E621E1F8-C36C-495A-93FC-0C247A3E6E5F"
        ));
        assert!(same_identifier("hci0/dev_AA_BB", " hci0/dev_aa_bb "));
        assert!(!same_identifier(
            "e621e1f8-c36c-495a-93fc-0c247a3e6e5f",
            "e621e1f8-c36c-495a-93fc-0c247a3e6e50"
        ));
    }

    #[test]
    fn test_filter_no_match() {
        let devices = sample();
        assert!(filter_by_keyword(&devices, "toaster").is_empty());
    }
}
