//! Parsing for the interactive terminal menu.

use blescan::DiscoveredDevice;

pub const MENU: &str = "\
1. Scan for devices
2. Connect to a device
3. Disconnect from device
4. Exit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuChoice {
    Scan,
    Connect,
    Disconnect,
    Exit,
}

impl MenuChoice {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().parse::<u32>().ok()? {
            1 => Some(MenuChoice::Scan),
            2 => Some(MenuChoice::Connect),
            3 => Some(MenuChoice::Disconnect),
            4 => Some(MenuChoice::Exit),
            _ => None,
        }
    }
}

/// Pick a device by its 1-based position in `candidates`
pub fn select<'a>(candidates: &[&'a DiscoveredDevice], input: &str) -> Option<&'a DiscoveredDevice> {
    let index = input.trim().parse::<usize>().ok()?;
    if index == 0 {
        return None;
    }
    candidates.get(index - 1).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_choices() {
        assert_eq!(MenuChoice::parse("1"), Some(MenuChoice::Scan));
        assert_eq!(MenuChoice::parse(" 2\n"), Some(MenuChoice::Connect));
        assert_eq!(MenuChoice::parse("3"), Some(MenuChoice::Disconnect));
        assert_eq!(MenuChoice::parse("4"), Some(MenuChoice::Exit));
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert_eq!(MenuChoice::parse("0"), None);
        assert_eq!(MenuChoice::parse("5"), None);
        assert_eq!(MenuChoice::parse("scan"), None);
        assert_eq!(MenuChoice::parse(""), None);
    }

    #[test]
    fn test_select_is_one_based() {
        let a = DiscoveredDevice::new("AAAA".to_string(), "First".to_string(), None);
        let b = DiscoveredDevice::new("BBBB".to_string(), "Second".to_string(), None);
        let candidates = vec![&a, &b];

        assert_eq!(select(&candidates, "1").map(|d| d.id.as_str()), Some("AAAA"));
        assert_eq!(select(&candidates, "2").map(|d| d.id.as_str()), Some("BBBB"));
        assert!(select(&candidates, "0").is_none());
        assert!(select(&candidates, "3").is_none());
        assert!(select(&candidates, "x").is_none());
    }
}
