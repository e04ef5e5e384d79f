use std::collections::HashMap;

/// Static prefix (first 6 hex digits of a MAC, upper-cased) to vendor name.
/// Loaded once at startup: a small embedded fallback table for offline
/// operation, optionally refreshed from the IEEE registry text file (see
/// `crate::services::oui_bootstrap`).
#[derive(Debug, Clone, Default)]
pub struct OuiTable {
    entries: HashMap<String, String>,
}

const EMBEDDED_FALLBACK: &[(&str, &str)] = &[
    ("000C29", "VMware"),
    ("001A11", "Google"),
    ("3C5AB4", "Google"),
    ("D83ADD", "Google"),
    ("F4F5D8", "Google"),
    ("001E52", "Apple"),
    ("28E02C", "Apple"),
    ("A4C361", "Apple"),
    ("B827EB", "Raspberry Pi Foundation"),
    ("DCA632", "Raspberry Pi Trading"),
    ("000D3A", "Microsoft"),
    ("7C1E52", "Microsoft"),
    ("F07959", "Samsung"),
    ("5CF9DD", "Samsung"),
    ("002129", "Cisco"),
    ("00025A", "Cisco"),
];

impl OuiTable {
    pub fn with_embedded_fallback() -> Self {
        let entries = EMBEDDED_FALLBACK
            .iter()
            .map(|(prefix, vendor)| (prefix.to_string(), vendor.to_string()))
            .collect();
        Self { entries }
    }

    pub fn insert(&mut self, prefix: String, vendor: String) {
        self.entries.insert(prefix.to_uppercase(), vendor);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, mac_address: &str) -> Option<&str> {
        let stripped: String = mac_address
            .chars()
            .filter(|c| *c != ':' && *c != '-')
            .collect();
        if stripped.len() < 6 {
            return None;
        }
        let prefix = stripped[..6].to_uppercase();
        self.entries.get(&prefix).map(String::as_str)
    }
}

/// Convenience wrapper matching the original `get_vendor_from_mac` contract.
pub fn vendor_for_mac<'a>(table: &'a OuiTable, mac_address: &str) -> Option<&'a str> {
    table.lookup(mac_address)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn looks_up_known_prefix_case_insensitively() {
        let table = OuiTable::with_embedded_fallback();
        assert_eq!(table.lookup("b8:27:eb:11:22:33"), Some("Raspberry Pi Foundation"));
        assert_eq!(table.lookup("B827EB112233"), Some("Raspberry Pi Foundation"));
    }

    #[test]
    fn unknown_prefix_returns_none() {
        let table = OuiTable::with_embedded_fallback();
        assert_eq!(table.lookup("ff:ff:ff:00:00:00"), None);
    }
}
