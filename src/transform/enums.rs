//! Fixed enum-code -> label maps carried over the compact wire format (see
//! GLOSSARY). Kept as small match functions rather than `HashMap` statics
//! since every table is tiny and known at compile time.

pub fn cellular_type_label(code: i64) -> &'static str {
    match code {
        1 => "GSM",
        2 => "GPRS/EDGE",
        3 => "UMTS/HSPA",
        4 => "LTE",
        5 => "NR(5G)",
        6 => "CDMA",
        7 => "IDEN",
        _ => "Other",
    }
}

pub fn charging_state_label(code: i64) -> &'static str {
    match code {
        1 => "AC",
        2 => "USB",
        3 => "Wireless",
        4 => "Full",
        _ => "Not Charging",
    }
}

pub fn wifi_standard_label(code: i64) -> &'static str {
    match code {
        4 => "Wi-Fi 4",
        5 => "Wi-Fi 5",
        6 => "Wi-Fi 6",
        _ => "Other",
    }
}

pub fn data_activity_label(code: i64) -> &'static str {
    match code {
        1 => "In",
        2 => "Out",
        3 => "In/Out",
        _ => "None",
    }
}

pub fn system_audio_label(code: i64) -> &'static str {
    match code {
        1 => "Media",
        2 => "In Call",
        _ => "Idle",
    }
}

pub fn phone_activity_label(code: i64) -> &'static str {
    match code {
        1 => "Stable",
        2 => "Moving",
        _ => "Stable/Upside Down",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cellular_type_labels_match_glossary() {
        assert_eq!(cellular_type_label(4), "LTE");
        assert_eq!(cellular_type_label(5), "NR(5G)");
        assert_eq!(cellular_type_label(99), "Other");
    }

    #[test]
    fn charging_state_labels_match_glossary() {
        assert_eq!(charging_state_label(0), "Not Charging");
        assert_eq!(charging_state_label(3), "Wireless");
    }
}
