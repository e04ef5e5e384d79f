//! App-settings (`ad`) handling: the raw record carries a compact
//! short-code dict merged into prior app-settings (new wins on conflict).
//! Storage keeps the short codes; render time expands them into a grouped,
//! human-labeled structure and renames freshness-age keys via the same
//! short->long table.

use serde_json::{json, Map, Value};

pub const APP_SETTINGS_KEY_MAP: &[(&str, &str)] = &[
    ("av", "app_version_code"),
    ("dc", "data_collection_toggle"),
    ("su", "server_upload_toggle"),
    ("fc", "force_continuous"),
    ("p1", "continuous_power_mode"),
    ("p2", "optimized_power_mode"),
    ("p3", "passive_power_mode"),
    ("x1", "wifi_rssi_precision"),
    ("xa", "gps_altitude_precision"),
    ("xb", "battery_precision"),
    ("xc", "step_counter_precision"),
    ("xg", "gps_precision"),
    ("xl", "ambient_light_precision"),
    ("xn", "network_speed_precision"),
    ("xp", "barometer_precision"),
    ("xr", "cellular_rssi_precision"),
    ("xs", "speed_precision"),
    ("dm", "diagnostics_master_switch"),
    ("ea", "system_audio_toggle"),
    ("eb", "barometer_toggle"),
    ("ec", "charging_state_toggle"),
    ("ed", "cellular_data_activity_toggle"),
    ("ef", "cell_signal_quality_toggle"),
    ("eg", "timing_advance_toggle"),
    ("ek", "step_counter_toggle"),
    ("el", "ambient_light_toggle"),
    ("em", "network_metered_toggle"),
    ("ep", "power_save_toggle"),
    ("es", "screen_state_toggle"),
    ("et", "device_temp_toggle"),
    ("ev", "vpn_status_toggle"),
    ("ex", "camera_state_toggle"),
    ("ey", "flashlight_state_toggle"),
    ("w1", "wifi_rssi_toggle"),
    ("w2", "wifi_frequency_toggle"),
    ("w3", "wifi_link_speed_toggle"),
    ("w4", "wifi_standard_toggle"),
    ("w5", "wifi_name_ssid_toggle"),
    ("b1", "trigger_by_count"),
    ("b2", "trigger_by_timeout"),
    ("b3", "trigger_by_max_size"),
    ("bc", "batch_record_count"),
    ("be", "batching_toggle"),
    ("bl", "compression_level"),
    ("bs", "batch_max_size_kb"),
    ("bt", "batch_timeout_sec"),
    ("m1", "gps_permission_state"),
    ("m2", "phone_state_permission"),
    ("m3", "activity_recognition_permission"),
    ("m4", "post_notifications_permission"),
    ("q1", "barometer_sensor_state"),
    ("q2", "step_counter_sensor_state"),
    ("q3", "ambient_light_sensor_state"),
    ("q4", "proximity_sensor_state"),
    ("q5", "motion_detector_state"),
    ("bo", "battery_optimization_state"),
    ("c1", "calibrated_stationary_thresh"),
    ("c2", "calibrated_moving_thresh"),
];

pub fn long_key_for(short: &str) -> &str {
    APP_SETTINGS_KEY_MAP
        .iter()
        .find(|(s, _)| *s == short)
        .map(|(_, long)| *long)
        .unwrap_or(short)
}

/// Merges a record's compact `ad` dict onto the prior app-settings state;
/// new keys overwrite, keys absent from the incoming update are preserved.
pub fn merge_app_settings(prior: &Value, incoming: &Value) -> Value {
    let mut merged = prior.as_object().cloned().unwrap_or_default();
    if let Some(incoming_obj) = incoming.as_object() {
        for (key, value) in incoming_obj {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

/// Renames `{short}_age_in_seconds` keys in a freshness-age tree to their
/// long form, at render time only.
pub fn rename_age_keys(ages: &Value) -> Value {
    match ages {
        Value::Object(obj) => {
            let mut renamed = Map::new();
            for (key, value) in obj {
                if let Some(short) = key.strip_suffix("_age_in_seconds") {
                    let long = long_key_for(short);
                    renamed.insert(format!("{long}_age_in_seconds"), value.clone());
                } else {
                    renamed.insert(key.clone(), value.clone());
                }
            }
            Value::Object(renamed)
        }
        other => other.clone(),
    }
}

fn get_i64(settings: &Map<String, Value>, key: &str) -> Option<i64> {
    settings.get(key).and_then(Value::as_i64)
}

fn is_one(settings: &Map<String, Value>, key: &str) -> bool {
    get_i64(settings, key) == Some(1)
}

fn permission_label(code: Option<i64>) -> Option<&'static str> {
    match code {
        Some(0) => Some("Denied"),
        Some(1) => Some("Foreground (While-in-use)"),
        Some(2) => Some("Background (All the time)"),
        _ => None,
    }
}

fn bool_permission_label(code: Option<i64>) -> Option<&'static str> {
    match code {
        Some(0) => Some("Not Granted"),
        Some(1) => Some("Granted"),
        _ => None,
    }
}

fn sensor_health_label(code: Option<i64>) -> Option<&'static str> {
    match code {
        Some(1) => Some("Not Available"),
        Some(2) => Some("OK"),
        Some(3) => Some("Stale"),
        Some(4) => Some("Quarantined"),
        _ => None,
    }
}

fn motion_detector_label(code: Option<i64>) -> Option<&'static str> {
    match code {
        Some(2) => Some("OK"),
        Some(3) => Some("Stale"),
        _ => None,
    }
}

fn battery_optimization_label(code: Option<i64>) -> Option<&'static str> {
    match code {
        Some(0) => Some("Unrestricted"),
        Some(1) => Some("Optimized"),
        Some(2) => Some("Restricted"),
        _ => None,
    }
}

fn precision_label(field: &str, code: Option<i64>) -> Option<&'static str> {
    let code = code?;
    let table: &[(i64, &str)] = match field {
        "x1" | "xr" => &[(0, "Smart"), (1, "Max"), (2, "3dBm"), (3, "5dBm"), (4, "10dBm")],
        "xa" => &[(0, "Smart"), (1, "Max"), (2, "2m"), (3, "10m"), (4, "25m"), (5, "50m"), (6, "100m")],
        "xb" => &[(0, "Smart"), (1, "Max"), (2, "2%"), (3, "5%"), (4, "10%")],
        "xc" => &[(0, "Smart"), (1, "Max"), (2, "10 steps"), (3, "100 steps"), (4, "1000 steps")],
        "xg" => &[(0, "Smart"), (1, "Max"), (2, "20m"), (3, "100m"), (4, "1km"), (5, "10km")],
        "xl" => &[(0, "Smart"), (1, "Max"), (2, "1-lux"), (3, "10-lux"), (4, "100-lux")],
        "xn" => &[(0, "Smart"), (1, "Max"), (2, "1Mbps"), (3, "2Mbps"), (4, "5Mbps")],
        "xp" => &[(0, "Smart"), (1, "Max"), (2, "0.1hPa"), (3, "1hPa"), (4, "10hPa")],
        "xs" => &[(0, "Smart"), (1, "Max"), (2, "1km/h"), (3, "3km/h"), (4, "5km/h"), (5, "10km/h")],
        _ => return None,
    };
    table.iter().find(|(c, _)| *c == code).map(|(_, l)| *l)
}

/// Expands the stored short-code app-settings tree into the grouped,
/// human-labeled shape the read API renders.
pub fn group_and_rename_app_settings(settings: &Value) -> Value {
    let empty = Map::new();
    let s = settings.as_object().unwrap_or(&empty);

    let grouped = json!({
        "general": {
            "app_version_code": s.get("av"),
            "data_collection_enabled": is_one(s, "dc"),
            "server_upload_enabled": is_one(s, "su"),
        },
        "power_management": {
            "power_modes": {
                "force_continuous": is_one(s, "fc"),
                "continuous": is_one(s, "p1"),
                "optimized": is_one(s, "p2"),
                "passive": is_one(s, "p3"),
            },
            "battery_optimization_state": battery_optimization_label(get_i64(s, "bo")),
        },
        "batching_and_upload": {
            "batching_enabled": is_one(s, "be"),
            "compression_level": s.get("bl"),
            "triggers": {
                "by_record_count": is_one(s, "b1"),
                "by_timeout": is_one(s, "b2"),
                "by_max_size": is_one(s, "b3"),
            },
            "trigger_values": {
                "record_count": s.get("bc"),
                "timeout_seconds": s.get("bt"),
                "max_size_kb": s.get("bs"),
            },
        },
        "precision_controls": {
            "wifi_signal_strength": precision_label("x1", get_i64(s, "x1")),
            "gps_altitude": precision_label("xa", get_i64(s, "xa")),
            "battery_level": precision_label("xb", get_i64(s, "xb")),
            "step_counter": precision_label("xc", get_i64(s, "xc")),
            "gps_coordinates": precision_label("xg", get_i64(s, "xg")),
            "ambient_light": precision_label("xl", get_i64(s, "xl")),
            "network_speed": precision_label("xn", get_i64(s, "xn")),
            "barometer": precision_label("xp", get_i64(s, "xp")),
            "cellular_signal_strength": precision_label("xr", get_i64(s, "xr")),
            "speed": precision_label("xs", get_i64(s, "xs")),
        },
        "diagnostics_toggles": {
            "master_switch": is_one(s, "dm"),
            "general_state": {
                "system_audio": is_one(s, "ea"),
                "charging_state": is_one(s, "ec"),
                "data_activity": is_one(s, "ed"),
                "network_metered": is_one(s, "em"),
                "power_save_mode": is_one(s, "ep"),
                "screen_state": is_one(s, "es"),
                "device_temperature": is_one(s, "et"),
                "vpn_status": is_one(s, "ev"),
                "camera_state": is_one(s, "ex"),
                "flashlight_state": is_one(s, "ey"),
            },
            "sensor_state": {
                "barometer": is_one(s, "eb"),
                "cell_signal_quality": is_one(s, "ef"),
                "timing_advance": is_one(s, "eg"),
                "step_counter": is_one(s, "ek"),
                "ambient_light": is_one(s, "el"),
            },
            "wifi_details": {
                "signal_strength": is_one(s, "w1"),
                "frequency": is_one(s, "w2"),
                "link_speed": is_one(s, "w3"),
                "standard": is_one(s, "w4"),
                "ssid": is_one(s, "w5"),
            },
        },
        "system_status": {
            "permissions": {
                "gps": permission_label(get_i64(s, "m1")),
                "phone_state": bool_permission_label(get_i64(s, "m2")),
                "activity_recognition": bool_permission_label(get_i64(s, "m3")),
                "post_notifications": bool_permission_label(get_i64(s, "m4")),
            },
            "sensor_health": {
                "barometer": sensor_health_label(get_i64(s, "q1")),
                "step_counter": sensor_health_label(get_i64(s, "q2")),
                "ambient_light": sensor_health_label(get_i64(s, "q3")),
                "proximity": sensor_health_label(get_i64(s, "q4")),
                "motion_detector": motion_detector_label(get_i64(s, "q5")),
            },
            "calibration": {
                "stationary_threshold_variance": s.get("c1"),
                "moving_threshold_variance": s.get("c2"),
            },
        },
    });

    crate::transform::sentinel::cleanup_empty(&grouped)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_incoming_and_keeps_absent_keys() {
        let prior = json!({"av": 1, "dc": 0});
        let incoming = json!({"dc": 1});
        let merged = merge_app_settings(&prior, &incoming);
        assert_eq!(merged["av"], json!(1));
        assert_eq!(merged["dc"], json!(1));
    }

    #[test]
    fn long_key_lookup_falls_back_to_short() {
        assert_eq!(long_key_for("av"), "app_version_code");
        assert_eq!(long_key_for("zzz"), "zzz");
    }

    #[test]
    fn grouping_maps_permission_codes() {
        let settings = json!({"m1": 2});
        let grouped = group_and_rename_app_settings(&settings);
        assert_eq!(
            grouped["system_status"]["permissions"]["gps"],
            json!("Background (All the time)")
        );
    }
}
