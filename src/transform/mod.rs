//! Payload Transformer (C3): compact-key raw record + prior plain state +
//! IP intelligence -> the full plain state for one event. Table-driven
//! carry-forward (a single pass per record, no runtime dispatch) plus the
//! derived-field computations spelled out in the component design.

pub mod altitude_analysis;
pub mod app_settings;
pub mod cellular_analysis;
pub mod derived;
pub mod enums;
pub mod sentinel;

use crate::decode;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Everything the transformer needs beyond the raw wire payload itself.
pub struct TransformInput<'a> {
    pub raw: &'a Value,
    pub prior_plain: &'a Value,
    pub device_id: &'a str,
    pub request_id: Option<&'a str>,
    pub source_ip: Option<&'a str>,
    pub request_headers: Option<&'a Value>,
    pub warnings: Option<&'a Value>,
    pub event_ts: DateTime<Utc>,
    pub received_at: Option<DateTime<Utc>>,
    pub ip_intel: Option<&'a Value>,
    pub oui_table: &'a decode::OuiTable,
    /// Weather fields already resolved by the coordinator (C4) and merged
    /// onto the raw payload under these keys before the transform runs:
    /// the weather_code/temperature/... fields plus
    /// weather_fetch_lat/lon/ts.
    pub weather: Option<&'a Value>,
}

fn get<'a>(raw: &'a Value, key: &str) -> Option<&'a Value> {
    raw.get(key).filter(|v| !v.is_null())
}

fn prior_path<'a>(prior: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = prior;
    for segment in path {
        cur = cur.get(segment)?;
    }
    Some(cur).filter(|v| !v.is_null())
}

/// A field carries forward from `prior_plain` when the raw record omits
/// the compact key or the value is that field's error sentinel.
fn carry_forward<F>(raw: &Value, raw_key: &str, prior: &Value, path: &[&str], extract: F) -> Option<Value>
where
    F: Fn(Option<&Value>) -> Option<Value>,
{
    if let Some(value) = extract(get(raw, raw_key)) {
        return Some(value);
    }
    prior_path(prior, path).cloned()
}

fn opt_num(v: Option<i64>) -> Option<Value> {
    v.map(Value::from)
}
fn opt_f(v: Option<f64>) -> Option<Value> {
    v.map(Value::from)
}
fn opt_s(v: Option<String>) -> Option<Value> {
    v.map(Value::String)
}

/// Resolves this record's (latitude, longitude, geohash_precision_meters),
/// decoding `g` when present and falling back to the raw `y`/`x` fields or
/// carry-forward from `prior`. Exposed separately from [`transform`] so the
/// weather coordinator (C4) can gate re-fetches on the same coordinates the
/// transformer will ultimately emit, without duplicating the decode.
pub fn resolve_coordinates(raw: &Value, prior: &Value) -> (Option<Value>, Option<Value>, Option<u64>) {
    let geohash_result = get(raw, "g").and_then(|v| v.as_str()).and_then(decode::decode_geohash);
    let (lat_from_geohash, lon_from_geohash, precision_meters) = match geohash_result {
        Some(r) => (Some(r.latitude), Some(r.longitude), Some(r.precision_meters)),
        None => (None, None, None),
    };

    let latitude = carry_forward(raw, "y", prior, &["location", "latitude"], |v| {
        opt_f(sentinel::safe_float(v)).or_else(|| lat_from_geohash.map(Value::from))
    });
    let longitude = carry_forward(raw, "x", prior, &["location", "longitude"], |v| {
        opt_f(sentinel::safe_float(v)).or_else(|| lon_from_geohash.map(Value::from))
    });

    (latitude, longitude, precision_meters)
}

pub fn transform(input: TransformInput) -> Value {
    let raw = input.raw;
    let prior = input.prior_plain;

    // --- decoders -----------------------------------------------------
    let (latitude, longitude, precision_meters) = resolve_coordinates(raw, prior);

    let bssid_b64 = get(raw, "b").and_then(|v| v.as_str());
    let formatted_bssid = bssid_b64.and_then(decode::decode_bssid_base64);
    let wifi_bssid: Option<String> = if raw.get("b").is_some() {
        // Present but possibly unparseable: per §4.7(e), an unparseable
        // BSSID drops the prior leaf rather than inheriting it.
        formatted_bssid
    } else {
        prior_path(prior, &["network", "wifi_bssid"])
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    };

    let cellular_type_code = carry_forward(raw, "t", prior, &["network", "cellular", "type"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let cellular_type_label = cellular_type_code
        .as_ref()
        .and_then(Value::as_i64)
        .map(enums::cellular_type_label);

    let active_network = if wifi_bssid.is_some() {
        Some("Wi-Fi".to_string())
    } else {
        cellular_type_label.map(|s| s.to_string())
    };

    let signal_strength = carry_forward(
        raw,
        "r",
        prior,
        &["network", "cellular", "signal_strength_in_dbm"],
        |v| opt_num(sentinel::signal_strength_dbm(v)),
    );
    let cell_quality = carry_forward(raw, "rq", prior, &["network", "cellular", "quality"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let mcc = carry_forward(raw, "mc", prior, &["network", "cellular", "mcc"], |v| {
        opt_s(sentinel::safe_string(v))
    });
    let mnc = carry_forward(raw, "mn", prior, &["network", "cellular", "mnc"], |v| {
        opt_s(sentinel::safe_string(v))
    });
    let cell_id_raw = get(raw, "ci").and_then(|v| v.as_str());
    let cell_id = match cell_id_raw.and_then(decode::decode_base62) {
        Some(id) => Some(Value::from(id)),
        None => prior_path(prior, &["network", "cellular", "cell_id"]).cloned(),
    };
    let tac = carry_forward(raw, "tc", prior, &["network", "cellular", "tac"], |v| {
        opt_s(sentinel::safe_string(v))
    });
    let timing_advance = carry_forward(raw, "ta", prior, &["network", "cellular", "timing_advance"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let operator = carry_forward(raw, "o", prior, &["network", "cellular", "operator"], |v| {
        opt_s(sentinel::safe_string(v))
    });

    let download_mbps = carry_forward(raw, "d", prior, &["network", "bandwidth", "download_in_mbps"], |v| {
        opt_f(sentinel::safe_float_rounded(v, 1))
    });
    let upload_mbps = carry_forward(raw, "u", prior, &["network", "bandwidth", "upload_in_mbps"], |v| {
        opt_f(sentinel::safe_float_rounded(v, 1))
    });

    let wifi_rssi = carry_forward(raw, "wr", prior, &["network", "wifi", "rssi_in_dbm"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let wifi_frequency = carry_forward(raw, "wf", prior, &["network", "wifi", "frequency_mhz"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let wifi_link_speed = carry_forward(raw, "ws", prior, &["network", "wifi", "link_speed_mbps"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let wifi_standard_code = carry_forward(raw, "wt", prior, &["network", "wifi", "standard_code"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let wifi_standard = wifi_standard_code
        .as_ref()
        .and_then(Value::as_i64)
        .map(enums::wifi_standard_label);
    let wifi_ssid = carry_forward(raw, "wn", prior, &["network", "wifi", "ssid"], |v| {
        opt_s(sentinel::safe_string(v))
    });

    let vendor = formatted_bssid
        .as_deref()
        .and_then(|mac| decode::vendor_for_mac(input.oui_table, mac));

    // --- location -------------------------------------------------------
    let altitude_m = carry_forward(raw, "a", prior, &["location", "altitude_in_meters"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let elevation_m = carry_forward(raw, "elevation", prior, &["location", "elevation_in_meters"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let accuracy_m = carry_forward(raw, "ac", prior, &["location", "accuracy_in_meters"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let speed_kmh = carry_forward(raw, "s", prior, &["location", "speed_in_kmh"], |v| {
        opt_num(sentinel::safe_int(v))
    });

    // --- power ------------------------------------------------------
    let battery_percent = carry_forward(raw, "p", prior, &["power", "battery_percent"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let capacity_mah = carry_forward(raw, "c", prior, &["power", "capacity_in_mah"], |v| {
        opt_num(sentinel::capacity_mah(v))
    });
    let leftover_capacity_mah = match (
        battery_percent.as_ref().and_then(Value::as_i64),
        capacity_mah.as_ref().and_then(Value::as_i64),
    ) {
        (Some(pct), Some(cap)) => Some(Value::from(((pct as f64 / 100.0) * cap as f64).round() as i64)),
        _ => None,
    };
    let charging_state_code = carry_forward(raw, "cs", prior, &["power", "charging_state_code"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let charging_state = charging_state_code
        .as_ref()
        .and_then(Value::as_i64)
        .map(enums::charging_state_label);
    let power_save = carry_forward(raw, "pm", prior, &["power", "power_save_enabled"], |v| {
        v.and_then(Value::as_i64).map(|n| Value::from(n == 1))
    });

    // --- environment / weather ---------------------------------------
    let weather_source = input.weather.unwrap_or(&Value::Null);
    let temp_c = carry_forward(weather_source, "temperature", prior, &["environment", "weather", "temperature_in_celsius"], |v| {
        opt_f(sentinel::safe_float_rounded(v, 1))
    });
    let feels_like = carry_forward(weather_source, "apparent_temp", prior, &["environment", "weather", "feels_like_in_celsius"], |v| {
        opt_f(sentinel::safe_float_rounded(v, 1))
    });
    let humidity = carry_forward(weather_source, "humidity", prior, &["environment", "weather", "humidity_percent"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let pressure_hpa = carry_forward(weather_source, "pressure_msl", prior, &["environment", "weather", "pressure_in_hpa"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let cloud_cover = carry_forward(weather_source, "cloud_cover", prior, &["environment", "weather", "cloud_cover_percent"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let weather_code = carry_forward(weather_source, "code", prior, &["environment", "weather", "code"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let weather_description = weather_code
        .as_ref()
        .and_then(Value::as_i64)
        .and_then(derived::weather_code_description);
    let temp_c_f64 = temp_c.as_ref().and_then(Value::as_f64);
    let assessment = derived::temperature_assessment(temp_c_f64);

    let precip_mm = carry_forward(weather_source, "precipitation", prior, &["environment", "precipitation_raw_mm"], |v| {
        opt_f(sentinel::safe_float(v))
    });
    let precip_info = derived::precipitation_info(
        precip_mm.as_ref().and_then(Value::as_f64),
        weather_code.as_ref().and_then(Value::as_i64),
    );

    let wind_speed_ms = carry_forward(weather_source, "wind_speed", prior, &["environment", "wind", "speed_in_meters_per_second"], |v| {
        opt_f(sentinel::safe_float_rounded(v, 1))
    });
    let wind_gusts = carry_forward(weather_source, "wind_gusts", prior, &["environment", "wind", "gusts_in_meters_per_second"], |v| {
        opt_f(sentinel::safe_float_rounded(v, 1))
    });
    let wind_direction_deg = carry_forward(weather_source, "wind_direction", prior, &["environment", "wind", "direction_degrees"], |v| {
        opt_f(sentinel::safe_float(v))
    });
    let wind_speed_f64 = wind_speed_ms.as_ref().and_then(Value::as_f64);
    let wind_description = derived::wind_description(wind_speed_f64);
    let wind_direction_compass =
        derived::wind_direction_compass(wind_direction_deg.as_ref().and_then(Value::as_f64));
    let wind_chill = derived::wind_chill_celsius(temp_c_f64, wind_speed_f64);

    let marine_wave_height = carry_forward(weather_source, "marine_wave_height", prior, &["environment", "marine", "wave", "height_in_meters"], |v| {
        opt_f(sentinel::safe_float_rounded(v, 2))
    });
    let marine_wave_period = carry_forward(weather_source, "marine_wave_period", prior, &["environment", "marine", "wave", "period_in_seconds"], |v| {
        opt_f(sentinel::safe_float_rounded(v, 1))
    });
    let marine_wave_direction = derived::wind_direction_compass(
        sentinel::safe_float(get(weather_source, "marine_wave_direction")),
    );
    let marine_swell_height = carry_forward(weather_source, "marine_swell_wave_height", prior, &["environment", "marine", "swell", "height_in_meters"], |v| {
        opt_f(sentinel::safe_float_rounded(v, 2))
    });
    let marine_swell_period = carry_forward(weather_source, "marine_swell_wave_period", prior, &["environment", "marine", "swell", "period_in_seconds"], |v| {
        opt_f(sentinel::safe_float_rounded(v, 1))
    });
    let marine_swell_direction = derived::wind_direction_compass(
        sentinel::safe_float(get(weather_source, "marine_swell_wave_direction")),
    );

    let us_aqi = carry_forward(weather_source, "us_aqi", prior, &["environment", "air_quality", "us_aqi"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let pm2_5 = carry_forward(weather_source, "pm2_5", prior, &["environment", "air_quality", "pm2_5"], |v| {
        opt_f(sentinel::safe_float(v))
    });
    let carbon_monoxide = carry_forward(weather_source, "carbon_monoxide", prior, &["environment", "air_quality", "carbon_monoxide"], |v| {
        opt_f(sentinel::safe_float(v))
    });
    let nitrogen_dioxide = carry_forward(weather_source, "nitrogen_dioxide", prior, &["environment", "air_quality", "nitrogen_dioxide"], |v| {
        opt_f(sentinel::safe_float(v))
    });
    let sulphur_dioxide = carry_forward(weather_source, "sulphur_dioxide", prior, &["environment", "air_quality", "sulphur_dioxide"], |v| {
        opt_f(sentinel::safe_float(v))
    });
    let ozone = carry_forward(weather_source, "ozone", prior, &["environment", "air_quality", "ozone"], |v| {
        opt_f(sentinel::safe_float(v))
    });
    let aqi_class = us_aqi.as_ref().and_then(Value::as_i64).and_then(derived::aqi_class);

    // --- weather diagnostics -------------------------------------------
    let weather_fetch_lat = input
        .weather
        .and_then(|w| sentinel::safe_float(w.get("weather_fetch_lat")))
        .or_else(|| {
            prior_path(prior, &["diagnostics", "weather", "weather_fetch_location"])
                .and_then(Value::as_str)
                .and_then(|s| s.split(',').next())
                .and_then(|s| s.trim().parse::<f64>().ok())
        });
    let weather_fetch_lon = input
        .weather
        .and_then(|w| sentinel::safe_float(w.get("weather_fetch_lon")))
        .or_else(|| {
            prior_path(prior, &["diagnostics", "weather", "weather_fetch_location"])
                .and_then(Value::as_str)
                .and_then(|s| s.split(',').nth(1))
                .and_then(|s| s.trim().parse::<f64>().ok())
        });
    let weather_fetch_ts: Option<DateTime<Utc>> = input
        .weather
        .and_then(|w| w.get("weather_fetch_ts"))
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            // §4.7(e): repopulate from the prior diagnostics.weather metadata
            // when this record carries no fresh weather_fetch_ts.
            prior_path(prior, &["diagnostics", "weather", "weather_request_timestamp_utc"])
                .and_then(Value::as_str)
                .and_then(|s| {
                    chrono::NaiveDateTime::parse_from_str(s, "%d.%m.%Y %H:%M:%S UTC").ok()
                })
                .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        });

    let distance_km = match (latitude.as_ref().and_then(Value::as_f64), longitude.as_ref().and_then(Value::as_f64), weather_fetch_lat, weather_fetch_lon) {
        (Some(lat), Some(lon), Some(wlat), Some(wlon)) => Some(derived::haversine_km(lat, lon, wlat, wlon)),
        _ => None,
    };
    let distance_str = derived::format_distance_km(distance_km);
    let weather_age_str = weather_fetch_ts.map(|fetch_ts| {
        let age = (input.event_ts - fetch_ts).num_seconds().max(0) as f64;
        derived::format_timespan_human(age)
    }).flatten();
    let weather_ts_local_str = match (weather_fetch_ts, weather_fetch_lat, weather_fetch_lon) {
        (Some(ts), Some(lat), Some(lon)) => {
            let tz = derived::resolve_timezone(lat, lon);
            Some(derived::format_local_with_offset(ts, tz))
        }
        _ => None,
    };

    let weather_diag = json!({
        "weather_fetch_location": match (weather_fetch_lat, weather_fetch_lon) {
            (Some(lat), Some(lon)) => Some(format!("{lat:.6}, {lon:.6}")),
            _ => None,
        },
        "weather_distance_from_actual_location": distance_str,
        "weather_data_old": weather_age_str,
        "weather_request_timestamp_utc": weather_fetch_ts.map(|ts| crate::freshness::format_event_ts(&ts)),
        "weather_request_timestamp_location_time": weather_ts_local_str,
    });

    // --- app settings ----------------------------------------------
    let app_settings_incoming = get(raw, "ad").cloned().unwrap_or(Value::Null);
    let prior_app_settings = prior_path(prior, &["app_settings"]).cloned().unwrap_or(json!({}));
    let app_settings = app_settings::merge_app_settings(&prior_app_settings, &app_settings_incoming);

    // --- device state / sensors -----------------------------------
    let screen_on = carry_forward(raw, "sc", prior, &["device_state", "screen_on"], |v| {
        v.and_then(Value::as_i64).map(|n| Value::from(n == 1))
    });
    let vpn_active = carry_forward(raw, "vp", prior, &["device_state", "vpn_active"], |v| {
        v.and_then(Value::as_i64).map(|n| Value::from(n == 1))
    });
    let network_metered = carry_forward(raw, "nm", prior, &["device_state", "network_metered"], |v| {
        v.and_then(Value::as_i64).map(|n| Value::from(n == 1))
    });
    let data_activity_code = carry_forward(raw, "da", prior, &["device_state", "data_activity_code"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let data_activity = data_activity_code.as_ref().and_then(Value::as_i64).map(enums::data_activity_label);
    let system_audio_code = carry_forward(raw, "au", prior, &["device_state", "system_audio_code"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let system_audio = system_audio_code.as_ref().and_then(Value::as_i64).map(enums::system_audio_label);
    let camera_active = carry_forward(raw, "ca", prior, &["device_state", "camera_active"], |v| {
        v.and_then(Value::as_i64).map(|n| Value::from(n == 1))
    });
    let flashlight_active = carry_forward(raw, "fl", prior, &["device_state", "flashlight_active"], |v| {
        v.and_then(Value::as_i64).map(|n| Value::from(n == 1))
    });
    let phone_activity_code = carry_forward(raw, "pa", prior, &["device_state", "phone_activity_code"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let phone_activity = phone_activity_code.as_ref().and_then(Value::as_i64).map(enums::phone_activity_label);

    let device_temp_c = carry_forward(raw, "dt", prior, &["sensors", "device_temperature_celsius"], |v| {
        opt_f(sentinel::safe_float_rounded(v, 1))
    });
    let ambient_light_lux = carry_forward(raw, "lx", prior, &["sensors", "ambient_light_lux"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let device_pressure_hpa = carry_forward(raw, "pr", prior, &["sensors", "device_barometer_hpa"], |v| {
        opt_f(sentinel::safe_float_rounded(v, 2))
    });
    let step_counter = carry_forward(raw, "st", prior, &["sensors", "step_counter"], |v| {
        opt_num(sentinel::safe_int(v))
    });
    let proximity_state = carry_forward(raw, "px", prior, &["sensors", "proximity_state"], |v| {
        opt_num(sentinel::safe_int(v))
    });

    // --- coordinate precision for render -----------------------------
    let coord_decimals = derived::coordinate_decimals(precision_meters);
    let rounded_lat = latitude.as_ref().and_then(Value::as_f64).map(|v| {
        let factor = 10f64.powi(coord_decimals as i32);
        Value::from((v * factor).round() / factor)
    });
    let rounded_lon = longitude.as_ref().and_then(Value::as_f64).map(|v| {
        let factor = 10f64.powi(coord_decimals as i32);
        Value::from((v * factor).round() / factor)
    });

    // --- heuristic analyses ------------------------------------------
    let prior_cellular_profile: Option<cellular_analysis::CellularProfile> =
        prior_path(prior, &["diagnostics", "profiles", "cellular"])
            .and_then(|v| v.as_str())
            .and_then(|s| serde_json::from_str(s).ok());
    let cellular_input = cellular_analysis::CellularInput {
        active_network_type: active_network.as_deref(),
        cell_type: cellular_type_label.unwrap_or("Other"),
        strength_dbm: signal_strength.as_ref().and_then(Value::as_i64).map(|v| v as f64),
        quality: cell_quality.as_ref().and_then(Value::as_i64).map(|v| v as f64),
        cell_id: cell_id.as_ref().and_then(Value::as_str),
        link_speed_mbps: upload_mbps.as_ref().and_then(Value::as_f64),
    };
    let (cellular_analysis_result, cellular_profile) =
        cellular_analysis::analyze(cellular_input, prior_cellular_profile);

    let prior_altitude_profile: Option<altitude_analysis::AltitudeProfile> =
        prior_path(prior, &["diagnostics", "profiles", "altitude"])
            .and_then(|v| v.as_str())
            .and_then(|s| serde_json::from_str(s).ok());
    let altitude_input = altitude_analysis::AltitudeInput {
        altitude_asl_meters: altitude_m.as_ref().and_then(Value::as_f64),
        ground_elevation_asl_meters: elevation_m.as_ref().and_then(Value::as_f64),
        gps_accuracy_meters: accuracy_m.as_ref().and_then(Value::as_f64),
        device_pressure_hpa: device_pressure_hpa.as_ref().and_then(Value::as_f64),
        sea_level_pressure_hpa: pressure_hpa.as_ref().and_then(Value::as_f64),
        phone_activity_stable: phone_activity == Some("Stable"),
        event_ts: Some(input.event_ts),
    };
    let (altitude_analysis_result, altitude_profile) =
        altitude_analysis::analyze(altitude_input, prior_altitude_profile);

    let device_name = carry_forward(raw, "n", prior, &["identity", "device_name"], |v| {
        opt_s(sentinel::safe_string(v))
    });

    let device_event_ts_str = crate::freshness::format_event_ts(&input.event_ts);
    let ingest_receive_ts_str = input
        .received_at
        .map(|ts| crate::freshness::format_event_ts(&ts))
        .unwrap_or_else(|| device_event_ts_str.clone());

    json!({
        "identity": {
            "device_id": input.device_id,
            "device_name": device_name,
        },
        "network": {
            "currently_used_active_network": active_network,
            "source_ip": input.source_ip,
            "wifi_bssid": wifi_bssid,
            "wifi_vendor": vendor,
            "cellular": {
                "type": cellular_type_label,
                "operator": operator,
                "signal_strength_in_dbm": signal_strength,
                "quality": cell_quality,
                "mcc": mcc,
                "mnc": mnc,
                "cell_id": cell_id,
                "tac": tac,
                "timing_advance": timing_advance,
            },
            "wifi": {
                "ssid": wifi_ssid,
                "rssi_in_dbm": wifi_rssi,
                "frequency_mhz": wifi_frequency,
                "link_speed_mbps": wifi_link_speed,
                "standard": wifi_standard,
            },
            "bandwidth": {
                "download_in_mbps": download_mbps,
                "upload_in_mbps": upload_mbps,
            },
        },
        "location": {
            "latitude": rounded_lat,
            "longitude": rounded_lon,
            "altitude_in_meters": altitude_m,
            "elevation_in_meters": elevation_m,
            "accuracy_in_meters": accuracy_m,
            "speed_in_kmh": speed_kmh,
            "geohash_precision_in_meters": precision_meters,
        },
        "power": {
            "battery_percent": battery_percent,
            "capacity_in_mah": capacity_mah,
            "calculated_leftover_capacity_in_mah": leftover_capacity_mah,
            "charging_state": charging_state,
            "power_save_enabled": power_save,
        },
        "environment": {
            "weather": {
                "description": weather_description,
                "temperature_in_celsius": temp_c,
                "feels_like_in_celsius": feels_like,
                "assessment": assessment,
                "humidity_percent": humidity,
                "pressure_in_hpa": pressure_hpa,
                "cloud_cover_percent": cloud_cover,
                "wind_chill_in_celsius": wind_chill,
            },
            "precipitation": precip_info,
            "wind": {
                "speed_in_meters_per_second": wind_speed_ms,
                "gusts_in_meters_per_second": wind_gusts,
                "description": wind_description,
                "direction": wind_direction_compass,
            },
            "marine": {
                "wave": {
                    "height_in_meters": marine_wave_height,
                    "period_in_seconds": marine_wave_period,
                    "direction": marine_wave_direction,
                },
                "swell": {
                    "height_in_meters": marine_swell_height,
                    "period_in_seconds": marine_swell_period,
                    "direction": marine_swell_direction,
                },
            },
            "air_quality": {
                "us_aqi": us_aqi,
                "class": aqi_class,
                "pm2_5": pm2_5,
                "carbon_monoxide": carbon_monoxide,
                "nitrogen_dioxide": nitrogen_dioxide,
                "sulphur_dioxide": sulphur_dioxide,
                "ozone": ozone,
            },
        },
        "device_state": {
            "screen_on": screen_on,
            "vpn_active": vpn_active,
            "network_metered": network_metered,
            "data_activity": data_activity,
            "system_audio": system_audio,
            "camera_active": camera_active,
            "flashlight_active": flashlight_active,
            "phone_activity_state": phone_activity,
        },
        "sensors": {
            "device_temperature_celsius": device_temp_c,
            "ambient_light_lux": ambient_light_lux,
            "device_barometer_hpa": device_pressure_hpa,
            "step_counter": step_counter,
            "proximity_state": proximity_state,
        },
        "app_settings": app_settings,
        "diagnostics": {
            "ingest_request_id": input.request_id,
            "ip_intelligence": input.ip_intel,
            "weather": weather_diag,
            "cellular_analysis": cellular_analysis_result,
            "altitude_analysis": altitude_analysis_result,
            "timestamps": {
                "device_event_timestamp_utc": device_event_ts_str,
                "ingest_receive_timestamp_utc": ingest_receive_ts_str,
            },
            "ingest_request_info": input.request_headers,
            "ingest_warnings": input.warnings,
            "profiles": {
                "cellular": serde_json::to_string(&cellular_profile).ok(),
                "altitude": serde_json::to_string(&altitude_profile).ok(),
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::OuiTable;

    fn ts(seconds: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(seconds, 0).unwrap()
    }

    #[test]
    fn fresh_device_absolute_timestamp_scenario() {
        let raw = json!({
            "y": "48.1", "x": "11.6", "p": 50, "c": 40, "t": 4, "r": "100",
        });
        let oui = OuiTable::with_embedded_fallback();
        let input = TransformInput {
            raw: &raw,
            prior_plain: &json!({}),
            device_id: "D",
            request_id: None,
            source_ip: None,
            request_headers: None,
            warnings: None,
            event_ts: ts(1_700_000_000),
            received_at: None,
            ip_intel: None,
            oui_table: &oui,
            weather: None,
        };
        let result = transform(input);
        assert_eq!(result["power"]["battery_percent"], json!(50));
        assert_eq!(result["power"]["capacity_in_mah"], json!(4000));
        assert_eq!(result["power"]["calculated_leftover_capacity_in_mah"], json!(2000));
        assert_eq!(result["network"]["cellular"]["type"], json!("LTE"));
        assert_eq!(result["network"]["cellular"]["signal_strength_in_dbm"], json!(-100));
        assert_eq!(result["network"]["currently_used_active_network"], json!("LTE"));
    }

    #[test]
    fn wifi_bssid_present_marks_active_network_wifi() {
        use base64::Engine;
        let encoded =
            base64::engine::general_purpose::STANDARD.encode([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        let raw = json!({"b": encoded, "t": 4});
        let oui = OuiTable::with_embedded_fallback();
        let input = TransformInput {
            raw: &raw,
            prior_plain: &json!({}),
            device_id: "D",
            request_id: None,
            source_ip: None,
            request_headers: None,
            warnings: None,
            event_ts: ts(1000),
            received_at: None,
            ip_intel: None,
            oui_table: &oui,
            weather: None,
        };
        let result = transform(input);
        assert_eq!(result["network"]["currently_used_active_network"], json!("Wi-Fi"));
        assert_eq!(result["network"]["wifi_bssid"], json!("aa:bb:cc:dd:ee:ff"));
    }

    #[test]
    fn unparseable_bssid_drops_prior_leaf() {
        let raw = json!({"b": "!!!not-base64!!!"});
        let prior = json!({"network": {"wifi_bssid": "aa:bb:cc:dd:ee:ff"}});
        let oui = OuiTable::with_embedded_fallback();
        let input = TransformInput {
            raw: &raw,
            prior_plain: &prior,
            device_id: "D",
            request_id: None,
            source_ip: None,
            request_headers: None,
            warnings: None,
            event_ts: ts(1000),
            received_at: None,
            ip_intel: None,
            oui_table: &oui,
            weather: None,
        };
        let result = transform(input);
        assert!(result["network"]["wifi_bssid"].is_null());
    }

    #[test]
    fn missing_bssid_inherits_from_prior() {
        let raw = json!({"p": 10});
        let prior = json!({"network": {"wifi_bssid": "aa:bb:cc:dd:ee:ff"}});
        let oui = OuiTable::with_embedded_fallback();
        let input = TransformInput {
            raw: &raw,
            prior_plain: &prior,
            device_id: "D",
            request_id: None,
            source_ip: None,
            request_headers: None,
            warnings: None,
            event_ts: ts(1000),
            received_at: None,
            ip_intel: None,
            oui_table: &oui,
            weather: None,
        };
        let result = transform(input);
        assert_eq!(result["network"]["wifi_bssid"], json!("aa:bb:cc:dd:ee:ff"));
    }
}
