//! Derived-field computations that don't come directly off the wire: unit
//! assessments, compass directions, wind chill, AQI classing, coordinate
//! rounding precision, distance/age strings, and timezone-of-location.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

pub const WEATHER_CODE_DESCRIPTIONS: &[(i64, &str)] = &[
    (0, "Clear"),
    (1, "Mainly Clear"),
    (2, "Partly Cloudy"),
    (3, "Overcast"),
    (45, "Fog"),
    (48, "Rime Fog"),
    (51, "Light Drizzle"),
    (53, "Drizzle"),
    (55, "Dense Drizzle"),
    (61, "Slight Rain"),
    (63, "Rain"),
    (65, "Heavy Rain"),
    (71, "Slight Snow"),
    (73, "Snow"),
    (75, "Heavy Snow"),
    (80, "Slight Showers"),
    (81, "Showers"),
    (82, "Violent Showers"),
    (85, "Slight Snow Showers"),
    (86, "Heavy Snow Showers"),
    (95, "Thunderstorm"),
];

pub fn weather_code_description(code: Option<i64>) -> Option<&'static str> {
    code.and_then(|c| WEATHER_CODE_DESCRIPTIONS.iter().find(|(k, _)| *k == c).map(|(_, v)| *v))
}

pub fn temperature_assessment(temp_c: Option<f64>) -> Option<&'static str> {
    let temp = temp_c?;
    Some(if temp < 0.0 {
        "Freezing"
    } else if temp < 10.0 {
        "Cold"
    } else if temp < 20.0 {
        "Cool"
    } else if temp < 25.0 {
        "Mild"
    } else if temp < 30.0 {
        "Warm"
    } else {
        "Hot"
    })
}

pub fn wind_description(speed_ms: Option<f64>) -> Option<&'static str> {
    let speed = speed_ms?;
    Some(if speed < 0.3 {
        "Calm"
    } else if speed < 1.6 {
        "Light air"
    } else if speed < 3.4 {
        "Light breeze"
    } else if speed < 5.5 {
        "Gentle breeze"
    } else if speed < 8.0 {
        "Moderate breeze"
    } else if speed < 10.8 {
        "Fresh breeze"
    } else if speed < 13.9 {
        "Strong breeze"
    } else {
        "High wind"
    })
}

const COMPASS_POINTS: [&str; 16] = [
    "N", "NNE", "NE", "ENE", "E", "ESE", "SE", "SSE", "S", "SSW", "SW", "WSW", "W", "WNW", "NW",
    "NNW",
];

pub fn wind_direction_compass(degrees: Option<f64>) -> Option<&'static str> {
    let degrees = degrees?;
    let idx = ((degrees / 22.5) + 0.5) as i64;
    let idx = idx.rem_euclid(16) as usize;
    Some(COMPASS_POINTS[idx])
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PrecipitationInfo {
    pub summary: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub intensity: String,
}

pub fn precipitation_info(precip_mm: Option<f64>, code: Option<i64>) -> PrecipitationInfo {
    let desc = weather_code_description(code).unwrap_or("").to_lowercase();
    let precip_type = [("drizzle", "Drizzle"), ("rain", "Rain"), ("snow", "Snow"), ("showers", "Showers")]
        .iter()
        .find(|(needle, _)| desc.contains(needle))
        .map(|(_, label)| *label)
        .unwrap_or("Unknown");

    match precip_mm {
        None => PrecipitationInfo {
            summary: "No precipitation in the last hour.".to_string(),
            kind: "None".to_string(),
            intensity: "None".to_string(),
        },
        Some(mm) if mm == 0.0 => PrecipitationInfo {
            summary: "No precipitation in the last hour.".to_string(),
            kind: "None".to_string(),
            intensity: "None".to_string(),
        },
        Some(mm) => {
            let intensity = if mm < 0.5 {
                "Light"
            } else if mm < 4.0 {
                "Moderate"
            } else {
                "Heavy"
            };
            PrecipitationInfo {
                summary: format!("{intensity} {} in the last hour.", precip_type.to_lowercase()),
                kind: precip_type.to_string(),
                intensity: intensity.to_string(),
            }
        }
    }
}

/// Wind chill (Environment Canada formula), valid only for temp <= 10C and
/// wind speed >= 1.34 m/s (~4.8 km/h); otherwise not defined.
pub fn wind_chill_celsius(temp_c: Option<f64>, wind_speed_ms: Option<f64>) -> Option<f64> {
    let temp = temp_c?;
    let wind = wind_speed_ms?;
    if temp > 10.0 || wind < 1.34 {
        return None;
    }
    let wind_kmh = wind * 3.6;
    let v_pow = wind_kmh.powf(0.16);
    let chill = 13.12 + 0.6215 * temp - 11.37 * v_pow + 0.3965 * temp * v_pow;
    Some((chill * 10.0).round() / 10.0)
}

pub fn aqi_class(us_aqi: Option<i64>) -> Option<&'static str> {
    let aqi = us_aqi?;
    Some(if aqi <= 50 {
        "Good"
    } else if aqi <= 100 {
        "Moderate"
    } else if aqi <= 150 {
        "Unhealthy for Sensitive Groups"
    } else if aqi <= 200 {
        "Unhealthy"
    } else if aqi <= 300 {
        "Very Unhealthy"
    } else {
        "Hazardous"
    })
}

/// Decimal places to render a coordinate at, given the geohash precision
/// in meters it was decoded with.
pub fn coordinate_decimals(precision_meters: Option<u64>) -> u32 {
    match precision_meters {
        Some(m) if m <= 0 => 7,
        Some(m) if m <= 5 => 6,
        Some(m) if m <= 100 => 5,
        Some(m) if m <= 1000 => 4,
        _ => 3,
    }
}

pub fn format_distance_km(distance_km: Option<f64>) -> Option<String> {
    let distance = distance_km?;
    if !distance.is_finite() {
        return None;
    }
    let rounded = distance.round();
    if rounded < 1.0 {
        Some("Less than 1 km".to_string())
    } else {
        Some(format!("{rounded:.0} km"))
    }
}

pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let (lat1_rad, lon1_rad) = (lat1.to_radians(), lon1.to_radians());
    let (lat2_rad, lon2_rad) = (lat2.to_radians(), lon2.to_radians());
    let dlat = lat2_rad - lat1_rad;
    let dlon = lon2_rad - lon1_rad;
    let a = (dlat / 2.0).sin().powi(2) + lat1_rad.cos() * lat2_rad.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

pub fn format_timespan_human(seconds: f64) -> Option<String> {
    if seconds < 0.0 {
        return None;
    }
    let plural = |n: i64| if n != 1 { "s" } else { "" };
    if seconds < 60.0 {
        return Some("Less than a minute ago".to_string());
    }
    if seconds < 3600.0 {
        let v = (seconds / 60.0).round() as i64;
        return Some(format!("{v} minute{} ago", plural(v)));
    }
    if seconds < 86400.0 {
        let v = (seconds / 3600.0).round() as i64;
        return Some(format!("{v} hour{} ago", plural(v)));
    }
    if seconds < 86400.0 * 7.0 {
        let v = (seconds / 86400.0).round() as i64;
        return Some(format!("{v} day{} ago", plural(v)));
    }
    if seconds < 86400.0 * 30.44 {
        let v = (seconds / (86400.0 * 7.0)).round() as i64;
        return Some(format!("{v} week{} ago", plural(v)));
    }
    if seconds < 86400.0 * 365.25 {
        let v = (seconds / (86400.0 * 30.44)).round() as i64;
        return Some(format!("{v} month{} ago", plural(v)));
    }
    let years = (seconds / (86400.0 * 365.25) * 10.0).round() / 10.0;
    if years == years.trunc() {
        let v = years as i64;
        Some(format!("{v} year{} ago", plural(v)))
    } else {
        Some(format!("{years} years ago"))
    }
}

/// Coarse timezone-of-location lookup. No polygon-lookup crate is
/// available (tzf-rs / geo-tz), and `chrono-tz` gives named zones but not
/// reverse lat/lon lookup, so this buckets by a coarse table of
/// representative cities and falls back to a `round(lon/15)` fixed-offset
/// rule for anywhere the table misses.
pub fn resolve_timezone(lat: f64, lon: f64) -> Tz {
    if lat >= 89.9 || lat <= -89.9 {
        return Tz::UTC;
    }
    const ZONES: &[(f64, f64, Tz)] = &[
        (40.7, -74.0, Tz::America__New_York),
        (34.0, -118.2, Tz::America__Los_Angeles),
        (41.9, -87.6, Tz::America__Chicago),
        (51.5, -0.1, Tz::Europe__London),
        (48.1, 11.6, Tz::Europe__Berlin),
        (48.9, 2.3, Tz::Europe__Paris),
        (55.8, 37.6, Tz::Europe__Moscow),
        (35.7, 139.7, Tz::Asia__Tokyo),
        (31.2, 121.5, Tz::Asia__Shanghai),
        (19.1, 72.9, Tz::Asia__Kolkata),
        (-33.9, 151.2, Tz::Australia__Sydney),
        (-23.6, -46.6, Tz::America__Sao_Paulo),
        (30.0, 31.2, Tz::Africa__Cairo),
    ];
    let mut best: Option<(f64, Tz)> = None;
    for (zlat, zlon, tz) in ZONES {
        let d = haversine_km(lat, lon, *zlat, *zlon);
        if best.as_ref().map(|(bd, _)| d < *bd).unwrap_or(true) {
            best = Some((d, *tz));
        }
    }
    match best {
        Some((distance, tz)) if distance < 2500.0 => tz,
        _ => fixed_offset_fallback(lon),
    }
}

fn fixed_offset_fallback(lon: f64) -> Tz {
    let hours = (lon / 15.0).round() as i64;
    match hours.clamp(-12, 14) {
        -12 => Tz::Etc__GMTPlus12,
        -11 => Tz::Etc__GMTPlus11,
        -10 => Tz::Etc__GMTPlus10,
        -9 => Tz::Etc__GMTPlus9,
        -8 => Tz::Etc__GMTPlus8,
        -7 => Tz::Etc__GMTPlus7,
        -6 => Tz::Etc__GMTPlus6,
        -5 => Tz::Etc__GMTPlus5,
        -4 => Tz::Etc__GMTPlus4,
        -3 => Tz::Etc__GMTPlus3,
        -2 => Tz::Etc__GMTPlus2,
        -1 => Tz::Etc__GMTPlus1,
        0 => Tz::UTC,
        1 => Tz::Etc__GMTMinus1,
        2 => Tz::Etc__GMTMinus2,
        3 => Tz::Etc__GMTMinus3,
        4 => Tz::Etc__GMTMinus4,
        5 => Tz::Etc__GMTMinus5,
        6 => Tz::Etc__GMTMinus6,
        7 => Tz::Etc__GMTMinus7,
        8 => Tz::Etc__GMTMinus8,
        9 => Tz::Etc__GMTMinus9,
        10 => Tz::Etc__GMTMinus10,
        11 => Tz::Etc__GMTMinus11,
        12 => Tz::Etc__GMTMinus12,
        _ => Tz::Etc__GMTMinus12,
    }
}

/// Formats a UTC instant localized to `tz` as `DD.MM.YYYY HH:MM:SS UTC±H[:MM]`.
pub fn format_local_with_offset(utc: DateTime<Utc>, tz: Tz) -> String {
    let local = utc.with_timezone(&tz);
    let offset_seconds = local.offset().fix().local_minus_utc();
    let sign = if offset_seconds >= 0 { '+' } else { '-' };
    let abs_seconds = offset_seconds.unsigned_abs();
    let hours = abs_seconds / 3600;
    let minutes = (abs_seconds % 3600) / 60;
    let offset_str = if minutes == 0 {
        format!("UTC{sign}{hours}")
    } else {
        format!("UTC{sign}{hours}:{minutes:02}")
    };
    format!("{}", local.format(&format!("%d.%m.%Y %H:%M:%S {offset_str}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temperature_assessment_buckets() {
        assert_eq!(temperature_assessment(Some(-5.0)), Some("Freezing"));
        assert_eq!(temperature_assessment(Some(22.0)), Some("Mild"));
        assert_eq!(temperature_assessment(Some(35.0)), Some("Hot"));
    }

    #[test]
    fn wind_chill_requires_cold_and_windy() {
        assert_eq!(wind_chill_celsius(Some(15.0), Some(5.0)), None);
        assert_eq!(wind_chill_celsius(Some(0.0), Some(0.5)), None);
        assert!(wind_chill_celsius(Some(0.0), Some(5.0)).is_some());
    }

    #[test]
    fn aqi_class_buckets() {
        assert_eq!(aqi_class(Some(20)), Some("Good"));
        assert_eq!(aqi_class(Some(400)), Some("Hazardous"));
    }

    #[test]
    fn coordinate_decimals_by_precision() {
        assert_eq!(coordinate_decimals(Some(0)), 7);
        assert_eq!(coordinate_decimals(Some(1200)), 4);
        assert_eq!(coordinate_decimals(Some(1_000_000)), 3);
    }

    #[test]
    fn polar_latitude_falls_back_to_utc() {
        assert_eq!(resolve_timezone(90.0, 45.0), Tz::UTC);
    }

    #[test]
    fn precipitation_none_when_zero() {
        let info = precipitation_info(Some(0.0), Some(61));
        assert_eq!(info.kind, "None");
    }

    #[test]
    fn precipitation_rain_when_present() {
        let info = precipitation_info(Some(2.0), Some(63));
        assert_eq!(info.kind, "Rain");
        assert_eq!(info.intensity, "Moderate");
    }
}
