//! Heuristic altitude analysis (supplemented per SPEC_FULL.md §11):
//! barometric altitude fused with GPS, a rolling dynamic ground-level
//! estimate, and a floor-change estimate anchored to a periodically
//! refreshed ground-reference pressure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const PROFILE_HISTORY_LENGTH: usize = 30;
const FLOOR_HEIGHT_METERS: f64 = 3.0;
const REFERENCE_PRESSURE_EXPIRATION_SECONDS: i64 = 2 * 3600;
const BARO_ALTITUDE_CONSTANT: f64 = 44330.0;
const BARO_ALTITUDE_EXPONENT: f64 = 1.0 / 5.255;
const GPS_ERROR_MARGIN_FOR_GROUND_LOCK_METERS: f64 = 50.0;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AltitudeProfile {
    surface_altitude_history: VecDeque<f64>,
    ground_reference_pressure_hpa: Option<f64>,
    last_ground_reference_ts: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct AltitudeAnalysis {
    pub altitude_above_ground_level_meters: Option<f64>,
    pub height_above_surface_meters: Option<f64>,
    pub relative_altitude_change_meters: Option<f64>,
    pub estimated_floor: Option<i64>,
    pub altitude_source: &'static str,
}

pub struct AltitudeInput {
    pub altitude_asl_meters: Option<f64>,
    pub ground_elevation_asl_meters: Option<f64>,
    pub gps_accuracy_meters: Option<f64>,
    pub device_pressure_hpa: Option<f64>,
    pub sea_level_pressure_hpa: Option<f64>,
    pub phone_activity_stable: bool,
    pub event_ts: Option<DateTime<Utc>>,
}

fn barometer_altitude(device_pressure: f64, sea_level_pressure: f64) -> Option<f64> {
    if device_pressure <= 0.0 || sea_level_pressure <= 0.0 {
        return None;
    }
    let ratio = device_pressure / sea_level_pressure;
    Some(BARO_ALTITUDE_CONSTANT * (1.0 - ratio.powf(BARO_ALTITUDE_EXPONENT)))
}

pub fn analyze(input: AltitudeInput, profile: Option<AltitudeProfile>) -> (AltitudeAnalysis, AltitudeProfile) {
    let mut profile = profile.unwrap_or_default();
    let mut analysis = AltitudeAnalysis {
        altitude_source: "Unknown",
        ..Default::default()
    };

    let baro_altitude_asl = match (input.device_pressure_hpa, input.sea_level_pressure_hpa) {
        (Some(dp), Some(sp)) => barometer_altitude(dp, sp),
        _ => None,
    };

    let (reliable_altitude_asl, source) = match (baro_altitude_asl, input.altitude_asl_meters) {
        (Some(baro), _) => (Some(baro), "Barometer-Only"),
        (None, Some(gps)) => (Some(gps), "GPS+Baro (Fused)"),
        (None, None) => (None, "Unknown"),
    };
    analysis.altitude_source = source;

    if let (Some(reliable), Some(ground)) = (reliable_altitude_asl, input.ground_elevation_asl_meters) {
        analysis.altitude_above_ground_level_meters = Some(((reliable - ground) * 10.0).round() / 10.0);
    }

    let blended_surface_altitude = match (input.gps_accuracy_meters, input.altitude_asl_meters) {
        (Some(accuracy), Some(gps)) if accuracy < 75.0 => Some(gps),
        _ => baro_altitude_asl,
    };

    if let Some(value) = blended_surface_altitude {
        if profile.surface_altitude_history.len() >= PROFILE_HISTORY_LENGTH {
            profile.surface_altitude_history.pop_front();
        }
        profile.surface_altitude_history.push_back(value);
    }

    if !profile.surface_altitude_history.is_empty() {
        let dynamic_surface_altitude = profile.surface_altitude_history.iter().sum::<f64>()
            / profile.surface_altitude_history.len() as f64;
        if let Some(blended) = blended_surface_altitude {
            analysis.height_above_surface_meters =
                Some(((blended - dynamic_surface_altitude) * 10.0).round() / 10.0);
        }
    }

    let is_grounded_heuristic = matches!(
        (input.altitude_asl_meters, input.ground_elevation_asl_meters),
        (Some(asl), Some(ground)) if (asl - ground).abs() < GPS_ERROR_MARGIN_FOR_GROUND_LOCK_METERS
    );

    if input.phone_activity_stable && is_grounded_heuristic {
        if let Some(pressure) = input.device_pressure_hpa {
            profile.ground_reference_pressure_hpa = Some(pressure);
            profile.last_ground_reference_ts = input.event_ts;
        }
    }

    if let (Some(ref_pressure), Some(ref_ts), Some(event_ts)) = (
        profile.ground_reference_pressure_hpa,
        profile.last_ground_reference_ts,
        input.event_ts,
    ) {
        if (event_ts - ref_ts).num_seconds() > REFERENCE_PRESSURE_EXPIRATION_SECONDS {
            profile.ground_reference_pressure_hpa = None;
            profile.last_ground_reference_ts = None;
        }
        let _ = ref_pressure;
    }

    if let (Some(ref_pressure), Some(device_pressure)) =
        (profile.ground_reference_pressure_hpa, input.device_pressure_hpa)
    {
        let pressure_delta = ref_pressure - device_pressure;
        let relative_height = pressure_delta * 8.3;
        analysis.relative_altitude_change_meters = Some((relative_height * 10.0).round() / 10.0);
        analysis.estimated_floor = Some(if relative_height.abs() > 1.5 {
            (relative_height / FLOOR_HEIGHT_METERS).round() as i64
        } else {
            0
        });
    }

    (analysis, profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(seconds: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(seconds, 0).unwrap()
    }

    #[test]
    fn barometer_altitude_prefers_baro_when_available() {
        let input = AltitudeInput {
            altitude_asl_meters: Some(500.0),
            ground_elevation_asl_meters: Some(480.0),
            gps_accuracy_meters: Some(10.0),
            device_pressure_hpa: Some(950.0),
            sea_level_pressure_hpa: Some(1013.0),
            phone_activity_stable: false,
            event_ts: Some(ts(1000)),
        };
        let (analysis, _) = analyze(input, None);
        assert_eq!(analysis.altitude_source, "Barometer-Only");
        assert!(analysis.altitude_above_ground_level_meters.is_some());
    }

    #[test]
    fn ground_reference_locks_when_stable_and_grounded() {
        let grounded = AltitudeInput {
            altitude_asl_meters: Some(100.0),
            ground_elevation_asl_meters: Some(100.0),
            gps_accuracy_meters: Some(10.0),
            device_pressure_hpa: Some(1000.0),
            sea_level_pressure_hpa: None,
            phone_activity_stable: true,
            event_ts: Some(ts(1000)),
        };
        let (_, profile) = analyze(grounded, None);
        assert_eq!(profile.ground_reference_pressure_hpa, Some(1000.0));

        let later = AltitudeInput {
            altitude_asl_meters: Some(110.0),
            ground_elevation_asl_meters: Some(100.0),
            gps_accuracy_meters: Some(10.0),
            device_pressure_hpa: Some(990.0),
            sea_level_pressure_hpa: None,
            phone_activity_stable: false,
            event_ts: Some(ts(1500)),
        };
        let (analysis, _) = analyze(later, Some(profile));
        assert!(analysis.relative_altitude_change_meters.is_some());
        assert!(analysis.estimated_floor.is_some());
    }

    #[test]
    fn reference_pressure_expires_after_two_hours() {
        let grounded = AltitudeInput {
            altitude_asl_meters: Some(100.0),
            ground_elevation_asl_meters: Some(100.0),
            gps_accuracy_meters: Some(10.0),
            device_pressure_hpa: Some(1000.0),
            sea_level_pressure_hpa: None,
            phone_activity_stable: true,
            event_ts: Some(ts(0)),
        };
        let (_, profile) = analyze(grounded, None);

        let much_later = AltitudeInput {
            altitude_asl_meters: None,
            ground_elevation_asl_meters: None,
            gps_accuracy_meters: None,
            device_pressure_hpa: Some(990.0),
            sea_level_pressure_hpa: None,
            phone_activity_stable: false,
            event_ts: Some(ts(3 * 3600)),
        };
        let (analysis, profile2) = analyze(much_later, Some(profile));
        assert!(profile2.ground_reference_pressure_hpa.is_none());
        assert!(analysis.relative_altitude_change_meters.is_none());
    }
}
