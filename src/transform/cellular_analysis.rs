//! Heuristic cellular-connection-quality analysis (supplemented per
//! SPEC_FULL.md §11): a per-device rolling profile of signal
//! strength/quality feeding a derated throughput prediction and a coarse
//! connection-state classification. Only meaningful for active LTE
//! records; every other network type returns an all-`None` analysis.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const PROFILE_HISTORY_LENGTH: usize = 20;
const VOLATILITY_SAMPLES: usize = 10;
const CRITICAL_THROUGHPUT_MBPS: f64 = 0.5;
const CELL_EDGE_STRENGTH_DBM: f64 = -115.0;
const CELL_EDGE_EFFECTIVE_LINK_SPEED_CAP_MBPS: f64 = 4.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct MetricSample {
    strength: f64,
    quality: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CellularProfile {
    last_cell_id: Option<String>,
    metric_history: VecDeque<MetricSample>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct CellularAnalysis {
    pub predicted_upload_throughput_mbps: Option<f64>,
    pub connection_state: Option<&'static str>,
    pub prediction_source: Option<&'static str>,
    pub effective_link_speed_mbps: Option<f64>,
    pub quality_derating_factor: Option<f64>,
    pub strength_derating_factor: Option<f64>,
    pub volatility_index: Option<f64>,
}

pub struct CellularInput<'a> {
    pub active_network_type: Option<&'a str>,
    pub cell_type: &'a str,
    pub strength_dbm: Option<f64>,
    pub quality: Option<f64>,
    pub cell_id: Option<&'a str>,
    pub link_speed_mbps: Option<f64>,
}

fn quality_derating_factor(abs_quality: f64, cell_type: &str) -> f64 {
    if cell_type == "NR(5G)" {
        if abs_quality > 20.0 {
            0.90
        } else if abs_quality > 10.0 {
            0.70
        } else if abs_quality > 0.0 {
            0.45
        } else {
            0.20
        }
    } else if abs_quality < 10.0 {
        0.90
    } else if abs_quality < 15.0 {
        0.60
    } else if abs_quality < 20.0 {
        0.25
    } else {
        0.10
    }
}

fn strength_derating_factor(strength: f64) -> f64 {
    if strength > -95.0 {
        0.95
    } else if strength > -105.0 {
        0.80
    } else if strength > -115.0 {
        0.60
    } else {
        0.30
    }
}

fn volatility_metrics(history: &[MetricSample]) -> (f64, f64) {
    if history.len() < 3 {
        return (0.0, 1.0);
    }
    let strengths: Vec<f64> = history.iter().map(|s| s.strength).collect();
    let mean = strengths.iter().sum::<f64>() / strengths.len() as f64;
    if mean == 0.0 {
        return (0.0, 1.0);
    }
    let variance = strengths.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (strengths.len() - 1) as f64;
    let std_dev = variance.sqrt();
    let cov = std_dev / mean.abs();
    let volatility_index = (cov / 0.05 * 100.0).min(100.0);
    let derating_factor = 1.0 - (0.25 * (volatility_index / 100.0));
    ((volatility_index * 10.0).round() / 10.0, derating_factor)
}

pub fn analyze(input: CellularInput, profile: Option<CellularProfile>) -> (CellularAnalysis, CellularProfile) {
    let mut profile = profile.unwrap_or_default();
    let mut analysis = CellularAnalysis::default();

    if input.active_network_type != Some("LTE") {
        return (analysis, profile);
    }

    analysis.prediction_source = Some("Heuristic (Link Speed Based)");
    analysis.connection_state = Some("Unknown");

    if let (Some(strength), Some(quality)) = (input.strength_dbm, input.quality) {
        if profile.metric_history.len() >= PROFILE_HISTORY_LENGTH {
            profile.metric_history.pop_front();
        }
        profile.metric_history.push_back(MetricSample { strength, quality });
    }

    let recent: Vec<MetricSample> = profile
        .metric_history
        .iter()
        .rev()
        .take(VOLATILITY_SAMPLES)
        .rev()
        .copied()
        .collect();
    let (volatility_index, volatility_factor) = volatility_metrics(&recent);
    analysis.volatility_index = Some(volatility_index);

    let mut predicted_speed = None;
    if let (Some(link_speed), Some(strength), Some(quality)) =
        (input.link_speed_mbps, input.strength_dbm, input.quality)
    {
        let q_factor = quality_derating_factor(quality, input.cell_type);
        let s_factor = strength_derating_factor(strength);
        analysis.quality_derating_factor = Some((q_factor * 100.0).round() / 100.0);
        analysis.strength_derating_factor = Some((s_factor * 100.0).round() / 100.0);

        let effective_link_speed = if strength < CELL_EDGE_STRENGTH_DBM {
            link_speed.min(CELL_EDGE_EFFECTIVE_LINK_SPEED_CAP_MBPS)
        } else {
            link_speed
        };
        analysis.effective_link_speed_mbps = Some((effective_link_speed * 10.0).round() / 10.0);

        let predicted = (effective_link_speed * q_factor * s_factor * volatility_factor).max(0.0);
        let predicted = (predicted * 10.0).round() / 10.0;
        analysis.predicted_upload_throughput_mbps = Some(predicted);
        predicted_speed = Some(predicted);
    }

    let handoff = match (input.cell_id, &profile.last_cell_id) {
        (Some(current), Some(last)) => current != last,
        _ => false,
    };

    analysis.connection_state = Some(if handoff {
        "Handoff"
    } else {
        match predicted_speed {
            None => "Unknown",
            Some(speed) if speed < CRITICAL_THROUGHPUT_MBPS => "Critical",
            Some(speed) if input.link_speed_mbps.map(|l| speed < l * 0.3).unwrap_or(false) => "Limited",
            _ if volatility_index > 50.0 => "Unstable",
            _ => "Stable",
        }
    });

    if let Some(cell_id) = input.cell_id {
        profile.last_cell_id = Some(cell_id.to_string());
    }

    (analysis, profile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_lte_network_returns_empty_analysis() {
        let input = CellularInput {
            active_network_type: Some("Wi-Fi"),
            cell_type: "Other",
            strength_dbm: None,
            quality: None,
            cell_id: None,
            link_speed_mbps: None,
        };
        let (analysis, _) = analyze(input, None);
        assert!(analysis.connection_state.is_none());
    }

    #[test]
    fn strong_lte_signal_reports_stable() {
        let input = CellularInput {
            active_network_type: Some("LTE"),
            cell_type: "LTE",
            strength_dbm: Some(-80.0),
            quality: Some(5.0),
            cell_id: Some("123"),
            link_speed_mbps: Some(20.0),
        };
        let (analysis, profile) = analyze(input, None);
        assert_eq!(analysis.connection_state, Some("Stable"));
        assert_eq!(profile.last_cell_id.as_deref(), Some("123"));
    }

    #[test]
    fn cell_id_change_reports_handoff() {
        let first = CellularInput {
            active_network_type: Some("LTE"),
            cell_type: "LTE",
            strength_dbm: Some(-80.0),
            quality: Some(5.0),
            cell_id: Some("123"),
            link_speed_mbps: Some(20.0),
        };
        let (_, profile) = analyze(first, None);
        let second = CellularInput {
            active_network_type: Some("LTE"),
            cell_type: "LTE",
            strength_dbm: Some(-80.0),
            quality: Some(5.0),
            cell_id: Some("456"),
            link_speed_mbps: Some(20.0),
        };
        let (analysis, _) = analyze(second, Some(profile));
        assert_eq!(analysis.connection_state, Some("Handoff"));
    }

    #[test]
    fn weak_signal_reports_critical() {
        let input = CellularInput {
            active_network_type: Some("LTE"),
            cell_type: "LTE",
            strength_dbm: Some(-120.0),
            quality: Some(25.0),
            cell_id: Some("1"),
            link_speed_mbps: Some(1.0),
        };
        let (analysis, _) = analyze(input, None);
        assert_eq!(analysis.connection_state, Some("Critical"));
    }
}
