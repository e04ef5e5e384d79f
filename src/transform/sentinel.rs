//! Sentinel-aware scalar extraction. The compact wire format signals
//! "no value" with type-specific sentinels rather than a consistent null:
//! numeric parse failure, `-1` for RSSI, `0` for a handful of
//! quantity fields that are never legitimately zero. A concrete per-field
//! table resolves the ambiguity `spec.md` left open (see SPEC_FULL.md §12).

use serde_json::{Map, Value};

pub fn safe_int(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    }
}

pub fn safe_float(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

pub fn safe_float_rounded(value: Option<&Value>, precision: u32) -> Option<f64> {
    let v = safe_float(value)?;
    let factor = 10f64.powi(precision as i32);
    Some((v * factor).round() / factor)
}

pub fn safe_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// RSSI (`r`) is sent as a positive magnitude and negated; `-1` is its
/// absent sentinel (no signal reading taken this cycle).
pub fn signal_strength_dbm(value: Option<&Value>) -> Option<i64> {
    let raw = safe_int(value)?;
    if raw == -1 {
        None
    } else {
        Some(-raw.abs())
    }
}

/// Battery capacity (`c`) arrives in hundreds of mAh; `0` means "not
/// reported" since a real device never reports zero capacity.
pub fn capacity_mah(value: Option<&Value>) -> Option<i64> {
    let raw = safe_int(value)?;
    if raw == 0 {
        None
    } else {
        Some(raw * 100)
    }
}

pub fn cleanup_empty(value: &Value) -> Value {
    match value {
        Value::Object(obj) => {
            let mut cleaned = Map::new();
            for (key, v) in obj {
                let cleaned_v = cleanup_empty(v);
                if is_meaningful(&cleaned_v) {
                    cleaned.insert(key.clone(), cleaned_v);
                }
            }
            Value::Object(cleaned)
        }
        Value::Array(arr) => {
            let cleaned: Vec<Value> = arr
                .iter()
                .map(cleanup_empty)
                .filter(is_meaningful)
                .collect();
            Value::Array(cleaned)
        }
        other => other.clone(),
    }
}

fn is_meaningful(value: &Value) -> bool {
    !matches!(value, Value::Null)
        && !matches!(value, Value::String(s) if s.is_empty())
        && !matches!(value, Value::Array(a) if a.is_empty())
        && !matches!(value, Value::Object(o) if o.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signal_strength_negates_and_treats_minus_one_as_absent() {
        let v = json!(100);
        assert_eq!(signal_strength_dbm(Some(&v)), Some(-100));
        let absent = json!(-1);
        assert_eq!(signal_strength_dbm(Some(&absent)), None);
    }

    #[test]
    fn capacity_scales_by_hundred_and_zero_is_absent() {
        assert_eq!(capacity_mah(Some(&json!(40))), Some(4000));
        assert_eq!(capacity_mah(Some(&json!(0))), None);
    }

    #[test]
    fn cleanup_empty_drops_null_and_empty_containers() {
        let v = json!({"a": 1, "b": null, "c": {}, "d": [], "e": ""});
        assert_eq!(cleanup_empty(&v), json!({"a": 1}));
    }

    #[test]
    fn safe_int_parses_numeric_strings() {
        assert_eq!(safe_int(Some(&json!("48"))), Some(48));
        assert_eq!(safe_int(Some(&json!("not-a-number"))), None);
    }
}
