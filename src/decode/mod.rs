//! Compact-wire-format decoders: geohash, base62 cell id, base64 BSSID,
//! and MAC OUI-prefix vendor lookup.

mod oui;

pub use oui::{vendor_for_mac, OuiTable};

const BASE62_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Decoded geohash: latitude, longitude, and the precision (meters) implied
/// by the geohash string length.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeohashResult {
    pub latitude: f64,
    pub longitude: f64,
    pub precision_meters: u64,
}

fn precision_meters_for_len(len: usize) -> u64 {
    match len {
        1 => 5_000_000,
        2 => 1_250_000,
        3 => 156_000,
        4 => 39_000,
        5 => 4_900,
        6 => 1_200,
        7 => 152,
        8 => 38,
        9..=12 => 5,
        _ => 5_000_000,
    }
}

const GEOHASH_ALPHABET: &[u8] = b"0123456789bcdefghjkmnpqrstuvwxyz";

/// Decodes a standard (base32) geohash string into (lat, lon, precision).
/// Returns `None` for an empty string, characters outside the geohash
/// alphabet, or a length beyond what the precision table covers usefully.
pub fn decode_geohash(value: &str) -> Option<GeohashResult> {
    if value.is_empty() || value.len() > 12 {
        return None;
    }

    let mut lat_range = (-90.0_f64, 90.0_f64);
    let mut lon_range = (-180.0_f64, 180.0_f64);
    let mut is_lon = true;

    for ch in value.chars() {
        let ch = ch.to_ascii_lowercase();
        let idx = GEOHASH_ALPHABET.iter().position(|&c| c == ch as u8)?;
        for bit in (0..5).rev() {
            let bit_set = (idx >> bit) & 1 == 1;
            let range = if is_lon { &mut lon_range } else { &mut lat_range };
            let mid = (range.0 + range.1) / 2.0;
            if bit_set {
                range.0 = mid;
            } else {
                range.1 = mid;
            }
            is_lon = !is_lon;
        }
    }

    Some(GeohashResult {
        latitude: (lat_range.0 + lat_range.1) / 2.0,
        longitude: (lon_range.0 + lon_range.1) / 2.0,
        precision_meters: precision_meters_for_len(value.len()),
    })
}

/// Decodes a base62 digit string (big-endian, alphabet `0-9A-Za-z`) into an
/// unsigned integer. Returns `None` on empty input or an out-of-alphabet
/// character.
pub fn decode_base62(value: &str) -> Option<u64> {
    if value.is_empty() {
        return None;
    }
    let mut num: u64 = 0;
    for ch in value.bytes() {
        let digit = BASE62_ALPHABET.iter().position(|&c| c == ch)? as u64;
        num = num.checked_mul(62)?.checked_add(digit)?;
    }
    Some(num)
}

/// Decodes a base64-encoded 6-byte MAC address (auto-repairing missing
/// padding) into lowercase colon-separated hex. Anything that doesn't
/// decode to exactly 6 bytes is `None`.
pub fn decode_bssid_base64(value: &str) -> Option<String> {
    use base64::Engine;
    if value.is_empty() {
        return None;
    }
    let pad = (4 - value.len() % 4) % 4;
    let mut padded = value.to_string();
    padded.push_str(&"=".repeat(pad));
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(padded.as_bytes())
        .ok()?;
    if bytes.len() != 6 {
        return None;
    }
    Some(
        bytes
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geohash_decodes_known_point() {
        // "u4pruydqqvj" ~ (57.64911, 10.40744), a commonly cited reference point.
        let result = decode_geohash("u4pruydqqvj").unwrap();
        assert!((result.latitude - 57.649).abs() < 0.01);
        assert!((result.longitude - 10.407).abs() < 0.01);
    }

    #[test]
    fn geohash_precision_table_by_length() {
        assert_eq!(precision_meters_for_len(1), 5_000_000);
        assert_eq!(precision_meters_for_len(6), 1_200);
        assert_eq!(precision_meters_for_len(12), 5);
    }

    #[test]
    fn geohash_rejects_invalid_alphabet() {
        // 'a', 'i', 'l', 'o' are excluded from the geohash base32 alphabet.
        assert!(decode_geohash("ai").is_none());
    }

    #[test]
    fn base62_roundtrip_small() {
        assert_eq!(decode_base62("0"), Some(0));
        assert_eq!(decode_base62("10"), Some(62));
        assert_eq!(decode_base62("Z"), Some(35));
        assert_eq!(decode_base62(""), None);
        assert_eq!(decode_base62("!!"), None);
    }

    #[test]
    fn bssid_decodes_six_bytes_with_padding_repair() {
        // base64("ABCDEF") with trailing '=' stripped, as a device might send it.
        let encoded = {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD.encode([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF])
        };
        let stripped = encoded.trim_end_matches('=').to_string();
        assert_eq!(
            decode_bssid_base64(&stripped),
            Some("aa:bb:cc:dd:ee:ff".to_string())
        );
    }

    #[test]
    fn bssid_rejects_wrong_length() {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode([0x01, 0x02]);
        assert_eq!(decode_bssid_base64(&encoded), None);
    }
}
