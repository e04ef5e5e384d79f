//! One-shot startup fetch of the IEEE OUI registry, used to refresh the
//! vendor-lookup table beyond its embedded fallback. Runs before the HTTP
//! server starts accepting traffic, not as a ticking background service.

use anyhow::{Context, Result};

use crate::decode::OuiTable;
use crate::persistence::EventStore;

const OUI_REGISTRY_URL: &str = "https://standards-oui.ieee.org/oui/oui.txt";

/// Loads the persisted vendor table, falling back to the embedded table
/// and optionally fetching a fresh copy from the IEEE registry when
/// `fetch_enabled` is set and nothing has been persisted yet.
pub async fn load(
    http: &reqwest::Client,
    event_store: &EventStore,
    fetch_enabled: bool,
) -> Result<OuiTable> {
    let persisted = event_store
        .all_oui_vendors()
        .await
        .context("loading persisted oui vendors")?;

    if !persisted.is_empty() {
        let mut table = OuiTable::with_embedded_fallback();
        for (oui, vendor) in persisted {
            table.insert(oui, vendor);
        }
        return Ok(table);
    }

    if fetch_enabled {
        match fetch_registry(http).await {
            Ok(vendors) if !vendors.is_empty() => {
                event_store
                    .replace_oui_vendors(vendors.clone())
                    .await
                    .context("persisting fetched oui vendors")?;
                let mut table = OuiTable::with_embedded_fallback();
                for (oui, vendor) in vendors {
                    table.insert(oui, vendor);
                }
                return Ok(table);
            }
            Ok(_) => tracing::warn!("oui registry fetch returned no usable entries"),
            Err(err) => tracing::warn!("oui registry fetch failed: {err:#}"),
        }
    }

    Ok(OuiTable::with_embedded_fallback())
}

async fn fetch_registry(http: &reqwest::Client) -> Result<Vec<(String, String)>> {
    let body = http
        .get(OUI_REGISTRY_URL)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    Ok(parse_registry(&body))
}

/// Parses lines of the form `AC-DE-48   (hex)\t\tPrivate` into
/// `(prefix, vendor)` pairs. Ignores base16/base8 variant lines and
/// anything that doesn't match the `(hex)` marker.
fn parse_registry(body: &str) -> Vec<(String, String)> {
    let mut vendors = Vec::new();
    for line in body.lines() {
        let Some((prefix_part, rest)) = line.split_once("(hex)") else {
            continue;
        };
        let prefix: String = prefix_part
            .trim()
            .chars()
            .filter(|c| *c != '-')
            .collect::<String>()
            .to_uppercase();
        if prefix.len() != 6 {
            continue;
        }
        let vendor = rest.trim();
        if vendor.is_empty() {
            continue;
        }
        vendors.push((prefix, vendor.to_string()));
    }
    vendors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_registry_extracts_hex_prefix_and_vendor() {
        let body = "AC-DE-48   (hex)\t\tPrivate\n0050C2     (base 16)\t\tIEEE REGISTRATION AUTHORITY\n";
        let vendors = parse_registry(body);
        assert_eq!(vendors, vec![("ACDE48".to_string(), "Private".to_string())]);
    }

    #[test]
    fn parse_registry_skips_lines_without_hex_marker() {
        let body = "not a registry line\n";
        assert!(parse_registry(body).is_empty());
    }
}
