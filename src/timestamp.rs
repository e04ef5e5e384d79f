//! Event-timestamp reconstruction (C6): mixed absolute (`ts`) / relative
//! (`to`) batch entries resolved against a per-device cached base, with an
//! ingest-receive fallback for entries that carry neither.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy)]
struct CachedBase {
    base_ts: DateTime<Utc>,
    cached_at: DateTime<Utc>,
}

/// Per-device batch-base timestamp cache (TTL 6h, invalidated whenever a
/// record falls back to its ingest-receive timestamp).
pub struct BatchBaseCache {
    ttl: chrono::Duration,
    entries: Mutex<HashMap<String, CachedBase>>,
}

impl BatchBaseCache {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            ttl: chrono::Duration::seconds(ttl_seconds),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, device_id: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let entries = self.entries.lock().unwrap();
        let cached = entries.get(device_id)?;
        if now - cached.cached_at > self.ttl {
            None
        } else {
            Some(cached.base_ts)
        }
    }

    pub fn set(&self, device_id: &str, base_ts: DateTime<Utc>, now: DateTime<Utc>) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            device_id.to_string(),
            CachedBase {
                base_ts,
                cached_at: now,
            },
        );
    }

    pub fn invalidate(&self, device_id: &str) {
        self.entries.lock().unwrap().remove(device_id);
    }
}

/// Raw timing fields a record may carry, decoded from the compact payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawTiming {
    pub absolute_seconds: Option<i64>,
    pub offset_seconds: Option<i64>,
}

/// Resolves a record's event timestamp per §4.6:
/// - `ts` present -> use it, refresh the batch base.
/// - else `to` present and a cached base exists -> base + to.
/// - else an ingest-receive timestamp is available -> use it, invalidate the base.
/// - else -> `None` (caller skips the record).
pub fn reconstruct_event_timestamp(
    device_id: &str,
    timing: RawTiming,
    ingest_received_at: Option<DateTime<Utc>>,
    cache: &BatchBaseCache,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if let Some(seconds) = timing.absolute_seconds {
        let ts = DateTime::<Utc>::from_timestamp(seconds, 0)?;
        cache.set(device_id, ts, now);
        return Some(ts);
    }

    if let Some(offset) = timing.offset_seconds {
        if let Some(base) = cache.get(device_id, now) {
            return Some(base + chrono::Duration::seconds(offset));
        }
    }

    if let Some(received_at) = ingest_received_at {
        cache.invalidate(device_id);
        return Some(received_at);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(2_000_000, 0).unwrap()
    }

    #[test]
    fn absolute_timestamp_sets_cache_base() {
        let cache = BatchBaseCache::new(6 * 3600);
        let timing = RawTiming {
            absolute_seconds: Some(1_700_000_000),
            offset_seconds: None,
        };
        let ts = reconstruct_event_timestamp("D", timing, None, &cache, now()).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_000);
        assert_eq!(cache.get("D", now()), Some(ts));
    }

    #[test]
    fn relative_offset_without_base_is_skipped() {
        let cache = BatchBaseCache::new(6 * 3600);
        let timing = RawTiming {
            absolute_seconds: None,
            offset_seconds: Some(30),
        };
        assert!(reconstruct_event_timestamp("D2", timing, None, &cache, now()).is_none());
    }

    #[test]
    fn relative_offset_with_base_adds_seconds() {
        let cache = BatchBaseCache::new(6 * 3600);
        cache.set("D", DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(), now());
        let timing = RawTiming {
            absolute_seconds: None,
            offset_seconds: Some(30),
        };
        let ts = reconstruct_event_timestamp("D", timing, None, &cache, now()).unwrap();
        assert_eq!(ts.timestamp(), 1_700_000_030);
    }

    #[test]
    fn ingest_receive_fallback_invalidates_base() {
        let cache = BatchBaseCache::new(6 * 3600);
        cache.set("D", DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(), now());
        let received = DateTime::<Utc>::from_timestamp(1_800_000_000, 0).unwrap();
        let ts = reconstruct_event_timestamp("D", RawTiming::default(), Some(received), &cache, now())
            .unwrap();
        assert_eq!(ts, received);
        assert_eq!(cache.get("D", now()), None);
    }

    #[test]
    fn expired_base_is_not_used() {
        let cache = BatchBaseCache::new(10);
        let base_time = DateTime::<Utc>::from_timestamp(1_000, 0).unwrap();
        cache.set("D", DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap(), base_time);
        let later = base_time + chrono::Duration::seconds(20);
        let timing = RawTiming {
            absolute_seconds: None,
            offset_seconds: Some(5),
        };
        assert!(reconstruct_event_timestamp("D", timing, None, &cache, later).is_none());
    }
}
