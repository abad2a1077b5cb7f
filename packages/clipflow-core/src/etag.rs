//! Change detection for the polling API.
//!
//! Produces a deterministic SHA-256 fingerprint over the visible queue state
//! so many clients can synchronize with cheap conditional GETs. The
//! fingerprint is cached until a mutation invalidates it; the next request
//! recomputes.

use parking_lot::RwLock;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::store::{Clip, PlayLogEntry, Settings};

/// Deterministic projection of the state that clients can observe.
///
/// Field order matters: serde serializes structs in declaration order, which
/// makes the JSON encoding (and therefore the hash) stable.
#[derive(Serialize)]
struct Projection<'a> {
    current: Option<(&'a str, usize)>,
    queue: Vec<(&'a str, usize)>,
    history: Vec<(i64, &'a str, String)>,
    is_open: bool,
    settings: &'a Settings,
}

/// Computes the hex-encoded SHA-256 fingerprint of the visible state.
pub fn fingerprint(
    current: Option<&Clip>,
    queue: &[Clip],
    history: &[PlayLogEntry],
    is_open: bool,
    settings: &Settings,
) -> String {
    let projection = Projection {
        current: current.map(|c| (c.uuid.as_str(), c.submitters.len())),
        queue: queue
            .iter()
            .map(|c| (c.uuid.as_str(), c.submitters.len()))
            .collect(),
        history: history
            .iter()
            .map(|e| (e.id, e.clip.uuid.as_str(), e.played_at.to_rfc3339()))
            .collect(),
        is_open,
        settings,
    };

    // Projection is plain data; serialization cannot fail.
    let encoded = serde_json::to_vec(&projection).expect("projection serializes");
    let digest = Sha256::digest(&encoded);
    let mut hex = String::with_capacity(64);
    for byte in digest {
        use std::fmt::Write;
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Cached fingerprint with explicit invalidation.
#[derive(Default)]
pub struct EtagCache {
    cached: RwLock<Option<String>>,
}

impl EtagCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached fingerprint, computing it via `compute` on a miss.
    pub fn get_or_compute<F>(&self, compute: F) -> String
    where
        F: FnOnce() -> String,
    {
        if let Some(cached) = self.cached.read().clone() {
            return cached;
        }
        let fresh = compute();
        *self.cached.write() = Some(fresh.clone());
        fresh
    }

    /// Drops the cached fingerprint. Called after every completed mutation,
    /// never mid-transition, so a reader observing a new fingerprint sees
    /// the full state change on its next fetch.
    pub fn invalidate(&self) {
        *self.cached.write() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ClipData, ClipStatus, Platform};
    use chrono::Utc;

    fn clip(id: &str, submitters: &[&str]) -> Clip {
        let data = ClipData {
            platform: Platform::Twitch,
            clip_id: id.into(),
            url: format!("https://clips.twitch.tv/{id}"),
            embed_url: format!("https://clips.twitch.tv/embed?clip={id}"),
            video_url: None,
            thumbnail_url: None,
            title: "T".into(),
            channel: "c".into(),
            creator: "creator".into(),
            category: None,
            duration: None,
            content_type: None,
            created_at: None,
        };
        Clip {
            uuid: data.uuid(),
            data,
            submitters: submitters.iter().map(|s| s.to_string()).collect(),
            status: ClipStatus::Approved,
            submitted_at: Utc::now(),
            played_at: None,
        }
    }

    #[test]
    fn fingerprint_is_64_hex_chars() {
        let settings = Settings::default();
        let hash = fingerprint(None, &[], &[], true, &settings);
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn identical_state_yields_identical_fingerprint() {
        let settings = Settings::default();
        let queue = vec![clip("a", &["u1"])];
        let first = fingerprint(None, &queue, &[], true, &settings);
        let second = fingerprint(None, &queue, &[], true, &settings);
        assert_eq!(first, second);
    }

    #[test]
    fn submitter_count_changes_the_fingerprint() {
        let settings = Settings::default();
        let before = vec![clip("a", &["u1"])];
        let after = vec![clip("a", &["u1", "u2"])];
        assert_ne!(
            fingerprint(None, &before, &[], true, &settings),
            fingerprint(None, &after, &[], true, &settings)
        );
    }

    #[test]
    fn open_flag_changes_the_fingerprint() {
        let settings = Settings::default();
        assert_ne!(
            fingerprint(None, &[], &[], true, &settings),
            fingerprint(None, &[], &[], false, &settings)
        );
    }

    #[test]
    fn cache_returns_same_value_until_invalidated() {
        let cache = EtagCache::new();
        let first = cache.get_or_compute(|| "h1".into());
        let second = cache.get_or_compute(|| "h2".into());
        assert_eq!(first, "h1");
        assert_eq!(second, "h1");

        cache.invalidate();
        let third = cache.get_or_compute(|| "h3".into());
        assert_eq!(third, "h3");
    }
}
