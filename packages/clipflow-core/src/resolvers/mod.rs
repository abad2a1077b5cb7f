//! Platform resolvers: URL classification and clip metadata fetch.
//!
//! Each upstream platform implements [`ClipResolver`]: a pure URL classifier
//! plus an async metadata fetch that normalizes the platform's response into
//! [`ClipData`]. Dispatch tries resolvers in a fixed order (Kick, Sora,
//! Twitch). Classification is structural - URLs are parsed and matched on
//! hostnames, never on substrings.

mod kick;
mod sora;
mod twitch;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::store::{ClipData, Platform};

pub use kick::KickResolver;
pub use sora::SoraResolver;
pub use twitch::TwitchResolver;

/// Errors raised while classifying or resolving a clip URL.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The URL does not parse or does not belong to the platform.
    #[error("invalid clip url")]
    InvalidUrl,

    /// The platform has no clip for this id.
    #[error("clip not found upstream")]
    NotFound,

    /// Upstream returned an error status.
    #[error("upstream returned HTTP {0}")]
    Upstream(u16),

    /// The per-attempt timeout elapsed.
    #[error("upstream request timed out")]
    Timeout,

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Upstream payload did not match the expected shape.
    #[error("unexpected upstream payload: {0}")]
    Payload(String),
}

impl ResolveError {
    /// Whether retrying the request may succeed.
    ///
    /// Recoverable: network errors, timeouts, HTTP 5xx and 429.
    /// Non-recoverable: invalid URLs and other 4xx responses.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout => true,
            Self::Upstream(status) => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Whether the failure was an upstream rate limit.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::Upstream(429))
    }
}

impl From<reqwest::Error> for ResolveError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err.to_string())
        }
    }
}

pub type ResolveResult<T> = Result<T, ResolveError>;

/// One platform's URL classifier and metadata fetcher.
#[async_trait]
pub trait ClipResolver: Send + Sync {
    /// The platform this resolver serves.
    fn platform(&self) -> Platform;

    /// Pure URL classifier: returns the platform-side clip id, or `None`
    /// when the URL does not belong to this platform.
    fn detect(&self, url: &Url) -> Option<String>;

    /// Fetches and normalizes clip metadata for a previously detected id.
    async fn resolve(&self, clip_id: &str) -> ResolveResult<ClipData>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Retry policy
// ─────────────────────────────────────────────────────────────────────────────

/// Per-attempt timeouts; a slow upstream gets progressively more patience.
const ATTEMPT_TIMEOUTS: [Duration; 3] = [
    Duration::from_secs(10),
    Duration::from_secs(20),
    Duration::from_secs(30),
];

/// Backoff before each attempt.
const ATTEMPT_DELAYS: [Duration; 3] = [
    Duration::ZERO,
    Duration::from_secs(1),
    Duration::from_secs(2),
];

/// Executes a metadata fetch with per-attempt timeouts and exponential
/// backoff. Non-transient errors abort immediately.
pub(crate) async fn with_retry<F, Fut>(action: &str, mut operation: F) -> ResolveResult<ClipData>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ResolveResult<ClipData>>,
{
    let mut last_error = None;
    for (attempt, (&timeout, &delay)) in ATTEMPT_TIMEOUTS
        .iter()
        .zip(ATTEMPT_DELAYS.iter())
        .enumerate()
    {
        if !delay.is_zero() {
            log::info!(
                "[Resolver] Retrying {} (attempt {}/{}) after {}ms",
                action,
                attempt + 1,
                ATTEMPT_TIMEOUTS.len(),
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }

        let outcome = match tokio::time::timeout(timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Timeout),
        };

        match outcome {
            Ok(clip) => return Ok(clip),
            Err(e) if e.is_transient() => {
                log::warn!("[Resolver] {} transient error: {}", action, e);
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or(ResolveError::Timeout))
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed-order resolver dispatch.
pub struct ResolverSet {
    resolvers: Vec<Box<dyn ClipResolver>>,
}

impl ResolverSet {
    pub fn new(resolvers: Vec<Box<dyn ClipResolver>>) -> Self {
        Self { resolvers }
    }

    /// Classifies a raw URL string. Returns the owning platform and the
    /// platform-side clip id, or `None` when no resolver claims it.
    pub fn detect(&self, raw_url: &str) -> Option<(Platform, String)> {
        let url = Url::parse(raw_url).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        self.resolvers
            .iter()
            .find_map(|r| r.detect(&url).map(|id| (r.platform(), id)))
    }

    /// Resolves a detected clip with the retry policy applied.
    pub async fn resolve(&self, platform: Platform, clip_id: &str) -> ResolveResult<ClipData> {
        let resolver = self
            .resolvers
            .iter()
            .find(|r| r.platform() == platform)
            .ok_or(ResolveError::InvalidUrl)?;
        with_retry(platform.tag(), || resolver.resolve(clip_id)).await
    }
}

/// Extracts the first URL-looking token from a chat message, if any.
pub fn extract_url(text: &str) -> Option<&str> {
    text.split_whitespace()
        .find(|token| token.starts_with("https://") || token.starts_with("http://"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ResolveError::Timeout.is_transient());
        assert!(ResolveError::Network("reset".into()).is_transient());
        assert!(ResolveError::Upstream(500).is_transient());
        assert!(ResolveError::Upstream(429).is_transient());
        assert!(!ResolveError::Upstream(404).is_transient());
        assert!(!ResolveError::InvalidUrl.is_transient());
    }

    #[test]
    fn rate_limit_detection() {
        assert!(ResolveError::Upstream(429).is_rate_limit());
        assert!(!ResolveError::Upstream(503).is_rate_limit());
    }

    #[test]
    fn extract_url_finds_first_link() {
        assert_eq!(
            extract_url("check this https://clips.twitch.tv/Abc out"),
            Some("https://clips.twitch.tv/Abc")
        );
        assert_eq!(extract_url("no links here"), None);
    }

    #[tokio::test]
    async fn retry_aborts_on_non_transient_error() {
        let mut calls = 0;
        let result = with_retry("test", || {
            calls += 1;
            async { Err::<ClipData, _>(ResolveError::NotFound) }
        })
        .await;
        assert!(matches!(result, Err(ResolveError::NotFound)));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhausts_transient_errors() {
        let mut calls = 0;
        let result = with_retry("test", || {
            calls += 1;
            async { Err::<ClipData, _>(ResolveError::Upstream(503)) }
        })
        .await;
        assert!(matches!(result, Err(ResolveError::Upstream(503))));
        assert_eq!(calls, 3);
    }
}
