//! Kick clip resolver.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::store::{ClipData, Platform};

use super::{ClipResolver, ResolveError, ResolveResult};

/// Resolves `kick.com/<channel>/clips/<id>` and `kick.com/<channel>?clip=<id>`
/// URLs via Kick's public clip API. No authentication required.
pub struct KickResolver {
    http: reqwest::Client,
    api_url: String,
}

#[derive(Deserialize)]
struct KickResponse {
    clip: KickClip,
}

#[derive(Deserialize)]
struct KickClip {
    id: String,
    title: String,
    clip_url: Option<String>,
    thumbnail_url: Option<String>,
    video_url: Option<String>,
    duration: Option<f64>,
    created_at: Option<DateTime<Utc>>,
    channel: KickChannel,
    creator: Option<KickChannel>,
    category: Option<KickCategory>,
}

#[derive(Deserialize)]
struct KickChannel {
    username: String,
}

#[derive(Deserialize)]
struct KickCategory {
    name: String,
}

impl KickResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            api_url: "https://kick.com/api/v2".into(),
        }
    }

    #[cfg(test)]
    fn with_api_url(http: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            http,
            api_url: api_url.into(),
        }
    }
}

#[async_trait]
impl ClipResolver for KickResolver {
    fn platform(&self) -> Platform {
        Platform::Kick
    }

    fn detect(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?;
        if host != "kick.com" && host != "www.kick.com" {
            return None;
        }

        // Share links carry the clip id in a query parameter.
        if let Some((_, id)) = url.query_pairs().find(|(key, _)| key == "clip") {
            if !id.is_empty() {
                return Some(id.into_owned());
            }
        }

        let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
        let _channel = segments.next()?;
        if segments.next()? != "clips" {
            return None;
        }
        Some(segments.next()?.to_string())
    }

    async fn resolve(&self, clip_id: &str) -> ResolveResult<ClipData> {
        let response = self
            .http
            .get(format!("{}/clips/{clip_id}", self.api_url))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(ResolveError::NotFound);
        }
        if !status.is_success() {
            return Err(ResolveError::Upstream(status.as_u16()));
        }

        let payload: KickResponse = response
            .json()
            .await
            .map_err(|e| ResolveError::Payload(e.to_string()))?;
        let clip = payload.clip;

        let channel = clip.channel.username;
        let url = clip
            .clip_url
            .unwrap_or_else(|| format!("https://kick.com/{channel}/clips/{}", clip.id));
        Ok(ClipData {
            platform: Platform::Kick,
            clip_id: clip.id,
            embed_url: url.clone(),
            url,
            video_url: clip.video_url.clone(),
            thumbnail_url: clip.thumbnail_url,
            title: clip.title,
            creator: clip
                .creator
                .map(|c| c.username)
                .unwrap_or_else(|| channel.clone()),
            channel,
            category: clip.category.map(|c| c.name),
            duration: clip.duration,
            content_type: clip.video_url.map(|_| "video/mp4".to_string()),
            created_at: clip.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(raw: &str) -> Option<String> {
        KickResolver::new(reqwest::Client::new()).detect(&Url::parse(raw).unwrap())
    }

    #[test]
    fn detects_clip_path_urls() {
        assert_eq!(
            detect("https://kick.com/somechannel/clips/clip_01ABCDEF"),
            Some("clip_01ABCDEF".into())
        );
    }

    #[test]
    fn detects_clip_query_urls() {
        assert_eq!(
            detect("https://kick.com/somechannel?clip=clip_01ABCDEF"),
            Some("clip_01ABCDEF".into())
        );
    }

    #[test]
    fn rejects_non_clip_kick_urls() {
        assert_eq!(detect("https://kick.com/somechannel"), None);
        assert_eq!(detect("https://kick.com/somechannel/videos/123"), None);
    }

    #[test]
    fn rejects_other_hosts() {
        assert_eq!(detect("https://kick.example.com/chan/clips/clip_1"), None);
    }

    #[test]
    fn with_api_url_overrides_base() {
        let resolver =
            KickResolver::with_api_url(reqwest::Client::new(), "http://127.0.0.1:9/api/v2");
        assert_eq!(resolver.api_url, "http://127.0.0.1:9/api/v2");
    }
}
