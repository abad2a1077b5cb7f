//! Twitch clip resolver (Helix API).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::store::{ClipData, Platform};
use crate::token::SharedCredentials;

use super::{ClipResolver, ResolveError, ResolveResult};

/// Resolves `clips.twitch.tv/<slug>` and `twitch.tv/<channel>/clip/<slug>`
/// URLs via the Helix clips endpoint, authenticated with the bot credential.
pub struct TwitchResolver {
    http: reqwest::Client,
    api_url: String,
    client_id: String,
    credentials: Arc<SharedCredentials>,
}

#[derive(Deserialize)]
struct HelixResponse {
    data: Vec<HelixClip>,
}

#[derive(Deserialize)]
struct HelixClip {
    id: String,
    url: String,
    embed_url: String,
    broadcaster_name: String,
    creator_name: String,
    game_id: String,
    title: String,
    created_at: DateTime<Utc>,
    thumbnail_url: String,
    duration: f64,
}

impl TwitchResolver {
    pub fn new(
        http: reqwest::Client,
        api_url: impl Into<String>,
        client_id: impl Into<String>,
        credentials: Arc<SharedCredentials>,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into(),
            client_id: client_id.into(),
            credentials,
        }
    }

    /// Derives a direct MP4 URL from the clip thumbnail, when the thumbnail
    /// follows the `-preview-WxH.jpg` convention.
    fn video_url_from_thumbnail(thumbnail: &str) -> Option<String> {
        let idx = thumbnail.find("-preview-")?;
        Some(format!("{}.mp4", &thumbnail[..idx]))
    }
}

#[async_trait]
impl ClipResolver for TwitchResolver {
    fn platform(&self) -> Platform {
        Platform::Twitch
    }

    fn detect(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?;
        let mut segments = url.path_segments()?.filter(|s| !s.is_empty());

        match host {
            "clips.twitch.tv" => {
                let slug = segments.next()?;
                // The embed player path carries the slug in a query param
                // and is not a clip link.
                if slug == "embed" {
                    return None;
                }
                Some(slug.to_string())
            }
            "twitch.tv" | "www.twitch.tv" | "m.twitch.tv" => {
                let _channel = segments.next()?;
                if segments.next()? != "clip" {
                    return None;
                }
                Some(segments.next()?.to_string())
            }
            _ => None,
        }
    }

    async fn resolve(&self, clip_id: &str) -> ResolveResult<ClipData> {
        let token = self.credentials.access_token();
        let response = self
            .http
            .get(format!("{}/clips", self.api_url))
            .query(&[("id", clip_id)])
            .header("Client-Id", &self.client_id)
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Upstream(status.as_u16()));
        }

        let payload: HelixResponse = response
            .json()
            .await
            .map_err(|e| ResolveError::Payload(e.to_string()))?;
        let clip = payload.data.into_iter().next().ok_or(ResolveError::NotFound)?;

        let video_url = Self::video_url_from_thumbnail(&clip.thumbnail_url);
        let content_type = video_url.as_ref().map(|_| "video/mp4".to_string());
        Ok(ClipData {
            platform: Platform::Twitch,
            clip_id: clip.id,
            url: clip.url,
            embed_url: clip.embed_url,
            video_url,
            thumbnail_url: Some(clip.thumbnail_url),
            title: clip.title,
            channel: clip.broadcaster_name,
            creator: clip.creator_name,
            category: (!clip.game_id.is_empty()).then_some(clip.game_id),
            duration: Some(clip.duration),
            content_type,
            created_at: Some(clip.created_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> TwitchResolver {
        TwitchResolver::new(
            reqwest::Client::new(),
            "https://api.twitch.tv/helix",
            "clientid",
            Arc::new(SharedCredentials::new("token".into(), None)),
        )
    }

    fn detect(raw: &str) -> Option<String> {
        resolver().detect(&Url::parse(raw).unwrap())
    }

    #[test]
    fn detects_clips_subdomain_urls() {
        assert_eq!(
            detect("https://clips.twitch.tv/AwkwardCoolOtter-1"),
            Some("AwkwardCoolOtter-1".into())
        );
    }

    #[test]
    fn detects_channel_clip_urls() {
        assert_eq!(
            detect("https://www.twitch.tv/somechannel/clip/BraveOtter-2?filter=clips"),
            Some("BraveOtter-2".into())
        );
        assert_eq!(
            detect("https://twitch.tv/somechannel/clip/BraveOtter-2"),
            Some("BraveOtter-2".into())
        );
    }

    #[test]
    fn rejects_non_clip_twitch_urls() {
        assert_eq!(detect("https://www.twitch.tv/somechannel"), None);
        assert_eq!(detect("https://www.twitch.tv/somechannel/videos"), None);
        assert_eq!(detect("https://clips.twitch.tv/embed?clip=X"), None);
    }

    #[test]
    fn rejects_lookalike_hosts() {
        // Hostname matching is structural; a path containing the real host
        // must not fool the classifier.
        assert_eq!(detect("https://evil.example.com/clips.twitch.tv/Abc"), None);
        assert_eq!(detect("https://notclips.twitch.tv.evil.com/Abc"), None);
    }

    #[test]
    fn derives_video_url_from_preview_thumbnail() {
        assert_eq!(
            TwitchResolver::video_url_from_thumbnail(
                "https://clips-media.tv/AT-cm%7C123-preview-480x272.jpg"
            ),
            Some("https://clips-media.tv/AT-cm%7C123.mp4".into())
        );
        assert_eq!(
            TwitchResolver::video_url_from_thumbnail("https://clips-media.tv/plain.jpg"),
            None
        );
    }
}
