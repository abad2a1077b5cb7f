//! Sora post resolver.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::store::{ClipData, Platform};

use super::{ClipResolver, ResolveError, ResolveResult};

/// Resolves `sora.chatgpt.com/p/<id>` post URLs via the public post
/// metadata endpoint.
pub struct SoraResolver {
    http: reqwest::Client,
    api_url: String,
}

#[derive(Deserialize)]
struct SoraPost {
    id: String,
    #[serde(default)]
    title: Option<String>,
    author: SoraAuthor,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    thumbnail_url: Option<String>,
    #[serde(default)]
    duration_secs: Option<f64>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct SoraAuthor {
    username: String,
}

impl SoraResolver {
    pub fn new(http: reqwest::Client) -> Self {
        Self {
            http,
            api_url: "https://sora.chatgpt.com/backend/project_y/post".into(),
        }
    }
}

#[async_trait]
impl ClipResolver for SoraResolver {
    fn platform(&self) -> Platform {
        Platform::Sora
    }

    fn detect(&self, url: &Url) -> Option<String> {
        let host = url.host_str()?;
        if host != "sora.chatgpt.com" {
            return None;
        }
        let mut segments = url.path_segments()?.filter(|s| !s.is_empty());
        if segments.next()? != "p" {
            return None;
        }
        Some(segments.next()?.to_string())
    }

    async fn resolve(&self, clip_id: &str) -> ResolveResult<ClipData> {
        let response = self
            .http
            .get(format!("{}/{clip_id}", self.api_url))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(ResolveError::NotFound);
        }
        if !status.is_success() {
            return Err(ResolveError::Upstream(status.as_u16()));
        }

        let post: SoraPost = response
            .json()
            .await
            .map_err(|e| ResolveError::Payload(e.to_string()))?;

        let canonical = format!("https://sora.chatgpt.com/p/{}", post.id);
        Ok(ClipData {
            platform: Platform::Sora,
            clip_id: post.id,
            url: canonical.clone(),
            embed_url: canonical,
            content_type: post.video_url.as_ref().map(|_| "video/mp4".to_string()),
            video_url: post.video_url,
            thumbnail_url: post.thumbnail_url,
            title: post
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Sora post".into()),
            channel: post.author.username.clone(),
            creator: post.author.username,
            category: None,
            duration: post.duration_secs,
            created_at: post.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detect(raw: &str) -> Option<String> {
        SoraResolver::new(reqwest::Client::new()).detect(&Url::parse(raw).unwrap())
    }

    #[test]
    fn detects_post_urls() {
        assert_eq!(
            detect("https://sora.chatgpt.com/p/post_abc123"),
            Some("post_abc123".into())
        );
    }

    #[test]
    fn rejects_non_post_paths() {
        assert_eq!(detect("https://sora.chatgpt.com/explore"), None);
        assert_eq!(detect("https://sora.chatgpt.com/"), None);
    }

    #[test]
    fn rejects_other_hosts() {
        assert_eq!(detect("https://chatgpt.com/p/post_abc123"), None);
    }
}
