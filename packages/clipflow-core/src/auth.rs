//! Viewer authentication and channel role resolution.
//!
//! Principals are derived from the cookie bearer token: the token is
//! validated upstream, the user record fetched, and the channel role
//! (broadcaster / moderator) looked up against the configured channel.
//! Both steps are cached - principals for 5 minutes per token, roles for
//! 2 minutes per (user, channel) - and swept periodically.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderMap};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, ApiResult};
use crate::guards::TtlCache;
use crate::token::SharedCredentials;

/// Principal cache TTL (per token).
const TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

/// Role cache TTL (per user + channel).
const ROLE_TTL: Duration = Duration::from_secs(2 * 60);

/// An authenticated viewer with resolved channel roles.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub user_id: String,
    pub username: String,
    pub display_name: String,
    pub profile_image_url: String,
    pub is_broadcaster: bool,
    pub is_moderator: bool,
}

impl Principal {
    /// Moderator or broadcaster.
    pub fn is_privileged(&self) -> bool {
        self.is_broadcaster || self.is_moderator
    }
}

/// Entry counts for the cache admin endpoint.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCacheStats {
    pub token_entries: usize,
    pub role_entries: usize,
}

#[derive(Deserialize)]
struct ValidateResponse {
    user_id: String,
    login: String,
}

#[derive(Deserialize)]
struct UsersResponse {
    data: Vec<HelixUser>,
}

#[derive(Deserialize)]
struct HelixUser {
    id: String,
    login: String,
    display_name: String,
    #[serde(default)]
    profile_image_url: String,
}

#[derive(Deserialize)]
struct ModeratorsResponse {
    data: Vec<ModeratorEntry>,
}

#[derive(Deserialize)]
struct ModeratorEntry {
    user_id: String,
}

/// Resolves and caches viewer principals.
pub struct AuthService {
    http: reqwest::Client,
    id_url: String,
    api_url: String,
    client_id: String,
    channel_login: String,
    /// Bot credential used for the broadcaster-scoped moderator lookup.
    credentials: Arc<SharedCredentials>,
    /// Broadcaster user id, resolved lazily from the channel login.
    broadcaster_id: RwLock<Option<String>>,
    token_cache: TtlCache<String, Principal>,
    role_cache: TtlCache<String, (bool, bool)>,
}

impl AuthService {
    pub fn new(
        http: reqwest::Client,
        api_url: impl Into<String>,
        client_id: impl Into<String>,
        channel_login: impl Into<String>,
        credentials: Arc<SharedCredentials>,
    ) -> Self {
        Self {
            http,
            id_url: "https://id.twitch.tv/oauth2".into(),
            api_url: api_url.into(),
            client_id: client_id.into(),
            channel_login: channel_login.into(),
            credentials,
            broadcaster_id: RwLock::new(None),
            token_cache: TtlCache::new(TOKEN_TTL),
            role_cache: TtlCache::new(ROLE_TTL),
        }
    }

    /// Resolves a principal from a bearer token, using caches where warm.
    pub async fn resolve(&self, token: &str) -> ApiResult<Principal> {
        if let Some(principal) = self.token_cache.get(&token.to_string()) {
            return Ok(principal);
        }

        let (user_id, login) = self.validate_viewer_token(token).await?;
        let user = self.fetch_user(token, &user_id).await?;
        let (is_broadcaster, is_moderator) = self.resolve_role(&user_id).await?;

        let principal = Principal {
            user_id,
            username: login,
            display_name: user.display_name,
            profile_image_url: user.profile_image_url,
            is_broadcaster,
            is_moderator,
        };
        self.token_cache.insert(token.to_string(), principal.clone());
        Ok(principal)
    }

    async fn validate_viewer_token(&self, token: &str) -> ApiResult<(String, String)> {
        let response = self
            .http
            .get(format!("{}/validate", self.id_url))
            .header("Authorization", format!("OAuth {token}"))
            .send()
            .await
            .map_err(|e| ApiError::Internal(format!("token validation failed: {e}")))?;

        if response.status().as_u16() == 401 {
            return Err(ApiError::NotAuthenticated("token rejected upstream".into()));
        }
        if !response.status().is_success() {
            return Err(ApiError::Internal(format!(
                "token validation returned HTTP {}",
                response.status()
            )));
        }

        let body: ValidateResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Internal(format!("token validation payload: {e}")))?;
        Ok((body.user_id, body.login))
    }

    async fn fetch_user(&self, token: &str, user_id: &str) -> ApiResult<HelixUser> {
        let response = self
            .http
            .get(format!("{}/users", self.api_url))
            .query(&[("id", user_id)])
            .header("Client-Id", &self.client_id)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ApiError::Internal(format!("user lookup failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ApiError::Internal(format!(
                "user lookup returned HTTP {}",
                response.status()
            )));
        }

        let body: UsersResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Internal(format!("user lookup payload: {e}")))?;
        body.data
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::NotAuthenticated("user record not found".into()))
    }

    /// Broadcaster / moderator flags for a user, cached per (user, channel).
    async fn resolve_role(&self, user_id: &str) -> ApiResult<(bool, bool)> {
        let cache_key = format!("{user_id}:{}", self.channel_login);
        if let Some(role) = self.role_cache.get(&cache_key) {
            return Ok(role);
        }

        let broadcaster_id = self.broadcaster_id().await?;
        let is_broadcaster = user_id == broadcaster_id;
        let is_moderator = if is_broadcaster {
            false
        } else {
            self.is_channel_moderator(&broadcaster_id, user_id).await?
        };

        let role = (is_broadcaster, is_moderator);
        self.role_cache.insert(cache_key, role);
        Ok(role)
    }

    /// The configured channel's broadcaster id, fetched once via the bot
    /// credential and cached for the process lifetime.
    async fn broadcaster_id(&self) -> ApiResult<String> {
        if let Some(id) = self.broadcaster_id.read().clone() {
            return Ok(id);
        }

        let response = self
            .http
            .get(format!("{}/users", self.api_url))
            .query(&[("login", self.channel_login.as_str())])
            .header("Client-Id", &self.client_id)
            .bearer_auth(self.credentials.access_token())
            .send()
            .await
            .map_err(|e| ApiError::Internal(format!("broadcaster lookup failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ApiError::Internal(format!(
                "broadcaster lookup returned HTTP {}",
                response.status()
            )));
        }

        let body: UsersResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Internal(format!("broadcaster lookup payload: {e}")))?;
        let user = body.data.into_iter().next().ok_or_else(|| {
            ApiError::Internal(format!("channel {} not found", self.channel_login))
        })?;
        debug_assert_eq!(user.login, self.channel_login);

        *self.broadcaster_id.write() = Some(user.id.clone());
        Ok(user.id)
    }

    async fn is_channel_moderator(
        &self,
        broadcaster_id: &str,
        user_id: &str,
    ) -> ApiResult<bool> {
        let response = self
            .http
            .get(format!("{}/moderation/moderators", self.api_url))
            .query(&[("broadcaster_id", broadcaster_id), ("user_id", user_id)])
            .header("Client-Id", &self.client_id)
            .bearer_auth(self.credentials.access_token())
            .send()
            .await
            .map_err(|e| ApiError::Internal(format!("moderator lookup failed: {e}")))?;

        if !response.status().is_success() {
            return Err(ApiError::Internal(format!(
                "moderator lookup returned HTTP {}",
                response.status()
            )));
        }

        let body: ModeratorsResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Internal(format!("moderator lookup payload: {e}")))?;
        Ok(body.data.iter().any(|m| m.user_id == user_id))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Cache administration
    // ─────────────────────────────────────────────────────────────────────────

    pub fn stats(&self) -> AuthCacheStats {
        AuthCacheStats {
            token_entries: self.token_cache.len(),
            role_entries: self.role_cache.len(),
        }
    }

    /// Drops one token's cached principal (logout).
    pub fn clear_token(&self, token: &str) {
        self.token_cache.remove(&token.to_string());
    }

    /// Drops one user's cached role.
    pub fn clear_role(&self, user_id: &str) {
        self.role_cache
            .remove(&format!("{user_id}:{}", self.channel_login));
    }

    /// Drops every cached principal and role.
    pub fn clear_all(&self) {
        self.token_cache.clear();
        self.role_cache.clear();
    }

    /// Sweeps expired entries from both caches.
    pub fn cleanup(&self) {
        self.token_cache.cleanup();
        self.role_cache.cleanup();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Cookie extraction
// ─────────────────────────────────────────────────────────────────────────────

/// Extracts the bearer token from the `Cookie` header.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for cookie in cookie_header.split(';') {
        if let Some(value) = cookie.trim().strip_prefix("token=") {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Fails with 403 unless the principal is moderator or broadcaster.
pub fn require_moderator(principal: &Principal) -> ApiResult<()> {
    if principal.is_privileged() {
        Ok(())
    } else {
        Err(ApiError::Forbidden("moderator role required".into()))
    }
}

/// Fails with 403 unless the principal is the broadcaster.
pub fn require_broadcaster(principal: &Principal) -> ApiResult<()> {
    if principal.is_broadcaster {
        Ok(())
    } else {
        Err(ApiError::Forbidden("broadcaster role required".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn principal(is_broadcaster: bool, is_moderator: bool) -> Principal {
        Principal {
            user_id: "1".into(),
            username: "alice".into(),
            display_name: "Alice".into(),
            profile_image_url: String::new(),
            is_broadcaster,
            is_moderator,
        }
    }

    #[test]
    fn token_extracted_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; token=abc123; lang=en"),
        );
        assert_eq!(token_from_headers(&headers), Some("abc123".into()));
    }

    #[test]
    fn missing_or_empty_token_yields_none() {
        let mut headers = HeaderMap::new();
        assert_eq!(token_from_headers(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("token="));
        assert_eq!(token_from_headers(&headers), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("other=value"));
        assert_eq!(token_from_headers(&headers), None);
    }

    #[test]
    fn moderator_gate_accepts_privileged_roles() {
        assert!(require_moderator(&principal(false, true)).is_ok());
        assert!(require_moderator(&principal(true, false)).is_ok());
        assert!(require_moderator(&principal(false, false)).is_err());
    }

    #[test]
    fn broadcaster_gate_rejects_moderators() {
        assert!(require_broadcaster(&principal(true, false)).is_ok());
        assert!(require_broadcaster(&principal(false, true)).is_err());
    }

    #[test]
    fn cache_admin_operations() {
        let service = AuthService::new(
            reqwest::Client::new(),
            "https://api.twitch.tv/helix",
            "clientid",
            "somechannel",
            Arc::new(SharedCredentials::new("token".into(), None)),
        );

        service.token_cache.insert("t1".into(), principal(false, false));
        service.role_cache.insert("1:somechannel".into(), (false, true));
        let stats = service.stats();
        assert_eq!(stats.token_entries, 1);
        assert_eq!(stats.role_entries, 1);

        service.clear_token("t1");
        service.clear_role("1");
        let stats = service.stats();
        assert_eq!(stats.token_entries, 0);
        assert_eq!(stats.role_entries, 0);

        service.token_cache.insert("t2".into(), principal(false, false));
        service.clear_all();
        assert_eq!(service.stats().token_entries, 0);
    }
}
