//! Bot credential lifecycle: validity monitoring, refresh-on-expiry, and
//! consumer notification.
//!
//! The manager owns the bot access token (and optional refresh token) behind
//! [`SharedCredentials`], which other components hold a reference to so a
//! refresh swaps credentials everywhere at once. Refreshed tokens are
//! persisted atomically to `tokens.json` in the data directory and survive
//! restarts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// How often the monitor re-validates the token.
const VALIDATE_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Remaining lifetime below which the monitor refreshes proactively.
const PROACTIVE_REFRESH_SECS: u64 = 2 * 60 * 60;

const TOKEN_FILE: &str = "tokens.json";

/// Errors raised by token operations.
#[derive(Debug, Error)]
pub enum TokenError {
    /// No refresh token is configured; the operator must re-run the setup
    /// tool to mint a new bot credential.
    #[error("no refresh token available - re-run the setup tool to mint a new bot credential")]
    NoRefreshToken,

    /// The authorization server rejected the refresh grant.
    #[error("token refresh rejected by authorization server")]
    RefreshRejected,

    /// Unexpected upstream status.
    #[error("token endpoint returned HTTP {0}")]
    Upstream(u16),

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),
}

impl From<reqwest::Error> for TokenError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Result of an upstream validate call.
#[derive(Debug, Clone)]
pub struct TokenValidation {
    pub is_valid: bool,
    /// Seconds until expiry; zero when invalid.
    pub expires_in: u64,
    pub user_id: String,
    pub login: String,
}

/// The bot's current credential pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotTokens {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Shared, swappable bot credentials.
///
/// Resolvers and the chat client read the access token through this handle;
/// a refresh replaces the pair in place so every consumer sees the new
/// credential on its next read.
pub struct SharedCredentials {
    tokens: RwLock<BotTokens>,
}

impl SharedCredentials {
    pub fn new(access_token: String, refresh_token: Option<String>) -> Self {
        Self {
            tokens: RwLock::new(BotTokens {
                access_token,
                refresh_token,
            }),
        }
    }

    pub fn access_token(&self) -> String {
        self.tokens.read().access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<String> {
        self.tokens.read().refresh_token.clone()
    }

    pub fn replace(&self, access_token: String, refresh_token: Option<String>) {
        *self.tokens.write() = BotTokens {
            access_token,
            refresh_token,
        };
    }

    fn snapshot(&self) -> BotTokens {
        self.tokens.read().clone()
    }
}

/// Seam for components that need a fresh token after an upstream 401.
///
/// Returns the new access token, or an error when re-authentication is not
/// possible (no refresh token, rejected grant).
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refreshed_token(&self) -> Result<String, TokenError>;
}

#[derive(Deserialize)]
struct ValidateResponse {
    expires_in: u64,
    user_id: String,
    login: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    refresh_token: Option<String>,
}

/// Owns the bot credential lifecycle.
pub struct TokenManager {
    http: reqwest::Client,
    id_url: String,
    client_id: String,
    client_secret: String,
    credentials: Arc<SharedCredentials>,
    data_dir: Option<PathBuf>,
    refresh_tx: broadcast::Sender<String>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl TokenManager {
    pub fn new(
        http: reqwest::Client,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        credentials: Arc<SharedCredentials>,
        data_dir: Option<PathBuf>,
    ) -> Self {
        let (refresh_tx, _) = broadcast::channel(8);
        Self {
            http,
            id_url: "https://id.twitch.tv/oauth2".into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            credentials,
            data_dir,
            refresh_tx,
            monitor: Mutex::new(None),
        }
    }

    pub fn access_token(&self) -> String {
        self.credentials.access_token()
    }

    pub fn credentials(&self) -> Arc<SharedCredentials> {
        Arc::clone(&self.credentials)
    }

    /// Subscribes to refresh notifications; each message is the new access
    /// token.
    pub fn subscribe_refresh(&self) -> broadcast::Receiver<String> {
        self.refresh_tx.subscribe()
    }

    /// Calls the upstream validate endpoint for the current token.
    pub async fn validate(&self) -> Result<TokenValidation, TokenError> {
        let response = self
            .http
            .get(format!("{}/validate", self.id_url))
            .header(
                "Authorization",
                format!("OAuth {}", self.credentials.access_token()),
            )
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 {
            return Ok(TokenValidation {
                is_valid: false,
                expires_in: 0,
                user_id: String::new(),
                login: String::new(),
            });
        }
        if !status.is_success() {
            return Err(TokenError::Upstream(status.as_u16()));
        }

        let body: ValidateResponse = response
            .json()
            .await
            .map_err(|e| TokenError::Network(e.to_string()))?;
        Ok(TokenValidation {
            is_valid: true,
            expires_in: body.expires_in,
            user_id: body.user_id,
            login: body.login,
        })
    }

    /// Exchanges the refresh token for a new credential pair, swaps it in
    /// memory, persists it, and notifies subscribers.
    pub async fn refresh(&self) -> Result<String, TokenError> {
        let refresh_token = self
            .credentials
            .refresh_token()
            .ok_or(TokenError::NoRefreshToken)?;

        let response = self
            .http
            .post(format!("{}/token", self.id_url))
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 400 {
            return Err(TokenError::RefreshRejected);
        }
        if !status.is_success() {
            return Err(TokenError::Upstream(status.as_u16()));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| TokenError::Network(e.to_string()))?;

        // Swap in memory BEFORE notifying so subscribers reading through
        // SharedCredentials observe the new token.
        self.credentials.replace(
            body.access_token.clone(),
            body.refresh_token.or(Some(refresh_token)),
        );

        if let Some(ref dir) = self.data_dir {
            if let Err(e) = persist_tokens(dir, &self.credentials.snapshot()) {
                log::warn!("[Token] Failed to persist refreshed tokens: {}", e);
            }
        }

        log::info!("[Token] Access token refreshed");
        let _ = self.refresh_tx.send(body.access_token.clone());
        Ok(body.access_token)
    }

    /// Starts the background validity monitor: validates immediately, then
    /// every 24 hours, refreshing proactively when less than two hours of
    /// lifetime remain.
    pub fn start_monitoring(self: &Arc<Self>) {
        let mut slot = self.monitor.lock();
        if slot.is_some() {
            return;
        }
        let manager = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(VALIDATE_INTERVAL);
            loop {
                ticker.tick().await;
                manager.run_validation_cycle().await;
            }
        }));
        log::info!("[Token] Validity monitor started");
    }

    /// Stops the background monitor.
    pub fn stop_monitoring(&self) {
        if let Some(handle) = self.monitor.lock().take() {
            handle.abort();
            log::info!("[Token] Validity monitor stopped");
        }
    }

    async fn run_validation_cycle(&self) {
        match self.validate().await {
            Ok(validation) if !validation.is_valid => {
                log::warn!("[Token] Access token invalid, attempting refresh");
                if let Err(e) = self.refresh().await {
                    log::error!("[Token] Refresh after invalid token failed: {}", e);
                }
            }
            Ok(validation) if validation.expires_in < PROACTIVE_REFRESH_SECS => {
                log::info!(
                    "[Token] Token expires in {}s, refreshing proactively",
                    validation.expires_in
                );
                if let Err(e) = self.refresh().await {
                    log::error!("[Token] Proactive refresh failed: {}", e);
                }
            }
            Ok(validation) => {
                log::debug!(
                    "[Token] Token valid for {} ({}s remaining)",
                    validation.login,
                    validation.expires_in
                );
            }
            Err(e) => log::warn!("[Token] Validation check failed: {}", e),
        }
    }
}

#[async_trait]
impl TokenRefresher for TokenManager {
    async fn refreshed_token(&self) -> Result<String, TokenError> {
        self.refresh().await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Persistence
// ─────────────────────────────────────────────────────────────────────────────

/// Writes the credential pair atomically (temp file + rename).
fn persist_tokens(data_dir: &Path, tokens: &BotTokens) -> std::io::Result<()> {
    std::fs::create_dir_all(data_dir)?;
    let path = data_dir.join(TOKEN_FILE);
    let temp_path = data_dir.join("tokens.json.tmp");
    let contents = serde_json::to_string_pretty(tokens)?;

    std::fs::write(&temp_path, contents)?;
    std::fs::rename(&temp_path, &path)
}

/// Loads a previously persisted credential pair, if any. Invalid files are
/// ignored so a corrupt write never blocks startup.
pub fn load_persisted_tokens(data_dir: &Path) -> Option<BotTokens> {
    let contents = std::fs::read_to_string(data_dir.join(TOKEN_FILE)).ok()?;
    serde_json::from_str(&contents).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_credentials_swap_is_visible_to_all_handles() {
        let creds = Arc::new(SharedCredentials::new("old".into(), Some("r1".into())));
        let reader = Arc::clone(&creds);

        creds.replace("new".into(), Some("r2".into()));
        assert_eq!(reader.access_token(), "new");
        assert_eq!(reader.refresh_token(), Some("r2".into()));
    }

    #[test]
    fn persisted_tokens_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let tokens = BotTokens {
            access_token: "abc".into(),
            refresh_token: Some("def".into()),
        };
        persist_tokens(dir.path(), &tokens).unwrap();

        let loaded = load_persisted_tokens(dir.path()).unwrap();
        assert_eq!(loaded.access_token, "abc");
        assert_eq!(loaded.refresh_token, Some("def".into()));
    }

    #[test]
    fn corrupt_token_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(TOKEN_FILE), "{not json").unwrap();
        assert!(load_persisted_tokens(dir.path()).is_none());
    }

    #[test]
    fn missing_token_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_persisted_tokens(dir.path()).is_none());
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_fails() {
        let creds = Arc::new(SharedCredentials::new("access".into(), None));
        let manager = TokenManager::new(
            reqwest::Client::new(),
            "clientid",
            "secret",
            creds,
            None,
        );
        assert!(matches!(
            manager.refresh().await,
            Err(TokenError::NoRefreshToken)
        ));
    }
}
