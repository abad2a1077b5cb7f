//! Application bootstrap and dependency wiring.
//!
//! The composition root: the single place where services are instantiated
//! and wired together. Wiring order follows dependencies - credentials and
//! the store first, then the queue engine, then the subscription client
//! that feeds it.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::{AppState, RateLimiter};
use crate::auth::AuthService;
use crate::chat::{ChatClient, ChatConfig, ChatMessageHandler};
use crate::config::Config;
use crate::resolvers::{KickResolver, ResolverSet, SoraResolver, TwitchResolver};
use crate::services::QueueService;
use crate::store::{ClipStore, StoreError};
use crate::token::{
    load_persisted_tokens, SharedCredentials, TokenError, TokenManager, TokenRefresher,
};

/// Upstream HTTP timeout for non-resolver calls (resolvers carry their own
/// per-attempt timeouts).
const HTTP_TIMEOUT_SECS: u64 = 30;

/// Sweep interval for the self-cleaning caches.
const CACHE_SWEEP_SECS: u64 = 60;

/// Errors raised during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("store initialization failed: {0}")]
    Store(#[from] StoreError),

    #[error("bot credential check failed: {0}")]
    Token(#[from] TokenError),

    #[error("bot access token is not valid - re-run the setup tool")]
    InvalidBotToken,

    #[error("channel lookup failed: {0}")]
    ChannelLookup(String),
}

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    pub store: Arc<ClipStore>,
    pub queue: Arc<QueueService>,
    pub auth: Arc<AuthService>,
    pub token_manager: Arc<TokenManager>,
    pub chat: Arc<ChatClient>,
    pub rate_limiter: Arc<RateLimiter>,
    /// Cancellation token for graceful shutdown of background tasks.
    pub cancel_token: CancellationToken,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Builds the API layer's state from the wired services.
    pub fn app_state(&self, config: &Config) -> AppState {
        AppState {
            queue: Arc::clone(&self.queue),
            auth: Arc::clone(&self.auth),
            chat_health: self.chat.health(),
            rate_limiter: Arc::clone(&self.rate_limiter),
            frontend_url: config.frontend_url.clone(),
            production: config.production,
        }
    }

    /// Starts the background tasks: the chat subscription loop, the token
    /// validity monitor, and the cache sweeper.
    pub fn start_background_tasks(&self) {
        let chat = Arc::clone(&self.chat);
        tokio::spawn(chat.run());

        self.token_manager.start_monitoring();

        let queue = Arc::clone(&self.queue);
        let auth = Arc::clone(&self.auth);
        let rate_limiter = Arc::clone(&self.rate_limiter);
        let cancel = self.cancel_token.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(CACHE_SWEEP_SECS));
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        queue.cleanup_caches();
                        auth.cleanup();
                        rate_limiter.cleanup();
                    }
                    _ = cancel.cancelled() => break,
                }
            }
        });

        log::info!("[Bootstrap] Background tasks started");
    }

    /// Initiates graceful shutdown: stop the token monitor, close the chat
    /// connection, then checkpoint and release the store. The HTTP listener
    /// drains separately via the cancellation token.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        self.token_manager.stop_monitoring();
        self.chat.stop();
        self.cancel_token.cancel();
        self.store.checkpoint();

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client.
///
/// A single pooled client backs the resolvers, token manager, auth lookups
/// and EventSub subscription calls.
fn create_http_client() -> Client {
    Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .build()
        .expect("Failed to create HTTP client")
}

/// Bootstraps all application services with their dependencies.
///
/// Performs the two upstream identity lookups the chat subscription needs:
/// the bot's user id (via token validation) and the channel's broadcaster
/// id (via user lookup).
///
/// # Errors
///
/// Fails when the store cannot be opened, the bot token is invalid and
/// cannot be refreshed, or the configured channel does not exist.
pub async fn bootstrap_services(config: &Config) -> Result<BootstrappedServices, BootstrapError> {
    let http_client = create_http_client();

    // Persisted tokens from a previous refresh supersede the ones baked
    // into the environment.
    let (access_token, refresh_token) = match load_persisted_tokens(&config.data_dir) {
        Some(tokens) => {
            log::info!("[Bootstrap] Using persisted bot tokens");
            (
                tokens.access_token,
                tokens.refresh_token.or_else(|| config.bot_refresh_token.clone()),
            )
        }
        None => (
            config.bot_access_token.clone(),
            config.bot_refresh_token.clone(),
        ),
    };
    let credentials = Arc::new(SharedCredentials::new(access_token, refresh_token));

    let token_manager = Arc::new(TokenManager::new(
        http_client.clone(),
        config.client_id.clone(),
        config.client_secret.clone(),
        Arc::clone(&credentials),
        Some(config.data_dir.clone()),
    ));

    // The bot's identity: validate (refreshing once if stale).
    let validation = token_manager.validate().await?;
    let bot_user_id = if validation.is_valid {
        validation.user_id
    } else {
        log::warn!("[Bootstrap] Bot token invalid, attempting refresh");
        token_manager.refresh().await?;
        let revalidated = token_manager.validate().await?;
        if !revalidated.is_valid {
            return Err(BootstrapError::InvalidBotToken);
        }
        revalidated.user_id
    };

    let broadcaster_user_id = resolve_broadcaster_id(
        &http_client,
        &config.api_url,
        &config.client_id,
        &credentials.access_token(),
        &config.channel,
    )
    .await?;
    log::info!(
        "[Bootstrap] Subscribing bot {} to channel {} ({})",
        bot_user_id,
        config.channel,
        broadcaster_user_id
    );

    let store = Arc::new(ClipStore::open(&config.database_path)?);

    let resolvers = ResolverSet::new(vec![
        Box::new(KickResolver::new(http_client.clone())),
        Box::new(SoraResolver::new(http_client.clone())),
        Box::new(TwitchResolver::new(
            http_client.clone(),
            config.api_url.clone(),
            config.client_id.clone(),
            Arc::clone(&credentials),
        )),
    ]);

    let queue = Arc::new(QueueService::new(Arc::clone(&store), resolvers)?);

    let auth = Arc::new(AuthService::new(
        http_client.clone(),
        config.api_url.clone(),
        config.client_id.clone(),
        config.channel.clone(),
        Arc::clone(&credentials),
    ));

    let chat = Arc::new(ChatClient::new(
        ChatConfig {
            ws_url: config.eventsub_ws_url.clone(),
            api_url: config.api_url.clone(),
            client_id: config.client_id.clone(),
            broadcaster_user_id,
            bot_user_id,
        },
        http_client.clone(),
        credentials,
        Arc::clone(&token_manager) as Arc<dyn TokenRefresher>,
        Arc::clone(&queue) as Arc<dyn ChatMessageHandler>,
    ));

    Ok(BootstrappedServices {
        store,
        queue,
        auth,
        token_manager,
        chat,
        rate_limiter: Arc::new(RateLimiter::new()),
        cancel_token: CancellationToken::new(),
        http_client,
    })
}

#[derive(serde::Deserialize)]
struct UsersResponse {
    data: Vec<UserEntry>,
}

#[derive(serde::Deserialize)]
struct UserEntry {
    id: String,
}

/// Looks up the broadcaster id for the configured channel login.
async fn resolve_broadcaster_id(
    http: &Client,
    api_url: &str,
    client_id: &str,
    token: &str,
    channel: &str,
) -> Result<String, BootstrapError> {
    let response = http
        .get(format!("{api_url}/users"))
        .query(&[("login", channel)])
        .header("Client-Id", client_id)
        .bearer_auth(token)
        .send()
        .await
        .map_err(|e| BootstrapError::ChannelLookup(e.to_string()))?;

    if !response.status().is_success() {
        return Err(BootstrapError::ChannelLookup(format!(
            "HTTP {}",
            response.status()
        )));
    }

    let body: UsersResponse = response
        .json()
        .await
        .map_err(|e| BootstrapError::ChannelLookup(e.to_string()))?;
    body.data
        .into_iter()
        .next()
        .map(|u| u.id)
        .ok_or_else(|| BootstrapError::ChannelLookup(format!("channel {channel} not found")))
}
