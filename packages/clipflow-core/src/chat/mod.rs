//! Long-lived chat subscription client.
//!
//! One background task per channel consumes the EventSub WebSocket and
//! publishes validated chat messages into the dispatch path. There is no
//! parallelism within the client: a single cooperative task drives the
//! lifecycle `disconnected -> connecting -> subscribing -> active ->
//! (reconnecting | disconnected)`.

pub mod events;

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::token::{SharedCredentials, TokenRefresher};

pub use events::{ChatMessage, IncomingFrame};

/// Base reconnect delay.
const BACKOFF_BASE_SECS: f64 = 1.0;

/// Base reconnect delay after an upstream rate limit.
const BACKOFF_RATE_LIMITED_SECS: f64 = 60.0;

/// Reconnect delay ceiling.
const BACKOFF_CAP_SECS: f64 = 300.0;

/// Grace added to the advertised keepalive window before the connection is
/// considered dead.
const KEEPALIVE_GRACE_SECS: u64 = 5;

/// Errors that end one connection attempt.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("websocket connect failed: {0}")]
    Connect(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("subscription create returned HTTP {0}")]
    Subscribe(u16),

    #[error("upstream rate limited the subscription")]
    RateLimited,

    #[error("authentication failed and token refresh did not recover")]
    Auth,

    #[error("connection closed by upstream")]
    Closed,

    #[error("keepalive window elapsed without a frame")]
    KeepaliveTimeout,

    #[error("subscription revoked by upstream")]
    Revoked,
}

impl ChatError {
    fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited)
    }
}

/// Receives each validated chat message from the subscription.
#[async_trait]
pub trait ChatMessageHandler: Send + Sync {
    async fn on_message(&self, message: ChatMessage);
}

/// Connection health exposed for `/api/health`.
#[derive(Default)]
pub struct ChatHealth {
    connected: AtomicBool,
    connected_at_ms: AtomicI64,
    last_message_at_ms: AtomicI64,
}

/// Point-in-time view of the connection health.
#[derive(Debug, Clone, Copy)]
pub struct ChatHealthSnapshot {
    pub connected: bool,
    pub connected_at_ms: Option<i64>,
    pub last_message_at_ms: Option<i64>,
}

impl ChatHealth {
    pub fn snapshot(&self) -> ChatHealthSnapshot {
        let connected_at = self.connected_at_ms.load(Ordering::Relaxed);
        let last_message = self.last_message_at_ms.load(Ordering::Relaxed);
        ChatHealthSnapshot {
            connected: self.connected.load(Ordering::Relaxed),
            connected_at_ms: (connected_at > 0).then_some(connected_at),
            last_message_at_ms: (last_message > 0).then_some(last_message),
        }
    }

    fn mark_connected(&self) {
        self.connected.store(true, Ordering::Relaxed);
        self.connected_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Relaxed);
    }

    fn mark_message(&self) {
        self.last_message_at_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }
}

/// Static connection parameters.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// EventSub WebSocket URL.
    pub ws_url: String,
    /// Helix API base URL for subscription management.
    pub api_url: String,
    pub client_id: String,
    /// Channel whose chat is subscribed.
    pub broadcaster_user_id: String,
    /// User id of the bot credential.
    pub bot_user_id: String,
}

enum SessionEnd {
    /// Graceful reconnect hint; follow the URL without backoff.
    Reconnect(String),
    /// Cancellation requested.
    Shutdown,
}

/// The chat subscription client.
pub struct ChatClient {
    config: ChatConfig,
    http: reqwest::Client,
    credentials: Arc<SharedCredentials>,
    refresher: Arc<dyn TokenRefresher>,
    handler: Arc<dyn ChatMessageHandler>,
    health: Arc<ChatHealth>,
    shutdown: CancellationToken,
}

impl ChatClient {
    pub fn new(
        config: ChatConfig,
        http: reqwest::Client,
        credentials: Arc<SharedCredentials>,
        refresher: Arc<dyn TokenRefresher>,
        handler: Arc<dyn ChatMessageHandler>,
    ) -> Self {
        Self {
            config,
            http,
            credentials,
            refresher,
            handler,
            health: Arc::new(ChatHealth::default()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn health(&self) -> Arc<ChatHealth> {
        Arc::clone(&self.health)
    }

    /// Requests a graceful stop; the running task exits at its next
    /// suspension point.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Runs the connection supervisor until stopped.
    ///
    /// Each failed attempt schedules a retry with exponential backoff and
    /// ±25% jitter; the attempt counter resets once a session reaches
    /// active. Graceful `session_reconnect` hints bypass the backoff.
    pub async fn run(self: Arc<Self>) {
        let mut attempts: u32 = 0;
        let mut next_url = self.config.ws_url.clone();

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            match self.connect_session(&next_url, &mut attempts).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(SessionEnd::Reconnect(url)) => {
                    log::info!("[Chat] Following session_reconnect hint");
                    self.health.mark_disconnected();
                    next_url = url;
                    continue;
                }
                Err(e) => {
                    self.health.mark_disconnected();
                    attempts += 1;
                    next_url = self.config.ws_url.clone();
                    let delay = backoff_delay(attempts, e.is_rate_limit());
                    log::warn!(
                        "[Chat] Connection ended ({}), retry {} in {:.1}s",
                        e,
                        attempts,
                        delay.as_secs_f64()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.cancelled() => break,
                    }
                }
            }
        }

        self.health.mark_disconnected();
        log::info!("[Chat] Client stopped");
    }

    /// Drives one WebSocket session from connect to termination.
    async fn connect_session(
        &self,
        url: &str,
        attempts: &mut u32,
    ) -> Result<SessionEnd, ChatError> {
        log::info!("[Chat] Connecting to {}", url);
        let (mut stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ChatError::Connect(e.to_string()))?;

        // Handshake: the first frame must be a session welcome.
        let (session_id, keepalive_secs) = loop {
            let frame = tokio::select! {
                frame = stream.next() => frame,
                _ = self.shutdown.cancelled() => return Ok(SessionEnd::Shutdown),
            };
            match frame {
                Some(Ok(Message::Text(text))) => match events::parse_frame(&text) {
                    Ok(IncomingFrame::Welcome {
                        session_id,
                        keepalive_timeout_secs,
                    }) => break (session_id, keepalive_timeout_secs),
                    Ok(other) => {
                        return Err(ChatError::Handshake(format!(
                            "expected session_welcome, got {other:?}"
                        )))
                    }
                    Err(e) => return Err(ChatError::Handshake(e.to_string())),
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = stream.send(Message::Pong(data)).await;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ChatError::Connect(e.to_string())),
                None => return Err(ChatError::Closed),
            }
        };

        log::info!("[Chat] Session {} established, subscribing", session_id);
        self.create_subscription(&session_id).await?;

        // Active: reset the retry counter and expose health.
        *attempts = 0;
        self.health.mark_connected();
        log::info!("[Chat] Subscription active");

        let keepalive_window = Duration::from_secs(keepalive_secs + KEEPALIVE_GRACE_SECS);
        loop {
            let frame = tokio::select! {
                frame = tokio::time::timeout(keepalive_window, stream.next()) => {
                    match frame {
                        Ok(frame) => frame,
                        Err(_) => return Err(ChatError::KeepaliveTimeout),
                    }
                }
                _ = self.shutdown.cancelled() => {
                    let _ = stream.close(None).await;
                    return Ok(SessionEnd::Shutdown);
                }
            };

            match frame {
                Some(Ok(Message::Text(text))) => match events::parse_frame(&text) {
                    Ok(IncomingFrame::Notification(message)) => {
                        self.health.mark_message();
                        self.handler.on_message(message).await;
                    }
                    Ok(IncomingFrame::Keepalive) => {}
                    Ok(IncomingFrame::Reconnect { reconnect_url }) => {
                        let _ = stream.close(None).await;
                        return Ok(SessionEnd::Reconnect(reconnect_url));
                    }
                    Ok(IncomingFrame::Revocation) => return Err(ChatError::Revoked),
                    Ok(IncomingFrame::Welcome { .. }) => {
                        log::warn!("[Chat] Unexpected mid-session welcome frame, dropping");
                    }
                    Err(e) => {
                        log::warn!("[Chat] Dropping malformed frame: {}", e);
                    }
                },
                Some(Ok(Message::Ping(data))) => {
                    let _ = stream.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => return Err(ChatError::Closed),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(ChatError::Connect(e.to_string())),
            }
        }
    }

    /// Registers the channel chat subscription for the session.
    ///
    /// On HTTP 401 the token-expired seam is invoked once; if it yields a
    /// new token the request is retried in place, otherwise the failure
    /// surfaces for backoff retry.
    async fn create_subscription(&self, session_id: &str) -> Result<(), ChatError> {
        let mut token = self.credentials.access_token();
        let mut refreshed = false;

        loop {
            let body = serde_json::json!({
                "type": "channel.chat.message",
                "version": "1",
                "condition": {
                    "broadcaster_user_id": self.config.broadcaster_user_id,
                    "user_id": self.config.bot_user_id,
                },
                "transport": {
                    "method": "websocket",
                    "session_id": session_id,
                },
            });

            let response = self
                .http
                .post(format!("{}/eventsub/subscriptions", self.config.api_url))
                .header("Client-Id", &self.config.client_id)
                .bearer_auth(&token)
                .json(&body)
                .send()
                .await
                .map_err(|e| ChatError::Connect(e.to_string()))?;

            let status = response.status().as_u16();
            match status {
                200..=299 => return Ok(()),
                401 if !refreshed => {
                    log::warn!("[Chat] Subscription create got 401, refreshing token");
                    token = self
                        .refresher
                        .refreshed_token()
                        .await
                        .map_err(|_| ChatError::Auth)?;
                    refreshed = true;
                }
                401 => return Err(ChatError::Auth),
                429 => return Err(ChatError::RateLimited),
                other => return Err(ChatError::Subscribe(other)),
            }
        }
    }
}

/// Exponential backoff with ±25% jitter.
///
/// Base 1s (60s after a rate limit), doubling per attempt, capped at 5
/// minutes.
fn backoff_delay(attempt: u32, rate_limited: bool) -> Duration {
    let base = if rate_limited {
        BACKOFF_RATE_LIMITED_SECS
    } else {
        BACKOFF_BASE_SECS
    };
    let exponent = attempt.saturating_sub(1).min(16);
    let raw = (base * 2f64.powi(exponent as i32)).min(BACKOFF_CAP_SECS);
    let jitter = 1.0 + (fastrand::f64() * 0.5 - 0.25);
    Duration::from_secs_f64((raw * jitter).min(BACKOFF_CAP_SECS))
}
