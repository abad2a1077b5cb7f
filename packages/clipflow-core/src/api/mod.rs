//! HTTP API layer.
//!
//! Thin handlers that delegate to services, plus router construction,
//! cross-cutting middleware (CORS, security headers, body limit, request
//! tracing) and server startup with graceful drain.

pub mod http;
pub mod ratelimit;
pub mod response;

use std::net::IpAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{
    require_broadcaster, require_moderator, token_from_headers, AuthService, Principal,
};
use crate::chat::ChatHealth;
use crate::error::{ApiError, ApiResult};
use crate::services::QueueService;

pub use ratelimit::{RateBucket, RateLimiter};

/// Maximum accepted request body.
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to the TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// A thin wrapper holding references to services; all business logic lives
/// in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// The authoritative queue engine.
    pub queue: Arc<QueueService>,
    /// Viewer authentication and role resolution.
    pub auth: Arc<AuthService>,
    /// Chat connection health for `/api/health`.
    pub chat_health: Arc<ChatHealth>,
    /// Request rate limiting.
    pub rate_limiter: Arc<RateLimiter>,
    /// Exact allowed origin in production.
    pub frontend_url: Option<String>,
    /// Production hardening flag (HSTS, generic errors).
    pub production: bool,
}

impl AppState {
    /// Gates an unauthenticated read on the public bucket.
    pub fn guard_public(&self, ip: IpAddr) -> ApiResult<()> {
        if self.rate_limiter.allow(RateBucket::PublicRead, &ip.to_string()) {
            Ok(())
        } else {
            Err(ApiError::RateLimited)
        }
    }

    /// Resolves the caller's principal from the session cookie.
    ///
    /// Failed attempts count against the auth-failure bucket; once that
    /// bucket is exhausted further attempts are rejected before touching
    /// the upstream.
    pub async fn authenticate(
        &self,
        headers: &axum::http::HeaderMap,
        ip: IpAddr,
    ) -> ApiResult<Principal> {
        let ip_key = ip.to_string();
        if !self.rate_limiter.peek(RateBucket::AuthFailure, &ip_key) {
            return Err(ApiError::RateLimited);
        }

        let Some(token) = token_from_headers(headers) else {
            self.rate_limiter.record(RateBucket::AuthFailure, &ip_key);
            return Err(ApiError::NotAuthenticated("no session cookie".into()));
        };

        match self.auth.resolve(&token).await {
            Ok(principal) => Ok(principal),
            Err(e) => {
                if matches!(e, ApiError::NotAuthenticated(_)) {
                    self.rate_limiter.record(RateBucket::AuthFailure, &ip_key);
                }
                Err(e)
            }
        }
    }

    /// Authenticates and requires moderator or broadcaster, counting the
    /// request against the authenticated-action bucket.
    pub async fn authorize_moderator(
        &self,
        headers: &axum::http::HeaderMap,
        ip: IpAddr,
    ) -> ApiResult<Principal> {
        let principal = self.authenticate(headers, ip).await?;
        require_moderator(&principal)?;
        self.guard_action(&principal, ip)?;
        Ok(principal)
    }

    /// Authenticates and requires the broadcaster.
    pub async fn authorize_broadcaster(
        &self,
        headers: &axum::http::HeaderMap,
        ip: IpAddr,
    ) -> ApiResult<Principal> {
        let principal = self.authenticate(headers, ip).await?;
        require_broadcaster(&principal)?;
        self.guard_action(&principal, ip)?;
        Ok(principal)
    }

    fn guard_action(&self, principal: &Principal, ip: IpAddr) -> ApiResult<()> {
        // Keyed by user id so a shared NAT does not starve moderators;
        // falls back to IP for principals without an id.
        let key = if principal.user_id.is_empty() {
            ip.to_string()
        } else {
            principal.user_id.clone()
        };
        if self
            .rate_limiter
            .allow(RateBucket::AuthenticatedAction, &key)
        {
            Ok(())
        } else {
            Err(ApiError::RateLimited)
        }
    }
}

/// Builds the CORS layer: exact configured origin in production, localhost
/// and private-range origins in development.
fn cors_layer(production: bool, frontend_url: Option<&str>) -> CorsLayer {
    let allow_origin = if production {
        match frontend_url.and_then(|url| HeaderValue::from_str(url).ok()) {
            Some(origin) => AllowOrigin::exact(origin),
            None => AllowOrigin::predicate(|_, _| false),
        }
    } else {
        AllowOrigin::predicate(|origin, _| {
            origin
                .to_str()
                .map(is_dev_origin)
                .unwrap_or(false)
        })
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::IF_NONE_MATCH])
        .allow_credentials(true)
}

/// Whether an origin is acceptable in development: localhost or a common
/// private network range.
fn is_dev_origin(origin: &str) -> bool {
    let Ok(url) = url::Url::parse(origin) else {
        return false;
    };
    match url.host() {
        Some(url::Host::Domain(host)) => host == "localhost",
        Some(url::Host::Ipv4(ip)) => {
            ip.is_loopback() || ip.is_private()
        }
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

/// Starts the HTTP server and serves until the cancellation token fires,
/// then drains in-flight requests.
pub async fn start_server(
    state: AppState,
    port: u16,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let production = state.production;
    let frontend_url = state.frontend_url.clone();

    let mut app = http::create_router(state)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors_layer(production, frontend_url.as_deref()))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(TraceLayer::new_for_http());

    if production {
        app = app.layer(SetResponseHeaderLayer::overriding(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=63072000; includeSubDomains"),
        ));
    }

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Server listening on http://0.0.0.0:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;
    Ok(())
}
