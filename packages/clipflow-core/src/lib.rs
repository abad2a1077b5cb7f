//! ClipFlow Core - shared library for ClipFlow.
//!
//! This crate provides the core functionality for ClipFlow, a self-hosted
//! service that turns a live chat channel into an ordered, deduplicated
//! queue of short video clips. It is used by the headless server binary and
//! by operational tooling.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`store`]: Durable clip inventory (SQLite: clips, submitters, play-log, settings)
//! - [`queue`]: In-memory popularity-ordered queue and play-history ring
//! - [`resolvers`]: Per-platform URL classification and metadata fetch
//! - [`chat`]: Long-lived EventSub WebSocket subscription client
//! - [`token`]: Bot credential validity monitoring and refresh
//! - [`services`]: The command engine turning chat/REST actions into transitions
//! - [`etag`]: Change-detection fingerprint for the polling API
//! - [`api`]: HTTP surface, rate limiting, and server startup
//! - [`auth`]: Viewer-token validation and channel role cache
//! - [`guards`]: Named operation mutexes and TTL caches
//! - [`error`]: Centralized error taxonomy
//!
//! # Abstraction Traits
//!
//! Seams between components are traits so implementations can be swapped in
//! tests:
//!
//! - [`resolvers::ClipResolver`]: one platform's classifier + fetcher
//! - [`chat::ChatMessageHandler`]: receives validated chat messages
//! - [`token::TokenRefresher`]: yields a fresh token after an upstream 401

#![warn(clippy::all)]

pub mod api;
pub mod auth;
pub mod bootstrap;
pub mod chat;
pub mod config;
pub mod error;
pub mod etag;
pub mod guards;
pub mod queue;
pub mod resolvers;
pub mod services;
pub mod store;
pub mod token;

// Re-export commonly used types at the crate root
pub use api::{start_server, AppState, RateBucket, RateLimiter, ServerError};
pub use auth::{AuthService, Principal};
pub use bootstrap::{bootstrap_services, BootstrapError, BootstrappedServices};
pub use chat::{ChatClient, ChatConfig, ChatHealth, ChatMessage, ChatMessageHandler};
pub use config::{Config, ConfigError};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use queue::QueueModel;
pub use resolvers::{ClipResolver, ResolveError, ResolverSet};
pub use services::{QueueService, QueueState, SubmitOutcome};
pub use store::{Clip, ClipData, ClipStatus, ClipStore, Platform, PlayLogEntry, Settings};
pub use token::{SharedCredentials, TokenError, TokenManager, TokenRefresher};
