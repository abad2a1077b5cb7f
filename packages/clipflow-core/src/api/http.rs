//! HTTP route handlers.
//!
//! All handlers are thin - they validate input, check authorization, and
//! delegate to services. Mutations respond with the full queue state so
//! clients can reconcile immediately instead of waiting for the next poll.

use std::net::SocketAddr;

use axum::{
    extract::{connect_info::ConnectInfo, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::api::response::{api_ok, api_state, api_success};
use crate::api::AppState;
use crate::error::{ApiError, ApiResult};
use crate::services::BatchOutcome;
use crate::store::Settings;

/// Default and maximum page sizes for `/api/history`.
const HISTORY_DEFAULT_LIMIT: usize = 20;
const HISTORY_MAX_LIMIT: usize = 100;

// ─────────────────────────────────────────────────────────────────────────────
// Request types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct SubmitRequest {
    url: String,
    submitter: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClipIdRequest {
    clip_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchRequest {
    clip_ids: Vec<String>,
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
    cursor: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct CacheClearRequest {
    /// Clear one token's cached principal.
    token: Option<String>,
    /// Clear one user's cached role.
    user_id: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Input validation
// ─────────────────────────────────────────────────────────────────────────────

fn field_issue(field: &str, message: &str) -> serde_json::Value {
    json!({ "field": field, "message": message })
}

fn validate_submit(request: &SubmitRequest) -> ApiResult<()> {
    let mut issues = Vec::new();
    if request.url.is_empty() || request.url.len() > 500 {
        issues.push(field_issue("url", "must be 1-500 characters"));
    } else if url::Url::parse(&request.url).is_err() {
        issues.push(field_issue("url", "must be a valid URL"));
    }
    if request.submitter.is_empty() || request.submitter.len() > 100 {
        issues.push(field_issue("submitter", "must be 1-100 characters"));
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(ApiError::InvalidInput {
            message: "invalid submission payload".into(),
            details: Some(json!(issues)),
        })
    }
}

fn validate_clip_id(clip_id: &str) -> ApiResult<()> {
    if clip_id.is_empty() || clip_id.len() > 200 {
        return Err(ApiError::InvalidInput {
            message: "invalid clip id".into(),
            details: Some(json!([field_issue("clipId", "must be 1-200 characters")])),
        });
    }
    Ok(())
}

fn validate_batch(ids: &[String]) -> ApiResult<()> {
    if ids.is_empty() || ids.len() > 100 {
        return Err(ApiError::InvalidInput {
            message: "invalid batch payload".into(),
            details: Some(json!([field_issue("clipIds", "must contain 1-100 entries")])),
        });
    }
    for id in ids {
        validate_clip_id(id)?;
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Public
        .route("/api/health", get(health_check))
        .route("/api/queue", get(get_queue).delete(clear_queue))
        .route("/api/history", get(get_history))
        // Moderator
        .route("/api/queue/submit", post(submit_clip))
        .route("/api/queue/advance", post(advance))
        .route("/api/queue/previous", post(previous))
        .route("/api/queue/play", post(play_clip))
        .route("/api/queue/remove", post(remove_clip))
        .route("/api/queue/approve", post(approve_clip))
        .route("/api/queue/reject", post(reject_clip))
        .route("/api/queue/pending", get(list_pending))
        .route("/api/queue/rejected", get(list_rejected))
        .route(
            "/api/queue/rejected/{clip_id}/restore",
            post(restore_clip),
        )
        .route(
            "/api/queue/history/{clip_id}/replay",
            post(replay_from_history),
        )
        .route("/api/queue/history", delete(clear_history))
        .route(
            "/api/queue/history/{clip_id}",
            delete(remove_from_history),
        )
        .route("/api/queue/batch/remove", post(batch_remove))
        .route("/api/queue/batch/approve", post(batch_approve))
        .route("/api/queue/batch/reject", post(batch_reject))
        // Broadcaster
        .route("/api/queue/open", post(open_queue))
        .route("/api/queue/close", post(close_queue))
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/auth/cache/stats", get(auth_cache_stats))
        .route("/api/auth/cache/clear", post(auth_cache_clear))
        // Auth
        .route("/api/auth/me", get(auth_me))
        .route("/api/auth/logout", post(auth_logout))
        .route("/api/auth/validate", get(auth_validate))
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Public handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness and chat-connection health.
async fn health_check(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> ApiResult<impl IntoResponse> {
    state.guard_public(addr.ip())?;

    let snapshot = state.chat_health.snapshot();
    let uptime_ms = snapshot
        .connected_at_ms
        .filter(|_| snapshot.connected)
        .map(|t| (Utc::now().timestamp_millis() - t).max(0));

    Ok(api_success(json!({
        "status": "ok",
        "eventsub": {
            "connected": snapshot.connected,
            "connectedAt": snapshot.connected_at_ms,
            "lastMessageAt": snapshot.last_message_at_ms,
            "uptimeMs": uptime_ms,
        },
        "queueSize": state.queue.queue_len(),
    })))
}

/// The queue state, with conditional-GET support.
///
/// A matching `If-None-Match` fingerprint short-circuits to 304 with no
/// body; otherwise the full state is returned with a fresh `ETag`.
async fn get_queue(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    state.guard_public(addr.ip())?;

    let etag = state.queue.etag();
    let if_none_match = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_matches('"'));

    if if_none_match == Some(etag.as_str()) {
        return Ok((
            StatusCode::NOT_MODIFIED,
            [
                (header::ETAG, etag),
                (header::CACHE_CONTROL, "no-cache".to_string()),
            ],
        )
            .into_response());
    }

    Ok((
        [
            (header::ETAG, etag),
            (header::CACHE_CONTROL, "no-cache".to_string()),
        ],
        Json(state.queue.queue_state()),
    )
        .into_response())
}

/// Cursor-paginated play history, newest first.
async fn get_history(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<impl IntoResponse> {
    state.guard_public(addr.ip())?;

    let limit = query
        .limit
        .unwrap_or(HISTORY_DEFAULT_LIMIT)
        .clamp(1, HISTORY_MAX_LIMIT);
    let cursor = match &query.cursor {
        Some(raw) => Some(raw.parse::<i64>().map_err(|_| ApiError::InvalidInput {
            message: "invalid cursor".into(),
            details: Some(json!([field_issue("cursor", "not a valid cursor")])),
        })?),
        None => None,
    };

    let page = state
        .queue
        .store()
        .page_play_logs(limit, cursor)
        .map_err(ApiError::from)?;
    Ok(api_success(json!({
        "entries": page.entries,
        "nextCursor": page.next_cursor.map(|c| c.to_string()),
        "hasMore": page.has_more,
        "count": page.entries.len(),
    })))
}

// ─────────────────────────────────────────────────────────────────────────────
// Moderator handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Manual clip submission. Submission drops (duplicate, rate limit,
/// unresolvable) are not errors: the response reports success with the
/// unchanged state.
async fn submit_clip(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<impl IntoResponse> {
    state.authorize_moderator(&headers, addr.ip()).await?;
    validate_submit(&request)?;

    let outcome = state
        .queue
        .submit(&request.url, &request.submitter, true)
        .await?;
    log::debug!("[Api] Manual submission outcome: {:?}", outcome);
    Ok(api_state(state.queue.queue_state()))
}

async fn advance(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    state.authorize_moderator(&headers, addr.ip()).await?;
    state.queue.advance().await?;
    Ok(api_state(state.queue.queue_state()))
}

async fn previous(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    state.authorize_moderator(&headers, addr.ip()).await?;
    state.queue.previous().await?;
    Ok(api_state(state.queue.queue_state()))
}

async fn play_clip(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<ClipIdRequest>,
) -> ApiResult<impl IntoResponse> {
    state.authorize_moderator(&headers, addr.ip()).await?;
    validate_clip_id(&request.clip_id)?;
    state.queue.play(&request.clip_id).await?;
    Ok(api_state(state.queue.queue_state()))
}

async fn remove_clip(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<ClipIdRequest>,
) -> ApiResult<impl IntoResponse> {
    state.authorize_moderator(&headers, addr.ip()).await?;
    validate_clip_id(&request.clip_id)?;
    state.queue.remove(&request.clip_id).await?;
    Ok(api_state(state.queue.queue_state()))
}

async fn approve_clip(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<ClipIdRequest>,
) -> ApiResult<impl IntoResponse> {
    state.authorize_moderator(&headers, addr.ip()).await?;
    validate_clip_id(&request.clip_id)?;
    state.queue.approve(&request.clip_id).await?;
    Ok(api_state(state.queue.queue_state()))
}

async fn reject_clip(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<ClipIdRequest>,
) -> ApiResult<impl IntoResponse> {
    state.authorize_moderator(&headers, addr.ip()).await?;
    validate_clip_id(&request.clip_id)?;
    state.queue.reject(&request.clip_id).await?;
    Ok(api_state(state.queue.queue_state()))
}

async fn restore_clip(
    State(state): State<AppState>,
    Path(clip_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    state.authorize_moderator(&headers, addr.ip()).await?;
    validate_clip_id(&clip_id)?;
    state.queue.restore(&clip_id).await?;
    Ok(api_state(state.queue.queue_state()))
}

async fn list_pending(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    state.authorize_moderator(&headers, addr.ip()).await?;
    Ok(api_success(json!({ "clips": state.queue.pending_clips()? })))
}

async fn list_rejected(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    state.authorize_moderator(&headers, addr.ip()).await?;
    Ok(api_success(json!({ "clips": state.queue.rejected_clips()? })))
}

async fn replay_from_history(
    State(state): State<AppState>,
    Path(clip_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    state.authorize_moderator(&headers, addr.ip()).await?;
    validate_clip_id(&clip_id)?;
    state.queue.jump_to_history(&clip_id).await?;
    Ok(api_state(state.queue.queue_state()))
}

async fn remove_from_history(
    State(state): State<AppState>,
    Path(clip_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    state.authorize_moderator(&headers, addr.ip()).await?;
    validate_clip_id(&clip_id)?;
    state.queue.remove_from_history(&clip_id).await?;
    Ok(api_state(state.queue.queue_state()))
}

fn batch_response(verb: &'static str, outcome: BatchOutcome) -> impl IntoResponse {
    let mut body = serde_json::Map::new();
    body.insert(verb.to_string(), json!(outcome.succeeded));
    body.insert("failed".to_string(), json!(outcome.failed));
    body.insert("notFound".to_string(), json!(outcome.not_found));
    api_success(serde_json::Value::Object(body))
}

async fn batch_remove(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<BatchRequest>,
) -> ApiResult<impl IntoResponse> {
    state.authorize_moderator(&headers, addr.ip()).await?;
    validate_batch(&request.clip_ids)?;
    let outcome = state.queue.batch_remove(&request.clip_ids).await;
    Ok(batch_response("removed", outcome))
}

async fn batch_approve(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<BatchRequest>,
) -> ApiResult<impl IntoResponse> {
    state.authorize_moderator(&headers, addr.ip()).await?;
    validate_batch(&request.clip_ids)?;
    let outcome = state.queue.batch_approve(&request.clip_ids).await;
    Ok(batch_response("approved", outcome))
}

async fn batch_reject(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<BatchRequest>,
) -> ApiResult<impl IntoResponse> {
    state.authorize_moderator(&headers, addr.ip()).await?;
    validate_batch(&request.clip_ids)?;
    let outcome = state.queue.batch_reject(&request.clip_ids).await;
    Ok(batch_response("rejected", outcome))
}

// ─────────────────────────────────────────────────────────────────────────────
// Broadcaster handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn clear_queue(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    state.authorize_broadcaster(&headers, addr.ip()).await?;
    state.queue.clear_queue().await?;
    Ok(api_state(state.queue.queue_state()))
}

async fn clear_history(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    state.authorize_broadcaster(&headers, addr.ip()).await?;
    state.queue.clear_history().await?;
    Ok(api_state(state.queue.queue_state()))
}

async fn open_queue(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    state.authorize_broadcaster(&headers, addr.ip()).await?;
    state.queue.open().await?;
    Ok(api_state(state.queue.queue_state()))
}

async fn close_queue(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    state.authorize_broadcaster(&headers, addr.ip()).await?;
    state.queue.close().await?;
    Ok(api_state(state.queue.queue_state()))
}

async fn get_settings(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    state.authorize_broadcaster(&headers, addr.ip()).await?;
    Ok(api_success(state.queue.settings()))
}

async fn put_settings(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(settings): Json<Settings>,
) -> ApiResult<impl IntoResponse> {
    state.authorize_broadcaster(&headers, addr.ip()).await?;
    state.queue.update_settings(settings)?;
    Ok(api_state(state.queue.queue_state()))
}

async fn auth_cache_stats(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    state.authorize_broadcaster(&headers, addr.ip()).await?;
    Ok(api_success(state.auth.stats()))
}

/// Clears auth caches: a specific token, a specific user's role, or (with
/// an empty body) everything.
async fn auth_cache_clear(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Option<Json<CacheClearRequest>>,
) -> ApiResult<impl IntoResponse> {
    state.authorize_broadcaster(&headers, addr.ip()).await?;

    let request = body.map(|Json(r)| r).unwrap_or_default();
    match (&request.token, &request.user_id) {
        (None, None) => state.auth.clear_all(),
        (token, user_id) => {
            if let Some(token) = token {
                state.auth.clear_token(token);
            }
            if let Some(user_id) = user_id {
                state.auth.clear_role(user_id);
            }
        }
    }
    Ok(api_ok())
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn auth_me(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let principal = state.authenticate(&headers, addr.ip()).await?;
    Ok(api_success(json!({ "user": principal })))
}

async fn auth_validate(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    let principal = state.authenticate(&headers, addr.ip()).await?;
    Ok(api_success(json!({ "valid": true, "user": principal })))
}

/// Clears the caller's cached principal and expires the session cookie.
async fn auth_logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    if let Some(token) = crate::auth::token_from_headers(&headers) {
        state.auth.clear_token(&token);
    }

    let cookie = if state.production {
        "token=; Max-Age=0; Path=/; HttpOnly; Secure; SameSite=Lax"
    } else {
        "token=; Max-Age=0; Path=/; HttpOnly; SameSite=Lax"
    };
    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "success": true })),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_validation_rejects_bad_urls() {
        let request = SubmitRequest {
            url: "not a url".into(),
            submitter: "alice".into(),
        };
        assert!(validate_submit(&request).is_err());

        let request = SubmitRequest {
            url: format!("https://clips.twitch.tv/{}", "a".repeat(500)),
            submitter: "alice".into(),
        };
        assert!(validate_submit(&request).is_err());
    }

    #[test]
    fn submit_validation_bounds_submitter() {
        let request = SubmitRequest {
            url: "https://clips.twitch.tv/Abc".into(),
            submitter: String::new(),
        };
        assert!(validate_submit(&request).is_err());

        let request = SubmitRequest {
            url: "https://clips.twitch.tv/Abc".into(),
            submitter: "a".repeat(101),
        };
        assert!(validate_submit(&request).is_err());
    }

    #[test]
    fn submit_validation_accepts_valid_payloads() {
        let request = SubmitRequest {
            url: "https://clips.twitch.tv/Abc".into(),
            submitter: "alice".into(),
        };
        assert!(validate_submit(&request).is_ok());
    }

    #[test]
    fn clip_id_bounds() {
        assert!(validate_clip_id("twitch:abc").is_ok());
        assert!(validate_clip_id("").is_err());
        assert!(validate_clip_id(&"a".repeat(201)).is_err());
    }

    #[test]
    fn batch_bounds() {
        assert!(validate_batch(&[]).is_err());
        assert!(validate_batch(&vec!["id".to_string(); 101]).is_err());
        assert!(validate_batch(&vec!["id".to_string(); 100]).is_ok());
    }
}
