//! The command engine: turns chat commands and REST actions into
//! queue-state transitions.
//!
//! Every mutation follows the same discipline: acquire the owning named
//! mutex, write to the store first, then apply the in-memory change, then
//! invalidate the ETag. A store failure therefore leaves volatile state
//! untouched, and a reader observing a new fingerprint always sees the full
//! transition.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::chat::{ChatMessage, ChatMessageHandler};
use crate::error::{ApiError, ApiResult};
use crate::etag::{fingerprint, EtagCache};
use crate::guards::{OperationGuards, TtlCache};
use crate::queue::{QueueModel, HISTORY_CAPACITY, HISTORY_LIVE};
use crate::resolvers::{extract_url, ResolverSet};
use crate::store::{
    Clip, ClipStatus, ClipStore, Platform, PlayLogEntry, Settings, StoreResult, SETTINGS_VERSION,
};

use super::commands::{parse_command, ChatCommand};

/// Submission throttling windows.
#[derive(Debug, Clone, Copy)]
pub struct SubmissionLimits {
    /// Window within which a repeated URL is dropped.
    pub url_window: Duration,
    /// Window within which one submitter may introduce only one URL.
    pub user_window: Duration,
}

impl Default for SubmissionLimits {
    fn default() -> Self {
        Self {
            url_window: Duration::from_secs(5),
            user_window: Duration::from_secs(10),
        }
    }
}

/// Lifetime of per-user submission timestamps; longer than the check window
/// so the sweeper, not the check, owns expiry.
const USER_CACHE_TTL: Duration = Duration::from_secs(60);

/// What happened to one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Inserted into the queue as approved.
    Queued,
    /// Persisted as pending moderation; queue unchanged.
    Pending,
    /// Already queued; the submitter was merged in.
    Merged,
    /// Merged into a stored clip that is not currently queueable
    /// (rejected or played).
    Held,
    /// Same URL processed within the dedup window.
    DuplicateUrl,
    /// Submitter hit the per-user window.
    RateLimited,
    /// No resolver claimed the URL.
    UnknownPlatform,
    /// Metadata fetch failed after retries.
    ResolveFailed,
    /// The clip's platform is disabled in settings.
    PlatformDisabled,
    /// Queue is closed to non-privileged submitters.
    QueueClosed,
    /// Queue is at its size limit.
    QueueFull,
}

/// Per-id outcome of a batch operation.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    pub not_found: Vec<String>,
}

/// The full state object served to polling clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    pub current: Option<Clip>,
    pub upcoming: Vec<Clip>,
    pub play_history: Vec<PlayLogEntry>,
    pub history_position: i64,
    pub is_open: bool,
    pub settings: Settings,
}

/// The authoritative queue engine shared by the chat and REST surfaces.
pub struct QueueService {
    store: Arc<ClipStore>,
    model: Mutex<QueueModel>,
    settings: RwLock<Settings>,
    etag: EtagCache,
    guards: OperationGuards,
    resolvers: ResolverSet,
    limits: SubmissionLimits,
    url_submissions: TtlCache<String, ()>,
    user_submissions: TtlCache<String, Instant>,
}

impl QueueService {
    /// Builds the service and rebuilds volatile state from the store:
    /// approved clips into the queue, the latest play-log entries into the
    /// history ring, and the settings row into the cache.
    pub fn new(store: Arc<ClipStore>, resolvers: ResolverSet) -> StoreResult<Self> {
        Self::with_limits(store, resolvers, SubmissionLimits::default())
    }

    pub fn with_limits(
        store: Arc<ClipStore>,
        resolvers: ResolverSet,
        limits: SubmissionLimits,
    ) -> StoreResult<Self> {
        let settings = store.init_settings()?;

        let mut model = QueueModel::new();
        let approved = store.get_clips_by_status(ClipStatus::Approved, None)?;
        log::info!("[Queue] Loaded {} approved clips from store", approved.len());
        for clip in approved {
            model.add(clip);
        }
        for entry in store.recent_play_logs(HISTORY_CAPACITY)? {
            model.push_history(entry);
        }

        Ok(Self {
            store,
            model: Mutex::new(model),
            settings: RwLock::new(settings),
            etag: EtagCache::new(),
            guards: OperationGuards::new(),
            resolvers,
            limits,
            url_submissions: TtlCache::new(limits.url_window),
            user_submissions: TtlCache::new(USER_CACHE_TTL),
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Read side
    // ─────────────────────────────────────────────────────────────────────────

    pub fn queue_state(&self) -> QueueState {
        let model = self.model.lock();
        QueueState {
            current: model.current_clip().cloned(),
            upcoming: model.queue(),
            play_history: model.history().iter().cloned().collect(),
            history_position: model.history_position(),
            is_open: model.is_open(),
            settings: self.settings.read().clone(),
        }
    }

    /// Current state fingerprint, recomputed lazily after mutations.
    pub fn etag(&self) -> String {
        self.etag.get_or_compute(|| {
            let model = self.model.lock();
            let settings = self.settings.read();
            let history: Vec<PlayLogEntry> = model.history().iter().cloned().collect();
            fingerprint(
                model.current_clip(),
                &model.queue(),
                &history,
                model.is_open(),
                &settings,
            )
        })
    }

    pub fn queue_len(&self) -> usize {
        self.model.lock().queue_len()
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn pending_clips(&self) -> ApiResult<Vec<Clip>> {
        Ok(self.store.get_clips_by_status(ClipStatus::Pending, None)?)
    }

    pub fn rejected_clips(&self) -> ApiResult<Vec<Clip>> {
        Ok(self.store.get_clips_by_status(ClipStatus::Rejected, None)?)
    }

    pub fn store(&self) -> &ClipStore {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Submission pipeline
    // ─────────────────────────────────────────────────────────────────────────

    /// Runs the clip-submission pipeline under the submission mutex.
    ///
    /// Drops are reported as outcomes, never errors: a failed submission
    /// leaves observable state equal to the pre-command state.
    pub async fn submit(
        &self,
        url: &str,
        submitter: &str,
        privileged: bool,
    ) -> ApiResult<SubmitOutcome> {
        let _guard = self.guards.submission.lock().await;

        // Duplicate-URL short circuit.
        let url_key = url.trim().to_string();
        if self.url_submissions.contains(&url_key) {
            log::debug!("[Queue] Dropping duplicate URL within window: {}", url_key);
            return Ok(SubmitOutcome::DuplicateUrl);
        }
        self.url_submissions.insert(url_key, ());

        // Per-user rate limit.
        let user_key = submitter.to_lowercase();
        if let Some(last) = self.user_submissions.get(&user_key) {
            if last.elapsed() < self.limits.user_window {
                log::debug!("[Queue] Rate limiting submitter {}", submitter);
                return Ok(SubmitOutcome::RateLimited);
            }
        }
        self.user_submissions.insert(user_key, Instant::now());

        // Platform detection.
        let Some((platform, clip_id)) = self.resolvers.detect(url) else {
            log::debug!("[Queue] No platform matched URL: {}", url);
            return Ok(SubmitOutcome::UnknownPlatform);
        };

        // Metadata fetch with retries.
        let data = match self.resolvers.resolve(platform, &clip_id).await {
            Ok(data) => data,
            Err(e) => {
                log::warn!("[Queue] Resolve failed for {url}: {e}");
                return Ok(SubmitOutcome::ResolveFailed);
            }
        };

        let settings = self.settings.read().clone();
        if !settings.queue.enabled_platforms.contains(&platform) {
            log::debug!("[Queue] Platform {} disabled, dropping", platform);
            return Ok(SubmitOutcome::PlatformDisabled);
        }

        let uuid = data.uuid();
        let auto_approve = !settings.queue.auto_moderation_enabled || privileged;
        let (is_open, at_limit, already_queued) = {
            let model = self.model.lock();
            let at_limit = settings
                .queue
                .limit
                .is_some_and(|limit| model.queue_len() >= limit as usize);
            (model.is_open(), at_limit, model.includes(&uuid))
        };

        // Merge path: the clip is already queued; record the new submitter
        // and reinsert (its popularity rank may change).
        if already_queued {
            let clip = self
                .store
                .upsert_clip(&data, &[submitter.to_string()], ClipStatus::Approved)?;
            self.model.lock().add(clip);
            self.etag.invalidate();
            return Ok(SubmitOutcome::Merged);
        }

        if !is_open && !privileged {
            log::debug!("[Queue] Queue closed, dropping submission from {}", submitter);
            return Ok(SubmitOutcome::QueueClosed);
        }

        if at_limit && auto_approve && !privileged {
            log::debug!("[Queue] Queue at limit, dropping submission from {}", submitter);
            return Ok(SubmitOutcome::QueueFull);
        }

        let status = if auto_approve {
            ClipStatus::Approved
        } else {
            ClipStatus::Pending
        };
        let clip = self
            .store
            .upsert_clip(&data, &[submitter.to_string()], status)?;

        // The stored status wins: a re-submitted clip that was previously
        // rejected or played stays in its holding area.
        match clip.status {
            ClipStatus::Approved => {
                self.model.lock().add(clip);
                self.etag.invalidate();
                Ok(SubmitOutcome::Queued)
            }
            ClipStatus::Pending => Ok(SubmitOutcome::Pending),
            _ => Ok(SubmitOutcome::Held),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queue transitions
    // ─────────────────────────────────────────────────────────────────────────

    /// Advances to the next queued clip. The clip that starts playing gets
    /// its play-log row; the finishing clip moves into the history ring.
    /// Always moves from `current` regardless of the history cursor, and
    /// resets the cursor to live.
    pub async fn advance(&self) -> ApiResult<()> {
        let _guard = self.guards.queue_ops.lock().await;
        self.advance_inner()
    }

    fn advance_inner(&self) -> ApiResult<()> {
        let (had_current, next, replaying) = {
            let model = self.model.lock();
            (
                model.current().is_some(),
                model.peek_front().cloned(),
                model.history_position() != HISTORY_LIVE,
            )
        };

        if !had_current && next.is_none() && !replaying {
            return Ok(());
        }

        let started = match &next {
            Some(clip) => Some(self.store.start_playback(&clip.uuid)?),
            None => None,
        };

        {
            let mut model = self.model.lock();
            if let Some(entry) = model.take_current() {
                // A replayed clip is already in the ring; only live clips
                // are appended when they finish.
                if !replaying {
                    model.push_history(entry);
                }
            }
            let current = match (next, started) {
                (Some(mut clip), Some((id, at))) => {
                    model.remove(&clip.uuid);
                    clip.status = ClipStatus::Played;
                    clip.played_at = Some(at);
                    Some(PlayLogEntry {
                        id,
                        clip,
                        played_at: at,
                        played_for: None,
                        completed_at: None,
                    })
                }
                _ => None,
            };
            model.set_current(current);
            model.set_history_position(HISTORY_LIVE);
        }

        self.etag.invalidate();
        Ok(())
    }

    /// Steps back to the most recent history entry. The displaced current
    /// clip returns to the head of the queue as approved. No-op when the
    /// history is empty.
    pub async fn previous(&self) -> ApiResult<()> {
        let _guard = self.guards.queue_ops.lock().await;
        self.previous_inner()
    }

    fn previous_inner(&self) -> ApiResult<()> {
        let current = {
            let model = self.model.lock();
            if model.history().is_empty() {
                return Ok(());
            }
            model.current().cloned()
        };

        if let Some(cur) = &current {
            self.store
                .update_clip_status(&cur.clip.uuid, ClipStatus::Approved)?;
        }

        {
            let mut model = self.model.lock();
            let Some(entry) = model.pop_history() else {
                return Ok(());
            };
            if let Some(cur) = model.take_current() {
                let mut clip = cur.clip;
                clip.status = ClipStatus::Approved;
                clip.played_at = None;
                model.prepend(clip);
            }
            model.set_current(Some(entry));
        }

        self.etag.invalidate();
        Ok(())
    }

    /// Plays a specific queued clip immediately.
    pub async fn play(&self, uuid: &str) -> ApiResult<()> {
        let _guard = self.guards.queue_ops.lock().await;
        self.play_inner(uuid)
    }

    fn play_inner(&self, uuid: &str) -> ApiResult<()> {
        let (clip, replaying) = {
            let model = self.model.lock();
            (
                model.get(uuid).cloned(),
                model.history_position() != HISTORY_LIVE,
            )
        };
        let Some(clip) = clip else {
            return Err(ApiError::ClipNotInQueue(uuid.to_string()));
        };

        let (id, at) = self.store.start_playback(&clip.uuid)?;

        {
            let mut model = self.model.lock();
            model.remove(uuid);
            if let Some(entry) = model.take_current() {
                if !replaying {
                    model.push_history(entry);
                }
            }
            let mut clip = clip;
            clip.status = ClipStatus::Played;
            clip.played_at = Some(at);
            model.set_current(Some(PlayLogEntry {
                id,
                clip,
                played_at: at,
                played_for: None,
                completed_at: None,
            }));
            model.set_history_position(HISTORY_LIVE);
        }

        self.etag.invalidate();
        Ok(())
    }

    /// Replays a clip from the history ring without appending a new
    /// play-log row. The cursor moves to the entry's index.
    pub async fn jump_to_history(&self, uuid: &str) -> ApiResult<()> {
        let _guard = self.guards.queue_ops.lock().await;
        self.jump_inner(uuid)
    }

    fn jump_inner(&self, uuid: &str) -> ApiResult<()> {
        {
            let mut model = self.model.lock();
            let idx = model
                .find_history_index(uuid)
                .ok_or_else(|| ApiError::ClipNotInHistory(uuid.to_string()))?;
            let entry = model.history()[idx].clone();
            let replaying = model.history_position() != HISTORY_LIVE;
            if !replaying {
                if let Some(cur) = model.take_current() {
                    model.push_history(cur);
                }
            }
            // Re-locate after the push; the ring may have evicted its head.
            let position = model
                .find_history_index(uuid)
                .map_or(HISTORY_LIVE, |i| i as i64);
            model.set_current(Some(entry));
            model.set_history_position(position);
        }

        self.etag.invalidate();
        Ok(())
    }

    /// Removes one history entry set and its persisted log rows.
    pub async fn remove_from_history(&self, uuid: &str) -> ApiResult<()> {
        let _guard = self.guards.queue_ops.lock().await;

        if self.model.lock().find_history_index(uuid).is_none() {
            return Err(ApiError::ClipNotInHistory(uuid.to_string()));
        }
        self.store.delete_play_logs_by_clip(uuid)?;
        self.model.lock().remove_history_by_clip(uuid);
        self.etag.invalidate();
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Moderation
    // ─────────────────────────────────────────────────────────────────────────

    /// Removes a queued clip into the rejected holding area.
    pub async fn remove(&self, uuid: &str) -> ApiResult<()> {
        let _guard = self.guards.queue_ops.lock().await;
        self.remove_inner(uuid)
    }

    fn remove_inner(&self, uuid: &str) -> ApiResult<()> {
        if !self.model.lock().includes(uuid) {
            return Err(ApiError::ClipNotInQueue(uuid.to_string()));
        }
        self.store.update_clip_status(uuid, ClipStatus::Rejected)?;
        self.model.lock().remove(uuid);
        self.etag.invalidate();
        Ok(())
    }

    /// Approves a pending clip into the queue.
    pub async fn approve(&self, uuid: &str) -> ApiResult<()> {
        let _guard = self.guards.queue_ops.lock().await;
        self.approve_inner(uuid)
    }

    fn approve_inner(&self, uuid: &str) -> ApiResult<()> {
        let clip = self
            .store
            .get_clip(uuid)?
            .filter(|c| c.status == ClipStatus::Pending)
            .ok_or_else(|| ApiError::PendingClipNotFound(uuid.to_string()))?;

        self.store.update_clip_status(uuid, ClipStatus::Approved)?;
        let mut clip = clip;
        clip.status = ClipStatus::Approved;
        self.model.lock().add(clip);
        self.etag.invalidate();
        Ok(())
    }

    /// Rejects a clip: pending clips leave the holding area, queued clips
    /// leave the queue.
    pub async fn reject(&self, uuid: &str) -> ApiResult<()> {
        let _guard = self.guards.queue_ops.lock().await;
        self.reject_inner(uuid)
    }

    fn reject_inner(&self, uuid: &str) -> ApiResult<()> {
        if self.store.get_clip(uuid)?.is_none() {
            return Err(ApiError::ClipNotFound(uuid.to_string()));
        }
        self.store.update_clip_status(uuid, ClipStatus::Rejected)?;
        let was_queued = self.model.lock().remove(uuid).is_some();
        if was_queued {
            self.etag.invalidate();
        }
        Ok(())
    }

    /// Restores a rejected clip straight into the queue.
    pub async fn restore(&self, uuid: &str) -> ApiResult<()> {
        let _guard = self.guards.queue_ops.lock().await;
        self.restore_inner(uuid)
    }

    fn restore_inner(&self, uuid: &str) -> ApiResult<()> {
        let clip = self
            .store
            .get_clip(uuid)?
            .ok_or_else(|| ApiError::RejectedClipNotFound(uuid.to_string()))?;
        if clip.status != ClipStatus::Rejected {
            return Err(ApiError::ClipNotRejected(uuid.to_string()));
        }

        self.store.update_clip_status(uuid, ClipStatus::Approved)?;
        let mut clip = clip;
        clip.status = ClipStatus::Approved;
        self.model.lock().add(clip);
        self.etag.invalidate();
        Ok(())
    }

    /// Removes every queued clip submitted by `name`.
    pub async fn remove_by_submitter(&self, name: &str) -> ApiResult<usize> {
        let _guard = self.guards.queue_ops.lock().await;
        let name = name.to_lowercase();
        let targets: Vec<String> = {
            let model = self.model.lock();
            model
                .queue()
                .into_iter()
                .filter(|c| c.submitters.iter().any(|s| s.to_lowercase() == name))
                .map(|c| c.uuid)
                .collect()
        };
        self.remove_targets(&targets)
    }

    /// Removes every queued clip from `platform`.
    pub async fn remove_by_platform(&self, platform: Platform) -> ApiResult<usize> {
        let _guard = self.guards.queue_ops.lock().await;
        let targets: Vec<String> = {
            let model = self.model.lock();
            model
                .queue()
                .into_iter()
                .filter(|c| c.data.platform == platform)
                .map(|c| c.uuid)
                .collect()
        };
        self.remove_targets(&targets)
    }

    fn remove_targets(&self, targets: &[String]) -> ApiResult<usize> {
        for uuid in targets {
            self.store.update_clip_status(uuid, ClipStatus::Rejected)?;
            self.model.lock().remove(uuid);
        }
        if !targets.is_empty() {
            self.etag.invalidate();
        }
        Ok(targets.len())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Batch operations (partial success)
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn batch_remove(&self, ids: &[String]) -> BatchOutcome {
        let _guard = self.guards.queue_ops.lock().await;
        self.batch_apply(ids, |uuid| self.remove_inner(uuid))
    }

    pub async fn batch_approve(&self, ids: &[String]) -> BatchOutcome {
        let _guard = self.guards.queue_ops.lock().await;
        self.batch_apply(ids, |uuid| self.approve_inner(uuid))
    }

    pub async fn batch_reject(&self, ids: &[String]) -> BatchOutcome {
        let _guard = self.guards.queue_ops.lock().await;
        self.batch_apply(ids, |uuid| self.reject_inner(uuid))
    }

    fn batch_apply<F>(&self, ids: &[String], mut op: F) -> BatchOutcome
    where
        F: FnMut(&str) -> ApiResult<()>,
    {
        let mut outcome = BatchOutcome::default();
        for id in ids {
            match op(id) {
                Ok(()) => outcome.succeeded.push(id.clone()),
                Err(e) if is_not_found(&e) => outcome.not_found.push(id.clone()),
                Err(e) => {
                    log::warn!("[Queue] Batch operation failed for {}: {}", id, e);
                    outcome.failed.push(id.clone());
                }
            }
        }
        outcome
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Bulk clears
    // ─────────────────────────────────────────────────────────────────────────

    /// Clears the queue. Approved clips are set to rejected and then
    /// deleted (the historical dual write); the current clip is preserved.
    pub async fn clear_queue(&self) -> ApiResult<usize> {
        let _guard = self.guards.queue_ops.lock().await;
        let cleared = self.store.reject_and_delete_approved()?;
        self.model.lock().clear_queue();
        self.etag.invalidate();
        log::info!("[Queue] Cleared {} queued clips", cleared);
        Ok(cleared)
    }

    /// Clears the play history: played clips and their log rows are
    /// deleted, and the ring is emptied.
    pub async fn clear_history(&self) -> ApiResult<()> {
        let _guard = self.guards.queue_ops.lock().await;
        self.store
            .delete_play_logs_by_clip_status(ClipStatus::Played)?;
        self.store.delete_clips_by_status(ClipStatus::Played)?;
        self.model.lock().clear_history();
        self.etag.invalidate();
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Open / close
    // ─────────────────────────────────────────────────────────────────────────

    /// Opens the queue. Idempotent: re-opening an open queue leaves the
    /// fingerprint untouched.
    pub async fn open(&self) -> ApiResult<()> {
        self.set_open(true).await
    }

    pub async fn close(&self) -> ApiResult<()> {
        self.set_open(false).await
    }

    async fn set_open(&self, open: bool) -> ApiResult<()> {
        let _guard = self.guards.queue_ops.lock().await;
        let changed = {
            let mut model = self.model.lock();
            let changed = model.is_open() != open;
            model.set_open(open);
            changed
        };
        if changed {
            self.etag.invalidate();
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Settings
    // ─────────────────────────────────────────────────────────────────────────

    /// Validates and persists a full settings replacement.
    pub fn update_settings(&self, mut settings: Settings) -> ApiResult<Settings> {
        settings.version = SETTINGS_VERSION;
        settings
            .validate()
            .map_err(ApiError::InvalidSettings)?;
        self.store.update_settings(&settings)?;
        *self.settings.write() = settings.clone();
        self.etag.invalidate();
        Ok(settings)
    }

    fn mutate_settings<F>(&self, mutate: F) -> ApiResult<()>
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.settings.read().clone();
        mutate(&mut settings);
        self.update_settings(settings)?;
        Ok(())
    }

    pub fn set_limit(&self, limit: u32) -> ApiResult<()> {
        self.mutate_settings(|s| s.queue.limit = Some(limit))
    }

    pub fn remove_limit(&self) -> ApiResult<()> {
        self.mutate_settings(|s| s.queue.limit = None)
    }

    pub fn set_platform_enabled(&self, platform: Platform, enabled: bool) -> ApiResult<()> {
        self.mutate_settings(|s| {
            if enabled {
                s.queue.enabled_platforms.insert(platform);
            } else {
                s.queue.enabled_platforms.remove(&platform);
            }
        })
    }

    pub fn set_auto_moderation(&self, enabled: bool) -> ApiResult<()> {
        self.mutate_settings(|s| s.queue.auto_moderation_enabled = enabled)
    }

    /// Clears the submission throttling caches.
    pub fn purge_submission_caches(&self) {
        self.url_submissions.clear();
        self.user_submissions.clear();
    }

    /// Sweeps expired throttle entries; called by the periodic cleaner.
    pub fn cleanup_caches(&self) {
        self.url_submissions.cleanup();
        self.user_submissions.cleanup();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Chat dispatch
    // ─────────────────────────────────────────────────────────────────────────

    async fn execute_command(&self, command: ChatCommand) -> ApiResult<()> {
        match command {
            ChatCommand::Open => self.open().await,
            ChatCommand::Close => self.close().await,
            ChatCommand::Clear => self.clear_queue().await.map(|_| ()),
            ChatCommand::SetLimit(n) => self.set_limit(n),
            ChatCommand::RemoveLimit => self.remove_limit(),
            ChatCommand::Next => self.advance().await,
            ChatCommand::Previous => self.previous().await,
            ChatCommand::RemoveBySubmitter(name) => {
                self.remove_by_submitter(&name).await.map(|_| ())
            }
            ChatCommand::RemoveByPlatform(platform) => {
                self.remove_by_platform(platform).await.map(|_| ())
            }
            ChatCommand::EnablePlatform(platform) => self.set_platform_enabled(platform, true),
            ChatCommand::DisablePlatform(platform) => self.set_platform_enabled(platform, false),
            ChatCommand::EnableAutomod => self.set_auto_moderation(true),
            ChatCommand::DisableAutomod => self.set_auto_moderation(false),
            ChatCommand::PurgeCache => {
                self.purge_submission_caches();
                Ok(())
            }
            ChatCommand::PurgeHistory => self.clear_history().await,
        }
    }
}

fn is_not_found(error: &ApiError) -> bool {
    matches!(
        error,
        ApiError::ClipNotFound(_)
            | ApiError::ClipNotInQueue(_)
            | ApiError::ClipNotInHistory(_)
            | ApiError::PendingClipNotFound(_)
            | ApiError::RejectedClipNotFound(_)
    )
}

#[async_trait]
impl ChatMessageHandler for QueueService {
    /// Dispatches one chat message: prefixed messages are commands
    /// (privileged senders only), anything with a URL enters the
    /// submission pipeline.
    async fn on_message(&self, message: ChatMessage) {
        let (prefix, allowed) = {
            let settings = self.settings.read();
            (
                settings.command_prefix.clone(),
                settings.allowed_commands.clone(),
            )
        };

        let text = message.text.trim();
        if text.starts_with(&prefix) {
            if !message.is_moderator && !message.is_broadcaster {
                log::debug!(
                    "[Queue] Dropping command from non-privileged chatter {}",
                    message.username
                );
                return;
            }
            let Some(command) = parse_command(text, &prefix) else {
                log::debug!("[Queue] Unknown chat command: {}", text);
                return;
            };
            if !allowed.contains(command.name()) {
                log::debug!("[Queue] Command {} not in allowed set", command.name());
                return;
            }
            if let Err(e) = self.execute_command(command).await {
                log::warn!("[Queue] Chat command failed: {}", e);
            }
        } else if let Some(url) = extract_url(text) {
            let privileged = message.is_moderator || message.is_broadcaster;
            match self.submit(url, &message.username, privileged).await {
                Ok(outcome) => {
                    log::debug!("[Queue] Chat submission from {}: {:?}", message.username, outcome)
                }
                Err(e) => log::warn!("[Queue] Chat submission failed: {}", e),
            }
        }
    }
}
