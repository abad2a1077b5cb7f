//! In-memory queue state: popularity-ordered queue, play-history ring,
//! current clip and the history navigation cursor.
//!
//! The model is purely volatile and holds no persistence logic; the queue
//! service rebuilds it from the store on startup and mutates it only under
//! the queue-operation mutex (or the submission mutex for inserts).

use std::collections::VecDeque;

use crate::store::{Clip, PlayLogEntry};

/// Number of play-log entries retained in the in-memory ring.
pub const HISTORY_CAPACITY: usize = 100;

/// History cursor value meaning "live" (queue mode, not replaying).
pub const HISTORY_LIVE: i64 = -1;

/// One queued clip with its insertion sequence number.
///
/// The sequence number is the tie-breaker for popularity sorting: equal
/// submitter counts preserve the earlier insertion's position, and merges
/// keep the original sequence so a clip never loses its tie-break rank.
#[derive(Debug, Clone)]
struct QueueEntry {
    seq: u64,
    clip: Clip,
}

/// Volatile queue state.
///
/// `current` carries the play-log entry created when the clip started
/// playing, so moving it into the history ring later never re-logs it.
#[derive(Debug)]
pub struct QueueModel {
    current: Option<PlayLogEntry>,
    entries: Vec<QueueEntry>,
    history: VecDeque<PlayLogEntry>,
    history_position: i64,
    is_open: bool,
    next_seq: u64,
}

impl Default for QueueModel {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueModel {
    pub fn new() -> Self {
        Self {
            current: None,
            entries: Vec::new(),
            history: VecDeque::with_capacity(HISTORY_CAPACITY),
            history_position: HISTORY_LIVE,
            is_open: true,
            next_seq: 0,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queue
    // ─────────────────────────────────────────────────────────────────────────

    /// Inserts a clip, or replaces an existing entry with the same UUID
    /// (keeping its insertion rank), then restores popularity order.
    pub fn add(&mut self, clip: Clip) {
        match self.entries.iter_mut().find(|e| e.clip.uuid == clip.uuid) {
            Some(entry) => entry.clip = clip,
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.entries.push(QueueEntry { seq, clip });
            }
        }
        self.sort();
    }

    /// Puts a clip back at the head of the queue (used by `previous`).
    ///
    /// The clip receives a sequence rank ahead of every current entry, so
    /// among equally popular clips it sorts first.
    pub fn prepend(&mut self, clip: Clip) {
        self.remove(&clip.uuid);
        let min_seq = self.entries.iter().map(|e| e.seq).min().unwrap_or(1);
        self.entries.push(QueueEntry {
            seq: min_seq.saturating_sub(1),
            clip,
        });
        self.sort();
    }

    /// Removes a clip by UUID identity.
    pub fn remove(&mut self, uuid: &str) -> Option<Clip> {
        let idx = self.entries.iter().position(|e| e.clip.uuid == uuid)?;
        Some(self.entries.remove(idx).clip)
    }

    /// Whether a clip with this UUID is queued.
    pub fn includes(&self, uuid: &str) -> bool {
        self.entries.iter().any(|e| e.clip.uuid == uuid)
    }

    /// The queued clip with this UUID, if any.
    pub fn get(&self, uuid: &str) -> Option<&Clip> {
        self.entries
            .iter()
            .find(|e| e.clip.uuid == uuid)
            .map(|e| &e.clip)
    }

    /// The head of the queue without removing it.
    pub fn peek_front(&self) -> Option<&Clip> {
        self.entries.first().map(|e| &e.clip)
    }

    /// Removes and returns the head of the queue.
    pub fn pop_front(&mut self) -> Option<Clip> {
        if self.entries.is_empty() {
            return None;
        }
        Some(self.entries.remove(0).clip)
    }

    pub fn queue(&self) -> Vec<Clip> {
        self.entries.iter().map(|e| e.clip.clone()).collect()
    }

    pub fn queue_len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear_queue(&mut self) {
        self.entries.clear();
    }

    /// Removes every queued clip matching the predicate, returning the
    /// removed clips.
    pub fn remove_where<F>(&mut self, mut predicate: F) -> Vec<Clip>
    where
        F: FnMut(&Clip) -> bool,
    {
        let mut removed = Vec::new();
        self.entries.retain(|e| {
            if predicate(&e.clip) {
                removed.push(e.clip.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| {
                b.clip
                    .submitters
                    .len()
                    .cmp(&a.clip.submitters.len())
                    .then(a.seq.cmp(&b.seq))
            });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Current clip
    // ─────────────────────────────────────────────────────────────────────────

    pub fn current(&self) -> Option<&PlayLogEntry> {
        self.current.as_ref()
    }

    pub fn current_clip(&self) -> Option<&Clip> {
        self.current.as_ref().map(|e| &e.clip)
    }

    pub fn set_current(&mut self, entry: Option<PlayLogEntry>) {
        self.current = entry;
    }

    pub fn take_current(&mut self) -> Option<PlayLogEntry> {
        self.current.take()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // History
    // ─────────────────────────────────────────────────────────────────────────

    /// Appends a play-log entry, evicting the oldest when the ring is full.
    pub fn push_history(&mut self, entry: PlayLogEntry) {
        if self.history.len() == HISTORY_CAPACITY {
            self.history.pop_front();
        }
        self.history.push_back(entry);
    }

    /// Removes and returns the most recent history entry.
    pub fn pop_history(&mut self) -> Option<PlayLogEntry> {
        self.history.pop_back()
    }

    pub fn history(&self) -> &VecDeque<PlayLogEntry> {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
        self.history_position = HISTORY_LIVE;
    }

    /// Index of the most recent history entry for a clip UUID.
    pub fn find_history_index(&self, uuid: &str) -> Option<usize> {
        self.history.iter().rposition(|e| e.clip.uuid == uuid)
    }

    /// Removes every history entry for a clip UUID, returning how many were
    /// dropped. Resets the cursor to live if it pointed past the new end.
    pub fn remove_history_by_clip(&mut self, uuid: &str) -> usize {
        let before = self.history.len();
        self.history.retain(|e| e.clip.uuid != uuid);
        if self.history_position >= self.history.len() as i64 {
            self.history_position = HISTORY_LIVE;
        }
        before - self.history.len()
    }

    pub fn history_position(&self) -> i64 {
        self.history_position
    }

    pub fn set_history_position(&mut self, position: i64) {
        self.history_position = position;
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Open flag
    // ─────────────────────────────────────────────────────────────────────────

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn set_open(&mut self, open: bool) {
        self.is_open = open;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ClipData, ClipStatus, Platform};
    use chrono::Utc;

    fn clip(id: &str, submitters: &[&str]) -> Clip {
        let data = ClipData {
            platform: Platform::Twitch,
            clip_id: id.into(),
            url: format!("https://clips.twitch.tv/{id}"),
            embed_url: format!("https://clips.twitch.tv/embed?clip={id}"),
            video_url: None,
            thumbnail_url: None,
            title: "T".into(),
            channel: "c".into(),
            creator: "creator".into(),
            category: None,
            duration: None,
            content_type: None,
            created_at: None,
        };
        Clip {
            uuid: data.uuid(),
            data,
            submitters: submitters.iter().map(|s| s.to_string()).collect(),
            status: ClipStatus::Approved,
            submitted_at: Utc::now(),
            played_at: None,
        }
    }

    fn entry(id: i64, c: Clip) -> PlayLogEntry {
        PlayLogEntry {
            id,
            clip: c,
            played_at: Utc::now(),
            played_for: None,
            completed_at: None,
        }
    }

    #[test]
    fn queue_orders_by_popularity_then_insertion() {
        let mut model = QueueModel::new();
        model.add(clip("a", &["u1"]));
        model.add(clip("b", &["u2", "u3"]));
        model.add(clip("c", &["u4"]));

        let uuids: Vec<String> = model.queue().into_iter().map(|c| c.uuid).collect();
        assert_eq!(uuids, vec!["twitch:b", "twitch:a", "twitch:c"]);
    }

    #[test]
    fn merge_promotes_clip_but_keeps_tie_rank() {
        let mut model = QueueModel::new();
        model.add(clip("a", &["u1"]));
        model.add(clip("b", &["u2", "u3"]));
        // Queue is [b, a]. A gains a second submitter and ties with b, but
        // a was inserted first so it wins the tie.
        model.add(clip("a", &["u1", "u4"]));

        let uuids: Vec<String> = model.queue().into_iter().map(|c| c.uuid).collect();
        assert_eq!(uuids, vec!["twitch:a", "twitch:b"]);
    }

    #[test]
    fn add_never_duplicates_a_uuid() {
        let mut model = QueueModel::new();
        model.add(clip("a", &["u1"]));
        model.add(clip("a", &["u1", "u2"]));
        assert_eq!(model.queue_len(), 1);
        assert!(model.includes("twitch:a"));
    }

    #[test]
    fn prepend_puts_clip_ahead_of_equal_popularity() {
        let mut model = QueueModel::new();
        model.add(clip("a", &["u1"]));
        model.add(clip("b", &["u2"]));
        model.prepend(clip("c", &["u3"]));

        let uuids: Vec<String> = model.queue().into_iter().map(|c| c.uuid).collect();
        assert_eq!(uuids, vec!["twitch:c", "twitch:a", "twitch:b"]);
    }

    #[test]
    fn prepend_does_not_outrank_more_popular_clips() {
        let mut model = QueueModel::new();
        model.add(clip("a", &["u1", "u2", "u3"]));
        model.prepend(clip("b", &["u4"]));

        let uuids: Vec<String> = model.queue().into_iter().map(|c| c.uuid).collect();
        assert_eq!(uuids, vec!["twitch:a", "twitch:b"]);
    }

    #[test]
    fn remove_is_by_uuid_identity() {
        let mut model = QueueModel::new();
        model.add(clip("a", &["u1"]));
        assert!(model.remove("twitch:a").is_some());
        assert!(model.remove("twitch:a").is_none());
        assert!(!model.includes("twitch:a"));
    }

    #[test]
    fn history_ring_caps_at_capacity() {
        let mut model = QueueModel::new();
        for i in 0..(HISTORY_CAPACITY + 10) {
            model.push_history(entry(i as i64, clip(&format!("c{i}"), &["u"])));
        }
        assert_eq!(model.history().len(), HISTORY_CAPACITY);
        // Oldest entries were evicted.
        assert_eq!(model.history().front().unwrap().id, 10);
    }

    #[test]
    fn find_history_index_returns_most_recent_occurrence() {
        let mut model = QueueModel::new();
        model.push_history(entry(1, clip("a", &["u"])));
        model.push_history(entry(2, clip("b", &["u"])));
        model.push_history(entry(3, clip("a", &["u"])));

        assert_eq!(model.find_history_index("twitch:a"), Some(2));
        assert_eq!(model.find_history_index("twitch:b"), Some(1));
        assert_eq!(model.find_history_index("twitch:x"), None);
    }

    #[test]
    fn remove_history_by_clip_resets_dangling_cursor() {
        let mut model = QueueModel::new();
        model.push_history(entry(1, clip("a", &["u"])));
        model.push_history(entry(2, clip("b", &["u"])));
        model.set_history_position(1);

        assert_eq!(model.remove_history_by_clip("twitch:b"), 1);
        assert_eq!(model.history_position(), HISTORY_LIVE);
    }

    #[test]
    fn open_close_flag_round_trip() {
        let mut model = QueueModel::new();
        assert!(model.is_open());
        model.set_open(false);
        assert!(!model.is_open());
        model.set_open(false);
        assert!(!model.is_open());
    }
}
