//! Durable clip inventory backed by SQLite.
//!
//! The store exclusively owns persistent state: clips, their submitter sets,
//! the append-only play-log, and the single settings row. Every exposed
//! operation is atomic; multi-step merges run in one transaction. The journal
//! mode is write-ahead, so concurrent readers are tolerated while the
//! connection mutex serializes writers.

pub mod models;

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use thiserror::Error;

pub use models::{
    Clip, ClipData, ClipStatus, LoggerSettings, Platform, PlayLogEntry, QueueSettings, Settings,
    SETTINGS_VERSION,
};

/// Errors raised by store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying SQLite fault.
    #[error("storage error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Payload failed schema validation before write.
    #[error("validation error: {0}")]
    Validation(String),

    /// A stored row no longer satisfies the schema.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    /// Filesystem fault while opening the database.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenient Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Sort order for play-log reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOrder {
    Asc,
    Desc,
}

/// One page of play-log entries for cursor pagination.
///
/// The cursor is the autoincrement id of the last entry in the page; it is
/// opaque to clients and stable across restarts.
#[derive(Debug)]
pub struct PlayLogPage {
    pub entries: Vec<PlayLogEntry>,
    pub next_cursor: Option<i64>,
    pub has_more: bool,
}

/// Default row limit for `played` clip listings.
const PLAYED_DEFAULT_LIMIT: usize = 50;

// ─────────────────────────────────────────────────────────────────────────────
// Migrations
// ─────────────────────────────────────────────────────────────────────────────

/// Versioned migrations, applied in order on startup. `PRAGMA user_version`
/// records the last applied index + 1.
const MIGRATIONS: [&str; 2] = [
    // v1: base schema
    "
    CREATE TABLE clips (
        uuid          TEXT PRIMARY KEY,
        platform      TEXT NOT NULL,
        clip_id       TEXT NOT NULL,
        url           TEXT NOT NULL,
        embed_url     TEXT NOT NULL,
        video_url     TEXT,
        thumbnail_url TEXT,
        title         TEXT NOT NULL,
        channel       TEXT NOT NULL,
        creator       TEXT NOT NULL,
        category      TEXT,
        duration      REAL,
        content_type  TEXT,
        created_at    TEXT,
        status        TEXT NOT NULL,
        submitted_at  TEXT NOT NULL,
        played_at     TEXT
    );
    CREATE TABLE clip_submitters (
        clip_uuid TEXT NOT NULL REFERENCES clips(uuid) ON DELETE CASCADE,
        submitter TEXT NOT NULL,
        UNIQUE (clip_uuid, submitter)
    );
    CREATE TABLE play_log (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        clip_uuid    TEXT NOT NULL REFERENCES clips(uuid) ON DELETE CASCADE,
        played_at    TEXT NOT NULL,
        played_for   REAL,
        completed_at TEXT
    );
    CREATE TABLE settings (
        id      INTEGER PRIMARY KEY CHECK (id = 1),
        version INTEGER NOT NULL,
        data    TEXT NOT NULL
    );
    CREATE INDEX idx_clips_status ON clips(status);
    CREATE INDEX idx_clips_platform ON clips(platform);
    CREATE INDEX idx_clips_channel ON clips(channel);
    CREATE INDEX idx_clips_status_submitted ON clips(status, submitted_at);
    CREATE INDEX idx_play_log_played_at ON play_log(played_at);
    ",
    // v2: speed up history joins
    "
    CREATE INDEX idx_play_log_clip ON play_log(clip_uuid);
    ",
];

// ─────────────────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed clip store.
///
/// Cheap to share behind an `Arc`; the inner connection mutex serializes
/// writers while WAL mode keeps readers unblocked.
pub struct ClipStore {
    conn: Mutex<Connection>,
}

impl ClipStore {
    /// Opens (or creates) the database at `path` and applies migrations.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Opens an in-memory database. Used by tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StoreResult<Self> {
        // journal_mode returns the resulting mode as a row, so it cannot go
        // through pragma_update.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let version: usize =
            tx.query_row("SELECT user_version FROM pragma_user_version", [], |row| {
                row.get::<_, i64>(0).map(|v| v as usize)
            })?;

        for (idx, migration) in MIGRATIONS.iter().enumerate().skip(version) {
            log::info!("[Store] Applying migration {}", idx + 1);
            tx.execute_batch(migration)?;
        }
        tx.pragma_update(None, "user_version", MIGRATIONS.len() as i64)?;
        tx.commit()?;
        Ok(())
    }

    /// Flushes the WAL and closes the connection. Called during shutdown;
    /// further operations would block forever, so this consumes nothing and
    /// simply checkpoints.
    pub fn checkpoint(&self) {
        let conn = self.conn.lock();
        if let Err(e) = conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(())) {
            log::warn!("[Store] WAL checkpoint failed: {}", e);
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Clips
    // ─────────────────────────────────────────────────────────────────────────

    /// Inserts a clip or merges metadata and submitters into an existing one.
    ///
    /// If the clip is absent, the row and its submitter rows are inserted
    /// with the given status. If present, mutable metadata is patched and
    /// each new submitter is inserted, ignoring unique-violation duplicates;
    /// the existing status is left untouched. Returns the merged clip with
    /// its full submitter set.
    pub fn upsert_clip(
        &self,
        data: &ClipData,
        submitters: &[String],
        status: ClipStatus,
    ) -> StoreResult<Clip> {
        data.validate().map_err(StoreError::Validation)?;
        let uuid = data.uuid();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let exists: bool = tx
            .query_row("SELECT 1 FROM clips WHERE uuid = ?1", [&uuid], |_| Ok(()))
            .optional()?
            .is_some();

        if exists {
            tx.execute(
                "UPDATE clips SET
                    url = ?2, embed_url = ?3, video_url = ?4, thumbnail_url = ?5,
                    title = ?6, channel = ?7, creator = ?8, category = ?9,
                    duration = ?10, content_type = ?11, created_at = ?12
                 WHERE uuid = ?1",
                params![
                    uuid,
                    data.url,
                    data.embed_url,
                    data.video_url,
                    data.thumbnail_url,
                    data.title,
                    data.channel,
                    data.creator,
                    data.category,
                    data.duration,
                    data.content_type,
                    data.created_at.map(|t| t.to_rfc3339()),
                ],
            )?;
        } else {
            tx.execute(
                "INSERT INTO clips (
                    uuid, platform, clip_id, url, embed_url, video_url, thumbnail_url,
                    title, channel, creator, category, duration, content_type,
                    created_at, status, submitted_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                params![
                    uuid,
                    data.platform.tag(),
                    data.clip_id,
                    data.url,
                    data.embed_url,
                    data.video_url,
                    data.thumbnail_url,
                    data.title,
                    data.channel,
                    data.creator,
                    data.category,
                    data.duration,
                    data.content_type,
                    data.created_at.map(|t| t.to_rfc3339()),
                    status.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )?;
        }

        for submitter in submitters {
            tx.execute(
                "INSERT OR IGNORE INTO clip_submitters (clip_uuid, submitter) VALUES (?1, ?2)",
                params![uuid, submitter],
            )?;
        }

        let clip = Self::load_clip_tx(&tx, &uuid)?
            .ok_or_else(|| StoreError::Corrupt(format!("clip {uuid} vanished mid-upsert")))?;
        tx.commit()?;
        Ok(clip)
    }

    /// Fetches one clip by UUID. Rows failing validation are logged and
    /// treated as absent.
    pub fn get_clip(&self, uuid: &str) -> StoreResult<Option<Clip>> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let clip = Self::load_clip_tx(&tx, uuid)?;
        tx.commit()?;
        Ok(clip)
    }

    fn load_clip_tx(tx: &Transaction<'_>, uuid: &str) -> StoreResult<Option<Clip>> {
        let row = tx
            .query_row(
                "SELECT uuid, platform, clip_id, url, embed_url, video_url, thumbnail_url,
                        title, channel, creator, category, duration, content_type,
                        created_at, status, submitted_at, played_at
                 FROM clips WHERE uuid = ?1",
                [uuid],
                |row| Self::clip_from_row(row, Vec::new()),
            )
            .optional()?;

        let mut clip = match row {
            Some(Ok(clip)) => clip,
            Some(Err(reason)) => {
                log::warn!("[Store] Dropping invalid clip row {}: {}", uuid, reason);
                return Ok(None);
            }
            None => return Ok(None),
        };

        let mut stmt = tx.prepare(
            "SELECT submitter FROM clip_submitters WHERE clip_uuid = ?1 ORDER BY rowid",
        )?;
        clip.submitters = stmt
            .query_map([uuid], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        match clip.validate() {
            Ok(()) => Ok(Some(clip)),
            Err(reason) => {
                log::warn!("[Store] Dropping invalid clip row {}: {}", uuid, reason);
                Ok(None)
            }
        }
    }

    /// Maps a clip row, deferring schema errors so the caller can decide
    /// whether to drop or fail.
    #[allow(clippy::type_complexity)]
    fn clip_from_row(row: &Row<'_>, submitters: Vec<String>) -> rusqlite::Result<Result<Clip, String>> {
        let uuid: String = row.get(0)?;
        let platform: String = row.get(1)?;
        let status: String = row.get(14)?;
        let submitted_at: String = row.get(15)?;

        let parse = || -> Result<Clip, String> {
            Ok(Clip {
                uuid: uuid.clone(),
                data: ClipData {
                    platform: platform.parse()?,
                    clip_id: row.get(2).map_err(|e| e.to_string())?,
                    url: row.get(3).map_err(|e| e.to_string())?,
                    embed_url: row.get(4).map_err(|e| e.to_string())?,
                    video_url: row.get(5).map_err(|e| e.to_string())?,
                    thumbnail_url: row.get(6).map_err(|e| e.to_string())?,
                    title: row.get(7).map_err(|e| e.to_string())?,
                    channel: row.get(8).map_err(|e| e.to_string())?,
                    creator: row.get(9).map_err(|e| e.to_string())?,
                    category: row.get(10).map_err(|e| e.to_string())?,
                    duration: row.get(11).map_err(|e| e.to_string())?,
                    content_type: row.get(12).map_err(|e| e.to_string())?,
                    created_at: parse_optional_ts(row.get(13).map_err(|e| e.to_string())?)?,
                },
                submitters,
                status: status.parse()?,
                submitted_at: parse_ts(&submitted_at)?,
                played_at: parse_optional_ts(row.get(16).map_err(|e| e.to_string())?)?,
            })
        };
        Ok(parse())
    }

    /// Lists clips in one status with submitters fetched in a single batched
    /// query (no per-clip round trips). Invalid rows are dropped and logged.
    ///
    /// Ordering: `approved` ascending by submission time, `played` descending
    /// with a default limit of 50, everything else ascending.
    pub fn get_clips_by_status(
        &self,
        status: ClipStatus,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Clip>> {
        let (order, effective_limit) = match status {
            ClipStatus::Played => ("DESC", limit.or(Some(PLAYED_DEFAULT_LIMIT))),
            _ => ("ASC", limit),
        };

        let conn = self.conn.lock();
        let sql = format!(
            "SELECT uuid, platform, clip_id, url, embed_url, video_url, thumbnail_url,
                    title, channel, creator, category, duration, content_type,
                    created_at, status, submitted_at, played_at
             FROM clips WHERE status = ?1
             ORDER BY submitted_at {order}, uuid {order}
             LIMIT ?2"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![status.as_str(), effective_limit.map_or(-1, |l| l as i64)],
            |row| Self::clip_from_row(row, Vec::new()),
        )?;

        let mut clips = Vec::new();
        for row in rows {
            match row? {
                Ok(clip) => clips.push(clip),
                Err(reason) => log::warn!("[Store] Dropping invalid clip row: {}", reason),
            }
        }

        attach_submitters(&conn, &mut clips)?;
        clips.retain(|clip| match clip.validate() {
            Ok(()) => true,
            Err(reason) => {
                log::warn!("[Store] Dropping invalid clip {}: {}", clip.uuid, reason);
                false
            }
        });
        Ok(clips)
    }

    /// Unconditionally writes a clip's status. State-machine checks are the
    /// callers' responsibility. Transitioning to `played` stamps `played_at`.
    pub fn update_clip_status(&self, uuid: &str, status: ClipStatus) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = if status == ClipStatus::Played {
            conn.execute(
                "UPDATE clips SET status = ?2, played_at = ?3 WHERE uuid = ?1",
                params![uuid, status.as_str(), Utc::now().to_rfc3339()],
            )?
        } else {
            conn.execute(
                "UPDATE clips SET status = ?2 WHERE uuid = ?1",
                params![uuid, status.as_str()],
            )?
        };
        if changed == 0 {
            log::debug!("[Store] Status update touched no rows: {}", uuid);
        }
        Ok(())
    }

    /// Deletes a clip; submitter and play-log rows cascade.
    pub fn delete_clip(&self, uuid: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();
        Ok(conn.execute("DELETE FROM clips WHERE uuid = ?1", [uuid])? > 0)
    }

    /// Deletes every clip in one status; dependents cascade.
    pub fn delete_clips_by_status(&self, status: ClipStatus) -> StoreResult<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM clips WHERE status = ?1",
            [status.as_str()],
        )?)
    }

    /// The historical queue-clear contract: approved clips are first set to
    /// rejected, then deleted, in one transaction. Returns how many clips
    /// were cleared.
    pub fn reject_and_delete_approved(&self) -> StoreResult<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let uuids: Vec<String> = {
            let mut stmt = tx.prepare("SELECT uuid FROM clips WHERE status = 'approved'")?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        for uuid in &uuids {
            tx.execute(
                "UPDATE clips SET status = 'rejected' WHERE uuid = ?1",
                [uuid],
            )?;
            tx.execute("DELETE FROM clips WHERE uuid = ?1", [uuid])?;
        }
        tx.commit()?;
        Ok(uuids.len())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Play log
    // ─────────────────────────────────────────────────────────────────────────

    /// Appends a play-log row and returns its autoincrement id. The
    /// timestamp defaults to now.
    pub fn insert_play_log(
        &self,
        clip_uuid: &str,
        played_at: Option<DateTime<Utc>>,
    ) -> StoreResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO play_log (clip_uuid, played_at) VALUES (?1, ?2)",
            params![clip_uuid, played_at.unwrap_or_else(Utc::now).to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Flat play-log listing in the given order. Entries whose clip row
    /// fails validation are dropped and logged.
    pub fn list_play_logs(
        &self,
        limit: Option<usize>,
        order: LogOrder,
    ) -> StoreResult<Vec<PlayLogEntry>> {
        let conn = self.conn.lock();
        let dir = match order {
            LogOrder::Asc => "ASC",
            LogOrder::Desc => "DESC",
        };
        let sql = format!(
            "SELECT id, clip_uuid, played_at, played_for, completed_at
             FROM play_log ORDER BY id {dir} LIMIT ?1"
        );
        let mut stmt = conn.prepare(&sql)?;
        let raw: Vec<RawLogRow> = stmt
            .query_map([limit.map_or(-1, |l| l as i64)], raw_log_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        join_log_clips(&conn, raw)
    }

    /// The most recent `limit` play-log entries, oldest first. Used to
    /// rebuild the in-memory history ring on startup.
    pub fn recent_play_logs(&self, limit: usize) -> StoreResult<Vec<PlayLogEntry>> {
        let mut entries = self.list_play_logs(Some(limit), LogOrder::Desc)?;
        entries.reverse();
        Ok(entries)
    }

    /// Cursor-paginated play-log page, newest first. `cursor` is the id of
    /// the last entry of the previous page.
    pub fn page_play_logs(
        &self,
        limit: usize,
        cursor: Option<i64>,
    ) -> StoreResult<PlayLogPage> {
        let conn = self.conn.lock();
        // Fetch one extra row to learn whether another page exists.
        let mut stmt = conn.prepare(
            "SELECT id, clip_uuid, played_at, played_for, completed_at
             FROM play_log
             WHERE (?1 IS NULL OR id < ?1)
             ORDER BY id DESC LIMIT ?2",
        )?;
        let raw: Vec<RawLogRow> = stmt
            .query_map(params![cursor, (limit + 1) as i64], raw_log_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let has_more = raw.len() > limit;
        let raw = raw.into_iter().take(limit).collect::<Vec<_>>();
        let entries = join_log_clips(&conn, raw)?;
        let next_cursor = if has_more {
            entries.last().map(|e| e.id)
        } else {
            None
        };
        Ok(PlayLogPage {
            entries,
            next_cursor,
            has_more,
        })
    }

    /// Records that a clip started playing, in one transaction: the clip is
    /// marked played (stamping `played_at`) and a play-log row is inserted.
    /// Returns the new log row's id and timestamp.
    pub fn start_playback(&self, uuid: &str) -> StoreResult<(i64, DateTime<Utc>)> {
        let now = Utc::now();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE clips SET status = 'played', played_at = ?2 WHERE uuid = ?1",
            params![uuid, now.to_rfc3339()],
        )?;
        tx.execute(
            "INSERT INTO play_log (clip_uuid, played_at) VALUES (?1, ?2)",
            params![uuid, now.to_rfc3339()],
        )?;
        let log_id = tx.last_insert_rowid();
        tx.commit()?;
        Ok((log_id, now))
    }

    /// Deletes every play-log row for one clip.
    pub fn delete_play_logs_by_clip(&self, clip_uuid: &str) -> StoreResult<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM play_log WHERE clip_uuid = ?1",
            [clip_uuid],
        )?)
    }

    /// Deletes every play-log row whose clip is in the given status, in one
    /// statement.
    pub fn delete_play_logs_by_clip_status(&self, status: ClipStatus) -> StoreResult<usize> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM play_log WHERE clip_uuid IN (SELECT uuid FROM clips WHERE status = ?1)",
            [status.as_str()],
        )?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Settings
    // ─────────────────────────────────────────────────────────────────────────

    /// Ensures the settings row exists, writing defaults when absent.
    pub fn init_settings(&self) -> StoreResult<Settings> {
        let defaults = Settings::default();
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR IGNORE INTO settings (id, version, data) VALUES (1, ?1, ?2)",
            params![
                defaults.version,
                serde_json::to_string(&defaults)
                    .map_err(|e| StoreError::Validation(e.to_string()))?
            ],
        )?;
        drop(conn);
        self.get_settings()
    }

    /// Reads the settings row, migrating older versions forward. A missing
    /// or invalid row is reinitialized to defaults with one warning log.
    pub fn get_settings(&self) -> StoreResult<Settings> {
        let stored: Option<(u32, String)> = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT version, data FROM settings WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?
        };

        let parsed = stored.and_then(|(_, data)| {
            serde_json::from_str::<Settings>(&data)
                .ok()
                .map(Settings::migrate)
                .filter(|s| s.validate().is_ok())
        });

        match parsed {
            Some(settings) => Ok(settings),
            None => {
                log::warn!("[Store] Settings row missing or invalid, reinitializing defaults");
                let defaults = Settings::default();
                self.write_settings_row(&defaults)?;
                Ok(defaults)
            }
        }
    }

    /// Validates and persists new settings.
    pub fn update_settings(&self, settings: &Settings) -> StoreResult<()> {
        settings.validate().map_err(StoreError::Validation)?;
        self.write_settings_row(settings)
    }

    fn write_settings_row(&self, settings: &Settings) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO settings (id, version, data) VALUES (1, ?1, ?2)
             ON CONFLICT (id) DO UPDATE SET version = ?1, data = ?2",
            params![
                settings.version,
                serde_json::to_string(settings)
                    .map_err(|e| StoreError::Validation(e.to_string()))?
            ],
        )?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

struct RawLogRow {
    id: i64,
    clip_uuid: String,
    played_at: String,
    played_for: Option<f64>,
    completed_at: Option<String>,
}

fn raw_log_from_row(row: &Row<'_>) -> rusqlite::Result<RawLogRow> {
    Ok(RawLogRow {
        id: row.get(0)?,
        clip_uuid: row.get(1)?,
        played_at: row.get(2)?,
        played_for: row.get(3)?,
        completed_at: row.get(4)?,
    })
}

fn parse_ts(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp {value}: {e}"))
}

fn parse_optional_ts(value: Option<String>) -> Result<Option<DateTime<Utc>>, String> {
    value.map(|v| parse_ts(&v)).transpose()
}

/// Fills `submitters` for every clip in one batched query.
fn attach_submitters(conn: &Connection, clips: &mut [Clip]) -> StoreResult<()> {
    if clips.is_empty() {
        return Ok(());
    }
    let placeholders = vec!["?"; clips.len()].join(", ");
    let sql = format!(
        "SELECT clip_uuid, submitter FROM clip_submitters
         WHERE clip_uuid IN ({placeholders}) ORDER BY rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let uuids: Vec<&str> = clips.iter().map(|c| c.uuid.as_str()).collect();
    let mut by_clip: HashMap<String, Vec<String>> = HashMap::new();
    let rows = stmt.query_map(rusqlite::params_from_iter(uuids), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (uuid, submitter) = row?;
        by_clip.entry(uuid).or_default().push(submitter);
    }
    for clip in clips.iter_mut() {
        clip.submitters = by_clip.remove(&clip.uuid).unwrap_or_default();
    }
    Ok(())
}

/// Joins raw play-log rows with their clips, dropping rows whose clip fails
/// validation.
fn join_log_clips(conn: &Connection, raw: Vec<RawLogRow>) -> StoreResult<Vec<PlayLogEntry>> {
    let mut entries = Vec::with_capacity(raw.len());
    for row in raw {
        let clip = {
            let loaded = conn
                .query_row(
                    "SELECT uuid, platform, clip_id, url, embed_url, video_url, thumbnail_url,
                            title, channel, creator, category, duration, content_type,
                            created_at, status, submitted_at, played_at
                     FROM clips WHERE uuid = ?1",
                    [&row.clip_uuid],
                    |r| ClipStore::clip_from_row(r, Vec::new()),
                )
                .optional()?;
            match loaded {
                Some(Ok(clip)) => clip,
                Some(Err(reason)) => {
                    log::warn!(
                        "[Store] Dropping play-log {} with invalid clip {}: {}",
                        row.id,
                        row.clip_uuid,
                        reason
                    );
                    continue;
                }
                None => {
                    log::warn!(
                        "[Store] Dropping play-log {} referencing missing clip {}",
                        row.id,
                        row.clip_uuid
                    );
                    continue;
                }
            }
        };
        let mut clip = clip;
        let mut stmt = conn.prepare(
            "SELECT submitter FROM clip_submitters WHERE clip_uuid = ?1 ORDER BY rowid",
        )?;
        clip.submitters = stmt
            .query_map([&row.clip_uuid], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let entry = (|| -> Result<PlayLogEntry, String> {
            Ok(PlayLogEntry {
                id: row.id,
                clip,
                played_at: parse_ts(&row.played_at)?,
                played_for: row.played_for,
                completed_at: parse_optional_ts(row.completed_at)?,
            })
        })();
        match entry {
            Ok(entry) => entries.push(entry),
            Err(reason) => log::warn!("[Store] Dropping play-log {}: {}", row.id, reason),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(id: &str) -> ClipData {
        ClipData {
            platform: Platform::Twitch,
            clip_id: id.into(),
            url: format!("https://clips.twitch.tv/{id}"),
            embed_url: format!("https://clips.twitch.tv/embed?clip={id}"),
            video_url: None,
            thumbnail_url: Some("https://example.com/thumb.jpg".into()),
            title: "T".into(),
            channel: "c".into(),
            creator: "creator".into(),
            category: None,
            duration: Some(30.0),
            content_type: None,
            created_at: None,
        }
    }

    fn store() -> ClipStore {
        ClipStore::open_in_memory().expect("in-memory store")
    }

    #[test]
    fn upsert_inserts_clip_with_submitters() {
        let store = store();
        let clip = store
            .upsert_clip(&data("Abc"), &["alice".into()], ClipStatus::Approved)
            .unwrap();

        assert_eq!(clip.uuid, "twitch:abc");
        assert_eq!(clip.submitters, vec!["alice"]);
        assert_eq!(clip.status, ClipStatus::Approved);
    }

    #[test]
    fn upsert_merges_submitters_without_duplicates() {
        let store = store();
        store
            .upsert_clip(&data("Abc"), &["alice".into()], ClipStatus::Approved)
            .unwrap();
        let merged = store
            .upsert_clip(
                &data("Abc"),
                &["bob".into(), "alice".into()],
                ClipStatus::Approved,
            )
            .unwrap();

        assert_eq!(merged.submitters, vec!["alice", "bob"]);
    }

    #[test]
    fn upsert_preserves_existing_status() {
        let store = store();
        store
            .upsert_clip(&data("Abc"), &["alice".into()], ClipStatus::Pending)
            .unwrap();
        // A later approved-status upsert must not flip the stored status.
        let merged = store
            .upsert_clip(&data("Abc"), &["bob".into()], ClipStatus::Approved)
            .unwrap();
        assert_eq!(merged.status, ClipStatus::Pending);
    }

    #[test]
    fn upsert_patches_mutable_metadata() {
        let store = store();
        store
            .upsert_clip(&data("Abc"), &["alice".into()], ClipStatus::Approved)
            .unwrap();
        let mut updated = data("Abc");
        updated.title = "New title".into();
        updated.duration = Some(12.0);
        let merged = store
            .upsert_clip(&updated, &[], ClipStatus::Approved)
            .unwrap();
        assert_eq!(merged.data.title, "New title");
        assert_eq!(merged.data.duration, Some(12.0));
    }

    #[test]
    fn upsert_rejects_invalid_data() {
        let store = store();
        let mut bad = data("Abc");
        bad.title = String::new();
        let err = store
            .upsert_clip(&bad, &["alice".into()], ClipStatus::Approved)
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
    }

    #[test]
    fn get_clip_returns_none_for_unknown() {
        let store = store();
        assert!(store.get_clip("twitch:nope").unwrap().is_none());
    }

    #[test]
    fn approved_clips_ordered_by_submission_time() {
        let store = store();
        store
            .upsert_clip(&data("First"), &["a".into()], ClipStatus::Approved)
            .unwrap();
        store
            .upsert_clip(&data("Second"), &["b".into()], ClipStatus::Approved)
            .unwrap();

        let clips = store.get_clips_by_status(ClipStatus::Approved, None).unwrap();
        assert_eq!(clips.len(), 2);
        assert!(clips[0].submitted_at <= clips[1].submitted_at);
    }

    #[test]
    fn played_clips_default_limit_is_50() {
        let store = store();
        for i in 0..60 {
            store
                .upsert_clip(&data(&format!("c{i}")), &["a".into()], ClipStatus::Played)
                .unwrap();
        }
        let clips = store.get_clips_by_status(ClipStatus::Played, None).unwrap();
        assert_eq!(clips.len(), 50);
    }

    #[test]
    fn status_update_to_played_stamps_played_at() {
        let store = store();
        let clip = store
            .upsert_clip(&data("Abc"), &["alice".into()], ClipStatus::Approved)
            .unwrap();
        store
            .update_clip_status(&clip.uuid, ClipStatus::Played)
            .unwrap();
        let reloaded = store.get_clip(&clip.uuid).unwrap().unwrap();
        assert_eq!(reloaded.status, ClipStatus::Played);
        assert!(reloaded.played_at.is_some());
    }

    #[test]
    fn delete_clip_cascades_submitters_and_log() {
        let store = store();
        let clip = store
            .upsert_clip(&data("Abc"), &["alice".into()], ClipStatus::Approved)
            .unwrap();
        store.insert_play_log(&clip.uuid, None).unwrap();
        assert!(store.delete_clip(&clip.uuid).unwrap());

        assert!(store.get_clip(&clip.uuid).unwrap().is_none());
        assert!(store.list_play_logs(None, LogOrder::Asc).unwrap().is_empty());
    }

    #[test]
    fn reject_and_delete_approved_spares_other_statuses() {
        let store = store();
        store
            .upsert_clip(&data("queued"), &["a".into()], ClipStatus::Approved)
            .unwrap();
        store
            .upsert_clip(&data("held"), &["b".into()], ClipStatus::Pending)
            .unwrap();
        store
            .upsert_clip(&data("refused"), &["c".into()], ClipStatus::Rejected)
            .unwrap();

        let cleared = store.reject_and_delete_approved().unwrap();
        assert_eq!(cleared, 1);
        assert!(store.get_clip("twitch:queued").unwrap().is_none());
        assert!(store.get_clip("twitch:held").unwrap().is_some());
        assert!(store.get_clip("twitch:refused").unwrap().is_some());
    }

    #[test]
    fn play_log_ids_strictly_increase() {
        let store = store();
        let clip = store
            .upsert_clip(&data("Abc"), &["alice".into()], ClipStatus::Approved)
            .unwrap();
        let first = store.insert_play_log(&clip.uuid, None).unwrap();
        let second = store.insert_play_log(&clip.uuid, None).unwrap();
        assert!(second > first);
    }

    #[test]
    fn recent_play_logs_are_oldest_first() {
        let store = store();
        let clip = store
            .upsert_clip(&data("Abc"), &["alice".into()], ClipStatus::Approved)
            .unwrap();
        for _ in 0..5 {
            store.insert_play_log(&clip.uuid, None).unwrap();
        }
        let recent = store.recent_play_logs(3).unwrap();
        assert_eq!(recent.len(), 3);
        assert!(recent[0].id < recent[1].id && recent[1].id < recent[2].id);
    }

    #[test]
    fn pagination_cursor_walks_all_entries() {
        let store = store();
        let clip = store
            .upsert_clip(&data("Abc"), &["alice".into()], ClipStatus::Approved)
            .unwrap();
        for _ in 0..7 {
            store.insert_play_log(&clip.uuid, None).unwrap();
        }

        let first = store.page_play_logs(3, None).unwrap();
        assert_eq!(first.entries.len(), 3);
        assert!(first.has_more);

        let second = store.page_play_logs(3, first.next_cursor).unwrap();
        assert_eq!(second.entries.len(), 3);
        assert!(second.has_more);

        let third = store.page_play_logs(3, second.next_cursor).unwrap();
        assert_eq!(third.entries.len(), 1);
        assert!(!third.has_more);
        assert!(third.next_cursor.is_none());

        // Newest-first across pages, no overlaps.
        let mut ids: Vec<i64> = first
            .entries
            .iter()
            .chain(&second.entries)
            .chain(&third.entries)
            .map(|e| e.id)
            .collect();
        let len_before = ids.len();
        ids.dedup();
        assert_eq!(ids.len(), len_before);
    }

    #[test]
    fn delete_play_logs_by_clip_status() {
        let store = store();
        let played = store
            .upsert_clip(&data("played"), &["a".into()], ClipStatus::Played)
            .unwrap();
        let queued = store
            .upsert_clip(&data("queued"), &["b".into()], ClipStatus::Approved)
            .unwrap();
        store.insert_play_log(&played.uuid, None).unwrap();
        store.insert_play_log(&queued.uuid, None).unwrap();

        let deleted = store
            .delete_play_logs_by_clip_status(ClipStatus::Played)
            .unwrap();
        assert_eq!(deleted, 1);
        let remaining = store.list_play_logs(None, LogOrder::Asc).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].clip.uuid, queued.uuid);
    }

    #[test]
    fn settings_roundtrip_and_defaults() {
        let store = store();
        let initial = store.init_settings().unwrap();
        assert_eq!(initial, Settings::default());

        let mut updated = initial;
        updated.command_prefix = "!cq".into();
        updated.queue.limit = Some(25);
        store.update_settings(&updated).unwrap();

        assert_eq!(store.get_settings().unwrap(), updated);
    }

    #[test]
    fn invalid_settings_rejected_on_write() {
        let store = store();
        store.init_settings().unwrap();
        let mut bad = Settings::default();
        bad.command_prefix = String::new();
        assert!(matches!(
            store.update_settings(&bad),
            Err(StoreError::Validation(_))
        ));
    }

    #[test]
    fn settings_survive_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clips.db");
        {
            let store = ClipStore::open(&path).unwrap();
            let mut settings = store.init_settings().unwrap();
            settings.queue.auto_moderation_enabled = true;
            store.update_settings(&settings).unwrap();
        }
        let store = ClipStore::open(&path).unwrap();
        assert!(store.get_settings().unwrap().queue.auto_moderation_enabled);
    }
}
