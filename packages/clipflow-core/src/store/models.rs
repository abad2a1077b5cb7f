//! Persistent entity types and their validation rules.
//!
//! Everything the store reads back from disk is re-validated here before it
//! reaches the queue or the wire. A row failing validation is treated as
//! absent by the store, never surfaced to clients.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Upstream platform a clip originates from.
///
/// Closed tag union; resolver dispatch iterates variants in a fixed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitch,
    Kick,
    Sora,
}

impl Platform {
    /// All platforms, in resolver dispatch order.
    pub const ALL: [Platform; 3] = [Platform::Kick, Platform::Sora, Platform::Twitch];

    /// Lowercase tag used in clip UUIDs and settings.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Twitch => "twitch",
            Self::Kick => "kick",
            Self::Sora => "sora",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "twitch" => Ok(Self::Twitch),
            "kick" => Ok(Self::Kick),
            "sora" => Ok(Self::Sora),
            other => Err(format!("unknown platform tag: {other}")),
        }
    }
}

/// Lifecycle status of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipStatus {
    Approved,
    Pending,
    Rejected,
    Played,
}

impl ClipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approved => "approved",
            Self::Pending => "pending",
            Self::Rejected => "rejected",
            Self::Played => "played",
        }
    }
}

impl FromStr for ClipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Self::Approved),
            "pending" => Ok(Self::Pending),
            "rejected" => Ok(Self::Rejected),
            "played" => Ok(Self::Played),
            other => Err(format!("unknown clip status: {other}")),
        }
    }
}

/// Normalized clip metadata as returned by a platform resolver.
///
/// This is the mutable half of a [`Clip`]: everything here is patched on
/// re-submission, while identity fields (`uuid`, `platform`, `clip_id`)
/// never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClipData {
    pub platform: Platform,
    /// Platform-side clip identifier (lowercased for UUID construction).
    pub clip_id: String,
    /// Canonical watch URL.
    pub url: String,
    /// Player/embed URL.
    pub embed_url: String,
    /// Direct video URL, when the platform exposes one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    pub title: String,
    /// Channel the clip was taken from.
    pub channel: String,
    /// Username of the person who created the clip on the platform.
    pub creator: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Clip length in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// MIME type of the direct video, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Platform-side creation timestamp.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl ClipData {
    /// Composite UUID `platform:clipId`, lowercase. The primary identity in
    /// the store and queue.
    pub fn uuid(&self) -> String {
        format!("{}:{}", self.platform.tag(), self.clip_id.to_lowercase())
    }

    /// Validates the invariants every stored clip must satisfy.
    pub fn validate(&self) -> Result<(), String> {
        if self.clip_id.trim().is_empty() {
            return Err("clip id must not be empty".into());
        }
        if self.clip_id.len() > 200 {
            return Err("clip id exceeds 200 characters".into());
        }
        if self.url.trim().is_empty() || self.url.len() > 500 {
            return Err("url must be 1-500 characters".into());
        }
        if self.embed_url.trim().is_empty() {
            return Err("embed url must not be empty".into());
        }
        if self.title.trim().is_empty() {
            return Err("title must not be empty".into());
        }
        if self.channel.trim().is_empty() {
            return Err("channel must not be empty".into());
        }
        if let Some(duration) = self.duration {
            if !duration.is_finite() || duration < 0.0 {
                return Err("duration must be a non-negative number".into());
            }
        }
        Ok(())
    }
}

/// A stored clip with its full submitter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Clip {
    /// Composite UUID `platform:clipId`, lowercase.
    pub uuid: String,
    #[serde(flatten)]
    pub data: ClipData,
    /// Usernames that submitted this clip, insertion order preserved.
    pub submitters: Vec<String>,
    pub status: ClipStatus,
    /// Server time the clip was first submitted.
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub played_at: Option<DateTime<Utc>>,
}

impl Clip {
    /// Re-validates a clip loaded from the store.
    ///
    /// The UUID must match the one derived from platform + clip id, and the
    /// submitter list must be duplicate-free.
    pub fn validate(&self) -> Result<(), String> {
        self.data.validate()?;
        if self.uuid != self.data.uuid() {
            return Err(format!(
                "uuid {} does not match derived identity {}",
                self.uuid,
                self.data.uuid()
            ));
        }
        let unique: BTreeSet<&String> = self.submitters.iter().collect();
        if unique.len() != self.submitters.len() {
            return Err("submitter list contains duplicates".into());
        }
        Ok(())
    }
}

/// One append-only play-log record joined with its clip.
///
/// Forms the ordered history irrespective of clip lifecycle; a clip may
/// appear multiple times.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayLogEntry {
    pub id: i64,
    pub clip: Clip,
    pub played_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub played_for: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Current settings schema version. Rows with an older version are migrated
/// field-by-field on read.
pub const SETTINGS_VERSION: u32 = 2;

/// Queue behavior settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueSettings {
    /// When enabled, clips from non-privileged submitters land in `pending`
    /// until a moderator approves them.
    pub auto_moderation_enabled: bool,
    /// Maximum queue size; `None` means unlimited.
    pub limit: Option<u32>,
    /// Platforms accepted for submission.
    pub enabled_platforms: BTreeSet<Platform>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            auto_moderation_enabled: false,
            limit: None,
            enabled_platforms: Platform::ALL.into_iter().collect(),
        }
    }
}

/// Logger settings exposed to the web client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggerSettings {
    pub level: String,
    /// Maximum retained client-side log entries.
    pub limit: u32,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            limit: 500,
        }
    }
}

/// Single-row application settings, schema-validated on every read and write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub version: u32,
    /// Chat command prefix, at most 8 non-space characters.
    pub command_prefix: String,
    /// Chat commands the engine will accept.
    pub allowed_commands: BTreeSet<String>,
    pub queue: QueueSettings,
    pub logger: LoggerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_VERSION,
            command_prefix: "!q".into(),
            allowed_commands: default_allowed_commands(),
            queue: QueueSettings::default(),
            logger: LoggerSettings::default(),
        }
    }
}

fn default_allowed_commands() -> BTreeSet<String> {
    [
        "open",
        "close",
        "clear",
        "setlimit",
        "removelimit",
        "next",
        "prev",
        "previous",
        "removebysubmitter",
        "removebyplatform",
        "enableplatform",
        "disableplatform",
        "enableautomod",
        "disableautomod",
        "purgecache",
        "purgehistory",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

impl Settings {
    /// Validates the settings schema.
    pub fn validate(&self) -> Result<(), String> {
        if self.command_prefix.is_empty() || self.command_prefix.len() > 8 {
            return Err("command prefix must be 1-8 characters".into());
        }
        if self.command_prefix.chars().any(char::is_whitespace) {
            return Err("command prefix must not contain whitespace".into());
        }
        if let Some(limit) = self.queue.limit {
            if limit == 0 {
                return Err("queue limit must be a positive integer or null".into());
            }
        }
        if self.logger.limit == 0 {
            return Err("logger limit must be >= 1".into());
        }
        Ok(())
    }

    /// Migrates a settings row from an earlier schema version.
    ///
    /// Unknown or missing fields already fell back to defaults during
    /// deserialization; migration only has to stamp the current version.
    pub fn migrate(mut self) -> Self {
        if self.version < SETTINGS_VERSION {
            self.version = SETTINGS_VERSION;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data() -> ClipData {
        ClipData {
            platform: Platform::Twitch,
            clip_id: "AwkwardCoolOtter-1".into(),
            url: "https://clips.twitch.tv/AwkwardCoolOtter-1".into(),
            embed_url: "https://clips.twitch.tv/embed?clip=AwkwardCoolOtter-1".into(),
            video_url: None,
            thumbnail_url: None,
            title: "T".into(),
            channel: "c".into(),
            creator: "alice".into(),
            category: None,
            duration: Some(27.5),
            content_type: None,
            created_at: None,
        }
    }

    #[test]
    fn uuid_is_lowercase_platform_and_id() {
        assert_eq!(sample_data().uuid(), "twitch:awkwardcoolotter-1");
    }

    #[test]
    fn clip_data_validation_rejects_empty_title() {
        let mut data = sample_data();
        data.title = "  ".into();
        assert!(data.validate().is_err());
    }

    #[test]
    fn clip_data_validation_rejects_overlong_url() {
        let mut data = sample_data();
        data.url = format!("https://clips.twitch.tv/{}", "a".repeat(500));
        assert!(data.validate().is_err());
    }

    #[test]
    fn clip_validation_rejects_uuid_mismatch() {
        let data = sample_data();
        let clip = Clip {
            uuid: "kick:other".into(),
            data,
            submitters: vec!["alice".into()],
            status: ClipStatus::Approved,
            submitted_at: Utc::now(),
            played_at: None,
        };
        assert!(clip.validate().is_err());
    }

    #[test]
    fn clip_validation_rejects_duplicate_submitters() {
        let data = sample_data();
        let clip = Clip {
            uuid: data.uuid(),
            data,
            submitters: vec!["alice".into(), "alice".into()],
            status: ClipStatus::Approved,
            submitted_at: Utc::now(),
            played_at: None,
        };
        assert!(clip.validate().is_err());
    }

    #[test]
    fn platform_round_trips_through_tag() {
        for platform in Platform::ALL {
            assert_eq!(platform.tag().parse::<Platform>().unwrap(), platform);
        }
    }

    #[test]
    fn settings_default_is_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn settings_rejects_long_prefix() {
        let mut settings = Settings::default();
        settings.command_prefix = "!clipqueue".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn settings_rejects_whitespace_prefix() {
        let mut settings = Settings::default();
        settings.command_prefix = "! q".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn settings_rejects_zero_limit() {
        let mut settings = Settings::default();
        settings.queue.limit = Some(0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn settings_migration_stamps_current_version() {
        let mut settings = Settings::default();
        settings.version = 1;
        assert_eq!(settings.migrate().version, SETTINGS_VERSION);
    }
}
