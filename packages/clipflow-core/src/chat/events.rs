//! EventSub WebSocket frame types and structural validation.
//!
//! Every inbound frame is parsed into [`IncomingFrame`] before it reaches
//! the client state machine; frames that do not match the expected shape
//! are rejected here and dropped by the caller with a log entry.

use serde::Deserialize;
use thiserror::Error;

/// Structural validation failure for an inbound frame.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("frame missing required field: {0}")]
    MissingField(&'static str),
}

/// A validated inbound frame.
#[derive(Debug)]
pub enum IncomingFrame {
    /// Session handshake; carries the session id used to register
    /// subscriptions and the keepalive window.
    Welcome {
        session_id: String,
        keepalive_timeout_secs: u64,
    },
    /// Periodic liveness signal; resets the keepalive timer.
    Keepalive,
    /// Graceful reconnect hint; the client must follow `reconnect_url`
    /// without clearing state.
    Reconnect { reconnect_url: String },
    /// A channel chat message.
    Notification(ChatMessage),
    /// The upstream revoked our subscription.
    Revocation,
}

/// A chat message as handed to the registered message handler.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub username: String,
    pub text: String,
    pub is_moderator: bool,
    pub is_broadcaster: bool,
}

#[derive(Deserialize)]
struct RawFrame {
    metadata: RawMetadata,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct RawMetadata {
    message_type: String,
}

#[derive(Deserialize)]
struct WelcomePayload {
    session: WelcomeSession,
}

#[derive(Deserialize)]
struct WelcomeSession {
    id: String,
    #[serde(default)]
    keepalive_timeout_seconds: Option<u64>,
}

#[derive(Deserialize)]
struct ReconnectPayload {
    session: ReconnectSession,
}

#[derive(Deserialize)]
struct ReconnectSession {
    reconnect_url: Option<String>,
}

#[derive(Deserialize)]
struct NotificationPayload {
    subscription: NotificationSubscription,
    event: serde_json::Value,
}

#[derive(Deserialize)]
struct NotificationSubscription {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct ChatEvent {
    chatter_user_login: String,
    message: ChatEventMessage,
    #[serde(default)]
    badges: Vec<ChatBadge>,
}

#[derive(Deserialize)]
struct ChatEventMessage {
    text: String,
}

#[derive(Deserialize)]
struct ChatBadge {
    set_id: String,
}

/// Default keepalive window when the welcome frame omits one.
const DEFAULT_KEEPALIVE_SECS: u64 = 10;

/// Parses and validates one inbound text frame.
pub fn parse_frame(raw: &str) -> Result<IncomingFrame, FrameError> {
    let frame: RawFrame = serde_json::from_str(raw)?;

    match frame.metadata.message_type.as_str() {
        "session_welcome" => {
            let payload: WelcomePayload = serde_json::from_value(frame.payload)?;
            Ok(IncomingFrame::Welcome {
                session_id: payload.session.id,
                keepalive_timeout_secs: payload
                    .session
                    .keepalive_timeout_seconds
                    .unwrap_or(DEFAULT_KEEPALIVE_SECS),
            })
        }
        "session_keepalive" => Ok(IncomingFrame::Keepalive),
        "session_reconnect" => {
            let payload: ReconnectPayload = serde_json::from_value(frame.payload)?;
            let url = payload
                .session
                .reconnect_url
                .ok_or(FrameError::MissingField("session.reconnect_url"))?;
            Ok(IncomingFrame::Reconnect { reconnect_url: url })
        }
        "notification" => {
            let payload: NotificationPayload = serde_json::from_value(frame.payload)?;
            if payload.subscription.kind != "channel.chat.message" {
                // Subscriptions we never registered; treat as malformed.
                return Err(FrameError::UnknownType(payload.subscription.kind));
            }
            let event: ChatEvent = serde_json::from_value(payload.event)?;
            let is_moderator = event.badges.iter().any(|b| b.set_id == "moderator");
            let is_broadcaster = event.badges.iter().any(|b| b.set_id == "broadcaster");
            Ok(IncomingFrame::Notification(ChatMessage {
                username: event.chatter_user_login,
                text: event.message.text,
                is_moderator,
                is_broadcaster,
            }))
        }
        "revocation" => Ok(IncomingFrame::Revocation),
        other => Err(FrameError::UnknownType(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_welcome_frame() {
        let raw = r#"{
            "metadata": {"message_id": "m1", "message_type": "session_welcome", "message_timestamp": "2026-01-01T00:00:00Z"},
            "payload": {"session": {"id": "sess-1", "keepalive_timeout_seconds": 30}}
        }"#;
        match parse_frame(raw).unwrap() {
            IncomingFrame::Welcome {
                session_id,
                keepalive_timeout_secs,
            } => {
                assert_eq!(session_id, "sess-1");
                assert_eq!(keepalive_timeout_secs, 30);
            }
            other => panic!("expected welcome, got {other:?}"),
        }
    }

    #[test]
    fn parses_reconnect_frame() {
        let raw = r#"{
            "metadata": {"message_type": "session_reconnect"},
            "payload": {"session": {"id": "sess-1", "reconnect_url": "wss://example.com/ws?id=1"}}
        }"#;
        match parse_frame(raw).unwrap() {
            IncomingFrame::Reconnect { reconnect_url } => {
                assert_eq!(reconnect_url, "wss://example.com/ws?id=1");
            }
            other => panic!("expected reconnect, got {other:?}"),
        }
    }

    #[test]
    fn parses_chat_notification_with_badges() {
        let raw = r#"{
            "metadata": {"message_type": "notification"},
            "payload": {
                "subscription": {"type": "channel.chat.message"},
                "event": {
                    "chatter_user_login": "alice",
                    "message": {"text": "https://clips.twitch.tv/Abc"},
                    "badges": [{"set_id": "moderator", "id": "1", "info": ""}]
                }
            }
        }"#;
        match parse_frame(raw).unwrap() {
            IncomingFrame::Notification(msg) => {
                assert_eq!(msg.username, "alice");
                assert_eq!(msg.text, "https://clips.twitch.tv/Abc");
                assert!(msg.is_moderator);
                assert!(!msg.is_broadcaster);
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn broadcaster_badge_is_detected() {
        let raw = r#"{
            "metadata": {"message_type": "notification"},
            "payload": {
                "subscription": {"type": "channel.chat.message"},
                "event": {
                    "chatter_user_login": "streamer",
                    "message": {"text": "hi"},
                    "badges": [{"set_id": "broadcaster"}]
                }
            }
        }"#;
        match parse_frame(raw).unwrap() {
            IncomingFrame::Notification(msg) => assert!(msg.is_broadcaster),
            other => panic!("expected notification, got {other:?}"),
        }
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_frame("{not json").is_err());
    }

    #[test]
    fn rejects_unknown_message_type() {
        let raw = r#"{"metadata": {"message_type": "mystery"}, "payload": {}}"#;
        assert!(matches!(
            parse_frame(raw),
            Err(FrameError::UnknownType(t)) if t == "mystery"
        ));
    }

    #[test]
    fn rejects_notification_for_foreign_subscription() {
        let raw = r#"{
            "metadata": {"message_type": "notification"},
            "payload": {"subscription": {"type": "channel.follow"}, "event": {}}
        }"#;
        assert!(parse_frame(raw).is_err());
    }

    #[test]
    fn welcome_without_keepalive_uses_default() {
        let raw = r#"{
            "metadata": {"message_type": "session_welcome"},
            "payload": {"session": {"id": "sess-1"}}
        }"#;
        match parse_frame(raw).unwrap() {
            IncomingFrame::Welcome {
                keepalive_timeout_secs,
                ..
            } => assert_eq!(keepalive_timeout_secs, DEFAULT_KEEPALIVE_SECS),
            other => panic!("expected welcome, got {other:?}"),
        }
    }
}
