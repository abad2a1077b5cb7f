//! Chat command parsing.
//!
//! A message whose text begins with the configured prefix is parsed into a
//! [`ChatCommand`]. Unknown commands and malformed arguments parse to
//! `None`; the engine logs and no-ops.

use crate::store::Platform;

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    Open,
    Close,
    Clear,
    SetLimit(u32),
    RemoveLimit,
    Next,
    Previous,
    RemoveBySubmitter(String),
    RemoveByPlatform(Platform),
    EnablePlatform(Platform),
    DisablePlatform(Platform),
    EnableAutomod,
    DisableAutomod,
    PurgeCache,
    PurgeHistory,
}

impl ChatCommand {
    /// The command's canonical name, as written in chat and in the
    /// allowed-commands set.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Clear => "clear",
            Self::SetLimit(_) => "setlimit",
            Self::RemoveLimit => "removelimit",
            Self::Next => "next",
            Self::Previous => "previous",
            Self::RemoveBySubmitter(_) => "removebysubmitter",
            Self::RemoveByPlatform(_) => "removebyplatform",
            Self::EnablePlatform(_) => "enableplatform",
            Self::DisablePlatform(_) => "disableplatform",
            Self::EnableAutomod => "enableautomod",
            Self::DisableAutomod => "disableautomod",
            Self::PurgeCache => "purgecache",
            Self::PurgeHistory => "purgehistory",
        }
    }
}

/// Parses a chat message into a command.
///
/// Returns `None` when the message does not start with the prefix, names an
/// unknown command, or carries a malformed argument.
pub fn parse_command(text: &str, prefix: &str) -> Option<ChatCommand> {
    let rest = text.trim().strip_prefix(prefix)?;
    let mut parts = rest.split_whitespace();
    let name = parts.next()?.to_lowercase();
    let arg = parts.next();

    let command = match (name.as_str(), arg) {
        ("open", _) => ChatCommand::Open,
        ("close", _) => ChatCommand::Close,
        ("clear", _) => ChatCommand::Clear,
        ("setlimit", Some(n)) => ChatCommand::SetLimit(n.parse().ok().filter(|&n| n > 0)?),
        ("removelimit", _) => ChatCommand::RemoveLimit,
        ("next", _) => ChatCommand::Next,
        ("prev" | "previous", _) => ChatCommand::Previous,
        ("removebysubmitter", Some(name)) => {
            ChatCommand::RemoveBySubmitter(name.trim_start_matches('@').to_lowercase())
        }
        ("removebyplatform", Some(tag)) => {
            ChatCommand::RemoveByPlatform(tag.to_lowercase().parse().ok()?)
        }
        ("enableplatform", Some(tag)) => {
            ChatCommand::EnablePlatform(tag.to_lowercase().parse().ok()?)
        }
        ("disableplatform", Some(tag)) => {
            ChatCommand::DisablePlatform(tag.to_lowercase().parse().ok()?)
        }
        ("enableautomod", _) => ChatCommand::EnableAutomod,
        ("disableautomod", _) => ChatCommand::DisableAutomod,
        ("purgecache", _) => ChatCommand::PurgeCache,
        ("purgehistory", _) => ChatCommand::PurgeHistory,
        _ => return None,
    };
    Some(command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_commands() {
        assert_eq!(parse_command("!q open", "!q"), Some(ChatCommand::Open));
        assert_eq!(parse_command("!q close", "!q"), Some(ChatCommand::Close));
        assert_eq!(parse_command("!q next", "!q"), Some(ChatCommand::Next));
    }

    #[test]
    fn prev_and_previous_are_synonyms() {
        assert_eq!(parse_command("!q prev", "!q"), Some(ChatCommand::Previous));
        assert_eq!(
            parse_command("!q previous", "!q"),
            Some(ChatCommand::Previous)
        );
    }

    #[test]
    fn parses_setlimit_argument() {
        assert_eq!(
            parse_command("!q setlimit 25", "!q"),
            Some(ChatCommand::SetLimit(25))
        );
        assert_eq!(parse_command("!q setlimit 0", "!q"), None);
        assert_eq!(parse_command("!q setlimit abc", "!q"), None);
        assert_eq!(parse_command("!q setlimit", "!q"), None);
    }

    #[test]
    fn parses_platform_arguments_case_insensitively() {
        assert_eq!(
            parse_command("!q enableplatform Kick", "!q"),
            Some(ChatCommand::EnablePlatform(Platform::Kick))
        );
        assert_eq!(parse_command("!q enableplatform vimeo", "!q"), None);
    }

    #[test]
    fn remove_by_submitter_strips_mention_sigil() {
        assert_eq!(
            parse_command("!q removebysubmitter @Alice", "!q"),
            Some(ChatCommand::RemoveBySubmitter("alice".into()))
        );
    }

    #[test]
    fn non_prefixed_messages_are_not_commands() {
        assert_eq!(parse_command("open", "!q"), None);
        assert_eq!(parse_command("https://clips.twitch.tv/Abc", "!q"), None);
    }

    #[test]
    fn unknown_commands_parse_to_none() {
        assert_eq!(parse_command("!q dance", "!q"), None);
    }

    #[test]
    fn command_name_round_trips() {
        assert_eq!(ChatCommand::SetLimit(5).name(), "setlimit");
        assert_eq!(ChatCommand::PurgeHistory.name(), "purgehistory");
    }
}
