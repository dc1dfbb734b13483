// src/types/mod.rs - Core rule, identity and event types

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which rule collection a rule belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleKind {
    /// Matched against the nickname of a joining user
    Nick,
    /// Matched against channel message text
    Word,
}

impl RuleKind {
    pub fn parse(input: &str) -> Option<Self> {
        match input.to_ascii_lowercase().as_str() {
            "nick" => Some(RuleKind::Nick),
            "word" => Some(RuleKind::Word),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Nick => "nick",
            RuleKind::Word => "word",
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single moderation rule, keyed by its original pattern text.
///
/// The compiled matcher is derived from `pattern` when the rule is built and
/// is never changed afterwards; changing a rule means building a new one.
#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: String,
    pub matcher: Regex,
    pub message: String,
    pub duration_minutes: Option<u32>,
    pub is_wildcard: bool,
}

impl Rule {
    pub fn matches(&self, text: &str) -> bool {
        self.matcher.is_match(text)
    }

    /// The pattern with all `*` markers and whitespace stripped, lower-cased.
    /// Only meaningful for wildcard rules; `None` when nothing is left.
    pub fn wildcard_core(&self) -> Option<String> {
        let core: String = self
            .pattern
            .chars()
            .filter(|c| *c != '*' && !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();

        if core.is_empty() {
            None
        } else {
            Some(core)
        }
    }

    /// Serialize to the `pattern :: message :: minutes` line format
    pub fn to_line(&self) -> String {
        match self.duration_minutes {
            Some(minutes) => format!("{} :: {} :: {}", self.pattern, self.message, minutes),
            None => format!("{} :: {}", self.pattern, self.message),
        }
    }
}

/// Network identity of a chat user as delivered by the connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub nick: String,
    pub user: Option<String>,
    pub host: Option<String>,
}

impl UserIdentity {
    pub fn from_nick(nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            user: None,
            host: None,
        }
    }

    /// Parse an IRC prefix of the form `nick!user@host` (user and host optional)
    pub fn parse_prefix(prefix: &str) -> Option<Self> {
        let prefix = prefix.strip_prefix(':').unwrap_or(prefix);
        if prefix.is_empty() {
            return None;
        }

        let (nick, rest) = match prefix.split_once('!') {
            Some((nick, rest)) => (nick, Some(rest)),
            None => match prefix.split_once('@') {
                Some((nick, host)) => {
                    return Some(Self {
                        nick: nick.to_string(),
                        user: None,
                        host: Some(host.to_string()).filter(|h| !h.is_empty()),
                    });
                }
                None => (prefix, None),
            },
        };

        if nick.is_empty() {
            return None;
        }

        let (user, host) = match rest.and_then(|r| r.split_once('@')) {
            Some((user, host)) => (Some(user.to_string()), Some(host.to_string())),
            None => (rest.map(str::to_string), None),
        };

        Some(Self {
            nick: nick.to_string(),
            user: user.filter(|u| !u.is_empty()),
            host: host.filter(|h| !h.is_empty()),
        })
    }

    /// Ban mask covering the whole identity rather than the current nick,
    /// so a reconnect under another nick from the same user@host stays out.
    pub fn ban_mask(&self) -> String {
        match (&self.user, &self.host) {
            (Some(user), Some(host)) => format!("*!{}@{}", user, host),
            _ => format!("{}!*@*", self.nick),
        }
    }
}

impl fmt::Display for UserIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.user, &self.host) {
            (Some(user), Some(host)) => write!(f, "{}!{}@{}", self.nick, user, host),
            _ => f.write_str(&self.nick),
        }
    }
}

/// A user joined a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinEvent {
    pub channel: String,
    pub user: UserIdentity,
}

/// A user spoke in a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub channel: String,
    pub user: UserIdentity,
    pub text: String,
}

/// Events delivered by the chat connection to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Join(JoinEvent),
    Message(MessageEvent),
}

impl ChatEvent {
    pub fn channel(&self) -> &str {
        match self {
            ChatEvent::Join(join) => &join.channel,
            ChatEvent::Message(message) => &message.channel,
        }
    }

    pub fn user(&self) -> &UserIdentity {
        match self {
            ChatEvent::Join(join) => &join.user,
            ChatEvent::Message(message) => &message.user,
        }
    }
}

/// What caused an enforcement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnforcementTrigger {
    NickRule { pattern: String },
    WordRule { pattern: String },
    Flood,
}

/// The enforcement the dispatcher decided on for a single event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationAction {
    pub channel: String,
    pub nick: String,
    pub mask: String,
    pub reason: String,
    pub duration_minutes: u32,
    pub trigger: EnforcementTrigger,
}
