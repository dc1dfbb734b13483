use log::debug;

use crate::bot::protection::ProtectionRegistry;
use crate::bot::rules::{parse_rule_line, RuleStore};
use crate::config::Settings;
use crate::error::{AutoModError, AutoModResult};
use crate::types::{Rule, RuleKind};

pub const HELP_TEXT: &str = "\
AutoMod commands:
  AUTORELOAD | AMRELOAD                       reload rules, channels and settings
  AMLIST                                      show channels, settings and rules
  AMADD <nick|word> pattern :: message :: min add a rule (* makes it a wildcard)
  AMDEL <nick|word> <pattern>                 remove a rule by its exact pattern
  AMCHAN <#channel>                           toggle protection for a channel
  AMUNCHAN <#channel>                         stop protecting a channel
  AMSET <key> <value...>                      UNBAN_MINUTES, KICKMSG, BANMSG, FLOOD,
                                              FLOOD_COUNT, FLOOD_SECONDS, DEFAULTBAN
  AMMENU                                      quick menu";

pub const MENU_TEXT: &str = "\
AutoMod menu:
  [1] AMLIST            [2] AMRELOAD
  [3] AMCHAN #channel   [4] AMADD word spam :: No spam :: 30
  [5] AMSET FLOOD 6 5   [6] AMHELP";

const ADD_USAGE: &str = "Usage: AMADD <nick|word> pattern :: message :: minutes";
const DEL_USAGE: &str = "Usage: AMDEL <nick|word> <pattern>";
const CHAN_USAGE: &str = "Usage: AMCHAN <#channel>";
const UNCHAN_USAGE: &str = "Usage: AMUNCHAN <#channel>";
const SET_USAGE: &str = "Usage: AMSET <key> <value...>";

/// A parsed operator console command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    Reload,
    List,
    Add {
        kind: RuleKind,
        pattern: String,
        message: String,
        duration_minutes: Option<u32>,
    },
    Delete {
        kind: RuleKind,
        pattern: String,
    },
    ToggleChannel(String),
    UnprotectChannel(String),
    Set {
        key: String,
        args: Vec<String>,
    },
    Help,
    Menu,
}

impl OperatorCommand {
    /// Parse a console line. A leading `/` is optional and the command word
    /// is case-insensitive. Malformed input yields a usage error.
    pub fn parse(line: &str) -> AutoModResult<Self> {
        let line = line.trim();
        let line = line.strip_prefix('/').unwrap_or(line);

        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };
        debug!("Parsing operator command '{}'", word);

        match word.to_ascii_uppercase().as_str() {
            "AUTORELOAD" | "AMRELOAD" => Ok(Self::Reload),
            "AMLIST" => Ok(Self::List),
            "AMHELP" => Ok(Self::Help),
            "AMMENU" => Ok(Self::Menu),
            "AMADD" => {
                let (kind, rule_text) = split_kind(rest).ok_or_else(|| usage(ADD_USAGE))?;
                let (pattern, message, duration_minutes) =
                    parse_rule_line(rule_text).ok_or_else(|| usage(ADD_USAGE))?;
                Ok(Self::Add {
                    kind,
                    pattern,
                    message,
                    duration_minutes,
                })
            }
            "AMDEL" => {
                let (kind, pattern) = split_kind(rest).ok_or_else(|| usage(DEL_USAGE))?;
                if pattern.is_empty() {
                    return Err(usage(DEL_USAGE));
                }
                Ok(Self::Delete {
                    kind,
                    pattern: pattern.to_string(),
                })
            }
            "AMCHAN" => channel_arg(rest, CHAN_USAGE).map(Self::ToggleChannel),
            "AMUNCHAN" => channel_arg(rest, UNCHAN_USAGE).map(Self::UnprotectChannel),
            "AMSET" => {
                let mut parts = rest.split_whitespace();
                let key = parts.next().ok_or_else(|| usage(SET_USAGE))?;
                Ok(Self::Set {
                    key: key.to_ascii_uppercase(),
                    args: parts.map(str::to_string).collect(),
                })
            }
            "" => Err(usage("Type AMHELP for a list of commands.")),
            other => Err(usage(&format!(
                "Unknown command '{}'. Type AMHELP for a list of commands.",
                other
            ))),
        }
    }
}

fn usage(text: &str) -> AutoModError {
    AutoModError::Usage(text.to_string())
}

fn split_kind(rest: &str) -> Option<(RuleKind, &str)> {
    let (kind, remainder) = match rest.split_once(char::is_whitespace) {
        Some((kind, remainder)) => (kind, remainder.trim()),
        None => (rest, ""),
    };
    Some((RuleKind::parse(kind)?, remainder))
}

fn channel_arg(rest: &str, usage_text: &str) -> AutoModResult<String> {
    match rest.split_whitespace().next() {
        Some(channel) if channel.starts_with('#') && channel.len() > 1 => {
            Ok(channel.to_lowercase())
        }
        _ => Err(usage(usage_text)),
    }
}

/// One rule in `pattern :: message :: <minutes>m` form
pub fn format_rule(rule: &Rule, default_minutes: u32) -> String {
    let minutes = rule
        .duration_minutes
        .map(|m| format!("{}m", m))
        .unwrap_or_else(|| format!("default({}m)", default_minutes));
    let wildcard = if rule.is_wildcard { " [wildcard]" } else { "" };
    format!("{} :: {} :: {}{}", rule.pattern, rule.message, minutes, wildcard)
}

/// Text for `AMLIST`
pub fn render_listing(
    channels: &ProtectionRegistry,
    settings: &Settings,
    rules: &RuleStore,
) -> String {
    let mut lines = Vec::new();

    let protected: Vec<&str> = channels.channels().collect();
    if protected.is_empty() {
        lines.push("Protected channels: (none)".to_string());
    } else {
        lines.push(format!("Protected channels: {}", protected.join(", ")));
    }

    lines.push(format!(
        "Settings: UNBAN_MINUTES={} DEFAULT_BAN_MINUTES={} FLOOD={} msgs/{}s",
        settings.unban_minutes,
        settings.default_ban_minutes,
        settings.flood_count,
        settings.flood_seconds
    ));
    lines.push(format!("KICKMSG: {}", settings.kick_message));
    lines.push(format!("BANMSG: {}", settings.ban_message));

    for kind in [RuleKind::Nick, RuleKind::Word] {
        let list = rules.list(kind);
        lines.push(format!("{} rules ({}):", kind, list.len()));
        for rule in list {
            lines.push(format!("  {}", format_rule(rule, settings.unban_minutes)));
        }
    }

    lines.join("\n")
}
