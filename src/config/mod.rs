// src/config/mod.rs - Tunable settings, application config and data file layout

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::sync::mpsc;

use crate::bot::flood::FloodPolicy;
use crate::bot::rules::file_header;
use crate::error::{AutoModError, AutoModResult};
use crate::platforms::irc::IrcConfig;
use crate::types::RuleKind;

pub const NICK_RULES_FILE: &str = "bad_nicks.txt";
pub const WORD_RULES_FILE: &str = "bad_words.txt";
pub const PROTECTED_FILE: &str = "protected_channels.txt";
pub const SETTINGS_FILE: &str = "automod_settings.json";
pub const LOG_FILE: &str = "automod_log.txt";

/// Operator-tunable settings, persisted as a flat JSON object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(rename = "UNBAN_MINUTES")]
    pub unban_minutes: u32,
    #[serde(rename = "KICKMSG")]
    pub kick_message: String,
    #[serde(rename = "BANMSG")]
    pub ban_message: String,
    #[serde(rename = "FLOOD_COUNT")]
    pub flood_count: u32,
    #[serde(rename = "FLOOD_SECONDS")]
    pub flood_seconds: u32,
    #[serde(rename = "DEFAULT_BAN_MINUTES")]
    pub default_ban_minutes: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            unban_minutes: 60,
            kick_message: String::new(),
            ban_message: String::new(),
            flood_count: 6,
            flood_seconds: 5,
            default_ban_minutes: 60,
        }
    }
}

impl Settings {
    pub fn flood_policy(&self) -> FloodPolicy {
        FloodPolicy {
            count: self.flood_count,
            window_seconds: self.flood_seconds,
        }
    }

    /// Apply `AMSET <key> args...`. Returns the feedback line on success;
    /// on error the settings are unchanged.
    pub fn apply(&mut self, key: &str, args: &[&str]) -> AutoModResult<String> {
        match key.to_ascii_uppercase().as_str() {
            "UNBAN_MINUTES" => {
                self.unban_minutes = parse_positive(args.first())?;
                Ok(format!("UNBAN_MINUTES set to {}", self.unban_minutes))
            }
            "DEFAULTBAN" | "DEFAULT_BAN_MINUTES" => {
                self.default_ban_minutes = parse_positive(args.first())?;
                Ok(format!("DEFAULT_BAN_MINUTES set to {}", self.default_ban_minutes))
            }
            "KICKMSG" => {
                self.kick_message = join_text(args)?;
                Ok("KICKMSG updated.".to_string())
            }
            "BANMSG" => {
                self.ban_message = join_text(args)?;
                Ok("BANMSG updated.".to_string())
            }
            "FLOOD" => {
                if args.len() < 2 {
                    return Err(AutoModError::Usage(
                        "Usage: AMSET FLOOD <count> <seconds>".to_string(),
                    ));
                }
                let count = parse_positive(args.first())?;
                let seconds = parse_positive(args.get(1))?;
                self.flood_count = count;
                self.flood_seconds = seconds;
                Ok(format!("FLOOD set to {} msgs/{}s", count, seconds))
            }
            "FLOOD_COUNT" => {
                self.flood_count = parse_positive(args.first())?;
                Ok(format!("FLOOD_COUNT set to {}", self.flood_count))
            }
            "FLOOD_SECONDS" => {
                self.flood_seconds = parse_positive(args.first())?;
                Ok(format!("FLOOD_SECONDS set to {}", self.flood_seconds))
            }
            other => Err(AutoModError::UnknownSetting(other.to_string())),
        }
    }

    /// Load settings; missing keys take their defaults. An unparsable file is
    /// replaced by defaults with a warning.
    pub async fn load(path: &Path) -> AutoModResult<Self> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(AutoModError::persistence(path, e)),
        };

        match serde_json::from_str::<Self>(&content) {
            Ok(mut settings) => {
                settings.replace_zeroes(path);
                Ok(settings)
            }
            Err(e) => {
                warn!("Invalid settings file {}, using defaults: {}", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    /// Replace zero counts, windows and durations with their defaults
    fn replace_zeroes(&mut self, path: &Path) {
        let defaults = Self::default();
        let fields = [
            ("UNBAN_MINUTES", &mut self.unban_minutes, defaults.unban_minutes),
            ("FLOOD_COUNT", &mut self.flood_count, defaults.flood_count),
            ("FLOOD_SECONDS", &mut self.flood_seconds, defaults.flood_seconds),
            ("DEFAULT_BAN_MINUTES", &mut self.default_ban_minutes, defaults.default_ban_minutes),
        ];
        for (key, value, default) in fields {
            if *value == 0 {
                warn!("{} is 0 in {}, using {}", key, path.display(), default);
                *value = default;
            }
        }
    }

    pub async fn save(&self, path: &Path) -> AutoModResult<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            AutoModError::persistence(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        fs::write(path, json)
            .await
            .map_err(|e| AutoModError::persistence(path, e))?;
        info!("Settings saved.");
        Ok(())
    }
}

fn parse_positive(arg: Option<&&str>) -> AutoModResult<u32> {
    let raw = arg.ok_or_else(|| AutoModError::Usage("Missing value.".to_string()))?;
    match raw.parse::<u32>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(AutoModError::Usage(format!("Invalid number: {}", raw))),
    }
}

fn join_text(args: &[&str]) -> AutoModResult<String> {
    if args.is_empty() {
        return Err(AutoModError::Usage("Missing text.".to_string()));
    }
    Ok(args.join(" "))
}

/// Locations of all persisted state under the data directory
#[derive(Debug, Clone)]
pub struct DataFiles {
    pub dir: PathBuf,
    pub nick_rules: PathBuf,
    pub word_rules: PathBuf,
    pub protected: PathBuf,
    pub settings: PathBuf,
    pub log: PathBuf,
}

impl DataFiles {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref().to_path_buf();
        Self {
            nick_rules: dir.join(NICK_RULES_FILE),
            word_rules: dir.join(WORD_RULES_FILE),
            protected: dir.join(PROTECTED_FILE),
            settings: dir.join(SETTINGS_FILE),
            log: dir.join(LOG_FILE),
            dir,
        }
    }

    pub fn rule_file(&self, kind: RuleKind) -> &Path {
        match kind {
            RuleKind::Nick => &self.nick_rules,
            RuleKind::Word => &self.word_rules,
        }
    }

    /// Whether a changed path is one of the files a reload reads
    pub fn is_watched(&self, path: &Path) -> bool {
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => matches!(
                name,
                NICK_RULES_FILE | WORD_RULES_FILE | PROTECTED_FILE | SETTINGS_FILE
            ),
            None => false,
        }
    }

    /// Whether a watcher event should trigger a reload
    pub fn is_reload_event(&self, event: &Event) -> bool {
        matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
            && event.paths.iter().any(|p| self.is_watched(p))
    }

    /// Create the data directory and template files that do not exist yet
    pub async fn ensure_exist(&self) -> AutoModResult<()> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AutoModError::persistence(&self.dir, e))?;

        let templates = [
            (&self.nick_rules, file_header(RuleKind::Nick)),
            (&self.word_rules, file_header(RuleKind::Word)),
            (
                &self.protected,
                "# protected_channels.txt - one channel per line (lowercase)\n".to_string(),
            ),
        ];

        for (path, header) in templates {
            if fs::try_exists(path).await.unwrap_or(false) {
                continue;
            }
            fs::write(path, header)
                .await
                .map_err(|e| AutoModError::persistence(path, e))?;
            info!("Created {}", path.display());
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    6667
}

fn default_nick() -> String {
    "AutoMod".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("automod-data")
}

fn default_whitelist() -> Vec<String> {
    vec!["ChanServ".to_string(), "NickServ".to_string()]
}

fn default_kick_delay_ms() -> u64 {
    700
}

fn default_unban_check_seconds() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

/// Process configuration read from `automod.toml` and the environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_nick")]
    pub nick: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub realname: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_whitelist")]
    pub whitelist: Vec<String>,
    #[serde(default = "default_kick_delay_ms")]
    pub kick_delay_ms: u64,
    #[serde(default = "default_unban_check_seconds")]
    pub unban_check_seconds: u64,
    #[serde(default = "default_true")]
    pub watch_rule_files: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: String::new(),
            port: default_port(),
            nick: default_nick(),
            username: None,
            realname: None,
            password: None,
            channels: Vec::new(),
            data_dir: default_data_dir(),
            whitelist: default_whitelist(),
            kick_delay_ms: default_kick_delay_ms(),
            unban_check_seconds: default_unban_check_seconds(),
            watch_rule_files: true,
        }
    }
}

impl AppConfig {
    /// Read the TOML config file (optional) and apply environment overrides
    pub async fn load(path: &Path) -> Result<Self> {
        let mut config = if fs::try_exists(path).await.unwrap_or(false) {
            let content = fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            Self::from_toml(&content)
                .with_context(|| format!("Failed to parse config: {}", path.display()))?
        } else {
            warn!("Config file {} not found, using defaults and environment", path.display());
            Self::default()
        };

        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self) {
        if let Ok(server) = env::var("AUTOMOD_SERVER") {
            self.server = server;
        }
        if let Ok(port) = env::var("AUTOMOD_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => warn!("Ignoring invalid AUTOMOD_PORT: {}", port),
            }
        }
        if let Ok(nick) = env::var("AUTOMOD_NICK") {
            self.nick = nick;
        }
        if let Ok(password) = env::var("AUTOMOD_PASSWORD") {
            self.password = Some(password);
        }
        if let Ok(channels) = env::var("AUTOMOD_CHANNELS") {
            self.channels = channels
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Ok(dir) = env::var("AUTOMOD_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.is_empty() {
            return Err(anyhow::anyhow!(
                "No IRC server configured (set `server` in the config file or AUTOMOD_SERVER)"
            ));
        }
        if self.nick.is_empty() || self.nick.contains(char::is_whitespace) {
            return Err(anyhow::anyhow!("Invalid nick: '{}'", self.nick));
        }
        if self.unban_check_seconds == 0 {
            return Err(anyhow::anyhow!("unban_check_seconds must be at least 1"));
        }
        Ok(())
    }

    pub fn data_files(&self) -> DataFiles {
        DataFiles::new(&self.data_dir)
    }

    pub fn kick_delay(&self) -> Duration {
        Duration::from_millis(self.kick_delay_ms)
    }

    pub fn unban_check_interval(&self) -> Duration {
        Duration::from_secs(self.unban_check_seconds)
    }

    pub fn irc_config(&self) -> IrcConfig {
        IrcConfig {
            server: self.server.clone(),
            port: self.port,
            nick: self.nick.clone(),
            username: self.username.clone().unwrap_or_else(|| self.nick.to_lowercase()),
            realname: self
                .realname
                .clone()
                .unwrap_or_else(|| "AutoMod channel moderation".to_string()),
            password: self.password.clone(),
            channels: self.channels.clone(),
        }
    }
}

/// Watch the data directory and send a reload request when a rule, channel
/// or settings file changes. The returned watcher must be kept alive.
pub fn watch_data_files(
    files: &DataFiles,
    reload_sender: mpsc::Sender<()>,
) -> Result<RecommendedWatcher> {
    let (tx, mut rx) = mpsc::channel::<Event>(100);

    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        match res {
            Ok(event) => {
                if let Err(e) = tx.blocking_send(event) {
                    error!("Failed to send file watch event: {}", e);
                }
            }
            Err(e) => error!("File watch error: {}", e),
        }
    })?;

    watcher
        .watch(&files.dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", files.dir.display()))?;

    let watched = files.clone();
    tokio::spawn(async move {
        let mut last_reload: Option<Instant> = None;

        while let Some(event) = rx.recv().await {
            if !watched.is_reload_event(&event) {
                continue;
            }

            // Debounce rapid file changes
            let now = Instant::now();
            if last_reload.is_some_and(|last| now.duration_since(last) < Duration::from_millis(500)) {
                continue;
            }
            last_reload = Some(now);

            info!("Data file changed, requesting reload");
            if reload_sender.send(()).await.is_err() {
                debug!("Reload receiver closed, stopping file watcher task");
                break;
            }
        }
    });

    info!("Watching {} for rule changes", files.dir.display());
    Ok(watcher)
}
