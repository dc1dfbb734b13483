use log::info;
use std::collections::BTreeSet;
use std::path::Path;
use tokio::fs;

use crate::error::{AutoModError, AutoModResult};

/// Channels under active moderation, stored lower-cased
#[derive(Debug, Clone, Default)]
pub struct ProtectionRegistry {
    channels: BTreeSet<String>,
}

impl ProtectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_protected(&self, channel: &str) -> bool {
        !channel.is_empty() && self.channels.contains(&channel.to_lowercase())
    }

    /// Flip protection for a channel, returning whether it is now protected
    pub fn toggle(&mut self, channel: &str) -> bool {
        let key = channel.to_lowercase();
        if self.channels.remove(&key) {
            info!("Removed protection: {}", key);
            false
        } else {
            info!("Added protection: {}", key);
            self.channels.insert(key);
            true
        }
    }

    pub fn protect(&mut self, channel: &str) -> bool {
        self.channels.insert(channel.to_lowercase())
    }

    pub fn unprotect(&mut self, channel: &str) -> bool {
        self.channels.remove(&channel.to_lowercase())
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn parse(content: &str) -> Self {
        let channels = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !is_comment(line))
            .map(str::to_lowercase)
            .collect();
        Self { channels }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("# protected_channels.txt - one channel per line (lowercase)\n");
        for channel in &self.channels {
            out.push_str(channel);
            out.push('\n');
        }
        out
    }

    pub async fn load_from(path: &Path) -> AutoModResult<Self> {
        match fs::read_to_string(path).await {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(AutoModError::persistence(path, e)),
        }
    }

    pub async fn save_to(&self, path: &Path) -> AutoModResult<()> {
        fs::write(path, self.render())
            .await
            .map_err(|e| AutoModError::persistence(path, e))?;
        info!("Protected channels saved ({})", self.channels.len());
        Ok(())
    }
}

/// `#` followed by whitespace (or a lone `#`) is a comment; channel names
/// never contain whitespace.
fn is_comment(line: &str) -> bool {
    match line.strip_prefix('#') {
        Some(rest) => rest.is_empty() || rest.starts_with(char::is_whitespace),
        None => false,
    }
}
