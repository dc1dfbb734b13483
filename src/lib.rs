//! # AutoMod
//!
//! An IRC channel moderation agent. It watches joins and messages in a set
//! of protected channels, bans and kicks users whose nickname or message
//! matches an operator-maintained rule, removes users who flood, and lifts
//! timed bans once they expire.
//!
//! ## Features
//!
//! - **Nickname and word rules**: wildcard (`*spam*`), raw regex or literal
//!   patterns, first match wins
//! - **Flood protection**: sliding message window per channel and user
//! - **Timed bans**: ban on the full identity mask, delayed kick, periodic unban
//! - **Plain-text persistence**: human-editable rule, channel and settings files
//!   with hot reload
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use automod::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load(std::path::Path::new("automod.toml")).await?;
//!     let connection = IrcConnection::new(config.irc_config());
//!
//!     let automod = AutoMod::new(
//!         config.data_files(),
//!         EngineOptions::default(),
//!         config.whitelist.clone(),
//!         Box::new(connection),
//!     );
//!     automod.load_state().await;
//!     automod.connection().write().await.connect().await?;
//!
//!     let (_commands_tx, commands_rx) = tokio::sync::mpsc::channel(16);
//!     let (_reload_tx, reload_rx) = tokio::sync::mpsc::channel(4);
//!     automod.run(commands_rx, reload_rx).await?;
//!     automod.shutdown().await
//! }
//! ```

pub mod bot;
pub mod config;
pub mod error;
pub mod platforms;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::commands::OperatorCommand;
    pub use crate::bot::{AutoMod, EngineOptions};
    pub use crate::config::{watch_data_files, AppConfig, DataFiles, Settings};
    pub use crate::error::{AutoModError, AutoModResult};
    pub use crate::platforms::{
        irc::{IrcConfig, IrcConnection},
        ChatConnection,
    };
    pub use crate::types::{
        ChatEvent, JoinEvent, MessageEvent, ModerationAction, Rule, RuleKind, UserIdentity,
    };
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
