use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, RwLock};

use crate::config::{DataFiles, Settings};
use crate::platforms::ChatConnection;
use crate::types::{
    ChatEvent, EnforcementTrigger, JoinEvent, MessageEvent, ModerationAction, RuleKind,
    UserIdentity,
};

pub mod bans;
pub mod commands;
pub mod flood;
pub mod pattern_matching;
pub mod protection;
pub mod rules;

use bans::{BanKey, BanManager, SharedConnection, DEFAULT_KICK_DELAY};
use commands::{render_listing, OperatorCommand, HELP_TEXT, MENU_TEXT};
use flood::FloodDetector;
use protection::ProtectionRegistry;
use rules::RuleStore;

const NICK_FALLBACK_REASON: &str = "AutoMod: Prohibited nickname";
const WORD_FALLBACK_REASON: &str = "AutoMod: Prohibited language";
const FLOOD_FALLBACK_REASON: &str = "Flooding the channel";

/// Watcher notifications arriving this soon after our own write are echoes
const SELF_WRITE_GRACE: Duration = Duration::from_secs(2);

/// Timing knobs for the engine
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub kick_delay: Duration,
    pub reconcile_interval: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            kick_delay: DEFAULT_KICK_DELAY,
            reconcile_interval: Duration::from_secs(60),
        }
    }
}

/// The moderation engine: owns all rule, channel, flood and ban state and
/// dispatches chat events, operator commands and timer ticks against it.
pub struct AutoMod {
    files: DataFiles,
    options: EngineOptions,
    whitelist: HashSet<String>,
    connection: SharedConnection,
    rules: Arc<RwLock<RuleStore>>,
    channels: Arc<RwLock<ProtectionRegistry>>,
    flood: Arc<RwLock<FloodDetector>>,
    bans: Arc<RwLock<BanManager>>,
    settings: Arc<RwLock<Settings>>,
    last_write: RwLock<Option<Instant>>,
}

impl AutoMod {
    pub fn new(
        files: DataFiles,
        options: EngineOptions,
        whitelist: Vec<String>,
        connection: Box<dyn ChatConnection>,
    ) -> Self {
        let settings = Settings::default();
        let connection: SharedConnection = Arc::new(RwLock::new(connection));
        let bans = BanManager::new(
            Arc::clone(&connection),
            options.kick_delay,
            settings.unban_minutes,
        );

        Self {
            files,
            options,
            whitelist: whitelist.iter().map(|n| n.to_lowercase()).collect(),
            connection,
            rules: Arc::new(RwLock::new(RuleStore::new())),
            channels: Arc::new(RwLock::new(ProtectionRegistry::new())),
            flood: Arc::new(RwLock::new(FloodDetector::new(settings.flood_policy()))),
            bans: Arc::new(RwLock::new(bans)),
            settings: Arc::new(RwLock::new(settings)),
            last_write: RwLock::new(None),
        }
    }

    pub fn connection(&self) -> SharedConnection {
        Arc::clone(&self.connection)
    }

    /// Create missing data files and load everything from disk
    pub async fn load_state(&self) {
        if let Err(e) = self.files.ensure_exist().await {
            error!("Failed to prepare data directory: {}", e);
        }
        let summary = self.reload().await;
        info!("{}", summary);
    }

    /// Re-read settings, rules and protected channels. Anything that fails
    /// to load keeps its in-memory state.
    pub async fn reload(&self) -> String {
        match Settings::load(&self.files.settings).await {
            Ok(loaded) => {
                self.apply_settings(&loaded).await;
                *self.settings.write().await = loaded;
                // write back so keys missing from the file appear with defaults
                self.persist_settings().await;
            }
            Err(e) => warn!("Keeping current settings: {}", e),
        }

        let mut rule_counts = Vec::new();
        for kind in [RuleKind::Nick, RuleKind::Word] {
            let path = self.files.rule_file(kind);
            let mut rules = self.rules.write().await;
            if let Err(e) = rules.load_from(kind, path).await {
                warn!("Keeping current {} rules: {}", kind, e);
            }
            rule_counts.push(rules.list(kind).len());
        }

        match ProtectionRegistry::load_from(&self.files.protected).await {
            Ok(registry) => *self.channels.write().await = registry,
            Err(e) => warn!("Keeping current protected channels: {}", e),
        }
        let channel_count = self.channels.read().await.len();

        format!(
            "Reloaded: {} nick rules, {} word rules, {} protected channels.",
            rule_counts[0], rule_counts[1], channel_count
        )
    }

    async fn apply_settings(&self, settings: &Settings) {
        self.flood.write().await.set_policy(settings.flood_policy());
        self.bans
            .write()
            .await
            .set_default_minutes(settings.unban_minutes);
    }

    async fn is_whitelisted(&self, nick: &str) -> bool {
        let nick = nick.to_lowercase();
        if self.whitelist.contains(&nick) {
            return true;
        }
        self.connection.read().await.own_nick().to_lowercase() == nick
    }

    /// Dispatch one chat event. Returns the enforcement taken, if any.
    pub async fn handle_event(&self, event: ChatEvent, now: DateTime<Utc>) -> Option<ModerationAction> {
        if !self.channels.read().await.is_protected(event.channel()) {
            return None;
        }
        if self.is_whitelisted(&event.user().nick).await {
            debug!("Ignoring whitelisted user {}", event.user().nick);
            return None;
        }

        match event {
            ChatEvent::Join(join) => self.on_join(&join, now).await,
            ChatEvent::Message(message) => self.on_message(&message, now).await,
        }
    }

    async fn on_join(&self, join: &JoinEvent, now: DateTime<Utc>) -> Option<ModerationAction> {
        let nick_lower = join.user.nick.to_lowercase();

        let (pattern, message, duration) = {
            let rules = self.rules.read().await;
            rules
                .list(RuleKind::Nick)
                .iter()
                .filter(|rule| rule.matches(&join.user.nick))
                .find(|rule| {
                    let exact_core = rule.is_wildcard
                        && rule.wildcard_core().as_deref() == Some(nick_lower.as_str());
                    if exact_core {
                        debug!(
                            "Wildcard rule '{}' skipped for exact nick {}",
                            rule.pattern, join.user.nick
                        );
                    }
                    !exact_core
                })
                .map(|rule| (rule.pattern.clone(), rule.message.clone(), rule.duration_minutes))?
        };

        let reason = {
            let settings = self.settings.read().await;
            pick_reason(&[message.as_str(), settings.ban_message.as_str()], NICK_FALLBACK_REASON)
        };

        Some(
            self.enforce(
                &join.channel,
                &join.user,
                reason,
                duration,
                EnforcementTrigger::NickRule { pattern },
                now,
            )
            .await,
        )
    }

    async fn on_message(&self, event: &MessageEvent, now: DateTime<Utc>) -> Option<ModerationAction> {
        let flooding = {
            let mut flood = self.flood.write().await;
            let triggered = flood.observe(&event.channel, &event.user.nick, now);
            if triggered {
                flood.clear(&event.channel, &event.user.nick);
            }
            triggered
        };

        if flooding {
            let reason = {
                let settings = self.settings.read().await;
                pick_reason(
                    &[settings.kick_message.as_str(), settings.ban_message.as_str()],
                    FLOOD_FALLBACK_REASON,
                )
            };
            return Some(
                self.enforce(
                    &event.channel,
                    &event.user,
                    reason,
                    None,
                    EnforcementTrigger::Flood,
                    now,
                )
                .await,
            );
        }

        let (pattern, message, duration) = {
            let rules = self.rules.read().await;
            rules
                .list(RuleKind::Word)
                .iter()
                .find(|rule| rule.matches(&event.text))
                .map(|rule| (rule.pattern.clone(), rule.message.clone(), rule.duration_minutes))?
        };

        let reason = {
            let settings = self.settings.read().await;
            pick_reason(&[message.as_str(), settings.ban_message.as_str()], WORD_FALLBACK_REASON)
        };

        Some(
            self.enforce(
                &event.channel,
                &event.user,
                reason,
                duration,
                EnforcementTrigger::WordRule { pattern },
                now,
            )
            .await,
        )
    }

    async fn enforce(
        &self,
        channel: &str,
        user: &UserIdentity,
        reason: String,
        duration_minutes: Option<u32>,
        trigger: EnforcementTrigger,
        now: DateTime<Utc>,
    ) -> ModerationAction {
        warn!("Enforcing on {} in {} ({:?}): {}", user, channel, trigger, reason);

        let record = self
            .bans
            .write()
            .await
            .enforce(channel, user, &reason, duration_minutes, now)
            .await;

        ModerationAction {
            channel: channel.to_string(),
            nick: user.nick.clone(),
            mask: record.key.mask,
            reason,
            duration_minutes: record.duration_minutes,
            trigger,
        }
    }

    /// Lift expired bans and drop idle flood windows
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Vec<BanKey> {
        let lifted = self.bans.write().await.reconcile_expired(now).await;
        let pruned = self.flood.write().await.prune_idle(now);
        if pruned > 0 {
            debug!("Pruned {} idle flood windows", pruned);
        }
        lifted
    }

    /// Run an operator command and return the feedback text
    pub async fn execute(&self, command: OperatorCommand) -> String {
        match command {
            OperatorCommand::Reload => self.reload().await,
            OperatorCommand::List => {
                let channels = self.channels.read().await;
                let settings = self.settings.read().await;
                let rules = self.rules.read().await;
                render_listing(&channels, &settings, &rules)
            }
            OperatorCommand::Add {
                kind,
                pattern,
                message,
                duration_minutes,
            } => {
                let added = self
                    .rules
                    .write()
                    .await
                    .add(kind, &pattern, &message, duration_minutes);
                match added {
                    Ok(()) => {
                        self.persist_rules(kind).await;
                        format!("Added {} rule: {}", kind, pattern)
                    }
                    Err(e) => format!("Error: {}", e),
                }
            }
            OperatorCommand::Delete { kind, pattern } => {
                let removed = self.rules.write().await.remove(kind, &pattern);
                if removed {
                    self.persist_rules(kind).await;
                    format!("Removed {} rule: {}", kind, pattern)
                } else {
                    "Pattern not found.".to_string()
                }
            }
            OperatorCommand::ToggleChannel(channel) => {
                let protected = self.channels.write().await.toggle(&channel);
                self.persist_channels().await;
                if protected {
                    format!("Now protecting {}", channel)
                } else {
                    format!("No longer protecting {}", channel)
                }
            }
            OperatorCommand::UnprotectChannel(channel) => {
                let removed = self.channels.write().await.unprotect(&channel);
                if removed {
                    self.persist_channels().await;
                    format!("No longer protecting {}", channel)
                } else {
                    format!("{} was not protected.", channel)
                }
            }
            OperatorCommand::Set { key, args } => {
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                let applied = {
                    let mut settings = self.settings.write().await;
                    settings.apply(&key, &args).map(|feedback| (feedback, settings.clone()))
                };
                match applied {
                    Ok((feedback, updated)) => {
                        self.apply_settings(&updated).await;
                        self.persist_settings().await;
                        feedback
                    }
                    Err(e) => e.to_string(),
                }
            }
            OperatorCommand::Help => HELP_TEXT.to_string(),
            OperatorCommand::Menu => MENU_TEXT.to_string(),
        }
    }

    async fn mark_write(&self) {
        *self.last_write.write().await = Some(Instant::now());
    }

    async fn persist_rules(&self, kind: RuleKind) {
        self.mark_write().await;
        let rules = self.rules.read().await;
        if let Err(e) = rules.save_to(kind, self.files.rule_file(kind)).await {
            error!("Failed to save {} rules: {}", kind, e);
        }
    }

    async fn persist_channels(&self) {
        self.mark_write().await;
        let channels = self.channels.read().await;
        if let Err(e) = channels.save_to(&self.files.protected).await {
            error!("Failed to save protected channels: {}", e);
        }
    }

    async fn persist_settings(&self) {
        self.mark_write().await;
        let settings = self.settings.read().await;
        if let Err(e) = settings.save(&self.files.settings).await {
            error!("Failed to save settings: {}", e);
        }
    }

    /// Reload in response to a file watcher notification, ignoring the
    /// notifications our own saves produce.
    pub async fn handle_reload_request(&self) -> Option<String> {
        let recent_write = self
            .last_write
            .read()
            .await
            .is_some_and(|at| at.elapsed() < SELF_WRITE_GRACE);
        if recent_write {
            debug!("Ignoring file change caused by our own save");
            return None;
        }
        Some(self.reload().await)
    }

    /// Main loop: chat events, reconciliation ticks, operator commands and
    /// reload requests are handled one at a time until Ctrl+C or the
    /// connection closes.
    pub async fn run(
        &self,
        mut commands: mpsc::Receiver<OperatorCommand>,
        mut reloads: mpsc::Receiver<()>,
    ) -> Result<()> {
        let mut events = self
            .connection
            .read()
            .await
            .event_receiver()
            .ok_or_else(|| anyhow::anyhow!("Chat connection has no event stream"))?;

        let mut ticker = tokio::time::interval(self.options.reconcile_interval);
        // the first tick completes immediately
        ticker.tick().await;

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        info!("AutoMod is running. Type AMHELP for commands.");

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => {
                        self.handle_event(event, Utc::now()).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event stream lagged, {} events dropped", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("Chat connection closed");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    let lifted = self.reconcile(Utc::now()).await;
                    if !lifted.is_empty() {
                        info!("Reconciliation lifted {} bans", lifted.len());
                    }
                }
                Some(command) = commands.recv() => {
                    let feedback = self.execute(command).await;
                    println!("{}", feedback);
                }
                Some(()) = reloads.recv() => {
                    if let Some(summary) = self.handle_reload_request().await {
                        info!("{}", summary);
                    }
                }
                _ = &mut shutdown => {
                    info!("Received Ctrl+C, shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Persist settings and channels, then disconnect
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down AutoMod...");
        self.persist_settings().await;
        self.persist_channels().await;

        let active = self.bans.read().await.len();
        if active > 0 {
            info!("{} timed bans still active; they will not be lifted automatically", active);
        }

        self.connection.write().await.disconnect().await?;
        info!("AutoMod stopped");
        Ok(())
    }
}

/// First non-empty candidate, else the fallback
fn pick_reason(candidates: &[&str], fallback: &str) -> String {
    candidates
        .iter()
        .map(|c| c.trim())
        .find(|c| !c.is_empty())
        .unwrap_or(fallback)
        .to_string()
}
