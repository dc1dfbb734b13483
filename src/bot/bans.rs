// src/bot/bans.rs - Ban + delayed kick enforcement and timed unban reconciliation

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::error::{AutoModError, AutoModResult};
use crate::platforms::ChatConnection;
use crate::types::UserIdentity;

/// Connection handle shared between the engine and deferred tasks
pub type SharedConnection = Arc<RwLock<Box<dyn ChatConnection>>>;

/// Delay between a ban and its kick, to let the ban propagate first
pub const DEFAULT_KICK_DELAY: std::time::Duration = std::time::Duration::from_millis(700);

/// Identifies one active ban: lower-cased channel plus ban mask
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BanKey {
    pub channel: String,
    pub mask: String,
}

impl BanKey {
    pub fn new(channel: &str, mask: &str) -> Self {
        Self {
            channel: channel.to_lowercase(),
            mask: mask.to_string(),
        }
    }
}

/// What `enforce` recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BanRecord {
    pub key: BanKey,
    pub expiry: DateTime<Utc>,
    pub duration_minutes: u32,
}

/// A kick deferred until after the ban. Carries everything it needs so it can
/// be run directly or put on a timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KickTask {
    pub channel: String,
    pub nick: String,
    pub reason: String,
}

impl KickTask {
    pub async fn run(&self, connection: &dyn ChatConnection) -> AutoModResult<()> {
        connection
            .kick(&self.channel, &self.nick, &self.reason)
            .await
            .map_err(|e| AutoModError::ActionFailure {
                action: "kick".to_string(),
                channel: self.channel.clone(),
                reason: e.to_string(),
            })?;
        info!("Sent KICK {} {} :{}", self.channel, self.nick, self.reason);
        Ok(())
    }

    pub fn schedule(self, connection: SharedConnection, delay: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let guard = connection.read().await;
            if let Err(e) = self.run(&**guard).await {
                error!("Failed to kick {} from {}: {}", self.nick, self.channel, e);
            }
        })
    }
}

/// Issues bans and kicks and lifts bans once they expire.
///
/// The active-ban map only records bans this process issued; it is not
/// synchronised with the server's ban list.
pub struct BanManager {
    connection: SharedConnection,
    active: HashMap<BanKey, DateTime<Utc>>,
    kick_delay: std::time::Duration,
    default_minutes: u32,
}

impl BanManager {
    pub fn new(connection: SharedConnection, kick_delay: std::time::Duration, default_minutes: u32) -> Self {
        Self {
            connection,
            active: HashMap::new(),
            kick_delay,
            default_minutes,
        }
    }

    pub fn set_default_minutes(&mut self, minutes: u32) {
        self.default_minutes = minutes;
    }

    pub fn default_minutes(&self) -> u32 {
        self.default_minutes
    }

    /// Ban the user's mask now, kick them after the kick delay and record
    /// when the ban should be lifted. Action failures are logged only.
    pub async fn enforce(
        &mut self,
        channel: &str,
        user: &UserIdentity,
        reason: &str,
        duration_minutes: Option<u32>,
        now: DateTime<Utc>,
    ) -> BanRecord {
        let mask = user.ban_mask();

        {
            let connection = self.connection.read().await;
            if let Err(e) = connection.set_ban(channel, &mask).await {
                let failure = AutoModError::ActionFailure {
                    action: "ban".to_string(),
                    channel: channel.to_string(),
                    reason: e.to_string(),
                };
                error!("Error issuing ban: {}", failure);
            }
        }

        KickTask {
            channel: channel.to_string(),
            nick: user.nick.clone(),
            reason: reason.to_string(),
        }
        .schedule(Arc::clone(&self.connection), self.kick_delay);

        let minutes = duration_minutes.unwrap_or(self.default_minutes);
        let expiry = now + Duration::minutes(i64::from(minutes));
        let key = BanKey::new(channel, &mask);
        self.active.insert(key.clone(), expiry);

        info!(
            "Set ban {} in {} (expires in {} min) - reason: {}",
            mask, channel, minutes, reason
        );

        BanRecord {
            key,
            expiry,
            duration_minutes: minutes,
        }
    }

    /// Lift every ban whose expiry has passed. Entries are dropped whether or
    /// not the unban action went through, and one failure does not stop the
    /// rest of the pass. Returns the keys that were lifted.
    pub async fn reconcile_expired(&mut self, now: DateTime<Utc>) -> Vec<BanKey> {
        let mut expired: Vec<BanKey> = self
            .active
            .iter()
            .filter(|(_, expiry)| now >= **expiry)
            .map(|(key, _)| key.clone())
            .collect();
        expired.sort();

        if expired.is_empty() {
            debug!("No expired bans ({} active)", self.active.len());
            return expired;
        }

        let connection = self.connection.read().await;
        for key in &expired {
            match connection.remove_ban(&key.channel, &key.mask).await {
                Ok(()) => info!("Unbanned {} from {}", key.mask, key.channel),
                Err(e) => error!("Error unbanning {} from {}: {}", key.mask, key.channel, e),
            }
            self.active.remove(key);
        }

        expired
    }

    pub fn expiry_of(&self, channel: &str, mask: &str) -> Option<DateTime<Utc>> {
        self.active.get(&BanKey::new(channel, mask)).copied()
    }

    /// Record a ban without issuing any action
    pub fn track(&mut self, key: BanKey, expiry: DateTime<Utc>) {
        self.active.insert(key, expiry);
    }

    pub fn active_bans(&self) -> Vec<(BanKey, DateTime<Utc>)> {
        let mut bans: Vec<_> = self.active.iter().map(|(k, v)| (k.clone(), *v)).collect();
        bans.sort();
        bans
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::recording::{RecordedAction, RecordingConnection};

    fn manager(recorder: &RecordingConnection) -> BanManager {
        let boxed: Box<dyn ChatConnection> = Box::new(recorder.clone());
        let connection: SharedConnection = Arc::new(RwLock::new(boxed));
        BanManager::new(connection, std::time::Duration::from_millis(10), 60)
    }

    fn troll() -> UserIdentity {
        UserIdentity {
            nick: "troll".to_string(),
            user: Some("~t".to_string()),
            host: Some("bad.example".to_string()),
        }
    }

    #[tokio::test]
    async fn test_enforce_bans_then_kicks() {
        let recorder = RecordingConnection::new("automod");
        let mut bans = manager(&recorder);
        let now = Utc::now();

        let record = bans.enforce("#Chan", &troll(), "bye", Some(15), now).await;
        assert_eq!(record.duration_minutes, 15);
        assert_eq!(record.expiry, now + Duration::minutes(15));
        assert_eq!(
            recorder.actions(),
            vec![RecordedAction::Ban {
                channel: "#Chan".to_string(),
                mask: "*!~t@bad.example".to_string()
            }]
        );

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(
            recorder.actions()[1],
            RecordedAction::Kick {
                channel: "#Chan".to_string(),
                nick: "troll".to_string(),
                reason: "bye".to_string()
            }
        );
        assert_eq!(bans.expiry_of("#chan", "*!~t@bad.example"), Some(record.expiry));
    }

    #[tokio::test]
    async fn test_enforce_without_duration_uses_default() {
        let recorder = RecordingConnection::new("automod");
        let mut bans = manager(&recorder);
        let now = Utc::now();
        let record = bans.enforce("#chan", &troll(), "bye", None, now).await;
        assert_eq!(record.duration_minutes, 60);
    }

    #[tokio::test]
    async fn test_reban_replaces_entry() {
        let recorder = RecordingConnection::new("automod");
        let mut bans = manager(&recorder);
        let now = Utc::now();
        bans.enforce("#chan", &troll(), "one", Some(5), now).await;
        bans.enforce("#CHAN", &troll(), "two", Some(30), now).await;
        assert_eq!(bans.len(), 1);
        assert_eq!(
            bans.expiry_of("#chan", "*!~t@bad.example"),
            Some(now + Duration::minutes(30))
        );
    }

    #[tokio::test]
    async fn test_reconcile_lifts_only_expired() {
        let recorder = RecordingConnection::new("automod");
        let mut bans = manager(&recorder);
        let now = Utc::now();
        bans.track(BanKey::new("#chan", "old!*@*"), now - Duration::seconds(1));
        bans.track(BanKey::new("#chan", "new!*@*"), now + Duration::seconds(3600));

        let lifted = bans.reconcile_expired(now).await;
        assert_eq!(lifted, vec![BanKey::new("#chan", "old!*@*")]);
        assert_eq!(
            recorder.actions(),
            vec![RecordedAction::Unban {
                channel: "#chan".to_string(),
                mask: "old!*@*".to_string()
            }]
        );
        assert_eq!(bans.len(), 1);
        assert!(bans.expiry_of("#chan", "new!*@*").is_some());
    }

    #[tokio::test]
    async fn test_reconcile_continues_after_failure() {
        let recorder = RecordingConnection::new("automod");
        recorder.fail_on("#gone");
        let mut bans = manager(&recorder);
        let now = Utc::now();
        bans.track(BanKey::new("#gone", "a!*@*"), now - Duration::seconds(5));
        bans.track(BanKey::new("#here", "b!*@*"), now - Duration::seconds(5));

        let lifted = bans.reconcile_expired(now).await;
        assert_eq!(lifted.len(), 2);
        assert!(bans.is_empty());
        assert_eq!(
            recorder.actions(),
            vec![RecordedAction::Unban {
                channel: "#here".to_string(),
                mask: "b!*@*".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_failed_ban_is_still_tracked() {
        let recorder = RecordingConnection::new("automod");
        recorder.fail_on("#gone");
        let mut bans = manager(&recorder);
        bans.enforce("#gone", &troll(), "bye", Some(1), Utc::now()).await;
        assert_eq!(bans.len(), 1);
    }

    #[tokio::test]
    async fn test_kick_task_runs_directly() {
        let recorder = RecordingConnection::new("automod");
        let task = KickTask {
            channel: "#chan".to_string(),
            nick: "troll".to_string(),
            reason: "later".to_string(),
        };
        task.run(&recorder).await.unwrap();
        assert_eq!(recorder.actions().len(), 1);

        recorder.fail_on("#chan");
        let err = task.run(&recorder).await.unwrap_err();
        assert!(matches!(err, AutoModError::ActionFailure { .. }));
    }
}
