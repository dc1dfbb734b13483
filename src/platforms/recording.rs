// Test double that records every action instead of talking to a network

use anyhow::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::platforms::ChatConnection;
use crate::types::ChatEvent;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedAction {
    Ban { channel: String, mask: String },
    Unban { channel: String, mask: String },
    Kick { channel: String, nick: String, reason: String },
    Message { target: String, text: String },
}

#[derive(Clone)]
pub struct RecordingConnection {
    nick: String,
    actions: Arc<Mutex<Vec<RecordedAction>>>,
    fail_channels: Arc<Mutex<Vec<String>>>,
    connected: Arc<AtomicBool>,
    events: broadcast::Sender<ChatEvent>,
}

impl RecordingConnection {
    pub fn new(nick: &str) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            nick: nick.to_string(),
            actions: Arc::new(Mutex::new(Vec::new())),
            fail_channels: Arc::new(Mutex::new(Vec::new())),
            connected: Arc::new(AtomicBool::new(true)),
            events,
        }
    }

    /// Make every action on `channel` fail
    pub fn fail_on(&self, channel: &str) {
        self.fail_channels.lock().unwrap().push(channel.to_lowercase());
    }

    pub fn actions(&self) -> Vec<RecordedAction> {
        self.actions.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.actions.lock().unwrap().clear();
    }

    pub fn emit(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    fn record(&self, channel: &str, action: RecordedAction) -> Result<()> {
        if self
            .fail_channels
            .lock()
            .unwrap()
            .contains(&channel.to_lowercase())
        {
            return Err(anyhow::anyhow!("no such channel: {}", channel));
        }
        self.actions.lock().unwrap().push(action);
        Ok(())
    }
}

#[async_trait]
impl ChatConnection for RecordingConnection {
    async fn connect(&mut self) -> Result<()> {
        self.connected.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn set_ban(&self, channel: &str, mask: &str) -> Result<()> {
        self.record(
            channel,
            RecordedAction::Ban {
                channel: channel.to_string(),
                mask: mask.to_string(),
            },
        )
    }

    async fn remove_ban(&self, channel: &str, mask: &str) -> Result<()> {
        self.record(
            channel,
            RecordedAction::Unban {
                channel: channel.to_string(),
                mask: mask.to_string(),
            },
        )
    }

    async fn kick(&self, channel: &str, nick: &str, reason: &str) -> Result<()> {
        self.record(
            channel,
            RecordedAction::Kick {
                channel: channel.to_string(),
                nick: nick.to_string(),
                reason: reason.to_string(),
            },
        )
    }

    async fn send_message(&self, target: &str, message: &str) -> Result<()> {
        self.record(
            target,
            RecordedAction::Message {
                target: target.to_string(),
                text: message.to_string(),
            },
        )
    }

    fn own_nick(&self) -> &str {
        &self.nick
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn event_receiver(&self) -> Option<broadcast::Receiver<ChatEvent>> {
        Some(self.events.subscribe())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }
}
