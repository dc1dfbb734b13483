use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::types::ChatEvent;

pub mod irc;

#[cfg(test)]
pub mod recording;

/// Interface to the chat network the moderation engine runs on.
///
/// Actions are fire-and-forget from the engine's point of view: an `Err`
/// means the action could not be issued, `Ok` does not mean the server
/// applied it.
#[async_trait]
pub trait ChatConnection: Send + Sync {
    /// Connect to the network and start delivering events
    async fn connect(&mut self) -> Result<()>;

    /// Set a ban mask on a channel
    async fn set_ban(&self, channel: &str, mask: &str) -> Result<()>;

    /// Remove a ban mask from a channel
    async fn remove_ban(&self, channel: &str, mask: &str) -> Result<()>;

    /// Kick a user from a channel with a reason
    async fn kick(&self, channel: &str, nick: &str, reason: &str) -> Result<()>;

    /// Send ordinary text to a channel or user
    async fn send_message(&self, target: &str, message: &str) -> Result<()>;

    /// Nick the connection is registered under
    fn own_nick(&self) -> &str;

    /// Check if the connection is healthy
    async fn is_connected(&self) -> bool;

    /// Get a receiver for incoming join/message events
    fn event_receiver(&self) -> Option<broadcast::Receiver<ChatEvent>>;

    /// Gracefully disconnect
    async fn disconnect(&mut self) -> Result<()>;
}
