use std::collections::HashMap;

use tracing::debug;

use super::{Channel, Listener};
use crate::protocol::{Message, channel};

#[derive(Debug, Default)]
pub struct ChannelSet {
    channels: HashMap<String, Channel>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `listener` to `name`. Returns `true` when the channel is new,
    /// meaning the server has to be told about it.
    pub fn subscribe(&mut self, name: &str, listener: Listener) -> bool {
        let created = !self.channels.contains_key(name);
        let channel = self
            .channels
            .entry(name.to_string())
            .or_insert_with(|| Channel::new(name));
        if !channel.listeners.contains(&listener) {
            channel.listeners.push(listener);
        }
        created
    }

    /// Detach `listener` from `name`. Returns `true` when that was the last
    /// listener and the channel has been removed.
    pub fn unsubscribe(&mut self, name: &str, listener: &Listener) -> bool {
        let Some(channel) = self.channels.get_mut(name) else {
            return false;
        };
        let before = channel.listeners.len();
        channel.listeners.retain(|l| l != listener);
        if channel.listeners.len() == before || !channel.listeners.is_empty() {
            return false;
        }
        self.channels.remove(name);
        debug!(channel = name, "removed channel after last listener left");
        true
    }

    pub fn has_subscription(&self, name: &str) -> bool {
        self.channels.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Channel> {
        self.channels.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    pub fn set_established(&mut self, name: &str, established: bool) {
        if let Some(channel) = self.channels.get_mut(name) {
            channel.established = established;
        }
    }

    /// Channels the server acknowledged, to be replayed after a new
    /// handshake.
    pub fn established(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .values()
            .filter(|c| c.established)
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Every listener whose channel glob-matches the concrete channel
    /// `name`.
    pub fn listeners_for(&self, name: &str) -> Vec<Listener> {
        channel::expand(name)
            .iter()
            .filter_map(|pattern| self.channels.get(pattern))
            .flat_map(|c| c.listeners.iter().cloned())
            .collect()
    }

    pub fn distribute_message(&self, message: &Message) {
        for listener in self.listeners_for(&message.channel) {
            listener.call(message);
        }
    }

    pub fn clear(&mut self) {
        self.channels.clear();
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
