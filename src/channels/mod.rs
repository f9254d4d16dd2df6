//! Channel subscription registry
//!
//! A [`ChannelSet`] maps channel names (concrete or glob patterns) to the
//! listeners attached to them. A channel exists only while it has at least
//! one listener.

mod set;

use std::fmt;
use std::sync::Arc;

use crate::protocol::Message;

pub use set::ChannelSet;

/// A callback invoked for every message published to a matching channel.
///
/// Two listeners are the same listener when they share the same allocation,
/// so keep a clone around to unsubscribe later.
#[derive(Clone)]
pub struct Listener(Arc<dyn Fn(&Message) + Send + Sync>);

impl Listener {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        Self(Arc::new(callback))
    }

    pub fn call(&self, message: &Message) {
        (self.0)(message)
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Listener {}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Arc::as_ptr(&self.0))
    }
}

/// Listeners attached to one channel name.
#[derive(Debug, Default)]
pub struct Channel {
    pub name: String,
    listeners: Vec<Listener>,
    /// The server has acknowledged a subscription to this channel.
    established: bool,
}

impl Channel {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    pub fn is_established(&self) -> bool {
        self.established
    }
}

#[cfg(test)]
mod tests;
