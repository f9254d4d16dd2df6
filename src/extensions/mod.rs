//! Message interceptors
//!
//! Extensions see every outgoing message before it reaches a transport and
//! every incoming message before it is routed. Returning `None` drops the
//! message silently.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use crate::protocol::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Incoming,
    Outgoing,
}

#[async_trait]
pub trait Extension: Send + Sync {
    async fn incoming(&self, message: Message) -> Option<Message> {
        Some(message)
    }

    async fn outgoing(&self, message: Message) -> Option<Message> {
        Some(message)
    }
}

/// Ordered extension pipeline. Cloning shares the same list.
#[derive(Clone, Default)]
pub struct Extensions {
    list: Arc<RwLock<Vec<Arc<dyn Extension>>>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, extension: Arc<dyn Extension>) {
        if let Ok(mut list) = self.list.write() {
            list.push(extension);
        }
    }

    pub fn remove(&self, extension: &Arc<dyn Extension>) {
        if let Ok(mut list) = self.list.write() {
            list.retain(|e| !Arc::ptr_eq(e, extension));
        }
    }

    pub fn len(&self) -> usize {
        self.list.read().map(|list| list.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pass `message` through every extension in order for `stage`.
    pub async fn pipe(&self, stage: Stage, message: Message) -> Option<Message> {
        let snapshot: Vec<Arc<dyn Extension>> = match self.list.read() {
            Ok(list) => list.clone(),
            Err(_) => return Some(message),
        };

        let mut current = message;
        for extension in snapshot {
            current = match stage {
                Stage::Incoming => extension.incoming(current).await?,
                Stage::Outgoing => extension.outgoing(current).await?,
            };
        }
        Some(current)
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.len())
            .finish()
    }
}
