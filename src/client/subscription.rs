use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::task::{Context, Poll};

use super::client::Inner;
use crate::channels::Listener;
use crate::utils::error::Result;
use crate::utils::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Phase {
    Pending,
    Established,
    Cancelled,
}

/// Handle returned by [`Client::subscribe`](super::Client::subscribe).
///
/// Awaiting it resolves once the server has acknowledged the subscription.
/// [`Subscription::cancel`] withdraws it: before the acknowledgement the
/// request is abandoned, after it the channel is unsubscribed.
pub struct Subscription {
    client: Weak<Inner>,
    channel: String,
    listener: Listener,
    task: Task<()>,
    phase: Arc<Mutex<Phase>>,
}

impl Subscription {
    pub(super) fn new(
        client: Weak<Inner>,
        channel: &str,
        listener: Listener,
        task: Task<()>,
        phase: Arc<Mutex<Phase>>,
    ) -> Self {
        Self {
            client,
            channel: channel.to_string(),
            listener,
            task,
            phase,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn is_established(&self) -> bool {
        self.phase
            .lock()
            .map(|p| *p == Phase::Established)
            .unwrap_or(false)
    }

    pub fn cancel(&self) -> Task<()> {
        let was = match self.phase.lock() {
            Ok(mut phase) => std::mem::replace(&mut *phase, Phase::Cancelled),
            Err(_) => return Task::ready(Ok(())),
        };
        match was {
            Phase::Established => match self.client.upgrade() {
                Some(client) => client.unsubscribe(&self.channel, &self.listener),
                None => Task::ready(Ok(())),
            },
            Phase::Pending => {
                self.task.cancel();
                Task::ready(Ok(()))
            }
            Phase::Cancelled => Task::ready(Ok(())),
        }
    }
}

impl Future for Subscription {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("established", &self.is_established())
            .finish()
    }
}
