use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::protocol::Message;
use crate::transport::TransportId;
use crate::utils::Task;

/// The caller's handle on one outgoing message. Settles with the server's
/// reply, successful or not.
pub type Delivery = Task<Message>;

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Attempt limit, unlimited when `None`.
    pub attempts: Option<u32>,
    /// Overall limit on the retry cycle, 60 seconds when `None`.
    pub deadline: Option<Duration>,
    /// Cancelling this token cancels the delivery.
    pub token: Option<CancellationToken>,
}

impl SendOptions {
    pub fn attempts(attempts: u32) -> Self {
        Self {
            attempts: Some(attempts),
            ..Self::default()
        }
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }
}

/// Bookkeeping for one in-flight message id.
pub(super) struct Envelope {
    pub serial: u64,
    pub delivery: Delivery,
    /// Receives the reply of the current attempt.
    pub reply: Option<oneshot::Sender<Message>>,
    /// Transport carrying the current attempt.
    pub transport: Option<TransportId>,
}
