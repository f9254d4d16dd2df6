//! Per-message delivery policy
//!
//! A [`Scheduler`] is created for every message the dispatcher sends and
//! decides how long one attempt may take, how long to wait before the next
//! one, and whether the message may still be delivered at all. It performs
//! no I/O. Once [`Scheduler::is_deliverable`] reports `false` it never
//! reports `true` again.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// Inputs handed to a scheduler when a message is first sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// Wait for a reply before declaring the attempt failed.
    pub timeout: Duration,
    /// Base wait between attempts.
    pub interval: Duration,
    /// Maximum number of attempts, unlimited when `None`.
    pub attempts: Option<u32>,
    /// Give up once this much time has passed since construction.
    pub deadline: Option<Duration>,
}

pub trait Scheduler: Send {
    /// An attempt is about to be made.
    fn send(&mut self);
    fn succeed(&mut self);
    fn fail(&mut self);
    /// Never deliver this message again.
    fn abort(&mut self);
    fn is_deliverable(&self) -> bool;
    /// How long the current attempt may wait for a reply.
    fn timeout(&self) -> Duration;
    /// How long to wait before the next attempt.
    fn interval(&self) -> Duration;
    fn attempts(&self) -> u32;
}

/// Builds a scheduler per message. Supply your own to change retry policy.
pub type SchedulerFactory = Arc<dyn Fn(SchedulerOptions) -> Box<dyn Scheduler> + Send + Sync>;

pub fn default_factory() -> SchedulerFactory {
    Arc::new(|options| Box::new(DefaultScheduler::new(options)))
}

pub fn backoff_factory(max_interval: Duration) -> SchedulerFactory {
    Arc::new(move |options| Box::new(BackoffScheduler::new(options, max_interval)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Sending,
    Succeeded,
    Failed,
    Aborted,
}

/// Retries at a constant interval until attempts or the deadline run out.
#[derive(Debug)]
pub struct DefaultScheduler {
    options: SchedulerOptions,
    created: Instant,
    sent: u32,
    failures: u32,
    phase: Phase,
    expired: bool,
}

impl DefaultScheduler {
    pub fn new(options: SchedulerOptions) -> Self {
        Self {
            options,
            created: Instant::now(),
            sent: 0,
            failures: 0,
            phase: Phase::Idle,
            expired: false,
        }
    }

    fn attempts_made(&self) -> u32 {
        self.sent.max(self.failures)
    }

    fn check(&self) -> bool {
        if self.expired || self.phase == Phase::Aborted || self.phase == Phase::Succeeded {
            return false;
        }
        if let Some(limit) = self.options.attempts {
            if self.attempts_made() >= limit {
                return false;
            }
        }
        if let Some(deadline) = self.options.deadline {
            if self.created.elapsed() >= deadline {
                return false;
            }
        }
        true
    }

    fn latch(&mut self) {
        if !self.check() {
            self.expired = true;
        }
    }
}

impl Scheduler for DefaultScheduler {
    fn send(&mut self) {
        self.sent += 1;
        self.phase = Phase::Sending;
    }

    fn succeed(&mut self) {
        self.phase = Phase::Succeeded;
        self.expired = true;
    }

    fn fail(&mut self) {
        if self.phase != Phase::Sending {
            // a failure without a recorded send still spends an attempt
            self.sent += 1;
        }
        self.failures += 1;
        self.phase = Phase::Failed;
        self.latch();
    }

    fn abort(&mut self) {
        self.phase = Phase::Aborted;
        self.expired = true;
    }

    fn is_deliverable(&self) -> bool {
        self.check()
    }

    fn timeout(&self) -> Duration {
        self.options.timeout
    }

    fn interval(&self) -> Duration {
        self.options.interval
    }

    fn attempts(&self) -> u32 {
        self.attempts_made()
    }
}

/// Doubles the wait after every consecutive failure, up to `max_interval`.
#[derive(Debug)]
pub struct BackoffScheduler {
    inner: DefaultScheduler,
    max_interval: Duration,
}

impl BackoffScheduler {
    pub fn new(options: SchedulerOptions, max_interval: Duration) -> Self {
        Self {
            inner: DefaultScheduler::new(options),
            max_interval,
        }
    }
}

impl Scheduler for BackoffScheduler {
    fn send(&mut self) {
        self.inner.send();
    }

    fn succeed(&mut self) {
        self.inner.succeed();
    }

    fn fail(&mut self) {
        self.inner.fail();
    }

    fn abort(&mut self) {
        self.inner.abort();
    }

    fn is_deliverable(&self) -> bool {
        self.inner.is_deliverable()
    }

    fn timeout(&self) -> Duration {
        self.inner.timeout()
    }

    fn interval(&self) -> Duration {
        let exponent = self.inner.failures.saturating_sub(1).min(16);
        self.inner
            .interval()
            .saturating_mul(1 << exponent)
            .min(self.max_interval)
    }

    fn attempts(&self) -> u32 {
        self.inner.attempts()
    }
}

#[cfg(test)]
mod tests;
