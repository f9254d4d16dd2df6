//! Connection state graph
//!
//! Transitions are queued and applied one at a time: an event raised while
//! another transition is being entered waits until that one has settled.

use std::collections::VecDeque;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Unconnected,
    Handshaking,
    HandshakeWait,
    Connected,
    ResetWait,
    Disconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Connect,
    Reset,
    HandshakeSuccess,
    Rehandshake,
    Timeout,
    Disconnect,
    DisconnectSuccess,
    DisconnectFailure,
}

impl State {
    /// The state `event` leads to, if it is valid here.
    pub fn next(self, event: Event) -> Option<State> {
        use Event as E;
        use State as S;

        match (self, event) {
            (S::Unconnected, E::Connect | E::Reset) => Some(S::Handshaking),
            (S::Handshaking, E::HandshakeSuccess) => Some(S::Connected),
            (S::Handshaking, E::Rehandshake) => Some(S::HandshakeWait),
            (S::Handshaking, E::Disconnect) => Some(S::Unconnected),
            (S::HandshakeWait, E::Timeout) => Some(S::Handshaking),
            (S::HandshakeWait, E::Disconnect) => Some(S::Unconnected),
            (S::Connected, E::Disconnect) => Some(S::Disconnecting),
            (S::Connected, E::Rehandshake) => Some(S::HandshakeWait),
            (S::Connected, E::Reset) => Some(S::ResetWait),
            (S::ResetWait, E::DisconnectSuccess | E::DisconnectFailure | E::Reset) => {
                Some(S::Handshaking)
            }
            (S::Disconnecting, E::DisconnectSuccess | E::DisconnectFailure) => {
                Some(S::Unconnected)
            }
            (S::Disconnecting, E::Reset) => Some(S::Handshaking),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: State,
    pub to: State,
    pub event: Event,
}

/// The current state plus the queue of events not yet applied.
#[derive(Debug)]
pub struct Machine {
    state: State,
    queue: VecDeque<Event>,
    processing: bool,
}

impl Machine {
    pub fn new() -> Self {
        Self {
            state: State::Unconnected,
            queue: VecDeque::new(),
            processing: false,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Queue `event`. Returns `true` when the caller has to drain the
    /// queue with [`Machine::step`], `false` when someone already is.
    pub fn push(&mut self, event: Event) -> bool {
        self.queue.push_back(event);
        if self.processing {
            return false;
        }
        self.processing = true;
        true
    }

    /// Apply the next valid queued event. Invalid events are dropped.
    /// Returns `None`, and releases the queue, once it is empty.
    pub fn step(&mut self) -> Option<Transition> {
        while let Some(event) = self.queue.pop_front() {
            match self.state.next(event) {
                Some(to) => {
                    let from = self.state;
                    self.state = to;
                    return Some(Transition { from, to, event });
                }
                None => debug!(?event, state = ?self.state, "ignoring transition"),
            }
        }
        self.processing = false;
        None
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}
