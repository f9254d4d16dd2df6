//! The `protocol` module defines the Bayeux wire format: messages and
//! advice, the meta channel names, channel glob matching, and the
//! `code:params:description` error strings servers send back.

pub mod channel;
pub mod error;
pub mod message;

pub use error::ProtocolError;
pub use message::{Advice, Message, Reconnect, decode_messages, encode_messages};

#[cfg(test)]
mod tests;
