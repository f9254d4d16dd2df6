//! The `utils` module provides the pieces shared by every other module:
//! the error taxonomy, logging setup, and the cancellable [`task::Task`]
//! handle returned by the client's public operations.

pub mod error;
pub mod logging;
pub mod task;

pub use error::{Error, Result, StateError, TransportError};
pub use task::{Task, after, barrier};
