//! Session error taxonomy
//!
//! Everything that can end a session flows through [`Error`] so the
//! controller can hand one value back to the transport layer. A game ending
//! normally is not an error: the LOST handler reports it through
//! [`Flow::EndOfStream`] instead of a sentinel error value.

use thiserror::Error;

use crate::game::GameError;
use crate::store::StoreError;

/// Errors that terminate a session.
#[derive(Debug, Error)]
pub enum Error {
    /// Turn state violation that is fatal at the point it surfaces.
    #[error(transparent)]
    Game(#[from] GameError),

    /// A pub/sub message arrived with a kind no handler is registered for.
    #[error("no handler registered for message kind {0:?}")]
    HandlerNotFound(String),

    /// The client broke the request protocol, for example by not opening
    /// with a join or by sending something other than a press mid-game.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The underlying duplex stream failed or closed unexpectedly.
    #[error("transport error: {0}")]
    Transport(String),

    /// A store or bus command failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The peer session never showed up as a subscriber, so the game could
    /// not be started safely.
    #[error("timeout waiting for {0} subscribers")]
    SubscriberTimeout(usize),

    /// A bus payload or wire frame failed to encode or decode.
    #[error("encoding error: {0}")]
    Encoding(#[from] bincode::Error),
}

/// What the controller should do after a message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep multiplexing.
    Continue,
    /// The game is over and the stream should close cleanly.
    EndOfStream,
}
