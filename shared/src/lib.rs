//! # Simon Says Wire Protocol
//!
//! Shared data structures for the duplex `Game` RPC between a Simon Says
//! client and the server. The RPC carries a stream of [`Request`] frames from
//! the client and a stream of [`Response`] frames back, both encoded with
//! `bincode` for compact, deterministic binary transmission.
//!
//! ## Protocol Shape
//!
//! A session always opens with a [`Request::Join`] carrying the player's
//! identity. Every frame after that is a [`Request::Press`] reporting one
//! button press. The server answers with [`Response::Turn`] transitions
//! (begin, start/stop of a turn, win, lose) and [`Response::Lightup`] echoes
//! that both players receive for every press in the game.
//!
//! ## Stability
//!
//! [`Color`] ordinals are part of the wire contract: both peers of a game and
//! the pub/sub bus between their sessions rely on the variant order staying
//! fixed. Append new colors, never reorder.

use serde::{Deserialize, Serialize};

/// A button color on the Simon Says board.
///
/// The variant order is the wire ordinal and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Color {
    Red,
    Green,
    Blue,
    Yellow,
}

/// Identity of a connected player, chosen by the client at join time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: String,
}

/// Client-to-server frames of the `Game` RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Required first frame of every session.
    Join { player: Player },
    /// One color press. Presses outside the player's turn are dropped by the
    /// server rather than treated as errors, since a client UI may keep
    /// sending stale input around turn boundaries.
    Press { press: Color },
}

/// Turn transitions a client can be told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum State {
    /// Both players are connected and the game is starting.
    Begin,
    /// It is now this player's turn to repeat the pattern.
    StartTurn,
    /// This player's turn has ended.
    StopTurn,
    /// The other player mismatched. This player won.
    Win,
    /// This player mismatched and lost.
    Lose,
}

/// Server-to-client frames of the `Game` RPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// A turn transition for this player.
    Turn { turn: State },
    /// A visual echo of a press made by either player.
    Lightup { lightup: Color },
}
