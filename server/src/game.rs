//! Per-player turn state for one Simon Says game
//!
//! Each session owns its own [`Game`]; the two peers of a match never share
//! one in memory. All cross-session coordination happens over the pub/sub
//! bus, so this type only has to answer local questions: whose turn it is,
//! which pattern must be matched, and what has been pressed so far.

use shared::Color;
use thiserror::Error;
use tokio::sync::{RwLock, RwLockWriteGuard};

/// Errors from the turn state machine.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("color pressed outside of player turn")]
    ColorPressedOutOfTurn,
}

/// The raw turn state, without locking.
///
/// The press receiver needs to apply a press, inspect the match result and
/// encode the presses as one atomic step, so these primitives are exposed
/// directly and [`Game::lock`] hands out the guard that protects them.
#[derive(Debug, Default)]
pub struct TurnState {
    valid_presses: Vec<Color>,
    current_presses: Vec<Color>,
    my_turn: bool,
}

impl TurnState {
    /// Begin this player's turn with the pattern they must reproduce.
    pub fn start_turn(&mut self, pattern: Vec<Color>) {
        self.valid_presses = pattern;
        self.current_presses.clear();
        self.my_turn = true;
    }

    /// Record one press.
    ///
    /// The turn ends when the player has entered the full pattern plus one
    /// extra color (the prompt for the other player), or as soon as any
    /// press deviates from the pattern.
    pub fn press_color(&mut self, color: Color) -> Result<(), GameError> {
        if !self.my_turn {
            return Err(GameError::ColorPressedOutOfTurn);
        }

        self.current_presses.push(color);

        if self.current_presses.len() == self.valid_presses.len() + 1 || !self.matches() {
            self.my_turn = false;
        }

        Ok(())
    }

    /// Whether the presses so far line up with the pattern. Only the shorter
    /// of the two sequences is compared, so a partial entry still matches.
    pub fn matches(&self) -> bool {
        let len = self.valid_presses.len().min(self.current_presses.len());
        self.current_presses[..len] == self.valid_presses[..len]
    }

    pub fn is_my_turn(&self) -> bool {
        self.my_turn
    }

    /// Encode the current presses with the same binary encoding used on the
    /// bus, ready to hand to the other player as their next pattern.
    pub fn encode_presses(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(&self.current_presses)
    }

    pub fn current_presses(&self) -> &[Color] {
        &self.current_presses
    }
}

/// Turn state for one player of one game, guarded for concurrent use by the
/// session controller and the press receiver.
#[derive(Debug)]
pub struct Game {
    pub id: String,
    state: RwLock<TurnState>,
}

impl Game {
    /// A new game for a player. The id doubles as the pub/sub topic shared
    /// with the peer session.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: RwLock::new(TurnState::default()),
        }
    }

    pub async fn start_turn(&self, pattern: Vec<Color>) {
        self.state.write().await.start_turn(pattern);
    }

    pub async fn press_color(&self, color: Color) -> Result<(), GameError> {
        self.state.write().await.press_color(color)
    }

    pub async fn matches(&self) -> bool {
        self.state.read().await.matches()
    }

    pub async fn is_my_turn(&self) -> bool {
        self.state.read().await.is_my_turn()
    }

    pub async fn encode_presses(&self) -> Result<Vec<u8>, bincode::Error> {
        self.state.read().await.encode_presses()
    }

    /// Take the write lock for a whole block of turn-state operations.
    pub async fn lock(&self) -> RwLockWriteGuard<'_, TurnState> {
        self.state.write().await
    }
}
