//! Press receiver: the per-session task draining inbound color presses
//!
//! Runs alongside the session controller, owning the inbound half of the
//! client stream. Every press mutates the session's turn state and is echoed
//! to both players as a LIGHTUP message; the end of a turn publishes either
//! STOP_TURN (pattern matched, play passes over) or LOST (mismatch, game
//! over). All of that happens under the game's write lock so concurrent
//! presses cannot interleave their state updates or publishes.

use std::sync::Arc;

use shared::{Player, Request};
use tokio::sync::mpsc;

use crate::error::Error;
use crate::game::{Game, GameError, TurnState};
use crate::logger::SessionLogger;
use crate::pubsub::{self, Message, LIGHTUP, LOST, STOP_TURN};
use crate::store::Store;
use crate::stream::RequestSource;

/// Spawn the press receiver for one session.
///
/// The returned channel yields at most one fatal error and then closes; a
/// channel that closes without an error means the receiver stopped on its
/// own because the session's player lost.
pub fn recv_press<S, Rx>(
    store: Arc<S>,
    game: Arc<Game>,
    player: Player,
    mut requests: Rx,
    log: SessionLogger,
) -> mpsc::Receiver<Error>
where
    S: Store + ?Sized + 'static,
    Rx: RequestSource + 'static,
{
    let (tx, errors) = mpsc::channel(10);

    log.info("RecvPress", "start receiving press events");
    tokio::spawn(async move {
        loop {
            match handle_color_press(store.as_ref(), &game, &player, &mut requests, &log).await {
                Ok(false) => {}
                // The game is over for this player; stop taking input.
                Ok(true) => break,
                Err(e) => {
                    let _ = tx.send(e).await;
                    break;
                }
            }
        }
    });

    errors
}

/// Handle one inbound press. Returns `true` when the receiver should stop.
async fn handle_color_press<S: Store + ?Sized>(
    store: &S,
    game: &Game,
    player: &Player,
    requests: &mut impl RequestSource,
    log: &SessionLogger,
) -> Result<bool, Error> {
    let press = receive_press_request(requests, log).await?;
    log.info("HandleColorPress", format!("press received: {press:?}"));

    // Hold the write lock for the whole block: the press, the match
    // inspection and the follow-up publish must not interleave with the
    // controller starting a new turn.
    let mut state = game.lock().await;

    if !state.is_my_turn() {
        log.info("HandleColorPress", "not my turn, ignored press");
        return Ok(false);
    }

    if let Err(GameError::ColorPressedOutOfTurn) = state.press_color(press) {
        log.info("HandleColorPress", "color pressed out of turn, ignored");
    }

    // Everyone lights up, no matter how the press turns out.
    let data = bincode::serialize(&press)?;
    pubsub::publish(store, game, &Message::new(LIGHTUP, "", data), log).await?;

    handle_end_of_turn(store, game, &state, player, log).await
}

/// Pull the next request and require it to be a press.
async fn receive_press_request(
    requests: &mut impl RequestSource,
    log: &SessionLogger,
) -> Result<shared::Color, Error> {
    match requests.recv().await? {
        Some(Request::Press { press }) => Ok(press),
        Some(other) => {
            log.error(
                "ReceivePressRequest",
                format!("received a request other than a press: {other:?}"),
            );
            Err(Error::Protocol(
                "received a request other than a press".into(),
            ))
        }
        None => Err(Error::Transport(
            "stream closed while receiving presses".into(),
        )),
    }
}

/// Publish the turn outcome if the last press ended the turn.
///
/// Returns `true` when the player lost and the receiver should stop. The
/// caller holds the game's write lock and passes the guarded state in.
pub(crate) async fn handle_end_of_turn<S: Store + ?Sized>(
    store: &S,
    game: &Game,
    state: &TurnState,
    player: &Player,
    log: &SessionLogger,
) -> Result<bool, Error> {
    if state.is_my_turn() {
        return Ok(false);
    }

    if state.matches() {
        let presses = state.encode_presses()?;
        let msg = Message::new(STOP_TURN, player.id.clone(), presses);
        pubsub::publish(store, game, &msg, log).await?;
        return Ok(false);
    }

    // A mismatch means this player has lost the game.
    let msg = Message::new(LOST, player.id.clone(), Vec::new());
    pubsub::publish(store, game, &msg, log).await?;
    log.info("HandleEndOfTurn", "done taking input, player has lost");
    Ok(true)
}
