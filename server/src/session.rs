//! Per-connection session controller
//!
//! One call to [`serve`] drives a whole client session: the join handshake,
//! matchmaking, the pub/sub subscription, game start, the press receiver,
//! and the multiplex loop that fuses bus messages with press-receiver
//! failures. Teardown runs on every exit path in a fixed order (unsubscribe,
//! retract the open-game entry, clear the session log annotations) and never
//! shadows the error that ended the session.

use std::sync::Arc;

use shared::{Player, Request};

use crate::error::{Error, Flow};
use crate::game::Game;
use crate::handlers;
use crate::logger::SessionLogger;
use crate::matchmaker;
use crate::press;
use crate::pubsub::{self, Message, BEGIN};
use crate::store::Store;
use crate::stream::{RequestSource, ResponseSink};

/// Run one client session to completion.
pub async fn serve<S, Tx, Rx>(store: Arc<S>, mut responses: Tx, mut requests: Rx) -> Result<(), Error>
where
    S: Store + ?Sized + 'static,
    Tx: ResponseSink,
    Rx: RequestSource + 'static,
{
    let mut log = SessionLogger::new();

    // The first frame of every session must identify the player.
    let player = match requests.recv().await? {
        Some(Request::Join { player }) if !player.id.is_empty() => player,
        Some(other) => {
            log.error(
                "Game",
                format!("first request was not a join with a player: {other:?}"),
            );
            return Err(Error::Protocol(
                "first request must be a join carrying a player id".into(),
            ));
        }
        None => return Err(Error::Transport("stream closed before join".into())),
    };
    log.set("Player", &player.id);
    log.info("Game", format!("player {:?} is attempting to join", player.id));

    let (game, is_new) = matchmaker::find_game(store.as_ref(), &log).await?;
    let game = Arc::new(game);
    log.set("Game", &game.id);
    log.info(
        "Game",
        format!("connecting to game {}, new: {is_new}", game.id),
    );

    let result = play(
        Arc::clone(&store),
        Arc::clone(&game),
        &player,
        &mut responses,
        requests,
        is_new,
        &log,
    )
    .await;

    // Teardown, in the same order on every exit path. Failures here are
    // logged, never allowed to replace the session's own result.
    if let Err(e) = store.unsubscribe(&game.id).await {
        log.error(
            "Game",
            format!("error unsubscribing from game topic {}: {e}", game.id),
        );
    }
    match matchmaker::close_open_game(store.as_ref(), &game, &log).await {
        Ok(removed) if removed > 0 && !is_new => {
            // A joiner claimed its entry at matchmaking time, so there
            // should have been nothing left to retract.
            log.warn(
                "Game",
                format!("retracted {removed} open-game entries for a joined game"),
            );
        }
        Ok(_) => {}
        Err(e) => log.error("Game", format!("error closing open game: {e}")),
    }
    log.clear();

    result
}

/// The playing phase: subscribe, connect, receive presses, multiplex.
async fn play<S, Tx, Rx>(
    store: Arc<S>,
    game: Arc<Game>,
    player: &Player,
    responses: &mut Tx,
    requests: Rx,
    is_new: bool,
    log: &SessionLogger,
) -> Result<(), Error>
where
    S: Store + ?Sized + 'static,
    Tx: ResponseSink,
    Rx: RequestSource + 'static,
{
    let mut msgs = pubsub::subscribe(store.as_ref(), &game, log).await?;

    connect_game(store.as_ref(), &game, player, is_new, log).await?;

    let mut press_errors = press::recv_press(
        Arc::clone(&store),
        Arc::clone(&game),
        player.clone(),
        requests,
        log.clone(),
    );
    let mut press_done = false;

    loop {
        tokio::select! {
            msg = msgs.recv() => match msg {
                None => {
                    log.info("Game", "message channel has closed, exiting");
                    return Ok(());
                }
                Some(msg) => {
                    match handlers::handle(store.as_ref(), &game, player, responses, log, &msg).await? {
                        Flow::EndOfStream => {
                            log.info("Game", "end of stream, closing connection");
                            return Ok(());
                        }
                        Flow::Continue => {}
                    }
                }
            },
            err = press_errors.recv(), if !press_done => match err {
                // A closed channel without an error is a clean stop.
                None => press_done = true,
                Some(e) => {
                    log.error("Game", format!("press receiver failed: {e}"));
                    return Err(e);
                }
            },
        }
    }
}

/// Either advertise a fresh game and wait, or start an existing one.
///
/// The second joiner must not publish BEGIN until both sessions subscribe,
/// otherwise the first joiner would never see it.
async fn connect_game<S: Store + ?Sized>(
    store: &S,
    game: &Game,
    player: &Player,
    is_new: bool,
    log: &SessionLogger,
) -> Result<(), Error> {
    if is_new {
        matchmaker::add_open_game(store, game, log).await?;
        return Ok(());
    }

    // No presses yet, so this encodes the empty pattern for the first turn.
    let presses = game.encode_presses().await?;
    pubsub::ensure_subscribers(store, game, 2, log).await?;
    let msg = Message::new(BEGIN, player.id.clone(), presses);
    pubsub::publish(store, game, &msg, log).await?;
    Ok(())
}
