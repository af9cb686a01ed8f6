//! Handlers translating pub/sub messages into client responses
//!
//! The session controller feeds every decoded bus message through
//! [`handle`], which dispatches on the message kind. Handlers send the
//! matching response frames to this session's client and, for BEGIN,
//! publish the follow-up message that kicks off the first turn. The LOST
//! handler reports [`Flow::EndOfStream`] so the controller can close the
//! stream cleanly instead of treating the game's end as a failure.

use shared::{Color, Player, Response, State};

use crate::error::{Error, Flow};
use crate::game::Game;
use crate::logger::SessionLogger;
use crate::pubsub::{self, Message, BEGIN, LIGHTUP, LOST, STOP_TURN};
use crate::store::Store;
use crate::stream::ResponseSink;

/// Dispatch one bus message to its handler.
pub async fn handle<S: Store + ?Sized>(
    store: &S,
    game: &Game,
    player: &Player,
    responses: &mut impl ResponseSink,
    log: &SessionLogger,
    msg: &Message,
) -> Result<Flow, Error> {
    log.info("Handler", format!("handling {:?} message", msg.kind));
    match msg.kind.as_str() {
        BEGIN => begin(store, game, player, responses, log, msg).await,
        STOP_TURN => stop_turn(game, player, responses, log, msg).await,
        LIGHTUP => lightup(responses, log, msg).await,
        LOST => lost(player, responses, log, msg).await,
        _ => {
            log.error(
                "Handler",
                format!("could not find a handler for message kind {:?}", msg.kind),
            );
            Err(Error::HandlerNotFound(msg.kind.clone()))
        }
    }
}

/// Both players are in. Tell the client, and if this session is the one
/// that published BEGIN (the second joiner), hand the opening turn to the
/// peer by republishing the carried presses as a STOP_TURN.
async fn begin<S: Store + ?Sized>(
    store: &S,
    game: &Game,
    player: &Player,
    responses: &mut impl ResponseSink,
    log: &SessionLogger,
    msg: &Message,
) -> Result<Flow, Error> {
    responses
        .send(Response::Turn { turn: State::Begin })
        .await?;

    if msg.player == player.id {
        log.info("BeginHandler", "publishing the opening stop turn");
        let follow_up = Message::new(STOP_TURN, player.id.clone(), msg.data.clone());
        pubsub::publish(store, game, &follow_up, log).await?;
    }

    Ok(Flow::Continue)
}

/// A turn ended. For the player who ended it this is just a confirmation;
/// for the peer it is the start of their own turn, with the pattern to
/// match carried in the message data.
async fn stop_turn(
    game: &Game,
    player: &Player,
    responses: &mut impl ResponseSink,
    log: &SessionLogger,
    msg: &Message,
) -> Result<Flow, Error> {
    if msg.player == player.id {
        responses
            .send(Response::Turn {
                turn: State::StopTurn,
            })
            .await?;
        return Ok(Flow::Continue);
    }

    let pattern: Vec<Color> = bincode::deserialize(&msg.data)?;
    log.info(
        "StopTurnHandler",
        format!("starting turn with colors {pattern:?}"),
    );
    game.start_turn(pattern).await;
    responses
        .send(Response::Turn {
            turn: State::StartTurn,
        })
        .await?;
    Ok(Flow::Continue)
}

/// Someone pressed a color; echo it so both clients light up.
async fn lightup(
    responses: &mut impl ResponseSink,
    log: &SessionLogger,
    msg: &Message,
) -> Result<Flow, Error> {
    let color: Color = bincode::deserialize(&msg.data)?;
    log.info("LightUpHandler", format!("lighting up {color:?}"));
    responses.send(Response::Lightup { lightup: color }).await?;
    Ok(Flow::Continue)
}

/// The game is over. Whoever published the message lost; the other player
/// won. Either way this session is done.
async fn lost(
    player: &Player,
    responses: &mut impl ResponseSink,
    log: &SessionLogger,
    msg: &Message,
) -> Result<Flow, Error> {
    log.info("LostHandler", format!("received lost event from {:?}", msg.player));

    let turn = if msg.player == player.id {
        State::Lose
    } else {
        State::Win
    };
    responses.send(Response::Turn { turn }).await?;

    Ok(Flow::EndOfStream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration};

    const RECV_TIMEOUT: Duration = Duration::from_secs(2);

    fn player_one() -> Player {
        Player {
            id: "Player One".into(),
        }
    }

    async fn next_response(responses: &mut mpsc::Receiver<Response>) -> Response {
        timeout(RECV_TIMEOUT, responses.recv())
            .await
            .expect("timed out waiting for response")
            .expect("response channel closed early")
    }

    #[tokio::test]
    async fn begin_from_the_peer_only_notifies_the_client() {
        let store = MemoryStore::new();
        let game = Game::new("game one");
        let log = SessionLogger::new();
        let (mut res_tx, mut res_rx) = mpsc::channel(16);

        let mut bus = pubsub::subscribe(&store, &game, &log).await.unwrap();

        let msg = Message::new(BEGIN, "Player Two", b"This is my data".to_vec());
        let flow = handle(&store, &game, &player_one(), &mut res_tx, &log, &msg)
            .await
            .unwrap();
        assert_eq!(flow, Flow::Continue);

        assert_eq!(
            next_response(&mut res_rx).await,
            Response::Turn { turn: State::Begin }
        );

        // Not this session's BEGIN, so no follow-up is published.
        let quiet = timeout(Duration::from_millis(300), bus.recv()).await;
        assert!(quiet.is_err(), "no follow-up expected");
    }

    #[tokio::test]
    async fn begin_from_this_player_publishes_the_opening_stop_turn() {
        let store = MemoryStore::new();
        let game = Game::new("game one");
        let log = SessionLogger::new();
        let player = player_one();
        let (mut res_tx, mut res_rx) = mpsc::channel(16);

        let mut bus = pubsub::subscribe(&store, &game, &log).await.unwrap();

        let data = b"This is my data".to_vec();
        let msg = Message::new(BEGIN, player.id.clone(), data.clone());
        let flow = handle(&store, &game, &player, &mut res_tx, &log, &msg)
            .await
            .unwrap();
        assert_eq!(flow, Flow::Continue);

        assert_eq!(
            next_response(&mut res_rx).await,
            Response::Turn { turn: State::Begin }
        );

        let published = timeout(RECV_TIMEOUT, bus.recv())
            .await
            .expect("timed out waiting for follow-up")
            .expect("bus channel closed early");
        assert_eq!(published.kind, STOP_TURN);
        assert_eq!(published.player, player.id);
        assert_eq!(published.data, data);
    }

    #[tokio::test]
    async fn stop_turn_from_the_peer_starts_this_players_turn() {
        let store = MemoryStore::new();
        let game = Game::new("game one");
        let log = SessionLogger::new();
        let (mut res_tx, mut res_rx) = mpsc::channel(16);

        let pattern = vec![Color::Green, Color::Blue];
        let data = bincode::serialize(&pattern).unwrap();
        let msg = Message::new(STOP_TURN, "Player Two", data);

        assert!(!game.is_my_turn().await);
        let flow = handle(&store, &game, &player_one(), &mut res_tx, &log, &msg)
            .await
            .unwrap();
        assert_eq!(flow, Flow::Continue);

        assert_eq!(
            next_response(&mut res_rx).await,
            Response::Turn {
                turn: State::StartTurn
            }
        );
        assert!(game.is_my_turn().await);
    }

    #[tokio::test]
    async fn stop_turn_from_this_player_is_a_confirmation() {
        let store = MemoryStore::new();
        let game = Game::new("game one");
        let log = SessionLogger::new();
        let player = player_one();
        let (mut res_tx, mut res_rx) = mpsc::channel(16);

        let data = bincode::serialize(&vec![Color::Green]).unwrap();
        let msg = Message::new(STOP_TURN, player.id.clone(), data);

        let flow = handle(&store, &game, &player, &mut res_tx, &log, &msg)
            .await
            .unwrap();
        assert_eq!(flow, Flow::Continue);

        assert_eq!(
            next_response(&mut res_rx).await,
            Response::Turn {
                turn: State::StopTurn
            }
        );
        // Confirmations never start a turn on this side.
        assert!(!game.is_my_turn().await);
    }

    #[tokio::test]
    async fn lightup_echoes_the_color() {
        let store = MemoryStore::new();
        let game = Game::new("game one");
        let log = SessionLogger::new();
        let (mut res_tx, mut res_rx) = mpsc::channel(16);

        let data = bincode::serialize(&Color::Green).unwrap();
        let msg = Message::new(LIGHTUP, "", data);

        let flow = handle(&store, &game, &player_one(), &mut res_tx, &log, &msg)
            .await
            .unwrap();
        assert_eq!(flow, Flow::Continue);

        assert_eq!(
            next_response(&mut res_rx).await,
            Response::Lightup {
                lightup: Color::Green
            }
        );
    }

    #[tokio::test]
    async fn lost_by_the_peer_means_this_player_won() {
        let store = MemoryStore::new();
        let game = Game::new("game one");
        let log = SessionLogger::new();
        let (mut res_tx, mut res_rx) = mpsc::channel(16);

        let msg = Message::new(LOST, "Player Two", Vec::new());
        let flow = handle(&store, &game, &player_one(), &mut res_tx, &log, &msg)
            .await
            .unwrap();
        assert_eq!(flow, Flow::EndOfStream);

        assert_eq!(
            next_response(&mut res_rx).await,
            Response::Turn { turn: State::Win }
        );
    }

    #[tokio::test]
    async fn lost_by_this_player_means_they_lost() {
        let store = MemoryStore::new();
        let game = Game::new("game one");
        let log = SessionLogger::new();
        let player = player_one();
        let (mut res_tx, mut res_rx) = mpsc::channel(16);

        let msg = Message::new(LOST, player.id.clone(), Vec::new());
        let flow = handle(&store, &game, &player, &mut res_tx, &log, &msg)
            .await
            .unwrap();
        assert_eq!(flow, Flow::EndOfStream);

        assert_eq!(
            next_response(&mut res_rx).await,
            Response::Turn { turn: State::Lose }
        );
    }

    #[tokio::test]
    async fn unknown_message_kind_is_an_error() {
        let store = MemoryStore::new();
        let game = Game::new("game one");
        let log = SessionLogger::new();
        let (mut res_tx, _res_rx) = mpsc::channel(16);

        let msg = Message::new("MYSTERY", "Player Two", Vec::new());
        let err = handle(&store, &game, &player_one(), &mut res_tx, &log, &msg)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HandlerNotFound(kind) if kind == "MYSTERY"));
    }
}
