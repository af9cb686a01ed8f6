//! Pub/sub message codec and game-topic plumbing
//!
//! The two sessions of a game coordinate exclusively through messages on a
//! topic named by the game id. [`Message`] is the envelope; [`subscribe`]
//! turns the raw store subscription into a channel of decoded messages, and
//! [`ensure_subscribers`] is the gate that keeps the second joiner from
//! publishing BEGIN before the first joiner is listening.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use crate::error::Error;
use crate::game::Game;
use crate::logger::SessionLogger;
use crate::store::Store;

/// Message kind starting the game once both players are subscribed.
pub const BEGIN: &str = "BEGIN";
/// Message kind ending the publishing player's turn, carrying the pattern
/// the other player must now match.
pub const STOP_TURN: &str = "STOP_TURN";
/// Message kind echoing a single pressed color to both players.
pub const LIGHTUP: &str = "LIGHTUP";
/// Message kind announcing that the publishing player has lost.
pub const LOST: &str = "LOST_MESSAGE";

/// Envelope for everything that crosses the game topic.
///
/// `data` depends on the kind: a color sequence for STOP_TURN (and BEGIN,
/// where it is the empty sequence), a single color for LIGHTUP, and nothing
/// for LOST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub kind: String,
    pub player: String,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(kind: &str, player: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            kind: kind.to_string(),
            player: player.into(),
            data,
        }
    }

    pub fn marshal(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    pub fn unmarshal(bytes: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

/// Subscribe to the game topic and decode everything that arrives.
///
/// The returned channel closes when the underlying subscription fails, when
/// a payload fails to decode, when the receiver is dropped, or right after a
/// LOST message has been forwarded. A loss ends the game, so closing there
/// lets the controller observe a clean end of stream.
pub async fn subscribe<S: Store + ?Sized>(
    store: &S,
    game: &Game,
    log: &SessionLogger,
) -> Result<mpsc::Receiver<Message>, Error> {
    log.info("Subscribe", format!("subscribing to topic {:?}", game.id));
    let mut subscription = store.subscribe(&game.id).await?;

    let (tx, rx) = mpsc::channel(16);
    let log = log.clone();
    tokio::spawn(async move {
        loop {
            let payload = tokio::select! {
                received = subscription.recv() => match received {
                    Some(Ok(payload)) => payload,
                    Some(Err(e)) => {
                        log.error("Subscribe", format!("error receiving message, closing channel: {e}"));
                        break;
                    }
                    None => break,
                },
                // The session is gone; stop reading so the subscription and
                // its connection are released.
                _ = tx.closed() => break,
            };

            let msg = match Message::unmarshal(&payload) {
                Ok(msg) => msg,
                Err(e) => {
                    log.error(
                        "Subscribe",
                        format!("could not decode message, closing channel: {e}"),
                    );
                    break;
                }
            };

            log.info(
                "Subscribe",
                format!("received {:?} message from {:?}", msg.kind, msg.player),
            );

            let lost = msg.kind == LOST;
            if tx.send(msg).await.is_err() {
                break;
            }
            if lost {
                log.info("Subscribe", "lost message, closing subscribe pipeline");
                break;
            }
        }
    });

    Ok(rx)
}

/// Publish a message to the game's topic.
pub async fn publish<S: Store + ?Sized>(
    store: &S,
    game: &Game,
    msg: &Message,
    log: &SessionLogger,
) -> Result<(), Error> {
    log.info(
        "Publish",
        format!("sending {:?} message to topic {:?}", msg.kind, game.id),
    );
    let data = msg.marshal()?;
    store.publish(&game.id, &data).await?;
    Ok(())
}

const SUBSCRIBER_POLL_INTERVAL: Duration = Duration::from_millis(100);
const SUBSCRIBER_POLL_ATTEMPTS: usize = 6;

/// Block until the topic has exactly `n` subscribers.
///
/// Polls the subscriber count a bounded number of times and fails with
/// [`Error::SubscriberTimeout`] if the count never reaches `n`. The second
/// joiner runs this before publishing BEGIN; a BEGIN published into a topic
/// with a missing peer would never be seen by them.
pub async fn ensure_subscribers<S: Store + ?Sized>(
    store: &S,
    game: &Game,
    n: usize,
    log: &SessionLogger,
) -> Result<(), Error> {
    for _ in 0..SUBSCRIBER_POLL_ATTEMPTS {
        let count = store.num_subscribers(&game.id).await?;
        log.info(
            "EnsureSubscribers",
            format!("found {count} subscriptions for game, require {n}"),
        );
        if count == n {
            return Ok(());
        }
        sleep(SUBSCRIBER_POLL_INTERVAL).await;
    }
    log.error(
        "EnsureSubscribers",
        format!("timeout ensuring subscriber count of {n}"),
    );
    Err(Error::SubscriberTimeout(n))
}
