//! # Simon Says Game Server
//!
//! Server library for a two-player, turn-based Simon Says game. A client
//! connects over a duplex WebSocket stream, joins with a player id and is
//! paired with the next waiting player through a shared registry in the
//! store. From then on the two sessions never share memory: every game
//! event (game start, turn hand-overs, color echoes, the final loss) is a
//! message on a pub/sub topic named by the game id, observed symmetrically
//! by both sessions.
//!
//! ## Session Anatomy
//!
//! Each connection is driven by three cooperating tasks:
//! - the **controller** ([`session::serve`]) multiplexes decoded bus
//!   messages with press-receiver failures and owns the outbound stream,
//! - the **subscription reader** ([`pubsub::subscribe`]) decodes raw bus
//!   payloads into a channel and closes it on failure or after a loss,
//! - the **press receiver** ([`press::recv_press`]) drains inbound presses,
//!   advances the turn state and publishes the resulting events.
//!
//! The tasks communicate only through channels; the single piece of shared
//! state is the session's own [`game::Game`], behind a reader/writer lock.
//!
//! ## Module Map
//!
//! - [`game`]: per-player turn state machine
//! - [`store`]: store/bus contract, Redis client, in-memory bus
//! - [`pubsub`]: message codec, topic subscribe/publish, subscriber gate
//! - [`matchmaker`]: the shared open-game registry
//! - [`press`]: the press receiver task
//! - [`handlers`]: bus-message handlers producing client responses
//! - [`session`]: the per-connection controller and teardown
//! - [`stream`]: duplex stream halves (WebSocket and channel-backed)
//! - [`logger`]: session-scoped key/value log annotations
//! - [`error`]: the session error taxonomy

pub mod error;
pub mod game;
pub mod handlers;
pub mod logger;
pub mod matchmaker;
pub mod press;
pub mod pubsub;
pub mod session;
pub mod store;
pub mod stream;

/// Server version, logged at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
