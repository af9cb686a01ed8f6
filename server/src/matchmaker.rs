//! Matchmaking through the shared open-game registry
//!
//! Every server instance shares one list in the store, keyed `OpenGames`,
//! holding the ids of games still waiting for a second player. Claiming is
//! an atomic pop from the tail, so the longest-waiting player matches first.

use uuid::Uuid;

use crate::error::Error;
use crate::game::Game;
use crate::logger::SessionLogger;
use crate::store::Store;

/// Store key of the open-game registry.
pub const OPEN_GAMES_KEY: &str = "OpenGames";

/// Claim an open game, or mint a fresh one if none is waiting.
///
/// Returns the game and whether it is new. A new game still has to be
/// advertised with [`add_open_game`] before the peer can find it.
pub async fn find_game<S: Store + ?Sized>(
    store: &S,
    log: &SessionLogger,
) -> Result<(Game, bool), Error> {
    match store.rpop(OPEN_GAMES_KEY).await? {
        Some(id) => {
            log.info("FindGame", format!("found open game {id}"));
            Ok((Game::new(id), false))
        }
        None => {
            let id = Uuid::new_v4().to_string();
            log.info(
                "FindGame",
                format!("could not find open game, created {id}"),
            );
            Ok((Game::new(id), true))
        }
    }
}

/// Advertise a game as waiting for its second player.
pub async fn add_open_game<S: Store + ?Sized>(
    store: &S,
    game: &Game,
    log: &SessionLogger,
) -> Result<(), Error> {
    log.info("AddOpenGame", format!("adding open game {}", game.id));
    store.lpush(OPEN_GAMES_KEY, &game.id).await?;
    Ok(())
}

/// Retract a game from the registry. Safe to call whether or not the entry
/// is still present; returns how many entries were actually removed so the
/// caller can notice unexpected retractions.
pub async fn close_open_game<S: Store + ?Sized>(
    store: &S,
    game: &Game,
    log: &SessionLogger,
) -> Result<i64, Error> {
    log.info("CloseOpenGame", format!("removing open game {}", game.id));
    let removed = store.lrem(OPEN_GAMES_KEY, &game.id).await?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn finds_nothing_and_creates_a_new_game() {
        let store = MemoryStore::new();
        let log = SessionLogger::new();

        let (game, is_new) = find_game(&store, &log).await.unwrap();
        assert!(is_new);
        assert!(!game.id.is_empty());
        // Fresh ids are v4 UUIDs.
        Uuid::parse_str(&game.id).unwrap();

        let (other, _) = find_game(&store, &log).await.unwrap();
        assert_ne!(game.id, other.id);
    }

    #[tokio::test]
    async fn claims_an_advertised_game() {
        let store = MemoryStore::new();
        let log = SessionLogger::new();

        let game = Game::new("new game");
        add_open_game(&store, &game, &log).await.unwrap();
        assert_eq!(
            store.lrange(OPEN_GAMES_KEY).await.unwrap(),
            vec!["new game".to_string()]
        );

        let (found, is_new) = find_game(&store, &log).await.unwrap();
        assert!(!is_new);
        assert_eq!(found.id, game.id);
        assert!(store.lrange(OPEN_GAMES_KEY).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn matches_in_first_advertised_first_claimed_order() {
        let store = MemoryStore::new();
        let log = SessionLogger::new();

        add_open_game(&store, &Game::new("game-a"), &log)
            .await
            .unwrap();
        add_open_game(&store, &Game::new("game-b"), &log)
            .await
            .unwrap();

        let (first, _) = find_game(&store, &log).await.unwrap();
        let (second, _) = find_game(&store, &log).await.unwrap();
        assert_eq!(first.id, "game-a");
        assert_eq!(second.id, "game-b");
    }

    #[tokio::test]
    async fn retraction_is_idempotent() {
        let store = MemoryStore::new();
        let log = SessionLogger::new();
        let game = Game::new("game-a");

        add_open_game(&store, &game, &log).await.unwrap();
        assert_eq!(close_open_game(&store, &game, &log).await.unwrap(), 1);
        assert!(store.lrange(OPEN_GAMES_KEY).await.unwrap().is_empty());

        // Retracting an absent entry succeeds and removes nothing.
        assert_eq!(close_open_game(&store, &game, &log).await.unwrap(), 0);
    }
}
