//! The process-wide username → player mapping.
//!
//! Entries are created on first login under a name and never removed while
//! the process runs, so a player keeps their rating across reconnects.

use crate::player::Player;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Maps usernames to their persistent [`Player`] records.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    players: Mutex<HashMap<String, Arc<Player>>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the player registered under `name`, creating it at the
    /// initial rating if this is the first login under that name.
    pub fn register(&self, name: &str) -> Arc<Player> {
        let mut players = self.players.lock().unwrap();
        players
            .entry(name.to_owned())
            .or_insert_with(|| {
                tracing::debug!(name, "creating player");
                Arc::new(Player::new(name))
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rating::Outcome;

    #[test]
    fn registering_twice_returns_the_same_player() {
        let registry = PlayerRegistry::new();
        let first = registry.register("alice");
        let second = registry.register("alice");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn ratings_survive_across_registrations() {
        let registry = PlayerRegistry::new();
        let alice = registry.register("alice");
        let bob = registry.register("bob");
        crate::player::post_result(&alice, &bob, Outcome::SecondWins);
        drop((alice, bob));

        // A later lookup under the same name sees the moved rating.
        assert_eq!(registry.register("bob").displayed_rating(), 1516);
    }
}
