//! Persistent player records.
//!
//! A [`Player`] is a user of the system: an immutable username and a skill
//! rating that moves with every finished game. Players are shared between
//! the registry and any sessions logged in under their name, so the rating
//! sits behind its own guard; nothing else about a player ever changes.

use crate::rating::{self, Outcome};
use std::sync::Mutex;

/// The rating every player starts out with.
pub const INITIAL_RATING: f64 = 1500.0;

/// A user of the system, shared via `Arc`. Created on first login under a
/// name and kept for the lifetime of the process.
#[derive(Debug)]
pub struct Player {
    name: String,
    rating: Mutex<f64>,
}

impl Player {
    /// A new player at the initial rating.
    pub fn new(name: &str) -> Self {
        Player {
            name: name.to_owned(),
            rating: Mutex::new(INITIAL_RATING),
        }
    }

    /// The username.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current rating.
    pub fn rating(&self) -> f64 {
        *self.rating.lock().unwrap()
    }

    /// The rating as shown in the USERS listing: truncated to a whole
    /// number.
    pub fn displayed_rating(&self) -> i64 {
        self.rating() as i64
    }
}

/// Posts the result of a finished game. `first` is the player who held the
/// first-mover seat, `second` the other seat. Each rating is read and
/// written under its own guard; the two guards are never held together.
pub fn post_result(first: &Player, second: &Player, outcome: Outcome) {
    let (updated_first, updated_second) =
        rating::elo_update(first.rating(), second.rating(), outcome);
    *first.rating.lock().unwrap() = updated_first;
    *second.rating.lock().unwrap() = updated_second;
    tracing::debug!(
        first = first.name(),
        rating_first = updated_first,
        second = second.name(),
        rating_second = updated_second,
        "ratings updated"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_player_starts_at_initial_rating() {
        let player = Player::new("alice");
        assert_eq!(player.name(), "alice");
        assert_eq!(player.rating(), INITIAL_RATING);
        assert_eq!(player.displayed_rating(), 1500);
    }

    #[test]
    fn posting_a_result_moves_both_ratings() {
        let first = Player::new("alice");
        let second = Player::new("bob");
        post_result(&first, &second, Outcome::FirstWins);
        assert_eq!(first.rating(), 1516.0);
        assert_eq!(second.rating(), 1484.0);
    }

    #[test]
    fn displayed_rating_truncates() {
        let first = Player::new("alice");
        let second = Player::new("bob");
        post_result(&first, &second, Outcome::FirstWins);
        post_result(&first, &second, Outcome::FirstWins);
        // 1516 + 32 * (1 - 1/(1+10^(-32/400))) ≈ 1530.5
        assert_eq!(first.displayed_rating(), 1530);
    }
}
