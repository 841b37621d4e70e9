//! The Elo rating update.
//!
//! A pure function of the two pre-game ratings and the outcome, with K = 32
//! and the usual 400-point denominator. The first rating always belongs to
//! the player who held the first-mover seat, the second to the other seat.

use tic_tac_toe::Role;

/// K-factor of the update: the maximum rating movement per game.
const K: f64 = 32.0;

/// How a game between the two seats ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Neither seat won; both score half a point.
    Draw,
    /// The first-mover seat won.
    FirstWins,
    /// The second seat won.
    SecondWins,
}

impl Outcome {
    /// Maps the winning role of a finished game onto an outcome.
    pub fn from_winner(winner: Role) -> Outcome {
        match winner {
            Role::None => Outcome::Draw,
            Role::First => Outcome::FirstWins,
            Role::Second => Outcome::SecondWins,
        }
    }

    /// The scores the two seats achieved.
    fn scores(self) -> (f64, f64) {
        match self {
            Outcome::Draw => (0.5, 0.5),
            Outcome::FirstWins => (1.0, 0.0),
            Outcome::SecondWins => (0.0, 1.0),
        }
    }
}

/// Computes the post-game ratings for the first-seat and second-seat
/// players.
pub fn elo_update(first: f64, second: f64, outcome: Outcome) -> (f64, f64) {
    let (score_first, score_second) = outcome.scores();
    let exponent = (second - first) / 400.0;
    let expected_first = 1.0 / (1.0 + 10f64.powf(exponent));
    let expected_second = 1.0 / (1.0 + 10f64.powf(-exponent));
    (
        first + K * (score_first - expected_first),
        second + K * (score_second - expected_second),
    )
}
