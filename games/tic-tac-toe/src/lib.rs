//! The tic-tac-toe game engine.
//!
//! A [`Game`] is the complete state of one match: the 3×3 board, whose turn
//! it is, and whether and how the game ended. The engine is purely
//! computational; it does no I/O and knows nothing about connections or
//! invitations. The server parses player input into immutable [`GameMove`]
//! values, applies them, and renders the board for transmission.
//!
//! The first player plays X and moves first, the second player plays O.

/// The two seats of a match, plus a sentinel for "no player". The wire
/// encoding is 0 for none, 1 for the first mover, 2 for the second.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// No player. Used for "no winner" and as the draw marker.
    None,
    /// The player who moves first and plays X.
    First,
    /// The player who moves second and plays O.
    Second,
}

impl Role {
    /// Decodes a wire role byte.
    pub fn from_wire(value: u8) -> Option<Role> {
        match value {
            0 => Some(Role::None),
            1 => Some(Role::First),
            2 => Some(Role::Second),
            _ => None,
        }
    }

    /// The wire encoding of this role.
    pub fn to_wire(self) -> u8 {
        match self {
            Role::None => 0,
            Role::First => 1,
            Role::Second => 2,
        }
    }

    /// The other seat. The sentinel has no opposite.
    pub fn opposite(self) -> Role {
        match self {
            Role::None => Role::None,
            Role::First => Role::Second,
            Role::Second => Role::First,
        }
    }

    /// The board mark of this seat.
    fn mark(self) -> char {
        match self {
            Role::First => 'X',
            Role::Second => 'O',
            Role::None => ' ',
        }
    }
}

/// Reasons the engine rejects input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// The move string does not describe a move.
    #[error("not a valid move")]
    MalformedMove,
    /// The mover is not the player whose turn it is.
    #[error("not that player's turn")]
    NotYourTurn,
    /// The chosen square already carries a mark.
    #[error("square already occupied")]
    SquareOccupied,
    /// The game has already ended.
    #[error("game is already over")]
    GameOver,
}

/// One move: which seat places a mark on which square (1..=9, row-major
/// from the top left). Immutable once parsed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GameMove {
    player: Role,
    square: u8,
}

impl GameMove {
    /// The seat making the move.
    pub fn player(&self) -> Role {
        self.player
    }

    /// The target square, 1..=9.
    pub fn square(&self) -> u8 {
        self.square
    }

    /// Renders the move in the long form, e.g. `5<-X`. Feeding the result
    /// back through [`Game::parse_move`] recovers an equal move.
    pub fn unparse(&self) -> String {
        format!("{}<-{}", self.square, self.player.mark())
    }
}

/// The state of one tic-tac-toe match.
#[derive(Clone, Debug)]
pub struct Game {
    /// Row-major board, `None` for an empty square.
    board: [Option<Role>; 9],
    /// The seat whose turn it is. Stays meaningful after termination so the
    /// rendering keeps showing the side that would have moved.
    to_move: Role,
    moves_played: u8,
    terminated: bool,
    winner: Role,
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}

impl Game {
    /// A fresh game: empty board, first player (X) to move.
    pub fn new() -> Self {
        Game {
            board: [None; 9],
            to_move: Role::First,
            moves_played: 0,
            terminated: false,
            winner: Role::None,
        }
    }

    /// Interprets a string as a move in this game.
    ///
    /// Two forms are accepted: a bare square digit (`"5"`), where the mover
    /// is taken from `role`, and the long form (`"5<-X"` / `"5<-O"`), where
    /// the mover is taken from the trailing mark. If `role` is not
    /// [`Role::None`] it must be the seat currently on the move.
    pub fn parse_move(&self, role: Role, text: &str) -> Result<GameMove, GameError> {
        if role != Role::None && role != self.to_move {
            return Err(GameError::NotYourTurn);
        }

        let bytes = text.as_bytes();
        let (square_byte, player) = match bytes {
            [square] => {
                if role == Role::None {
                    return Err(GameError::MalformedMove);
                }
                (*square, role)
            }
            [square, b'<', b'-', b'X'] => (*square, Role::First),
            [square, b'<', b'-', b'O'] => (*square, Role::Second),
            _ => return Err(GameError::MalformedMove),
        };
        if !square_byte.is_ascii_digit() || square_byte == b'0' {
            return Err(GameError::MalformedMove);
        }

        Ok(GameMove {
            player,
            square: square_byte - b'0',
        })
    }

    /// Applies a move. Rejects moves on a finished game, onto an occupied
    /// square, or out of turn. On success the turn passes to the other
    /// seat; a completed line or a full board terminates the game.
    pub fn apply_move(&mut self, game_move: &GameMove) -> Result<(), GameError> {
        if self.terminated {
            return Err(GameError::GameOver);
        }
        if game_move.player != self.to_move {
            return Err(GameError::NotYourTurn);
        }
        let index = usize::from(game_move.square) - 1;
        if self.board[index].is_some() {
            return Err(GameError::SquareOccupied);
        }

        self.board[index] = Some(game_move.player);
        self.to_move = self.to_move.opposite();
        self.moves_played += 1;

        if self.line_won(game_move.player) {
            self.winner = game_move.player;
            self.terminated = true;
        } else if self.moves_played >= 9 {
            // Full board without a line is a draw.
            self.terminated = true;
        }
        Ok(())
    }

    /// Resigns the game on behalf of the seat in `role`; the other seat
    /// wins. It is an error if the game has already ended.
    pub fn resign(&mut self, role: Role) -> Result<(), GameError> {
        if self.terminated {
            return Err(GameError::GameOver);
        }
        if role == Role::None {
            return Err(GameError::NotYourTurn);
        }
        self.terminated = true;
        self.winner = role.opposite();
        Ok(())
    }

    /// Whether the game has ended, by win, draw, or resignation.
    pub fn is_over(&self) -> bool {
        self.terminated
    }

    /// The winning seat, or [`Role::None`] while the game runs or after a
    /// draw.
    pub fn winner(&self) -> Role {
        self.winner
    }

    /// The seat currently on the move.
    pub fn to_move(&self) -> Role {
        self.to_move
    }

    /// Renders the board for human users:
    ///
    /// ```text
    /// X| |O
    /// -----
    ///  |X|
    /// -----
    ///  | |O
    /// It's X's turn
    /// ```
    pub fn unparse_state(&self) -> String {
        let mut out = String::with_capacity(48);
        for row in 0..3 {
            for col in 0..3 {
                if col > 0 {
                    out.push('|');
                }
                out.push(self.board[row * 3 + col].unwrap_or(Role::None).mark());
            }
            out.push('\n');
            if row < 2 {
                out.push_str("-----\n");
            }
        }
        out.push_str("It's ");
        out.push(self.to_move.mark());
        out.push_str("'s turn\n");
        out
    }

    /// Checks all eight lines for three marks of `probe`.
    fn line_won(&self, probe: Role) -> bool {
        let owned = |index: usize| self.board[index] == Some(probe);
        // Rows
        (0..3).any(|row| (0..3).all(|col| owned(row * 3 + col)))
            // Columns
            || (0..3).any(|col| (0..3).all(|row| owned(row * 3 + col)))
            // Diagonals
            || (0..3).all(|i| owned(i * 4))
            || (0..3).all(|i| owned(i * 2 + 2))
    }
}
