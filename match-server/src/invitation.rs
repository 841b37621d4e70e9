//! The invitation shared between two client sessions.
//!
//! An [`Invitation`] records an offer by one session (the source) to play a
//! game against another (the target), with a fixed seat assignment. It
//! starts out `Open`; the target may accept it (which creates the game) or
//! decline it, the source may revoke it, and an accepted invitation closes
//! when its game ends by completion or resignation. Transitions only ever
//! move forward: Open → Accepted, Open → Closed, Accepted → Closed.
//!
//! The invitation owns the game and guards both the state and the game
//! under one mutex, so for a given invitation all transitions and moves are
//! totally ordered. Callers never hold the guard while writing to a socket;
//! notifications go out after a transition has committed.

use crate::client::ClientSession;
use crate::error::RequestError;
use std::sync::{Arc, Mutex};
use tic_tac_toe::{Game, Role};

/// The lifecycle states of an invitation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvitationState {
    /// Made but not yet answered.
    Open,
    /// Accepted by the target; the game is in progress.
    Accepted,
    /// Revoked, declined, or finished. Terminal.
    Closed,
}

/// What one applied move means for the session layer.
#[derive(Debug)]
pub struct MoveOutcome {
    /// The rendered board after the move, for the MOVED notification.
    pub board: String,
    /// `Some(winner)` if the move ended the game (`Role::None` for a
    /// draw), in which case the invitation has transitioned to `Closed`.
    pub finished: Option<Role>,
}

struct InvitationInner {
    state: InvitationState,
    /// Present from acceptance on, kept through `Closed` so the final
    /// position and winner stay readable.
    game: Option<Game>,
}

/// An offer to play between two distinct sessions. Both sessions hold the
/// invitation in their local lists while it is open or accepted; the
/// invitation holds both sessions for its whole lifetime.
pub struct Invitation {
    source: Arc<ClientSession>,
    target: Arc<ClientSession>,
    source_role: Role,
    target_role: Role,
    inner: Mutex<InvitationInner>,
}

impl Invitation {
    /// A new open invitation. Exactly one of the two roles is
    /// [`Role::First`]; the sessions must be distinct.
    pub fn new(
        source: Arc<ClientSession>,
        target: Arc<ClientSession>,
        source_role: Role,
        target_role: Role,
    ) -> Arc<Self> {
        debug_assert!(!Arc::ptr_eq(&source, &target));
        debug_assert!(
            (source_role == Role::First) != (target_role == Role::First),
            "exactly one side plays first"
        );
        Arc::new(Invitation {
            source,
            target,
            source_role,
            target_role,
            inner: Mutex::new(InvitationInner {
                state: InvitationState::Open,
                game: None,
            }),
        })
    }

    pub fn source(&self) -> &Arc<ClientSession> {
        &self.source
    }

    pub fn target(&self) -> &Arc<ClientSession> {
        &self.target
    }

    pub fn source_role(&self) -> Role {
        self.source_role
    }

    pub fn target_role(&self) -> Role {
        self.target_role
    }

    pub fn state(&self) -> InvitationState {
        self.inner.lock().unwrap().state
    }

    /// The seat `session` occupies in this invitation, if it participates.
    pub fn role_of(&self, session: &Arc<ClientSession>) -> Option<Role> {
        if Arc::ptr_eq(session, &self.source) {
            Some(self.source_role)
        } else if Arc::ptr_eq(session, &self.target) {
            Some(self.target_role)
        } else {
            None
        }
    }

    /// The other participant.
    pub fn peer_of(&self, session: &Arc<ClientSession>) -> Arc<ClientSession> {
        if Arc::ptr_eq(session, &self.source) {
            self.target.clone()
        } else {
            self.source.clone()
        }
    }

    /// Accepts an open invitation: the only path that creates the game.
    /// Returns the rendering of the fresh board.
    pub fn accept(&self) -> Result<String, RequestError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != InvitationState::Open {
            return Err(RequestError::WrongState("not open"));
        }
        inner.state = InvitationState::Accepted;
        let game = Game::new();
        let board = game.unparse_state();
        inner.game = Some(game);
        Ok(board)
    }

    /// Closes an open or accepted invitation. With a game still in
    /// progress, `by` names the seat that resigns it and the opposite seat
    /// wins; [`Role::None`] is only valid when no game is running. Returns
    /// the winner ([`Role::None`] when there is none).
    pub fn close(&self, by: Role) -> Result<Role, RequestError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == InvitationState::Closed {
            return Err(RequestError::WrongState("already closed"));
        }
        if let Some(game) = inner.game.as_mut()
            && !game.is_over()
        {
            if by == Role::None {
                return Err(RequestError::WrongState("a game is in progress"));
            }
            game.resign(by)?;
        }
        inner.state = InvitationState::Closed;
        Ok(inner.game.as_ref().map_or(Role::None, Game::winner))
    }

    /// Parses and applies one move by the seat in `role`. Only valid while
    /// the invitation is accepted. If the move finishes the game the
    /// invitation transitions to `Closed` under the same guard acquisition,
    /// so no second move can slip in between.
    pub fn apply_move(&self, role: Role, text: &str) -> Result<MoveOutcome, RequestError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != InvitationState::Accepted {
            return Err(RequestError::WrongState("no game in progress"));
        }
        let game = inner
            .game
            .as_mut()
            .ok_or(RequestError::WrongState("no game in progress"))?;

        let game_move = game.parse_move(role, text)?;
        game.apply_move(&game_move)?;

        let board = game.unparse_state();
        let finished = game.is_over().then(|| game.winner());
        if finished.is_some() {
            inner.state = InvitationState::Closed;
        }
        Ok(MoveOutcome { board, finished })
    }
}
