//! Per-connection session state and the operations clients invoke on it.
//!
//! A [`ClientSession`] is the server side of one live connection: the write
//! half of the socket, the login state, the bound player, and the session's
//! view of its invitations under small local ids. Sessions are shared via
//! `Arc`: invitations hold both of their sessions and the registry holds
//! every registered session. Everything a session owns is torn down by the
//! logout cascade when its service loop ends.
//!
//! Locking: the session has one guard for its state (login flag, player,
//! invitation list) and a separate async guard serialising whole frames
//! onto the socket, so a slow write never blocks state readers. Cross
//! session work always releases this session's guard before touching the
//! peer's, and peer ids are only ever peeked under the peer's own guard.

use crate::error::RequestError;
use crate::invitation::{Invitation, InvitationState};
use crate::player::{self, Player};
use crate::rating::Outcome;
use protocol::{FrameHeader, PacketType};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tic_tac_toe::Role;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

/// The socket write half, boxed so tests can drive sessions over in-memory
/// streams.
pub type SessionWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// One entry in a session's invitation list: the invitation and the small
/// integer id this session knows it by. The peer session generally holds
/// the same invitation under a different id.
#[derive(Clone)]
struct InvitationHandle {
    id: u8,
    invitation: Arc<Invitation>,
}

#[derive(Default)]
struct SessionState {
    logged_in: bool,
    player: Option<Arc<Player>>,
    invitations: Vec<InvitationHandle>,
}

/// The server-side object for one live client connection.
pub struct ClientSession {
    conn_id: u64,
    peer_addr: SocketAddr,
    /// Cancelled to half-close the session: the service loop stops reading
    /// and runs its teardown, while pending writes still drain.
    shutdown: CancellationToken,
    state: Mutex<SessionState>,
    writer: tokio::sync::Mutex<SessionWriter>,
}

impl ClientSession {
    /// A fresh logged-out session for an accepted connection.
    pub fn new(conn_id: u64, peer_addr: SocketAddr, writer: SessionWriter) -> Arc<Self> {
        Arc::new(ClientSession {
            conn_id,
            peer_addr,
            shutdown: CancellationToken::new(),
            state: Mutex::new(SessionState::default()),
            writer: tokio::sync::Mutex::new(writer),
        })
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// The token the shutdown coordinator cancels to stop this session's
    /// read loop.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.lock().unwrap().logged_in
    }

    /// The player this session is logged in as.
    pub fn player(&self) -> Option<Arc<Player>> {
        self.state.lock().unwrap().player.clone()
    }

    /// The logged-in username, if any. Used by the registry for lookups
    /// while it holds its own guard, so this must never block on I/O.
    pub fn player_name(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        state
            .logged_in
            .then(|| state.player.as_ref().map(|p| p.name().to_owned()))
            .flatten()
    }

    /// Marks the session as logged in under `player`. Uniqueness across
    /// sessions is the registry's business; this only refuses a second
    /// login on the same session.
    pub(crate) fn bind_player(&self, player: Arc<Player>) -> Result<(), RequestError> {
        let mut state = self.state.lock().unwrap();
        if state.logged_in {
            return Err(RequestError::AlreadyLoggedIn);
        }
        state.logged_in = true;
        state.player = Some(player);
        Ok(())
    }

    /// Logs the session out. Every invitation still on the list is wound
    /// down through this session: a running game is resigned, an open
    /// invitation is revoked (if we are its source) or declined (if its
    /// target). A session that never logged in reports an error and changes
    /// nothing.
    pub async fn logout(self: &Arc<Self>) -> Result<(), RequestError> {
        let handles = {
            let state = self.state.lock().unwrap();
            if !state.logged_in {
                return Err(RequestError::NotLoggedIn);
            }
            state.invitations.clone()
        };

        for handle in handles {
            let result = if handle.invitation.state() == InvitationState::Accepted {
                tracing::debug!(conn = self.conn_id, id = handle.id, "logout: resigning game");
                self.resign(handle.id).await
            } else if Arc::ptr_eq(self, handle.invitation.source()) {
                tracing::debug!(conn = self.conn_id, id = handle.id, "logout: revoking");
                self.revoke(handle.id).await
            } else {
                tracing::debug!(conn = self.conn_id, id = handle.id, "logout: declining");
                self.decline(handle.id).await
            };
            if let Err(err) = result {
                tracing::debug!(conn = self.conn_id, id = handle.id, %err, "logout cascade step failed");
            }
        }

        let mut state = self.state.lock().unwrap();
        state.logged_in = false;
        state.player = None;
        Ok(())
    }

    /// Inserts an invitation into the local list under the smallest local
    /// id not currently in use. Fails only when all 256 ids are taken,
    /// since the id has to fit the one-byte header field.
    pub fn add_invitation(&self, invitation: Arc<Invitation>) -> Result<u8, RequestError> {
        let mut state = self.state.lock().unwrap();
        let id = (0..=u8::MAX)
            .find(|candidate| state.invitations.iter().all(|h| h.id != *candidate))
            .ok_or(RequestError::IdsExhausted)?;
        state.invitations.push(InvitationHandle { id, invitation });
        Ok(id)
    }

    /// Removes an invitation from the local list, freeing its id for
    /// reassignment. Returns the id it was held under.
    pub fn remove_invitation(&self, invitation: &Arc<Invitation>) -> Result<u8, RequestError> {
        let mut state = self.state.lock().unwrap();
        let index = state
            .invitations
            .iter()
            .position(|h| Arc::ptr_eq(&h.invitation, invitation))
            .ok_or(RequestError::UnknownInvitation(0))?;
        Ok(state.invitations.remove(index).id)
    }

    /// The invitation this session holds under `id`.
    fn find_invitation(&self, id: u8) -> Result<Arc<Invitation>, RequestError> {
        let state = self.state.lock().unwrap();
        state
            .invitations
            .iter()
            .find(|h| h.id == id)
            .map(|h| h.invitation.clone())
            .ok_or(RequestError::UnknownInvitation(id))
    }

    /// The id this session holds `invitation` under. A plain peek under
    /// the session's guard; callers use it to translate ids into the
    /// recipient's numbering before notifying them.
    pub fn local_id_of(&self, invitation: &Arc<Invitation>) -> Option<u8> {
        let state = self.state.lock().unwrap();
        state
            .invitations
            .iter()
            .find(|h| Arc::ptr_eq(&h.invitation, invitation))
            .map(|h| h.id)
    }

    /// Creates an open invitation to `target`, inserts it into both lists
    /// (source first; a failure on the target side rolls the creation
    /// back), and notifies the target. Returns the source's local id for
    /// the requester's ACK.
    pub async fn make_invitation(
        self: &Arc<Self>,
        target: &Arc<Self>,
        source_role: Role,
        target_role: Role,
    ) -> Result<u8, RequestError> {
        let source_name = self
            .player()
            .ok_or(RequestError::NotLoggedIn)?
            .name()
            .to_owned();

        let invitation = Invitation::new(self.clone(), target.clone(), source_role, target_role);
        let source_id = self.add_invitation(invitation.clone())?;
        let target_id = match target.add_invitation(invitation.clone()) {
            Ok(id) => id,
            Err(err) => {
                let _ = self.remove_invitation(&invitation);
                return Err(err);
            }
        };

        let mut header = FrameHeader::new(PacketType::Invited);
        header.id = target_id;
        header.role = target_role.to_wire();
        if let Err(err) = target
            .send_packet(&mut header, Some(source_name.as_bytes()))
            .await
        {
            tracing::warn!(conn = target.conn_id, %err, "failed to deliver INVITED");
        }
        Ok(source_id)
    }

    /// Revokes an open invitation this session made. The target learns of
    /// it under its own id.
    pub async fn revoke(self: &Arc<Self>, id: u8) -> Result<(), RequestError> {
        let invitation = self.find_invitation(id)?;
        if !Arc::ptr_eq(self, invitation.source()) {
            return Err(RequestError::NotSource);
        }
        // Closing without a role only succeeds while no game exists, which
        // is exactly the open-only rule for revocation.
        invitation.close(Role::None)?;

        let _ = self.remove_invitation(&invitation);
        let target = invitation.target().clone();
        if let Ok(target_id) = target.remove_invitation(&invitation) {
            let mut header = FrameHeader::new(PacketType::Revoked);
            header.id = target_id;
            if let Err(err) = target.send_packet(&mut header, None).await {
                tracing::warn!(conn = target.conn_id, %err, "failed to deliver REVOKED");
            }
        }
        Ok(())
    }

    /// Declines an open invitation made to this session. The source learns
    /// of it under its own id.
    pub async fn decline(self: &Arc<Self>, id: u8) -> Result<(), RequestError> {
        let invitation = self.find_invitation(id)?;
        if !Arc::ptr_eq(self, invitation.target()) {
            return Err(RequestError::NotTarget);
        }
        invitation.close(Role::None)?;

        let _ = self.remove_invitation(&invitation);
        let source = invitation.source().clone();
        if let Ok(source_id) = source.remove_invitation(&invitation) {
            let mut header = FrameHeader::new(PacketType::Declined);
            header.id = source_id;
            if let Err(err) = source.send_packet(&mut header, None).await {
                tracing::warn!(conn = source.conn_id, %err, "failed to deliver DECLINED");
            }
        }
        Ok(())
    }

    /// Accepts an open invitation made to this session, creating its game.
    /// The ACCEPTED notification to the source carries the initial board
    /// iff the source moves first; the returned string is `Some` iff this
    /// session moves first, and becomes the payload of the requester's
    /// ACK. Exactly one of the two carries the board.
    pub async fn accept(self: &Arc<Self>, id: u8) -> Result<Option<String>, RequestError> {
        let invitation = self.find_invitation(id)?;
        if !Arc::ptr_eq(self, invitation.target()) {
            return Err(RequestError::NotTarget);
        }
        let board = invitation.accept()?;

        let source = invitation.source().clone();
        if let Some(source_id) = source.local_id_of(&invitation) {
            let mut header = FrameHeader::new(PacketType::Accepted);
            header.id = source_id;
            let payload =
                (invitation.source_role() == Role::First).then_some(board.as_bytes());
            if let Err(err) = source.send_packet(&mut header, payload).await {
                tracing::warn!(conn = source.conn_id, %err, "failed to deliver ACCEPTED");
            }
        }
        Ok((invitation.target_role() == Role::First).then_some(board))
    }

    /// Resigns the game of an accepted invitation this session takes part
    /// in. The opponent wins; both sides receive ENDED (opponent first) and
    /// the ratings move.
    pub async fn resign(self: &Arc<Self>, id: u8) -> Result<(), RequestError> {
        let invitation = self.find_invitation(id)?;
        let my_role = invitation
            .role_of(self)
            .ok_or(RequestError::NotParticipant)?;
        if invitation.state() != InvitationState::Accepted {
            return Err(RequestError::WrongState("no game in progress"));
        }
        let winner = invitation.close(my_role)?;

        let opponent = invitation.peer_of(self);
        let opponent_id = opponent.local_id_of(&invitation);
        if let Some(opponent_id) = opponent_id {
            let mut resigned = FrameHeader::new(PacketType::Resigned);
            resigned.id = opponent_id;
            if let Err(err) = opponent.send_packet(&mut resigned, None).await {
                tracing::warn!(conn = opponent.conn_id, %err, "failed to deliver RESIGNED");
            }
        }
        self.send_game_ended(&invitation, id, opponent_id, winner).await;

        let _ = invitation.source().remove_invitation(&invitation);
        let _ = invitation.target().remove_invitation(&invitation);
        post_game_result(&invitation, winner);
        Ok(())
    }

    /// Makes a move in the game of an accepted invitation. The opponent
    /// receives the board after the move; if the move ends the game, both
    /// sides receive ENDED, the invitation leaves both lists, and the
    /// ratings move.
    pub async fn make_move(self: &Arc<Self>, id: u8, text: &str) -> Result<(), RequestError> {
        let invitation = self.find_invitation(id)?;
        let my_role = invitation
            .role_of(self)
            .ok_or(RequestError::NotParticipant)?;
        let outcome = invitation.apply_move(my_role, text)?;

        let opponent = invitation.peer_of(self);
        let opponent_id = opponent.local_id_of(&invitation);
        if let Some(opponent_id) = opponent_id {
            let mut moved = FrameHeader::new(PacketType::Moved);
            moved.id = opponent_id;
            if let Err(err) = opponent
                .send_packet(&mut moved, Some(outcome.board.as_bytes()))
                .await
            {
                tracing::warn!(conn = opponent.conn_id, %err, "failed to deliver MOVED");
            }
        }

        if let Some(winner) = outcome.finished {
            self.send_game_ended(&invitation, id, opponent_id, winner).await;
            let _ = invitation.source().remove_invitation(&invitation);
            let _ = invitation.target().remove_invitation(&invitation);
            post_game_result(&invitation, winner);
        }
        Ok(())
    }

    /// ENDED to the opponent, then to this session, each under their own
    /// local id. Delivery failures are logged and swallowed: the game is
    /// over either way.
    async fn send_game_ended(
        self: &Arc<Self>,
        invitation: &Arc<Invitation>,
        own_id: u8,
        opponent_id: Option<u8>,
        winner: Role,
    ) {
        let opponent = invitation.peer_of(self);
        if let Some(opponent_id) = opponent_id {
            let mut ended = FrameHeader::new(PacketType::Ended);
            ended.id = opponent_id;
            ended.role = winner.to_wire();
            if let Err(err) = opponent.send_packet(&mut ended, None).await {
                tracing::warn!(conn = opponent.conn_id, %err, "failed to deliver ENDED");
            }
        }
        let mut ended = FrameHeader::new(PacketType::Ended);
        ended.id = own_id;
        ended.role = winner.to_wire();
        if let Err(err) = self.send_packet(&mut ended, None).await {
            tracing::warn!(conn = self.conn_id, %err, "failed to deliver ENDED");
        }
    }

    /// Writes one frame to this session's socket. The writer guard makes
    /// the frame byte-atomic against concurrent senders; the state guard is
    /// not involved.
    pub async fn send_packet(
        &self,
        header: &mut FrameHeader,
        payload: Option<&[u8]>,
    ) -> Result<(), RequestError> {
        let mut writer = self.writer.lock().await;
        protocol::send_frame(&mut *writer, header, payload).await?;
        Ok(())
    }

    /// ACK with the given id byte and optional payload.
    pub async fn send_ack(&self, id: u8, payload: Option<&[u8]>) -> Result<(), RequestError> {
        let mut header = FrameHeader::new(PacketType::Ack);
        header.id = id;
        self.send_packet(&mut header, payload).await
    }

    /// NACK.
    pub async fn send_nack(&self) -> Result<(), RequestError> {
        let mut header = FrameHeader::new(PacketType::Nack);
        self.send_packet(&mut header, None).await
    }
}

/// Posts a finished game to the ratings: first-seat player first, the
/// winner's role as outcome. Skipped with a warning if either side has no
/// bound player left.
fn post_game_result(invitation: &Invitation, winner: Role) {
    let (first, second) = if invitation.source_role() == Role::First {
        (invitation.source(), invitation.target())
    } else {
        (invitation.target(), invitation.source())
    };
    match (first.player(), second.player()) {
        (Some(first), Some(second)) => {
            player::post_result(&first, &second, Outcome::from_winner(winner));
        }
        _ => tracing::warn!("game finished without two bound players, ratings unchanged"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(conn_id: u64) -> Arc<ClientSession> {
        let (writer, _reader) = tokio::io::duplex(1024);
        ClientSession::new(conn_id, "127.0.0.1:0".parse().unwrap(), Box::new(writer))
    }

    fn open_invitation(
        source: &Arc<ClientSession>,
        target: &Arc<ClientSession>,
    ) -> Arc<Invitation> {
        Invitation::new(source.clone(), target.clone(), Role::First, Role::Second)
    }

    #[test]
    fn ids_are_assigned_smallest_first() {
        let a = session(1);
        let b = session(2);

        let first = a.add_invitation(open_invitation(&a, &b)).unwrap();
        let second = a.add_invitation(open_invitation(&a, &b)).unwrap();
        let third = a.add_invitation(open_invitation(&a, &b)).unwrap();
        assert_eq!((first, second, third), (0, 1, 2));
    }

    #[test]
    fn removed_ids_are_reused() {
        let a = session(1);
        let b = session(2);

        let keep = open_invitation(&a, &b);
        let gap = open_invitation(&a, &b);
        a.add_invitation(keep.clone()).unwrap();
        a.add_invitation(gap.clone()).unwrap();
        a.add_invitation(open_invitation(&a, &b)).unwrap();

        assert_eq!(a.remove_invitation(&gap).unwrap(), 1);
        assert_eq!(a.add_invitation(open_invitation(&a, &b)).unwrap(), 1);
        assert_eq!(a.local_id_of(&keep), Some(0));
    }

    #[test]
    fn peers_number_the_same_invitation_independently() {
        let a = session(1);
        let b = session(2);

        // Give b an unrelated invitation first so its numbering is offset.
        b.add_invitation(open_invitation(&b, &a)).unwrap();

        let shared = open_invitation(&a, &b);
        let a_id = a.add_invitation(shared.clone()).unwrap();
        let b_id = b.add_invitation(shared.clone()).unwrap();
        assert_eq!(a_id, 0);
        assert_eq!(b_id, 1);
        assert_eq!(a.local_id_of(&shared), Some(0));
        assert_eq!(b.local_id_of(&shared), Some(1));
    }

    #[tokio::test]
    async fn logout_without_login_is_an_error() {
        let a = session(1);
        assert!(matches!(
            a.logout().await,
            Err(RequestError::NotLoggedIn)
        ));
    }

    #[tokio::test]
    async fn second_bind_is_refused() {
        let a = session(1);
        a.bind_player(Arc::new(Player::new("alice"))).unwrap();
        assert!(matches!(
            a.bind_player(Arc::new(Player::new("alice"))),
            Err(RequestError::AlreadyLoggedIn)
        ));
        assert_eq!(a.player_name().as_deref(), Some("alice"));
    }
}
