//! The failure modes of client requests.
//!
//! Every variant maps onto a NACK to the requesting client; none of them
//! tears the connection down. The service loop logs the reason, the client
//! only learns that the request failed.

use protocol::FrameError;
use tic_tac_toe::GameError;

/// Why a client request was refused.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    /// LOGIN on a session that is already logged in.
    #[error("session is already logged in")]
    AlreadyLoggedIn,
    /// A gated request before LOGIN, or a logout of a never-logged-in
    /// session.
    #[error("session is not logged in")]
    NotLoggedIn,
    /// A payload that must be UTF-8 text was not, or a required payload was
    /// missing or empty.
    #[error("malformed payload")]
    MalformedPayload,
    /// A role byte outside the two player seats.
    #[error("invalid role {0}")]
    InvalidRole(u8),
    /// LOGIN under a name another live session already holds.
    #[error("username is already taken")]
    NameInUse,
    /// INVITE names a player no live session is logged in as.
    #[error("no such user: {0}")]
    UnknownUser(String),
    /// A session may not invite itself.
    #[error("cannot invite yourself")]
    SelfInvite,
    /// A request names a local invitation id this session does not hold.
    #[error("no invitation with id {0}")]
    UnknownInvitation(u8),
    /// All 256 local invitation ids of a session are in use.
    #[error("no free invitation id")]
    IdsExhausted,
    /// REVOKE by a session that is not the invitation's source.
    #[error("session is not the source of the invitation")]
    NotSource,
    /// ACCEPT or DECLINE by a session that is not the invitation's target.
    #[error("session is not the target of the invitation")]
    NotTarget,
    /// MOVE or RESIGN by a session that is neither participant.
    #[error("session does not participate in the invitation")]
    NotParticipant,
    /// The invitation is not in the state the operation requires.
    #[error("invitation is {0}")]
    WrongState(&'static str),
    /// A packet type clients have no business sending.
    #[error("unexpected packet type {0:?} from client")]
    UnexpectedPacket(protocol::PacketType),
    /// The client registry is at capacity, or a connection id collided.
    #[error("client registry refused the connection: {0}")]
    Registry(&'static str),
    /// The game engine rejected the move.
    #[error(transparent)]
    Game(#[from] GameError),
    /// The write to the requester's own socket failed.
    #[error(transparent)]
    Transport(#[from] FrameError),
}
