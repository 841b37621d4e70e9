//! The per-connection service loop.
//!
//! One task per accepted connection. The loop reads frames, dispatches them
//! by type, and answers every single request with exactly one ACK or NACK
//! before reading the next frame. Until the session has logged in, only
//! LOGIN is honoured; afterwards LOGIN is the one request that is not.
//!
//! The loop ends on end-of-stream, on a receive error, or when the shutdown
//! coordinator cancels the session's token. Teardown is always the same:
//! the logout cascade winds down the session's invitations, then the
//! session leaves the registry.

use crate::client::ClientSession;
use crate::client_registry::ClientRegistry;
use crate::error::RequestError;
use crate::player_registry::PlayerRegistry;
use protocol::{FrameError, FrameHeader, PacketType};
use std::sync::Arc;
use tic_tac_toe::Role;
use tokio::io::AsyncRead;

/// What a successful request answers with: the ACK's id byte and optional
/// payload.
struct Ack {
    id: u8,
    payload: Option<Vec<u8>>,
}

impl Ack {
    fn empty() -> Self {
        Ack {
            id: 0,
            payload: None,
        }
    }
}

/// Runs the service loop for one registered session until the connection
/// or the server goes away, then tears the session down.
pub async fn run<R>(
    session: Arc<ClientSession>,
    mut reader: R,
    registry: Arc<ClientRegistry>,
    players: Arc<PlayerRegistry>,
) where
    R: AsyncRead + Unpin,
{
    let shutdown = session.shutdown_token();
    tracing::info!(
        conn = session.conn_id(),
        peer = %session.peer_addr(),
        "client service started"
    );

    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = protocol::recv_frame(&mut reader) => received,
        };
        match received {
            Ok((header, payload)) => {
                handle_request(&session, &registry, &players, header, payload).await;
            }
            Err(FrameError::UnknownType(value)) => {
                // The frame was consumed; refuse it and keep the
                // connection.
                tracing::warn!(conn = session.conn_id(), value, "request with unknown type");
                if let Err(err) = session.send_nack().await {
                    tracing::warn!(conn = session.conn_id(), %err, "failed to send NACK");
                }
            }
            Err(FrameError::EndOfStream) => break,
            Err(err) => {
                tracing::warn!(conn = session.conn_id(), %err, "receive failed");
                break;
            }
        }
    }

    match session.logout().await {
        // A connection that never logged in has nothing to wind down.
        Ok(()) | Err(RequestError::NotLoggedIn) => {}
        Err(err) => {
            tracing::warn!(conn = session.conn_id(), %err, "logout on disconnect failed")
        }
    }
    if let Err(err) = registry.unregister(&session) {
        tracing::warn!(conn = session.conn_id(), %err, "unregister failed");
    }
    tracing::info!(conn = session.conn_id(), "client service ended");
}

/// Dispatches one request and answers it. A failed answer write is only
/// logged; the next read will observe the dead socket.
async fn handle_request(
    session: &Arc<ClientSession>,
    registry: &Arc<ClientRegistry>,
    players: &Arc<PlayerRegistry>,
    header: FrameHeader,
    payload: Option<Vec<u8>>,
) {
    match dispatch(session, registry, players, &header, payload).await {
        Ok(ack) => {
            if let Err(err) = session.send_ack(ack.id, ack.payload.as_deref()).await {
                tracing::warn!(conn = session.conn_id(), %err, "failed to send ACK");
            }
        }
        Err(err) => {
            tracing::info!(
                conn = session.conn_id(),
                kind = ?header.kind,
                %err,
                "request refused"
            );
            if let Err(err) = session.send_nack().await {
                tracing::warn!(conn = session.conn_id(), %err, "failed to send NACK");
            }
        }
    }
}

async fn dispatch(
    session: &Arc<ClientSession>,
    registry: &Arc<ClientRegistry>,
    players: &Arc<PlayerRegistry>,
    header: &FrameHeader,
    payload: Option<Vec<u8>>,
) -> Result<Ack, RequestError> {
    let logged_in = session.is_logged_in();
    match header.kind {
        PacketType::Login => {
            if logged_in {
                return Err(RequestError::AlreadyLoggedIn);
            }
            let name = text_payload(payload)?;
            let player = players.register(&name);
            registry.login(session, player)?;
            tracing::info!(conn = session.conn_id(), name = %name, "logged in");
            Ok(Ack::empty())
        }

        // Everything below is gated on a completed login.
        _ if !logged_in => Err(RequestError::NotLoggedIn),

        PacketType::Users => {
            let mut listing = String::new();
            for player in registry.all_players() {
                listing.push_str(player.name());
                listing.push('\t');
                listing.push_str(&player.displayed_rating().to_string());
                listing.push('\n');
            }
            Ok(Ack {
                id: 0,
                payload: Some(listing.into_bytes()),
            })
        }

        PacketType::Invite => {
            let name = text_payload(payload)?;
            // The role byte names the seat the target is to play.
            let target_role = match Role::from_wire(header.role) {
                Some(role @ (Role::First | Role::Second)) => role,
                _ => return Err(RequestError::InvalidRole(header.role)),
            };
            let target = registry
                .lookup(&name)
                .ok_or_else(|| RequestError::UnknownUser(name.clone()))?;
            if Arc::ptr_eq(session, &target) {
                return Err(RequestError::SelfInvite);
            }
            let id = session
                .make_invitation(&target, target_role.opposite(), target_role)
                .await?;
            Ok(Ack { id, payload: None })
        }

        PacketType::Revoke => {
            session.revoke(header.id).await?;
            Ok(Ack::empty())
        }

        PacketType::Decline => {
            session.decline(header.id).await?;
            Ok(Ack::empty())
        }

        PacketType::Accept => {
            let board = session.accept(header.id).await?;
            Ok(Ack {
                id: header.id,
                payload: board.map(String::into_bytes),
            })
        }

        PacketType::Move => {
            let text = text_payload(payload)?;
            session.make_move(header.id, &text).await?;
            Ok(Ack::empty())
        }

        PacketType::Resign => {
            session.resign(header.id).await?;
            Ok(Ack::empty())
        }

        other => Err(RequestError::UnexpectedPacket(other)),
    }
}

/// A required UTF-8 text payload: username, move string.
fn text_payload(payload: Option<Vec<u8>>) -> Result<String, RequestError> {
    let bytes = payload.ok_or(RequestError::MalformedPayload)?;
    let text = String::from_utf8(bytes).map_err(|_| RequestError::MalformedPayload)?;
    if text.is_empty() {
        return Err(RequestError::MalformedPayload);
    }
    Ok(text)
}
