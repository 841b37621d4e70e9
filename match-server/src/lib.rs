//! A network server that mediates two-player tic-tac-toe matches.
//!
//! Clients hold long-lived TCP connections speaking the framed binary
//! protocol of the `protocol` crate. Each connection logs in as a named
//! player, can list its peers, exchange game invitations with them, play
//! out the accepted games, and have its skill rating follow the results.
//!
//! The pieces: [`client::ClientSession`] is one live connection,
//! [`client_registry::ClientRegistry`] the set of them,
//! [`invitation::Invitation`] the shared offer-to-play between two
//! sessions, [`player::Player`] the persistent named record with a rating,
//! and [`service`] the per-connection request loop. [`serve`] wires them
//! together around a listening socket.

pub mod client;
pub mod client_registry;
pub mod error;
pub mod invitation;
pub mod player;
pub mod player_registry;
pub mod rating;
pub mod service;

use client_registry::ClientRegistry;
use player_registry::PlayerRegistry;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Accepts connections on `listener` and services each in its own task
/// until `shutdown` is cancelled. Then stops accepting, half-closes every
/// live session, and waits for all of them to unwind before returning.
///
/// A connection the registry refuses (capacity) is dropped on the floor
/// without a frame, as the protocol prescribes.
pub async fn serve(listener: TcpListener, shutdown: CancellationToken) -> std::io::Result<()> {
    let registry = Arc::new(ClientRegistry::new());
    let players = Arc::new(PlayerRegistry::new());
    let mut next_conn_id: u64 = 0;

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer_addr)) => {
                let conn_id = next_conn_id;
                next_conn_id += 1;
                let (reader, writer) = stream.into_split();
                match registry.register(conn_id, peer_addr, Box::new(writer)) {
                    Ok(session) => {
                        tokio::spawn(service::run(
                            session,
                            reader,
                            registry.clone(),
                            players.clone(),
                        ));
                    }
                    Err(err) => {
                        // Dropping both halves closes the fresh socket.
                        tracing::warn!(%peer_addr, %err, "connection refused");
                    }
                }
            }
            Err(err) => {
                tracing::warn!(%err, "accept failed");
            }
        }
    }

    tracing::info!("listener stopped, draining sessions");
    registry.shutdown_all();
    registry.wait_for_empty().await;
    Ok(())
}
