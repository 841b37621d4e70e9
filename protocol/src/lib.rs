//! The wire format shared between the server and its clients.
//!
//! Every message on the wire is a single frame: a fixed 13-byte header,
//! followed by an optional UTF-8 text payload of exactly `size` bytes.
//! All multi-byte header fields travel in network byte order. The header
//! carries a `type` selecting the message, an `id` and a `role` byte whose
//! interpretation depends on the type, the payload length, and a monotonic
//! send timestamp.
//!
//! [`send_frame`] and [`recv_frame`] are the only functions that touch the
//! socket. A frame is written as two atomic outputs (header, then payload),
//! so a caller that serialises calls per socket gets byte-atomic frames.

use bytes::{Buf, BufMut, BytesMut};
use std::sync::OnceLock;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// The size of the packed frame header on the wire.
pub const HEADER_SIZE: usize = 13;

/// The message types of the protocol. The numeric values are part of the
/// wire format and must never be reordered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    /// Unused sentinel, never a valid message.
    None = 0,
    /// Client logs in under a username. Payload: username.
    Login = 1,
    /// Client requests the list of logged-in players.
    Users = 2,
    /// Client invites another player. Role byte: the role the target is to
    /// play (1 = first mover, 2 = second). Payload: target username.
    Invite = 3,
    /// Client revokes an invitation it made. Id byte: the source's local id.
    Revoke = 4,
    /// Client accepts an invitation. Id byte: the target's local id.
    Accept = 5,
    /// Client declines an invitation. Id byte: the target's local id.
    Decline = 6,
    /// Client makes a move. Id byte: the mover's local id. Payload: move text.
    Move = 7,
    /// Client resigns a game. Id byte: the resigner's local id.
    Resign = 8,
    /// Server acknowledges a request. Id and payload depend on the request.
    Ack = 9,
    /// Server rejects a request.
    Nack = 10,
    /// An invitation arrived. Id: recipient's local id. Role: the role the
    /// recipient will play. Payload: the source's username.
    Invited = 11,
    /// An invitation was revoked by its source. Id: recipient's local id.
    Revoked = 12,
    /// An invitation was accepted by its target. Id: recipient's local id.
    /// Payload: the initial board, iff the recipient moves first.
    Accepted = 13,
    /// An invitation was declined by its target. Id: recipient's local id.
    Declined = 14,
    /// The opponent moved. Id: recipient's local id. Payload: the board
    /// after the move.
    Moved = 15,
    /// The opponent resigned. Id: recipient's local id.
    Resigned = 16,
    /// A game ended. Id: recipient's local id. Role: the winner
    /// (0 = draw, 1 = first player, 2 = second player).
    Ended = 17,
}

impl PacketType {
    /// Decodes a wire type byte. Unknown values are kept as an error so the
    /// receive path can skip the frame without tearing the connection down.
    pub fn from_wire(value: u8) -> Result<Self, u8> {
        Ok(match value {
            0 => PacketType::None,
            1 => PacketType::Login,
            2 => PacketType::Users,
            3 => PacketType::Invite,
            4 => PacketType::Revoke,
            5 => PacketType::Accept,
            6 => PacketType::Decline,
            7 => PacketType::Move,
            8 => PacketType::Resign,
            9 => PacketType::Ack,
            10 => PacketType::Nack,
            11 => PacketType::Invited,
            12 => PacketType::Revoked,
            13 => PacketType::Accepted,
            14 => PacketType::Declined,
            15 => PacketType::Moved,
            16 => PacketType::Resigned,
            17 => PacketType::Ended,
            other => return Err(other),
        })
    }
}

/// The fixed frame header. Field order matches the wire layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// The message type.
    pub kind: PacketType,
    /// Invitation id, interpretation depends on `kind`.
    pub id: u8,
    /// Game role, interpretation depends on `kind`.
    pub role: u8,
    /// Payload length in bytes, zero if the frame has none.
    pub size: u16,
    /// Seconds part of the send timestamp (monotonic, since server start).
    pub timestamp_secs: u32,
    /// Nanoseconds part of the send timestamp.
    pub timestamp_nanos: u32,
}

impl FrameHeader {
    /// A header of the given type with all other fields zeroed. `size` and
    /// the timestamps are filled in by [`send_frame`].
    pub fn new(kind: PacketType) -> Self {
        FrameHeader {
            kind,
            id: 0,
            role: 0,
            size: 0,
            timestamp_secs: 0,
            timestamp_nanos: 0,
        }
    }
}

/// Errors of the framing layer.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The peer closed the connection, or a read ended short. There is no
    /// way to resynchronise a partial frame, so both cases end the stream.
    #[error("end of stream")]
    EndOfStream,
    /// A frame with an unknown type byte arrived. The payload has already
    /// been consumed; the connection is still usable.
    #[error("unknown packet type {0}")]
    UnknownType(u8),
    /// The payload does not fit the 16-bit size field.
    #[error("payload of {0} bytes exceeds the frame size limit")]
    Oversize(usize),
    /// The underlying socket write failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

/// Seconds and nanoseconds elapsed since the first frame the process sent
/// or received. A monotonic clock, so frame timestamps never jump backwards;
/// clients must not interpret them as wall-clock time.
fn monotonic_timestamp() -> (u32, u32) {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let elapsed = EPOCH.get_or_init(Instant::now).elapsed();
    (elapsed.as_secs() as u32, elapsed.subsec_nanos())
}

/// Sends one frame: stamps the header with the current monotonic time, sets
/// `size` from the payload, then writes the header and the payload each in
/// a single output call. The caller is responsible for serialising calls
/// per socket so concurrent senders cannot interleave bytes.
pub async fn send_frame<W>(
    writer: &mut W,
    header: &mut FrameHeader,
    payload: Option<&[u8]>,
) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let payload_len = payload.map_or(0, <[u8]>::len);
    if payload_len > u16::MAX as usize {
        return Err(FrameError::Oversize(payload_len));
    }
    header.size = payload_len as u16;
    (header.timestamp_secs, header.timestamp_nanos) = monotonic_timestamp();

    let mut buf = BytesMut::with_capacity(HEADER_SIZE);
    buf.put_u8(header.kind as u8);
    buf.put_u8(header.id);
    buf.put_u8(header.role);
    buf.put_u16(header.size);
    buf.put_u32(header.timestamp_secs);
    buf.put_u32(header.timestamp_nanos);

    writer.write_all(&buf).await?;
    if let Some(data) = payload {
        writer.write_all(data).await?;
    }
    tracing::debug!(
        kind = ?header.kind,
        id = header.id,
        role = header.role,
        size = header.size,
        "sent frame"
    );
    Ok(())
}

/// Receives one frame: a full read of the header, then a full read of
/// exactly `size` payload bytes. A short read anywhere means the stream is
/// gone and yields [`FrameError::EndOfStream`]. A frame with an unknown
/// type byte is consumed completely and reported as
/// [`FrameError::UnknownType`], leaving the stream positioned at the next
/// frame.
pub async fn recv_frame<R>(reader: &mut R) -> Result<(FrameHeader, Option<Vec<u8>>), FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; HEADER_SIZE];
    reader.read_exact(&mut raw).await.map_err(map_read_error)?;

    let mut buf = &raw[..];
    let type_byte = buf.get_u8();
    let id = buf.get_u8();
    let role = buf.get_u8();
    let size = buf.get_u16();
    let timestamp_secs = buf.get_u32();
    let timestamp_nanos = buf.get_u32();

    let payload = if size > 0 {
        let mut data = vec![0u8; size as usize];
        reader.read_exact(&mut data).await.map_err(map_read_error)?;
        Some(data)
    } else {
        None
    };

    let kind = match PacketType::from_wire(type_byte) {
        Ok(kind) => kind,
        Err(value) => {
            tracing::debug!(value, size, "received frame with unknown type");
            return Err(FrameError::UnknownType(value));
        }
    };
    tracing::debug!(?kind, id, role, size, "received frame");

    Ok((
        FrameHeader {
            kind,
            id,
            role,
            size,
            timestamp_secs,
            timestamp_nanos,
        },
        payload,
    ))
}

/// Any read failure, including a short read in the middle of a frame, is
/// treated as end of stream.
fn map_read_error(err: std::io::Error) -> FrameError {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::EndOfStream
    } else {
        FrameError::Transport(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trips_with_payload() {
        let (mut client, mut server) = tokio::io::duplex(256);

        let mut header = FrameHeader::new(PacketType::Invite);
        header.id = 3;
        header.role = 2;
        send_frame(&mut client, &mut header, Some(b"bob"))
            .await
            .unwrap();

        let (received, payload) = recv_frame(&mut server).await.unwrap();
        assert_eq!(received.kind, PacketType::Invite);
        assert_eq!(received.id, 3);
        assert_eq!(received.role, 2);
        assert_eq!(received.size, 3);
        assert_eq!(payload.as_deref(), Some(&b"bob"[..]));
    }

    #[tokio::test]
    async fn frame_round_trips_without_payload() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let mut header = FrameHeader::new(PacketType::Users);
        send_frame(&mut client, &mut header, None).await.unwrap();

        let (received, payload) = recv_frame(&mut server).await.unwrap();
        assert_eq!(received.kind, PacketType::Users);
        assert_eq!(received.size, 0);
        assert!(payload.is_none());
    }

    #[tokio::test]
    async fn header_layout_is_network_order() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let mut header = FrameHeader::new(PacketType::Moved);
        header.id = 1;
        header.role = 0;
        send_frame(&mut client, &mut header, Some(&[0u8; 300])).await.unwrap();

        let mut raw = [0u8; HEADER_SIZE];
        tokio::io::AsyncReadExt::read_exact(&mut server, &mut raw)
            .await
            .unwrap();
        assert_eq!(raw[0], 15); // type
        assert_eq!(raw[1], 1); // id
        assert_eq!(raw[2], 0); // role
        assert_eq!(u16::from_be_bytes([raw[3], raw[4]]), 300);
    }

    #[tokio::test]
    async fn closed_stream_is_end_of_stream() {
        let (client, mut server) = tokio::io::duplex(64);
        drop(client);

        match recv_frame(&mut server).await {
            Err(FrameError::EndOfStream) => {}
            other => panic!("expected end of stream, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn truncated_header_is_end_of_stream() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&[1, 0, 0, 0]).await.unwrap();
        drop(client);

        match recv_frame(&mut server).await {
            Err(FrameError::EndOfStream) => {}
            other => panic!("expected end of stream, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_type_consumes_the_frame() {
        let (mut client, mut server) = tokio::io::duplex(256);

        // A frame with type byte 99 and a 2-byte payload, hand-encoded.
        let mut raw = BytesMut::new();
        raw.put_u8(99);
        raw.put_u8(0);
        raw.put_u8(0);
        raw.put_u16(2);
        raw.put_u32(0);
        raw.put_u32(0);
        raw.put_slice(b"xy");
        client.write_all(&raw).await.unwrap();

        let mut header = FrameHeader::new(PacketType::Users);
        send_frame(&mut client, &mut header, None).await.unwrap();

        match recv_frame(&mut server).await {
            Err(FrameError::UnknownType(99)) => {}
            other => panic!("expected unknown type, got {other:?}"),
        }
        // The stream is positioned at the next frame.
        let (next, _) = recv_frame(&mut server).await.unwrap();
        assert_eq!(next.kind, PacketType::Users);
    }
}
