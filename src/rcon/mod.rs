//! Source remote-console (RCON) client over TCP.
//!
//! Every packet is `size | id | type | body\0 | \0` with little-endian
//! 32-bit integers, where `size` counts everything after itself. A command
//! reply may be split across several packets, so each command is followed by
//! an empty marker packet: the server echoes the marker only after the last
//! reply fragment, which tells the client when to stop reading. Fragments
//! are split on byte boundaries, so text is decoded only once the whole
//! reply has arrived.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::console::{ConsoleError, RemoteConsole};
use crate::future::BoxFuture;

const SERVERDATA_AUTH: i32 = 3;
const SERVERDATA_AUTH_RESPONSE: i32 = 2;
const SERVERDATA_EXECCOMMAND: i32 = 2;
const SERVERDATA_RESPONSE_VALUE: i32 = 0;

const AUTH_ID: i32 = 1;
const COMMAND_ID: i32 = 2;
const MARKER_ID: i32 = 3;
const AUTH_REJECTED_ID: i32 = -1;

const HEADER_LEN: usize = 8;
const TRAILER_LEN: usize = 2;
const MAX_FRAME_LEN: usize = 4096 + HEADER_LEN + TRAILER_LEN;

/// One decoded RCON packet.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Packet {
    /// Request id echoed by the server.
    pub id: i32,
    /// Packet type.
    pub kind: i32,
    /// Raw payload without terminators.
    pub body: Bytes,
}

/// Serialises a packet into its wire form.
#[must_use]
pub fn encode_packet(id: i32, kind: i32, body: &[u8]) -> Bytes {
    let frame_len = HEADER_LEN + body.len() + TRAILER_LEN;
    let mut buf = BytesMut::with_capacity(4 + frame_len);
    buf.put_i32_le(i32::try_from(frame_len).unwrap_or(i32::MAX));
    buf.put_i32_le(id);
    buf.put_i32_le(kind);
    buf.put_slice(body);
    buf.put_u8(0);
    buf.put_u8(0);
    buf.freeze()
}

/// Decodes one packet from the front of `buf`.
///
/// Returns `Ok(None)` when more bytes are needed; consumed bytes are removed
/// from `buf` only when a full packet is available.
///
/// # Errors
///
/// Returns [`ConsoleError::Protocol`] when the declared size is out of range.
pub fn decode_packet(buf: &mut BytesMut) -> Result<Option<Packet>, ConsoleError> {
    let Some(mut header) = buf.get(..4) else {
        return Ok(None);
    };
    let declared = header.get_i32_le();
    let frame_len = usize::try_from(declared)
        .ok()
        .filter(|len| (HEADER_LEN + TRAILER_LEN..=MAX_FRAME_LEN).contains(len))
        .ok_or_else(|| ConsoleError::Protocol {
            message: format!("invalid packet size {declared}"),
        })?;
    if buf.len() < 4 + frame_len {
        return Ok(None);
    }

    buf.advance(4);
    let mut frame = buf.split_to(frame_len);
    let id = frame.get_i32_le();
    let kind = frame.get_i32_le();
    frame.truncate(frame.len().saturating_sub(TRAILER_LEN));
    Ok(Some(Packet {
        id,
        kind,
        body: frame.freeze(),
    }))
}

/// [`RemoteConsole`] speaking the Source RCON protocol.
#[derive(Clone, Copy, Debug, Default)]
pub struct SourceRcon;

impl SourceRcon {
    /// Creates the client.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl RemoteConsole for SourceRcon {
    fn query<'a>(
        &'a self,
        host: &'a str,
        port: u16,
        password: &'a str,
        command: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, String, ConsoleError> {
        Box::pin(async move {
            let address = format!("{host}:{port}");
            match tokio::time::timeout(timeout, exchange(&address, password, command)).await {
                Ok(result) => result,
                Err(_) => Err(ConsoleError::Timeout { address, timeout }),
            }
        })
    }
}

struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
}

impl Connection {
    async fn open(address: &str) -> Result<Self, ConsoleError> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|source| ConsoleError::Connect {
                address: address.to_owned(),
                source,
            })?;
        Ok(Self {
            stream,
            buffer: BytesMut::with_capacity(MAX_FRAME_LEN),
        })
    }

    async fn send(&mut self, id: i32, kind: i32, body: &str) -> Result<(), ConsoleError> {
        self.stream
            .write_all(&encode_packet(id, kind, body.as_bytes()))
            .await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<Packet, ConsoleError> {
        loop {
            if let Some(packet) = decode_packet(&mut self.buffer)? {
                return Ok(packet);
            }
            if self.stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(ConsoleError::Protocol {
                    message: String::from("connection closed mid-reply"),
                });
            }
        }
    }

    async fn authenticate(&mut self, address: &str, password: &str) -> Result<(), ConsoleError> {
        self.send(AUTH_ID, SERVERDATA_AUTH, password).await?;
        loop {
            let packet = self.receive().await?;
            if packet.kind != SERVERDATA_AUTH_RESPONSE {
                continue;
            }
            if packet.id == AUTH_REJECTED_ID {
                return Err(ConsoleError::Authentication {
                    address: address.to_owned(),
                });
            }
            return Ok(());
        }
    }

    async fn execute(&mut self, command: &str) -> Result<String, ConsoleError> {
        self.send(COMMAND_ID, SERVERDATA_EXECCOMMAND, command).await?;
        self.send(MARKER_ID, SERVERDATA_RESPONSE_VALUE, "").await?;

        let mut reply = BytesMut::new();
        loop {
            let packet = self.receive().await?;
            match packet.id {
                MARKER_ID => return Ok(String::from_utf8_lossy(&reply).into_owned()),
                COMMAND_ID if packet.kind == SERVERDATA_RESPONSE_VALUE => {
                    reply.extend_from_slice(&packet.body);
                }
                _ => {}
            }
        }
    }
}

async fn exchange(address: &str, password: &str, command: &str) -> Result<String, ConsoleError> {
    let mut connection = Connection::open(address).await?;
    connection.authenticate(address, password).await?;
    debug!(address, "console authenticated");
    connection.execute(command).await
}

#[cfg(test)]
mod tests;
