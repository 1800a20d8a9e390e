// SPDX-FileCopyrightText: 2025 The swarmwire Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Peer-wire message framing.
//!
//! Every message is a 4-byte big-endian length prefix followed by a one-byte
//! id and the payload; a zero length is a keep-alive. `decode` is incremental
//! so the receiver can feed it a partially buffered stream.

use std::fmt;

use thiserror::Error;

/// Upper bound on a single frame. Large enough for the bitfield of a
/// multi-million-piece torrent, small enough to stop a hostile length prefix
/// from ballooning the read buffer.
const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unknown message id {0}")]
    UnknownId(u8),
    #[error("bad payload length {len} for message id {id}")]
    BadPayload { id: u8, len: usize },
    #[error("frame length {0} exceeds limit")]
    FrameTooLarge(usize),
    #[error("payload too large to frame")]
    Oversized,
}

/// One block of a piece: the unit of transfer requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockInfo {
    pub piece: u32,
    pub offset: u32,
    pub length: u32,
}

impl BlockInfo {
    pub fn new(piece: u32, offset: u32, length: u32) -> Self {
        Self {
            piece,
            offset,
            length,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request(BlockInfo),
    Piece(u32, u32, Vec<u8>),
    Cancel(BlockInfo),
    Port(u16),
}

/// Debug wrapper that elides bulk payloads so tracing stays readable.
pub struct MessageSummary<'a>(pub &'a Message);

impl fmt::Debug for MessageSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Message::Bitfield(bytes) => write!(f, "BITFIELD(len: {})", bytes.len()),
            Message::Piece(piece, offset, data) => {
                write!(
                    f,
                    "PIECE(piece: {}, offset: {}, len: {})",
                    piece,
                    offset,
                    data.len()
                )
            }
            other => write!(f, "{:?}", other),
        }
    }
}

pub fn encode(message: &Message) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    match message {
        Message::KeepAlive => out.extend(0u32.to_be_bytes()),
        Message::Choke => frame(&mut out, 0, &[]),
        Message::Unchoke => frame(&mut out, 1, &[]),
        Message::Interested => frame(&mut out, 2, &[]),
        Message::NotInterested => frame(&mut out, 3, &[]),
        Message::Have(piece) => frame(&mut out, 4, &piece.to_be_bytes()),
        Message::Bitfield(bits) => {
            check_len(bits.len())?;
            frame(&mut out, 5, bits);
        }
        Message::Request(block) => frame(&mut out, 6, &block_payload(block)),
        Message::Piece(piece, offset, data) => {
            check_len(data.len())?;
            let len = 9 + data.len() as u32;
            out.extend(len.to_be_bytes());
            out.push(7);
            out.extend(piece.to_be_bytes());
            out.extend(offset.to_be_bytes());
            out.extend_from_slice(data);
        }
        Message::Cancel(block) => frame(&mut out, 8, &block_payload(block)),
        Message::Port(port) => frame(&mut out, 9, &port.to_be_bytes()),
    }
    Ok(out)
}

fn frame(out: &mut Vec<u8>, id: u8, payload: &[u8]) {
    out.extend((1 + payload.len() as u32).to_be_bytes());
    out.push(id);
    out.extend_from_slice(payload);
}

fn block_payload(block: &BlockInfo) -> [u8; 12] {
    let mut payload = [0u8; 12];
    payload[..4].copy_from_slice(&block.piece.to_be_bytes());
    payload[4..8].copy_from_slice(&block.offset.to_be_bytes());
    payload[8..].copy_from_slice(&block.length.to_be_bytes());
    payload
}

fn check_len(payload_len: usize) -> Result<(), WireError> {
    if payload_len + 9 > MAX_FRAME_LEN {
        return Err(WireError::Oversized);
    }
    Ok(())
}

/// Tries to decode one message from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete frame,
/// otherwise the message together with the number of bytes it occupied on the
/// wire, length prefix included.
pub fn decode(buf: &[u8]) -> Result<Option<(Message, usize)>, WireError> {
    if buf.len() < 4 {
        return Ok(None);
    }
    let frame_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if frame_len == 0 {
        return Ok(Some((Message::KeepAlive, 4)));
    }
    if frame_len > MAX_FRAME_LEN {
        return Err(WireError::FrameTooLarge(frame_len));
    }
    if buf.len() < 4 + frame_len {
        return Ok(None);
    }

    let id = buf[4];
    let payload = &buf[5..4 + frame_len];
    let message = match id {
        0 => expect_empty(id, payload, Message::Choke)?,
        1 => expect_empty(id, payload, Message::Unchoke)?,
        2 => expect_empty(id, payload, Message::Interested)?,
        3 => expect_empty(id, payload, Message::NotInterested)?,
        4 => Message::Have(read_u32(id, payload, 0)?),
        5 => Message::Bitfield(payload.to_vec()),
        6 => Message::Request(read_block(id, payload)?),
        7 => {
            if payload.len() < 8 {
                return Err(WireError::BadPayload {
                    id,
                    len: payload.len(),
                });
            }
            Message::Piece(
                read_u32(id, payload, 0)?,
                read_u32(id, payload, 4)?,
                payload[8..].to_vec(),
            )
        }
        8 => Message::Cancel(read_block(id, payload)?),
        9 => {
            if payload.len() != 2 {
                return Err(WireError::BadPayload {
                    id,
                    len: payload.len(),
                });
            }
            Message::Port(u16::from_be_bytes([payload[0], payload[1]]))
        }
        other => return Err(WireError::UnknownId(other)),
    };

    Ok(Some((message, 4 + frame_len)))
}

fn expect_empty(id: u8, payload: &[u8], message: Message) -> Result<Message, WireError> {
    if payload.is_empty() {
        Ok(message)
    } else {
        Err(WireError::BadPayload {
            id,
            len: payload.len(),
        })
    }
}

fn read_block(id: u8, payload: &[u8]) -> Result<BlockInfo, WireError> {
    if payload.len() != 12 {
        return Err(WireError::BadPayload {
            id,
            len: payload.len(),
        });
    }
    Ok(BlockInfo::new(
        read_u32(id, payload, 0)?,
        read_u32(id, payload, 4)?,
        read_u32(id, payload, 8)?,
    ))
}

fn read_u32(id: u8, payload: &[u8], at: usize) -> Result<u32, WireError> {
    let bytes: [u8; 4] = payload
        .get(at..at + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or(WireError::BadPayload {
            id,
            len: payload.len(),
        })?;
    Ok(u32::from_be_bytes(bytes))
}
