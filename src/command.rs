// SPDX-FileCopyrightText: 2025 The swarmwire Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! The command surface between the per-peer actors and their collaborators.
//!
//! Requests that need an answer carry a oneshot reply cell; the sender writes
//! the request and blocks reading the cell, so each reply reaches exactly one
//! caller.

use tokio::sync::{mpsc, oneshot};

use crate::networking::protocol::{BlockInfo, Message};
use crate::piece_set::PieceSet;
use crate::torrent::{InfoHash, PeerId};

/// Directives the peer manager and choke manager send to one controller over
/// its control channel.
#[derive(Debug)]
pub enum PeerCommand {
    /// A piece finished locally; announce it to this peer.
    PieceCompleted(u32),
    Choke,
    Unchoke,
    /// The swarm no longer wants this block from this peer.
    CancelBlock(BlockInfo),
    Shutdown,
}

/// Enqueue commands the controller sends to its sender queue.
#[derive(Debug, PartialEq, Eq)]
pub enum SenderCommand {
    /// Ordinary message, appended to the queue.
    Queue(Message),
    /// Enqueue CHOKE and purge every pending REQUEST and PIECE still queued.
    Choke,
    /// Peer-initiated CANCEL: drop the matching queued PIECE if it has not
    /// been sent, otherwise forward the CANCEL to the wire.
    Cancel(BlockInfo),
    /// Drop a not-yet-sent REQUEST for this block, if present.
    PruneRequest(BlockInfo),
}

/// Reply to [`PieceManagerRequest::GrabBlocks`].
#[derive(Debug, PartialEq, Eq)]
pub enum BlockGrant {
    Leech(Vec<BlockInfo>),
    /// Same payload, but the swarm has entered its endgame: the controller
    /// latches the lowered refill watermark.
    Endgame(Vec<BlockInfo>),
}

/// Requests the controller sends to the swarm-wide piece manager.
#[derive(Debug)]
pub enum PieceManagerRequest {
    /// Which pieces do we hold locally? Drives the initial BITFIELD.
    GetDone { reply: oneshot::Sender<Vec<u32>> },
    /// The peer gained availability of these pieces.
    PeerHave { pieces: Vec<u32> },
    /// The peer's availability is gone (disconnect).
    PeerUnhave { pieces: Vec<u32> },
    /// Given what this peer holds, is there anything we want?
    AskInterested {
        pieces: PieceSet,
        reply: oneshot::Sender<bool>,
    },
    /// Hand out up to `max` blocks this peer can serve us.
    GrabBlocks {
        max: usize,
        pieces: PieceSet,
        reply: oneshot::Sender<BlockGrant>,
    },
    /// A requested block arrived and should be stored.
    StoreBlock { block: BlockInfo, data: Vec<u8> },
    /// These blocks were requested but will not arrive; make them available
    /// to other peers again.
    PutbackBlocks { blocks: Vec<BlockInfo> },
}

/// Requests the controller sends to the file-system process.
#[derive(Debug)]
pub enum FsRequest {
    ReadBlock {
        block: BlockInfo,
        reply: oneshot::Sender<Vec<u8>>,
    },
}

/// Lifecycle events the controller reports to the peer manager.
#[derive(Debug)]
pub enum PeerManagerEvent {
    Connect {
        info_hash: InfoHash,
        peer: PeerId,
        control: mpsc::Sender<PeerCommand>,
    },
    Disconnect {
        peer: PeerId,
    },
}
