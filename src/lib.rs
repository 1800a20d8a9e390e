// SPDX-FileCopyrightText: 2025 The swarmwire Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-peer wire protocol engine for a BitTorrent client.
//!
//! Given a stream already past handshake, [`spawn_peer`] runs four
//! cooperating tasks (receiver, sender, sender queue, controller) that drive
//! the peer-wire protocol and coordinate with the swarm-wide piece manager,
//! choke manager, status process and peer manager through the typed channels
//! in [`command`].

pub mod command;
pub mod config;
pub mod errors;
pub mod networking;
pub mod piece_set;
pub mod rate;
pub mod registers;
pub mod torrent;

pub use command::{
    BlockGrant, FsRequest, PeerCommand, PeerManagerEvent, PieceManagerRequest, SenderCommand,
};
pub use config::{load_settings, Settings};
pub use errors::PeerError;
pub use networking::{spawn_peer, BlockInfo, ControllerCtx, Message, PeerHandle};
pub use piece_set::PieceSet;
pub use registers::{RateRegister, RateSample, StatusRegister, StatusUpdate};
pub use torrent::{InfoHash, PeerId, PieceMap};
