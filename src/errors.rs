// SPDX-FileCopyrightText: 2025 The swarmwire Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::time::Duration;

use thiserror::Error;

/// Why a peer connection ended.
///
/// Only the recoverable conditions of the protocol (stray PIECE, REQUEST
/// while choking) are absorbed in the handlers; everything here exits the
/// controller through the common cleanup path. I/O and framing failures
/// surface as [`PeerError::ConnectionClosed`] because the receiver and
/// sender tasks own the socket and terminate on them.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("peer silent for {0:?}")]
    Inactive(Duration),

    #[error("engine channel closed")]
    ChannelClosed,
}
