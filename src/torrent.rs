// SPDX-FileCopyrightText: 2025 The swarmwire Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// The 20-byte SHA-1 identifying a torrent's info dictionary.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash(pub [u8; 20]);

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Stable handle addressing one peer connection. The peer manager uses it to
/// route directives and the choke manager to attribute rate samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(u64);

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

impl PeerId {
    pub fn next() -> Self {
        PeerId(NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Geometry of a torrent's piece space: how many pieces there are and how
/// large each one is. The last piece is the remainder of the total length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceMap {
    piece_length: u32,
    total_length: u64,
}

impl PieceMap {
    pub fn new(piece_length: u32, total_length: u64) -> Self {
        Self {
            piece_length,
            total_length,
        }
    }

    pub fn piece_count(&self) -> usize {
        if self.piece_length == 0 {
            return 0;
        }
        self.total_length.div_ceil(self.piece_length as u64) as usize
    }

    pub fn contains(&self, piece: u32) -> bool {
        (piece as usize) < self.piece_count()
    }

    pub fn piece_size(&self, piece: u32) -> Option<u32> {
        if !self.contains(piece) {
            return None;
        }
        let start = piece as u64 * self.piece_length as u64;
        let remaining = self.total_length - start;
        Some(remaining.min(self.piece_length as u64) as u32)
    }
}
