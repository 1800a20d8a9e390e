// SPDX-FileCopyrightText: 2025 The swarmwire Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! The outbound priority queue sitting between the controller and the
//! socket-writing sender.
//!
//! Control messages overtake PIECE payloads, queued transfers can be purged
//! or canceled before they reach the wire, and dispatch stops whenever the
//! choke-manager-imposed upload budget runs dry until a fresh grant arrives.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::{self, Instant};
use tracing::{event, Level};

use super::protocol::{BlockInfo, Message};
use crate::command::SenderCommand;

pub(crate) struct SenderQueue {
    cmd_rx: mpsc::Receiver<SenderCommand>,
    written_rx: mpsc::Receiver<u64>,
    grant_rx: mpsc::Receiver<u64>,
    out_tx: mpsc::Sender<Message>,
    /// Everything except PIECE payloads; drained first.
    control: VecDeque<Message>,
    /// PIECE payloads awaiting upload.
    data: VecDeque<Message>,
    /// Remaining upload budget in bytes; `None` means unthrottled.
    budget: Option<i64>,
    grants_open: bool,
    keepalive: Duration,
    shutdown_rx: broadcast::Receiver<()>,
}

impl SenderQueue {
    pub(crate) fn new(
        cmd_rx: mpsc::Receiver<SenderCommand>,
        written_rx: mpsc::Receiver<u64>,
        grant_rx: mpsc::Receiver<u64>,
        out_tx: mpsc::Sender<Message>,
        budget: Option<u64>,
        keepalive: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            cmd_rx,
            written_rx,
            grant_rx,
            out_tx,
            control: VecDeque::new(),
            data: VecDeque::new(),
            budget: budget.map(|b| b as i64),
            grants_open: true,
            keepalive,
            shutdown_rx,
        }
    }

    pub(crate) async fn run(mut self) {
        let mut last_sent = Instant::now();

        loop {
            let dispatch_ready = self.has_pending() && !self.budget_exhausted();
            let idle = self.is_idle();
            let grants_open = self.grants_open;
            let keepalive_deadline = last_sent + self.keepalive;

            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    event!(Level::TRACE, "sender queue shutting down");
                    break;
                }

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => apply(&mut self.control, &mut self.data, cmd),
                    None => break,
                },

                written = self.written_rx.recv() => match written {
                    Some(n) => {
                        if let Some(budget) = self.budget.as_mut() {
                            *budget -= n as i64;
                        }
                    }
                    None => break,
                },

                grant = self.grant_rx.recv(), if grants_open => match grant {
                    Some(n) => {
                        if let Some(budget) = self.budget.as_mut() {
                            *budget = budget.saturating_add(n as i64);
                        }
                    }
                    None => self.grants_open = false,
                },

                permit = self.out_tx.reserve(), if dispatch_ready => match permit {
                    Ok(permit) => {
                        if let Some(message) = pop_next(&mut self.control, &mut self.data) {
                            permit.send(message);
                            last_sent = Instant::now();
                        }
                    }
                    Err(_) => break,
                },

                _ = time::sleep_until(keepalive_deadline), if idle => {
                    self.control.push_back(Message::KeepAlive);
                }
            }

            if self.budget_exhausted() && !self.grants_open {
                // The budget can never be replenished again.
                event!(Level::DEBUG, "upload budget exhausted with grants closed");
                break;
            }
        }
    }

    fn has_pending(&self) -> bool {
        !self.control.is_empty() || !self.data.is_empty()
    }

    fn is_idle(&self) -> bool {
        self.control.is_empty() && self.data.is_empty()
    }

    fn budget_exhausted(&self) -> bool {
        matches!(self.budget, Some(b) if b <= 0)
    }
}

fn apply(control: &mut VecDeque<Message>, data: &mut VecDeque<Message>, cmd: SenderCommand) {
    match cmd {
        SenderCommand::Queue(message) => {
            if matches!(message, Message::Piece(..)) {
                data.push_back(message);
            } else {
                control.push_back(message);
            }
        }
        SenderCommand::Choke => {
            control.retain(|m| !matches!(m, Message::Request(_)));
            data.retain(|m| !matches!(m, Message::Piece(..)));
            control.push_back(Message::Choke);
        }
        SenderCommand::Cancel(block) => {
            let before = data.len();
            data.retain(|m| !is_piece_for(m, &block));
            if data.len() == before {
                // The PIECE already left the queue; tell the peer instead.
                control.push_back(Message::Cancel(block));
            }
        }
        SenderCommand::PruneRequest(block) => {
            control.retain(|m| *m != Message::Request(block));
        }
    }
}

fn pop_next(control: &mut VecDeque<Message>, data: &mut VecDeque<Message>) -> Option<Message> {
    control.pop_front().or_else(|| data.pop_front())
}

fn is_piece_for(message: &Message, block: &BlockInfo) -> bool {
    match message {
        Message::Piece(piece, offset, data) => {
            *piece == block.piece
                && *offset == block.offset
                && data.len() == block.length as usize
        }
        _ => false,
    }
}
