// SPDX-FileCopyrightText: 2025 The swarmwire Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! The per-peer state machine.
//!
//! Four event sources (inbound peer messages, manager directives, sender
//! bandwidth samples, the periodic tick) are merged into one serialized
//! transition stream. The controller is the only writer of peer state, which
//! is what keeps the outstanding-request set and the choke flags correct
//! without locks.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{event, instrument, Level};

use super::protocol::{BlockInfo, Message, MessageSummary};
use super::receiver::receiver_task;
use super::sender::sender_task;
use super::sender_queue::SenderQueue;
use crate::command::{
    BlockGrant, FsRequest, PeerCommand, PeerManagerEvent, PieceManagerRequest, SenderCommand,
};
use crate::config::Settings;
use crate::errors::PeerError;
use crate::piece_set::PieceSet;
use crate::rate::Rate;
use crate::registers::{RateRegister, RateSample, StatusRegister, StatusUpdate};
use crate::torrent::{InfoHash, PeerId, PieceMap};

/// Refill the request pipeline when it drains below this.
const LO_MARK: usize = 10;
/// In endgame the pipeline refills as soon as a single slot frees up, so the
/// last blocks get requested from every peer that has them.
const ENDGAME_LO_MARK: usize = 1;
/// Never keep more than this many requests outstanding per peer.
const HI_MARK: usize = 15;

/// Everything a controller is born with and never changes: the peer's
/// identity, the torrent geometry, and the channels to its collaborators.
#[derive(Clone)]
pub struct ControllerCtx {
    pub peer: PeerId,
    pub info_hash: InfoHash,
    pub piece_map: PieceMap,
    pub piece_mgr: mpsc::Sender<PieceManagerRequest>,
    pub fs: mpsc::Sender<FsRequest>,
    pub peer_mgr: mpsc::Sender<PeerManagerEvent>,
    pub rate_register: Arc<RateRegister>,
    pub status_register: Arc<StatusRegister>,
    pub settings: Settings,
}

pub(crate) struct Controller {
    ctx: ControllerCtx,
    inbound_rx: mpsc::Receiver<(Message, u64)>,
    command_rx: mpsc::Receiver<PeerCommand>,
    sample_rx: mpsc::Receiver<u64>,
    queue_tx: mpsc::Sender<SenderCommand>,
    shutdown_tx: broadcast::Sender<()>,

    we_choke: bool,
    we_interested: bool,
    peer_choke: bool,
    peer_interested: bool,
    peer_pieces: PieceSet,
    /// Blocks requested from this peer and neither received nor canceled.
    /// Membership decides whether an incoming PIECE is accepted.
    block_queue: HashSet<BlockInfo>,
    up_rate: Rate,
    down_rate: Rate,
    endgame: bool,
    last_inbound: Instant,
}

impl Controller {
    pub(crate) fn new(
        ctx: ControllerCtx,
        inbound_rx: mpsc::Receiver<(Message, u64)>,
        command_rx: mpsc::Receiver<PeerCommand>,
        sample_rx: mpsc::Receiver<u64>,
        queue_tx: mpsc::Sender<SenderCommand>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        let now = Instant::now();
        let piece_count = ctx.piece_map.piece_count();
        Self {
            ctx,
            inbound_rx,
            command_rx,
            sample_rx,
            queue_tx,
            shutdown_tx,
            we_choke: true,
            we_interested: false,
            peer_choke: true,
            peer_interested: false,
            peer_pieces: PieceSet::new(piece_count),
            block_queue: HashSet::new(),
            up_rate: Rate::new(now),
            down_rate: Rate::new(now),
            endgame: false,
            last_inbound: now,
        }
    }

    #[instrument(skip_all, name = "peer", fields(peer = %self.ctx.peer))]
    pub(crate) async fn run(
        mut self,
        control_tx: mpsc::Sender<PeerCommand>,
    ) -> Result<(), PeerError> {
        let connect = PeerManagerEvent::Connect {
            info_hash: self.ctx.info_hash,
            peer: self.ctx.peer,
            control: control_tx,
        };
        self.ctx
            .peer_mgr
            .send(connect)
            .await
            .map_err(|_| PeerError::ChannelClosed)?;

        let result = self.drive().await;
        match &result {
            Ok(()) => event!(Level::INFO, "peer session ended"),
            Err(e) => event!(Level::INFO, "peer session ended: {}", e),
        }
        self.cleanup().await;
        let _ = self.shutdown_tx.send(());
        result
    }

    async fn drive(&mut self) -> Result<(), PeerError> {
        self.announce_bitfield().await?;

        let tick = Duration::from_secs(self.ctx.settings.rate_tick_secs);
        let mut ticker = time::interval_at(time::Instant::now() + tick, tick);

        loop {
            tokio::select! {
                inbound = self.inbound_rx.recv() => match inbound {
                    Some((message, wire_len)) => self.on_message(message, wire_len).await?,
                    None => return Err(PeerError::ConnectionClosed),
                },

                command = self.command_rx.recv() => match command {
                    Some(command) => {
                        if !self.on_command(command).await? {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },

                sample = self.sample_rx.recv() => match sample {
                    Some(bytes) => self.up_rate.update(bytes),
                    None => return Err(PeerError::ConnectionClosed),
                },

                _ = ticker.tick() => self.on_tick().await?,
            }
        }
    }

    /// Tell the peer which pieces we already hold.
    async fn announce_bitfield(&mut self) -> Result<(), PeerError> {
        let (reply, rx) = oneshot::channel();
        self.piece_mgr_send(PieceManagerRequest::GetDone { reply })
            .await?;
        let done = rx.await.map_err(|_| PeerError::ChannelClosed)?;

        let mut owned = PieceSet::new(self.ctx.piece_map.piece_count());
        for piece in done {
            owned.insert(piece);
        }
        self.queue_send(SenderCommand::Queue(Message::Bitfield(owned.to_wire())))
            .await
    }

    async fn on_message(&mut self, message: Message, wire_len: u64) -> Result<(), PeerError> {
        self.down_rate.update(wire_len);
        self.last_inbound = Instant::now();
        event!(Level::TRACE, message = ?MessageSummary(&message), "recv");

        match message {
            Message::KeepAlive => {}
            Message::Choke => {
                self.peer_choke = true;
                let blocks: Vec<BlockInfo> = self.block_queue.drain().collect();
                if !blocks.is_empty() {
                    self.piece_mgr_send(PieceManagerRequest::PutbackBlocks { blocks })
                        .await?;
                }
            }
            Message::Unchoke => {
                self.peer_choke = false;
                self.fill_blocks().await?;
            }
            Message::Interested => self.peer_interested = true,
            Message::NotInterested => self.peer_interested = false,
            Message::Have(piece) => {
                if !self.ctx.piece_map.contains(piece) {
                    return Err(PeerError::Protocol(format!(
                        "HAVE for unknown piece {piece}"
                    )));
                }
                self.peer_pieces.insert(piece);
                self.piece_mgr_send(PieceManagerRequest::PeerHave {
                    pieces: vec![piece],
                })
                .await?;
                self.consider_interest().await?;
            }
            Message::Bitfield(bytes) => {
                if !self.peer_pieces.is_empty() {
                    return Err(PeerError::Protocol(
                        "BITFIELD after availability already known".into(),
                    ));
                }
                self.peer_pieces =
                    PieceSet::from_wire(&bytes, self.ctx.piece_map.piece_count())
                        .map_err(|e| PeerError::Protocol(e.to_string()))?;
                let pieces: Vec<u32> = self.peer_pieces.iter().collect();
                if !pieces.is_empty() {
                    self.piece_mgr_send(PieceManagerRequest::PeerHave { pieces })
                        .await?;
                }
                self.consider_interest().await?;
            }
            Message::Request(block) => {
                if self.we_choke {
                    event!(Level::TRACE, "ignoring REQUEST while we choke");
                } else {
                    let data = self.read_block(block).await?;
                    self.queue_send(SenderCommand::Queue(Message::Piece(
                        block.piece,
                        block.offset,
                        data,
                    )))
                    .await?;
                }
            }
            Message::Piece(piece, offset, data) => {
                let block = BlockInfo::new(piece, offset, data.len() as u32);
                if self.block_queue.remove(&block) {
                    self.piece_mgr_send(PieceManagerRequest::StoreBlock { block, data })
                        .await?;
                    self.fill_blocks().await?;
                } else {
                    // Stray after a cancel or a rechoke.
                    event!(Level::TRACE, ?block, "ignoring unrequested PIECE");
                }
            }
            Message::Cancel(block) => self.queue_send(SenderCommand::Cancel(block)).await?,
            Message::Port(_) => {}
        }

        Ok(())
    }

    /// Returns `false` when the supervisor asked this peer to shut down.
    async fn on_command(&mut self, command: PeerCommand) -> Result<bool, PeerError> {
        match command {
            PeerCommand::PieceCompleted(piece) => {
                self.queue_send(SenderCommand::Queue(Message::Have(piece)))
                    .await?;
            }
            PeerCommand::Choke => {
                if !self.we_choke {
                    self.we_choke = true;
                    self.queue_send(SenderCommand::Choke).await?;
                }
            }
            PeerCommand::Unchoke => {
                if self.we_choke {
                    self.we_choke = false;
                    self.queue_send(SenderCommand::Queue(Message::Unchoke))
                        .await?;
                }
            }
            PeerCommand::CancelBlock(block) => {
                self.block_queue.remove(&block);
                self.queue_send(SenderCommand::PruneRequest(block)).await?;
            }
            PeerCommand::Shutdown => return Ok(false),
        }
        Ok(true)
    }

    async fn on_tick(&mut self) -> Result<(), PeerError> {
        let now = Instant::now();

        let idle = now.duration_since(self.last_inbound);
        let limit = Duration::from_secs(self.ctx.settings.inactivity_timeout_secs);
        if idle > limit {
            return Err(PeerError::Inactive(idle));
        }

        let up_bps = self.up_rate.extract_rate(now);
        let down_bps = self.down_rate.extract_rate(now);
        self.ctx
            .rate_register
            .publish(RateSample {
                peer: self.ctx.peer,
                up_bps,
                down_bps,
                peer_interested: self.peer_interested,
                seeder: self.peer_pieces.is_full(),
                peer_choking: self.peer_choke,
            })
            .await;
        self.ctx
            .status_register
            .publish(StatusUpdate {
                info_hash: self.ctx.info_hash,
                uploaded: self.up_rate.extract_count(),
                downloaded: self.down_rate.extract_count(),
            })
            .await;
        Ok(())
    }

    /// Asks the piece manager whether the peer's pieces hold anything we
    /// want, and announces interest transitions in both directions.
    async fn consider_interest(&mut self) -> Result<(), PeerError> {
        let (reply, rx) = oneshot::channel();
        self.piece_mgr_send(PieceManagerRequest::AskInterested {
            pieces: self.peer_pieces.clone(),
            reply,
        })
        .await?;
        let wanted = rx.await.map_err(|_| PeerError::ChannelClosed)?;

        if wanted && !self.we_interested {
            self.we_interested = true;
            self.queue_send(SenderCommand::Queue(Message::Interested))
                .await?;
        } else if !wanted && self.we_interested {
            self.we_interested = false;
            self.queue_send(SenderCommand::Queue(Message::NotInterested))
                .await?;
        }
        Ok(())
    }

    async fn fill_blocks(&mut self) -> Result<(), PeerError> {
        if self.peer_choke {
            return Ok(());
        }
        self.check_watermark().await
    }

    /// Refills the request pipeline once it drains below the low mark. The
    /// hysteresis amortizes the synchronous piece-manager dialogue; endgame
    /// lowers the mark to one.
    async fn check_watermark(&mut self) -> Result<(), PeerError> {
        let lo = if self.endgame { ENDGAME_LO_MARK } else { LO_MARK };
        let outstanding = self.block_queue.len();
        if outstanding >= lo {
            return Ok(());
        }

        let (reply, rx) = oneshot::channel();
        self.piece_mgr_send(PieceManagerRequest::GrabBlocks {
            max: HI_MARK - outstanding,
            pieces: self.peer_pieces.clone(),
            reply,
        })
        .await?;
        let blocks = match rx.await.map_err(|_| PeerError::ChannelClosed)? {
            BlockGrant::Leech(blocks) => blocks,
            BlockGrant::Endgame(blocks) => {
                self.endgame = true;
                blocks
            }
        };

        for block in blocks {
            if self.block_queue.insert(block) {
                self.queue_send(SenderCommand::Queue(Message::Request(block)))
                    .await?;
            }
        }
        Ok(())
    }

    async fn read_block(&mut self, block: BlockInfo) -> Result<Vec<u8>, PeerError> {
        let (reply, rx) = oneshot::channel();
        self.ctx
            .fs
            .send(FsRequest::ReadBlock { block, reply })
            .await
            .map_err(|_| PeerError::ChannelClosed)?;
        rx.await.map_err(|_| PeerError::ChannelClosed)
    }

    /// Runs on every exit path so global availability stays accurate:
    /// outstanding blocks go back to the piece manager, the peer's
    /// availability is bulk-revoked, and the peer manager learns about the
    /// disconnect.
    async fn cleanup(&mut self) {
        let blocks: Vec<BlockInfo> = self.block_queue.drain().collect();
        if !blocks.is_empty() {
            let _ = self
                .ctx
                .piece_mgr
                .send(PieceManagerRequest::PutbackBlocks { blocks })
                .await;
        }
        let pieces: Vec<u32> = self.peer_pieces.iter().collect();
        if !pieces.is_empty() {
            let _ = self
                .ctx
                .piece_mgr
                .send(PieceManagerRequest::PeerUnhave { pieces })
                .await;
        }
        let _ = self
            .ctx
            .peer_mgr
            .send(PeerManagerEvent::Disconnect {
                peer: self.ctx.peer,
            })
            .await;
    }

    async fn piece_mgr_send(&self, request: PieceManagerRequest) -> Result<(), PeerError> {
        self.ctx
            .piece_mgr
            .send(request)
            .await
            .map_err(|_| PeerError::ChannelClosed)
    }

    async fn queue_send(&self, command: SenderCommand) -> Result<(), PeerError> {
        self.queue_tx
            .send(command)
            .await
            .map_err(|_| PeerError::ChannelClosed)
    }
}

/// A live peer as seen by the host application.
pub struct PeerHandle {
    pub peer: PeerId,
    /// Directives from the peer manager and choke manager.
    pub control: mpsc::Sender<PeerCommand>,
    /// Upload-budget grants from the choke manager.
    pub grants: mpsc::Sender<u64>,
    pub task: JoinHandle<Result<(), PeerError>>,
}

/// Wires up the four actors for one handshaken peer connection and spawns
/// them. The returned handle owns the control and grant channels; the
/// controller announces itself to the peer manager with the same control
/// sender.
pub fn spawn_peer<S>(stream: S, ctx: ControllerCtx) -> PeerHandle
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let peer = ctx.peer;
    let settings = ctx.settings.clone();
    let (read_half, write_half) = tokio::io::split(stream);

    let (inbound_tx, inbound_rx) = mpsc::channel(settings.inbound_queue_depth);
    let (queue_tx, queue_rx) = mpsc::channel(settings.outbound_queue_depth);
    let (out_tx, out_rx) = mpsc::channel(1);
    let (written_tx, written_rx) = mpsc::channel(16);
    let (sample_tx, sample_rx) = mpsc::channel(16);
    let (grant_tx, grant_rx) = mpsc::channel(16);
    let (control_tx, control_rx) = mpsc::channel(16);
    let (shutdown_tx, _) = broadcast::channel(1);

    tokio::spawn(receiver_task(
        read_half,
        inbound_tx,
        shutdown_tx.subscribe(),
    ));
    tokio::spawn(sender_task(
        write_half,
        out_rx,
        written_tx,
        sample_tx,
        shutdown_tx.subscribe(),
    ));
    tokio::spawn(
        SenderQueue::new(
            queue_rx,
            written_rx,
            grant_rx,
            out_tx,
            settings.upload_budget_bytes,
            Duration::from_secs(settings.keepalive_interval_secs),
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    let controller = Controller::new(ctx, inbound_rx, control_rx, sample_rx, queue_tx, shutdown_tx);
    let task = tokio::spawn(controller.run(control_tx.clone()));

    PeerHandle {
        peer,
        control: control_tx,
        grants: grant_tx,
        task,
    }
}
