// SPDX-FileCopyrightText: 2025 The swarmwire Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{event, Level};

use super::protocol::{self, Message};

/// Writes messages handed over by the sender queue, one at a time, and
/// reports the bytes actually written: to the queue for budget accounting and
/// to the controller as upload rate samples.
///
/// Any write failure is fatal for the peer; the task returns, the channels
/// close, and the rest of the engine unwinds.
pub(crate) async fn sender_task<W>(
    mut write_half: W,
    mut out_rx: mpsc::Receiver<Message>,
    written_tx: mpsc::Sender<u64>,
    sample_tx: mpsc::Sender<u64>,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    W: AsyncWrite + Unpin + Send + 'static,
{
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                event!(Level::TRACE, "sender shutting down");
                return;
            }

            message = out_rx.recv() => {
                let Some(message) = message else { return };
                let bytes = match protocol::encode(&message) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        event!(Level::ERROR, "failed to frame message: {}", e);
                        return;
                    }
                };
                if let Err(e) = write_half.write_all(&bytes).await {
                    event!(Level::DEBUG, "socket write failed: {}", e);
                    return;
                }
                let n = bytes.len() as u64;
                if written_tx.send(n).await.is_err() || sample_tx.send(n).await.is_err() {
                    return;
                }
            }
        }
    }
}
