// SPDX-FileCopyrightText: 2025 The swarmwire Contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{event, Level};

use super::protocol::{self, Message};

/// Reads the socket, reframes the byte stream into typed messages and hands
/// each to the controller together with its on-wire byte count.
///
/// Framing errors are fatal for the peer: the task logs and returns, which
/// closes the inbound channel and tears the controller down. No
/// protocol-level validation happens here.
pub(crate) async fn receiver_task<R>(
    mut read_half: R,
    inbound_tx: mpsc::Sender<(Message, u64)>,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    // 16KiB block plus framing overhead per socket read.
    let mut socket_buf = vec![0u8; 16384 + 1024];
    // Holds partial frames across reads.
    let mut pending = Vec::with_capacity(65536);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                event!(Level::TRACE, "receiver shutting down");
                return;
            }

            read = read_half.read(&mut socket_buf) => {
                match read {
                    Ok(0) => return,
                    Ok(n) => {
                        pending.extend_from_slice(&socket_buf[..n]);
                        loop {
                            match protocol::decode(&pending) {
                                Ok(Some((message, wire_len))) => {
                                    if inbound_tx.send((message, wire_len as u64)).await.is_err() {
                                        // Controller is gone.
                                        return;
                                    }
                                    pending.drain(..wire_len);
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    event!(Level::ERROR, "framing error: {}", e);
                                    return;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        event!(Level::DEBUG, "socket read failed: {}", e);
                        return;
                    }
                }
            }
        }
    }
}
