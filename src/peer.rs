//! Per-connection state and I/O tasks.
//!
//! Each registered connection owns two tasks: a reader that blocks on the
//! next inbound frame, and a writer that drains a bounded outbound queue so
//! that writes to one stream never interleave and a slow peer stalls only
//! itself. Cleanup funnels through the relay actor and is idempotent.

use std::fmt;
use std::io::ErrorKind;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::cipher;
use crate::dedup::SeenMessages;
use crate::error::RelayError;
use crate::frame::{self, Frame};
use crate::keyex::SessionKey;
use crate::relay::{Delivery, Relay};

/// Opaque handle for a registered connection, assigned by the relay actor.
/// Deliberately not derived from any transport address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct PeerId(pub(crate) u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Connection lifecycle. `Negotiating` covers the public-value exchange,
/// before the connection is registered; `Closed` is terminal.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PeerState {
    Negotiating,
    Active,
    Closed,
}

/// Depth of each connection's outbound queue. When a peer falls this far
/// behind, further frames to it are dropped with a warning.
pub const OUTBOUND_QUEUE_DEPTH: usize = 64;

pub(crate) type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Registry entry owned by the relay actor.
pub(crate) struct PeerConnection {
    pub label: String,
    pub key: SessionKey,
    pub outbound: mpsc::Sender<String>,
    pub cancel: CancellationToken,
    pub state: PeerState,
}

impl PeerConnection {
    /// Transition to `Closed` and unblock the reader. Safe to call more
    /// than once; the token and the state change are both idempotent.
    pub fn close(&mut self) {
        if self.state != PeerState::Closed {
            self.state = PeerState::Closed;
            self.cancel.cancel();
        }
    }
}

/// Drain the outbound queue onto the stream's write half.
///
/// Ends when the queue closes (connection removed from the registry) or a
/// write fails, in which case the peer is scheduled for cleanup.
pub(crate) fn spawn_writer(
    id: PeerId,
    label: String,
    mut writer: BoxedWriter,
    mut outbound: mpsc::Receiver<String>,
    relay: Relay,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = outbound.recv().await {
            if let Err(e) = frame::write_frame(&mut writer, &line).await {
                warn!(%id, peer = %label, error = %e, "write failed, closing connection");
                relay.unregister(id).await;
                break;
            }
        }
        let _ = writer.shutdown().await;
        trace!(%id, peer = %label, "writer finished");
    })
}

/// Run the connection's read loop until error, peer close, or cancellation,
/// then trigger cleanup.
///
/// Per frame: parse, dedup, decrypt, deliver locally, hand the original
/// id/ciphertext to the relay for flooding. Malformed frames and
/// undecryptable messages are dropped with a log line and the loop
/// continues; only I/O failures end the connection.
pub(crate) fn spawn_reader(
    id: PeerId,
    label: String,
    mut reader: BoxedReader,
    key: SessionKey,
    seen: Arc<SeenMessages>,
    relay: Relay,
    deliveries: mpsc::Sender<Delivery>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                result = frame::read_frame(&mut reader) => match result {
                    Ok(line) => line,
                    Err(RelayError::Transport(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                        info!(%id, peer = %label, "peer disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(%id, peer = %label, error = %e, "read failed");
                        break;
                    }
                },
            };

            let frame = match Frame::parse(&line) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(%id, peer = %label, error = %e, "discarding malformed frame");
                    continue;
                }
            };

            if seen.mark_and_check(&frame.id) {
                trace!(%id, peer = %label, msg_id = %frame.id, "duplicate suppressed");
                continue;
            }

            let plaintext = match cipher::decrypt(&frame.ciphertext, &key) {
                Ok(plaintext) => plaintext,
                Err(e) => {
                    warn!(%id, peer = %label, error = %e, "dropping undecryptable message");
                    continue;
                }
            };

            let delivery = Delivery {
                from: id,
                sender: label.clone(),
                text: String::from_utf8_lossy(&plaintext).into_owned(),
            };
            if deliveries.send(delivery).await.is_err() {
                debug!(%id, "delivery receiver gone, still relaying");
            }

            relay.forward(frame.id, frame.ciphertext, id).await;
        }

        relay.unregister(id).await;
    })
}
