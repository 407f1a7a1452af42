//! Connection registry and flooding broadcast.
//!
//! The relay is an actor: a cloneable [`Relay`] handle sends commands over
//! a channel to a task that owns all mutable state (the registry map, the
//! id counter, the stop flag). Registration, removal, forwarding, and
//! iteration are serialized by the actor loop, so no lock discipline is
//! needed at call sites.
//!
//! Forwarding floods each first-seen message to every registered
//! connection except the one it arrived from. A failure to hand a frame to
//! one peer schedules that peer for cleanup and never affects the others.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cipher;
use crate::dedup::{self, SeenMessages};
use crate::error::RelayError;
use crate::frame::Frame;
use crate::keyex::{self, SessionKey};
use crate::peer::{self, BoxedReader, BoxedWriter, PeerConnection, PeerId, PeerState};

/// Command channel depth between handles and the actor.
const COMMAND_QUEUE_DEPTH: usize = 256;

/// Delivery channel depth toward the application layer.
const DELIVERY_QUEUE_DEPTH: usize = 256;

/// A decrypted message surfaced to the application layer.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Connection the message arrived on.
    pub from: PeerId,
    /// Label of that connection (as given to `attach`).
    pub sender: String,
    pub text: String,
}

enum Command {
    Register {
        label: String,
        key: SessionKey,
        reader: BoxedReader,
        writer: BoxedWriter,
        reply: oneshot::Sender<Result<PeerId, RelayError>>,
    },
    Unregister {
        id: PeerId,
    },
    Forward {
        msg_id: String,
        ciphertext: String,
        from: PeerId,
    },
    Broadcast {
        plaintext: String,
        reply: oneshot::Sender<Result<String, RelayError>>,
    },
    Peers {
        reply: oneshot::Sender<Vec<(PeerId, String)>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Public handle to the relay actor. Cheap to clone; all clones address
/// the same registry.
#[derive(Clone)]
pub struct Relay {
    cmd_tx: mpsc::Sender<Command>,
}

impl Relay {
    /// Start a relay and return its handle plus the single receiver for
    /// decrypted deliveries. The receiver closes once the relay has shut
    /// down and every connection task has exited.
    pub fn spawn() -> (Self, mpsc::Receiver<Delivery>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (delivery_tx, delivery_rx) = mpsc::channel(DELIVERY_QUEUE_DEPTH);

        let actor = RelayActor {
            cmd_tx: cmd_tx.clone(),
            deliveries: delivery_tx,
            seen: Arc::new(SeenMessages::new()),
            registry: HashMap::new(),
            next_id: 0,
            shutting_down: false,
        };
        tokio::spawn(actor.run(cmd_rx));

        (Self { cmd_tx }, delivery_rx)
    }

    /// Negotiate a session key on a raw stream, then register the
    /// connection and start its read/write tasks.
    ///
    /// A negotiation failure abandons the attempt: the stream is dropped
    /// and nothing is registered.
    pub async fn attach<S>(
        &self,
        mut stream: S,
        label: impl Into<String>,
    ) -> Result<PeerId, RelayError>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let label = label.into();
        debug!(peer = %label, state = ?PeerState::Negotiating, "key agreement started");
        let key = keyex::negotiate(&mut stream).await?;

        let (reader, writer) = tokio::io::split(stream);
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Register {
                label,
                key,
                reader: Box::new(reader),
                writer: Box::new(writer),
                reply: tx,
            })
            .await
            .map_err(|_| RelayError::Closed)?;
        rx.await.map_err(|_| RelayError::Closed)?
    }

    /// Flood a message that arrived on `from` to every other registered
    /// connection, re-sending the original ciphertext unchanged.
    pub async fn forward(&self, msg_id: String, ciphertext: String, from: PeerId) {
        let _ = self
            .cmd_tx
            .send(Command::Forward {
                msg_id,
                ciphertext,
                from,
            })
            .await;
    }

    /// Originate a message locally: derive a fresh id, encrypt once per
    /// destination under that connection's session key, and send to all.
    /// Returns the generated message id.
    pub async fn broadcast(&self, text: impl Into<String>) -> Result<String, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Broadcast {
                plaintext: text.into(),
                reply: tx,
            })
            .await
            .map_err(|_| RelayError::Closed)?;
        rx.await.map_err(|_| RelayError::Closed)?
    }

    /// Snapshot of the registered connections.
    pub async fn peers(&self) -> Vec<(PeerId, String)> {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Peers { reply: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Stop accepting work, close every registered connection (unblocking
    /// their reads), and stop the actor. Returns once the registry is
    /// empty. Calling this more than once is harmless.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::Shutdown { reply: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Schedule a connection for cleanup. Idempotent.
    pub(crate) async fn unregister(&self, id: PeerId) {
        let _ = self.cmd_tx.send(Command::Unregister { id }).await;
    }
}

struct RelayActor {
    cmd_tx: mpsc::Sender<Command>,
    deliveries: mpsc::Sender<Delivery>,
    seen: Arc<SeenMessages>,
    registry: HashMap<PeerId, PeerConnection>,
    next_id: u64,
    shutting_down: bool,
}

impl RelayActor {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = cmd_rx.recv().await {
            match cmd {
                Command::Register {
                    label,
                    key,
                    reader,
                    writer,
                    reply,
                } => {
                    let _ = reply.send(self.register(label, key, reader, writer));
                }
                Command::Unregister { id } => self.cleanup(id),
                Command::Forward {
                    msg_id,
                    ciphertext,
                    from,
                } => self.forward(&msg_id, &ciphertext, from),
                Command::Broadcast { plaintext, reply } => {
                    let _ = reply.send(self.broadcast(&plaintext));
                }
                Command::Peers { reply } => {
                    let peers = self
                        .registry
                        .iter()
                        .map(|(&id, conn)| (id, conn.label.clone()))
                        .collect();
                    let _ = reply.send(peers);
                }
                Command::Shutdown { reply } => {
                    self.shutdown_all();
                    let _ = reply.send(());
                    break;
                }
            }
        }
        debug!("relay actor stopped");
    }

    fn register(
        &mut self,
        label: String,
        key: SessionKey,
        reader: BoxedReader,
        writer: BoxedWriter,
    ) -> Result<PeerId, RelayError> {
        if self.shutting_down {
            return Err(RelayError::Closed);
        }

        let id = PeerId(self.next_id);
        self.next_id += 1;

        let (out_tx, out_rx) = mpsc::channel(peer::OUTBOUND_QUEUE_DEPTH);
        let cancel = CancellationToken::new();
        let handle = Relay {
            cmd_tx: self.cmd_tx.clone(),
        };

        peer::spawn_writer(id, label.clone(), writer, out_rx, handle.clone());
        peer::spawn_reader(
            id,
            label.clone(),
            reader,
            key,
            self.seen.clone(),
            handle,
            self.deliveries.clone(),
            cancel.clone(),
        );

        info!(%id, peer = %label, state = ?PeerState::Active, "peer registered");
        self.registry.insert(
            id,
            PeerConnection {
                label,
                key,
                outbound: out_tx,
                cancel,
                state: PeerState::Active,
            },
        );
        Ok(id)
    }

    /// Remove a connection and close it. A second call for the same id
    /// finds nothing and is a no-op.
    fn cleanup(&mut self, id: PeerId) {
        if let Some(mut conn) = self.registry.remove(&id) {
            conn.close();
            info!(%id, peer = %conn.label, state = ?conn.state, "peer removed");
        }
    }

    fn forward(&mut self, msg_id: &str, ciphertext: &str, from: PeerId) {
        let line = Frame::new(msg_id, ciphertext).encode();
        let failed = self.send_to_peers(&|_| line.clone(), Some(from));
        for id in failed {
            self.cleanup(id);
        }
    }

    fn broadcast(&mut self, plaintext: &str) -> Result<String, RelayError> {
        if self.shutting_down {
            return Err(RelayError::Closed);
        }

        let msg_id = dedup::message_id(plaintext.as_bytes());
        // Each connection has its own session key, so the ciphertext is
        // necessarily per-destination.
        let failed = self.send_to_peers(
            &|conn| {
                let ciphertext = cipher::encrypt(plaintext.as_bytes(), &conn.key);
                Frame::new(msg_id.as_str(), ciphertext).encode()
            },
            None,
        );
        for id in failed {
            self.cleanup(id);
        }
        Ok(msg_id)
    }

    /// Enqueue one frame per registered connection, skipping `exclude`.
    /// Returns the peers whose outbound queue has closed; a full queue
    /// drops the frame for that peer only.
    fn send_to_peers(
        &self,
        make_line: &dyn Fn(&PeerConnection) -> String,
        exclude: Option<PeerId>,
    ) -> Vec<PeerId> {
        let mut failed = Vec::new();
        for (&id, conn) in &self.registry {
            if exclude == Some(id) {
                continue;
            }
            match conn.outbound.try_send(make_line(conn)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!(%id, peer = %conn.label, "outbound queue full, dropping frame");
                }
                Err(TrySendError::Closed(_)) => failed.push(id),
            }
        }
        failed
    }

    fn shutdown_all(&mut self) {
        self.shutting_down = true;
        info!(peers = self.registry.len(), "relay shutting down");
        for (id, mut conn) in self.registry.drain() {
            conn.close();
            debug!(%id, peer = %conn.label, "connection closed");
        }
    }
}
