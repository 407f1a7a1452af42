//! # Meshchat - Encrypted Multi-Peer Chat Relay
//!
//! Meshchat connects peers over ordered, reliable byte streams and floods
//! chat messages across the resulting mesh:
//!
//! - **Key agreement**: one ephemeral Diffie-Hellman exchange per
//!   connection derives a 16-byte AES session key; nothing secret crosses
//!   the wire
//! - **Per-link confidentiality**: AES-128-CBC with a fresh IV per message
//! - **Flooding**: every first-seen message is forwarded to all connected
//!   peers except the one it arrived from
//! - **Deduplication**: message identities (SHA-256 over plaintext and
//!   origination time) give at-most-once delivery per send event
//!
//! ## Architecture
//!
//! The relay uses the **Actor Pattern** for its shared state:
//! - [`Relay`] is a cheap-to-clone handle communicating over an async
//!   command channel
//! - The actor owns the connection registry and processes commands
//!   sequentially; no locks at call sites
//! - Each connection runs one reader task and one writer task; writer
//!   queues are bounded and independent, so a slow peer stalls only itself
//!
//! The core is transport-agnostic: anything `AsyncRead + AsyncWrite` can
//! be attached, from TCP sockets to in-memory duplex pairs in tests.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|--------|
//! | `relay` | Registry actor: attach, flood-forward, broadcast, shutdown |
//! | `peer` | Per-connection state machine and I/O tasks |
//! | `keyex` | Ephemeral Diffie-Hellman session key agreement |
//! | `cipher` | AES-CBC message encryption/decryption |
//! | `frame` | `<id>:<base64ct>` wire frames and length-prefixed I/O |
//! | `dedup` | Message identity derivation and the seen-id set |
//! | `error` | Failure taxonomy |
//!
//! ## Security Model
//!
//! - Confidentiality is per link; there is no end-to-end layer on top
//! - The exchange is unauthenticated: whoever holds the other end of an
//!   attached stream is trusted by construction
//! - The seen-id set grows for the process lifetime (no eviction)

mod cipher;
mod dedup;
mod error;
mod frame;
mod keyex;
mod peer;
mod relay;

pub use cipher::{decrypt, encrypt};
pub use dedup::{message_id, SeenMessages};
pub use error::RelayError;
pub use frame::{read_frame, write_frame, Frame, MAX_FRAME_BYTES};
pub use keyex::{negotiate, SessionKey, SESSION_KEY_LEN};
pub use peer::{PeerId, PeerState};
pub use relay::{Delivery, Relay};
