//! Failure taxonomy for the relay core.
//!
//! Errors are scoped to one connection unless stated otherwise: a
//! negotiation failure abandons that connection attempt, a frame or crypto
//! failure drops a single message, and a transport failure ends that
//! connection's read loop. Nothing here is fatal to the process; startup
//! failures are handled at the binary boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// Key agreement failed before the connection became active.
    /// Covers I/O errors and malformed public values during the exchange.
    #[error("key agreement failed: {0}")]
    Negotiation(String),

    /// An inbound frame did not match the `<id>:<ciphertext>` shape,
    /// or violated the framing size cap.
    #[error("malformed frame: {0}")]
    FrameFormat(String),

    /// Encryption or decryption of a single message failed.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// The underlying stream failed.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The relay has shut down and accepts no further work.
    #[error("relay is closed")]
    Closed,
}
