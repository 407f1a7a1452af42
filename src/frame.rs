//! Wire framing.
//!
//! One frame carries exactly one message as UTF-8 text of the form
//! `<id>:<base64Ciphertext>`. The id is base64 of a SHA-256 digest and can
//! never contain `:`, so splitting on the first `:` is unambiguous.
//!
//! Frames travel as u32 little-endian length-prefixed chunks. The same
//! chunk helpers carry the handshake public values, with a smaller cap.
//! Length caps are enforced before any allocation.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RelayError;

/// Maximum size of one message frame on the wire.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Maximum size of a handshake public value chunk.
pub(crate) const MAX_HANDSHAKE_BYTES: usize = 1024;

/// One parsed wire frame: message identity plus armored ciphertext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: String,
    pub ciphertext: String,
}

impl Frame {
    pub fn new(id: impl Into<String>, ciphertext: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ciphertext: ciphertext.into(),
        }
    }

    /// Split a frame line on the first `:`.
    pub fn parse(line: &str) -> Result<Self, RelayError> {
        let (id, ciphertext) = line
            .split_once(':')
            .ok_or_else(|| RelayError::FrameFormat("missing ':' separator".into()))?;
        if id.is_empty() {
            return Err(RelayError::FrameFormat("empty message id".into()));
        }
        Ok(Self {
            id: id.to_string(),
            ciphertext: ciphertext.to_string(),
        })
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.id, self.ciphertext)
    }
}

/// Write one length-prefixed chunk and flush it.
pub(crate) async fn write_chunk<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), RelayError> {
    let len = data.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed chunk, rejecting oversized lengths before
/// allocating.
pub(crate) async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut R,
    max: usize,
) -> Result<Vec<u8>, RelayError> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > max {
        return Err(RelayError::FrameFormat(format!(
            "chunk of {len} bytes exceeds cap of {max}"
        )));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

/// Write one message frame as a single atomic unit.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    line: &str,
) -> Result<(), RelayError> {
    write_chunk(writer, line.as_bytes()).await
}

/// Read the next message frame as UTF-8 text.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, RelayError> {
    let bytes = read_chunk(reader, MAX_FRAME_BYTES).await?;
    String::from_utf8(bytes).map_err(|_| RelayError::FrameFormat("frame is not UTF-8".into()))
}
