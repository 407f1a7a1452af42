//! Ephemeral Diffie–Hellman key agreement.
//!
//! Both endpoints of a freshly opened stream run the identical procedure:
//! generate an ephemeral key pair over the 2048-bit MODP group (RFC 3526
//! group 14), write the public value, read the peer's public value, and
//! compute the shared secret locally. Write-then-read on both ends cannot
//! deadlock because the two directions of the stream are buffered
//! independently.
//!
//! The shared secret, serialized big-endian at the fixed 256-byte group
//! width, is truncated to its first 16 bytes to form the AES-128 session
//! key. The exchange is unauthenticated: the peer on the other end of the
//! stream is trusted by construction.

use std::fmt;
use std::sync::LazyLock;

use num_bigint::BigUint;
use num_traits::One;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::RelayError;
use crate::frame::{read_chunk, write_chunk, MAX_HANDSHAKE_BYTES};

/// Session key length: AES-128.
pub const SESSION_KEY_LEN: usize = 16;

/// Width of the group in bytes; public values and shared secrets are at
/// most this long.
const GROUP_BYTES: usize = 256;

/// Secret exponent length. 256-bit exponents in a 2048-bit group.
const SECRET_BYTES: usize = 32;

/// RFC 3526 group 14: 2048-bit MODP prime, generator 2.
const MODP_2048_HEX: &str = concat!(
    "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74",
    "020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F1437",
    "4FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
    "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF05",
    "98DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB",
    "9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
    "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF695581718",
    "3995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF",
);

static PRIME: LazyLock<BigUint> = LazyLock::new(|| {
    BigUint::parse_bytes(MODP_2048_HEX.as_bytes(), 16).expect("group prime constant is valid hex")
});

static GENERATOR: LazyLock<BigUint> = LazyLock::new(|| BigUint::from(2u8));

/// Symmetric key for one connection, fixed for its lifetime.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key material stays out of logs.
        f.write_str("SessionKey(..)")
    }
}

struct Ephemeral {
    secret: BigUint,
    public: BigUint,
}

fn generate_ephemeral() -> Ephemeral {
    let secret = random_secret();
    let public = GENERATOR.modpow(&secret, &PRIME);
    Ephemeral { secret, public }
}

/// Draw a random secret exponent greater than one.
fn random_secret() -> BigUint {
    loop {
        let mut raw = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut raw);
        let candidate = BigUint::from_bytes_be(&raw);
        if candidate > BigUint::one() {
            return candidate;
        }
    }
}

/// Reject public values outside the open interval (1, p-1).
fn validate_public(value: &BigUint) -> Result<(), RelayError> {
    let p_minus_one = &*PRIME - BigUint::one();
    if value <= &BigUint::one() || value >= &p_minus_one {
        return Err(RelayError::Negotiation(
            "peer public value out of range".into(),
        ));
    }
    Ok(())
}

/// Truncate the shared secret to the session key.
///
/// The secret is taken at the fixed group width, left-padded with zeros,
/// and its first 16 bytes become the key. Both sides compute the same
/// secret, so both derive the same key.
fn derive_key(shared: &BigUint) -> SessionKey {
    let raw = shared.to_bytes_be();
    let mut padded = [0u8; GROUP_BYTES];
    padded[GROUP_BYTES - raw.len()..].copy_from_slice(&raw);

    let mut key = [0u8; SESSION_KEY_LEN];
    key.copy_from_slice(&padded[..SESSION_KEY_LEN]);
    SessionKey(key)
}

fn shared_key(ours: &Ephemeral, peer_public: &BigUint) -> Result<SessionKey, RelayError> {
    validate_public(peer_public)?;
    Ok(derive_key(&peer_public.modpow(&ours.secret, &PRIME)))
}

/// Run the key agreement over a raw stream.
///
/// Any failure here abandons the connection attempt: no session key is
/// retained and the connection is never registered.
pub async fn negotiate<S>(stream: &mut S) -> Result<SessionKey, RelayError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ours = generate_ephemeral();

    write_chunk(stream, &ours.public.to_bytes_be())
        .await
        .map_err(|e| RelayError::Negotiation(format!("sending public value: {e}")))?;

    let raw = read_chunk(stream, MAX_HANDSHAKE_BYTES)
        .await
        .map_err(|e| RelayError::Negotiation(format!("reading peer public value: {e}")))?;

    let peer_public = BigUint::from_bytes_be(&raw);
    shared_key(&ours, &peer_public)
}
