//! Symmetric codec for message payloads.
//!
//! AES-128-CBC with PKCS#7 padding. Every encrypt call draws a fresh
//! 16-byte IV from the OS random source and prepends it to the raw
//! ciphertext; the whole blob is base64-armored for the text frame.
//! Encryption is therefore non-deterministic by construction, which CBC
//! requires; nothing relies on stable ciphertexts.
//!
//! A decrypt failure is a single-message event: the caller drops the
//! message and keeps the connection.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::RelayError;
use crate::keyex::SessionKey;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// CBC initialization vector size, prepended to every ciphertext.
pub const IV_LEN: usize = 16;

/// Encrypt a plaintext under the given session key.
///
/// Returns `base64(iv || ciphertext)`, ready to be framed.
pub fn encrypt(plaintext: &[u8], key: &SessionKey) -> String {
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);

    let ciphertext = Aes128CbcEnc::new(&(*key.as_bytes()).into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    BASE64.encode(blob)
}

/// Reverse [`encrypt`]: base64-decode, split off the IV, decrypt the rest.
pub fn decrypt(armored: &str, key: &SessionKey) -> Result<Vec<u8>, RelayError> {
    let blob = BASE64
        .decode(armored)
        .map_err(|e| RelayError::Crypto(format!("invalid base64: {e}")))?;

    if blob.len() < IV_LEN {
        return Err(RelayError::Crypto("ciphertext shorter than IV".into()));
    }

    let (iv, ciphertext) = blob.split_at(IV_LEN);
    let iv: [u8; IV_LEN] = iv.try_into().expect("split length checked");

    Aes128CbcDec::new(&(*key.as_bytes()).into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| RelayError::Crypto("padding check failed (wrong key or corrupt data)".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SessionKey {
        SessionKey::from_bytes([byte; 16])
    }

    #[test]
    fn round_trip() {
        let k = key(0x42);
        for plaintext in [
            b"".as_slice(),
            b"x".as_slice(),
            b"hello world".as_slice(),
            &[0u8; 16],
            &[0xFFu8; 1000],
        ] {
            let blob = encrypt(plaintext, &k);
            assert_eq!(decrypt(&blob, &k).unwrap(), plaintext);
        }
    }

    #[test]
    fn fresh_iv_every_call() {
        let k = key(0x42);
        let first = encrypt(b"same message", &k);
        let second = encrypt(b"same message", &k);
        assert_ne!(first, second);
        assert_eq!(decrypt(&first, &k).unwrap(), b"same message");
        assert_eq!(decrypt(&second, &k).unwrap(), b"same message");
    }

    #[test]
    fn wrong_key_fails() {
        let blob = encrypt(b"secret", &key(0x01));
        assert!(matches!(
            decrypt(&blob, &key(0x02)),
            Err(RelayError::Crypto(_))
        ));
    }

    #[test]
    fn garbage_input_fails() {
        let k = key(0x42);
        assert!(decrypt("not base64 at all!!!", &k).is_err());
        assert!(decrypt("", &k).is_err());
        // Valid base64, but shorter than an IV.
        assert!(decrypt(&BASE64.encode(b"short"), &k).is_err());
    }

    #[test]
    fn truncated_ciphertext_fails() {
        let k = key(0x42);
        let blob = encrypt(b"a message long enough to span blocks......", &k);
        let mut raw = BASE64.decode(&blob).unwrap();
        raw.truncate(raw.len() - 8);
        assert!(decrypt(&BASE64.encode(raw), &k).is_err());
    }
}
