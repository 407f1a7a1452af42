//! Message identity and duplicate suppression.
//!
//! A message id binds a plaintext to its origination instant: the same text
//! sent twice gets two distinct ids and is delivered twice. Deduplication
//! exists to suppress redundant copies of one send event arriving over
//! multiple relay hops, not to collapse repeated user messages.
//!
//! The seen-set grows for the lifetime of the process; there is no expiry.
//! This is a known resource-growth characteristic of the flood design.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use sha2::{Digest, Sha256};

/// Derive the identity for a plaintext being sent now.
///
/// `base64(SHA-256(plaintext ++ decimal_millis))`. Base64 of a digest
/// never contains `:`, which the wire framing relies on.
pub fn message_id(plaintext: &[u8]) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();

    let mut hasher = Sha256::new();
    hasher.update(plaintext);
    hasher.update(millis.to_string().as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Process-wide set of message ids that have already been handled.
///
/// Safe to share across connection read loops; every mutation happens under
/// one lock held only for the insert.
#[derive(Debug, Default)]
pub struct SeenMessages {
    inner: Mutex<HashSet<String>>,
}

impl SeenMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically insert `id` if absent and report whether it was already
    /// present. Returns `true` exactly when the message must be dropped.
    pub fn mark_and_check(&self, id: &str) -> bool {
        let mut seen = self.inner.lock().expect("seen-set lock poisoned");
        !seen.insert(id.to_string())
    }

    /// Number of distinct ids recorded so far.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("seen-set lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn first_occurrence_is_new_then_seen() {
        let seen = SeenMessages::new();
        assert!(!seen.mark_and_check("a"));
        assert!(seen.mark_and_check("a"));
        assert!(seen.mark_and_check("a"));
        assert!(!seen.mark_and_check("b"));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn concurrent_marks_admit_exactly_one_winner() {
        let seen = Arc::new(SeenMessages::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let seen = seen.clone();
            handles.push(std::thread::spawn(move || {
                let mut fresh = 0;
                for i in 0..100 {
                    if !seen.mark_and_check(&format!("msg-{i}")) {
                        fresh += 1;
                    }
                }
                fresh
            }));
        }
        let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // Each of the 100 ids is fresh for exactly one thread.
        assert_eq!(total, 100);
        assert_eq!(seen.len(), 100);
    }

    #[test]
    fn id_contains_no_separator() {
        let id = message_id(b"hello world");
        assert!(!id.contains(':'));
        // SHA-256 digest in base64: 44 chars including padding.
        assert_eq!(id.len(), 44);
    }

    #[test]
    fn identical_text_at_different_instants_gets_distinct_ids() {
        let first = message_id(b"hello");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = message_id(b"hello");
        assert_ne!(first, second);
    }
}
