//! Cache fingerprints.

use std::fmt;

use sha2::{Digest, Sha256};

/// SHA-256 digest identifying one cacheable (query, model, persona) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Hash the normalized query with the model and persona identifiers.
    ///
    /// Each field is length-prefixed so distinct triples never share input bytes.
    pub fn compute(query: &str, model: &str, persona: &str) -> Self {
        let query = normalize_query(query);
        let mut hasher = Sha256::new();
        hasher.update(b"burrow-cache-v1");
        for field in [query.as_str(), model, persona] {
            hasher.update((field.len() as u64).to_be_bytes());
            hasher.update(field.as_bytes());
        }
        Self(hasher.finalize().into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Lower-case and collapse whitespace so trivially different spellings share a key.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
