use sha2::Digest;

use super::sha256_value::Sha256Value;
use crate::errors::ReplicationError;

/// Incrementally hashes a blob as it streams past and checks it against the
/// digest it was addressed by. Only `sha256:` digests are checked, any other
/// algorithm passes through unverified.
pub struct DigestVerifier {
    expected: String,
    hasher: Option<sha2::Sha256>,
    bytes: u64,
}

impl DigestVerifier {
    pub fn new(expected: &str) -> DigestVerifier {
        let hasher = if expected.starts_with("sha256:") {
            Some(sha2::Sha256::new())
        } else {
            None
        };
        DigestVerifier {
            expected: expected.to_string(),
            hasher,
            bytes: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.bytes += data.len() as u64;
        if let Some(hasher) = self.hasher.as_mut() {
            if !data.is_empty() {
                hasher.update(data);
            }
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn finish(self) -> Result<u64, ReplicationError> {
        let hasher = match self.hasher {
            Some(h) => h,
            None => return Ok(self.bytes),
        };
        let actual = Sha256Value::new_from_slice(&hasher.finalize())?.as_digest();
        if actual != self.expected {
            return Err(ReplicationError::DigestMismatch {
                expected: self.expected,
                actual,
                bytes: self.bytes,
            });
        }
        Ok(self.bytes)
    }
}
