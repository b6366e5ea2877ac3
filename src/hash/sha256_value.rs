use std::fmt;

use crate::errors::ReplicationError;

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct Sha256Value([u8; 32]);

impl Sha256Value {
    pub fn new_from_slice(data: &[u8]) -> Result<Sha256Value, ReplicationError> {
        let inner: [u8; 32] = data.try_into().map_err(|_| {
            ReplicationError::InvalidReference(format!(
                "sha256 value must be 32 bytes, got {}",
                data.len()
            ))
        })?;
        Ok(Sha256Value(inner))
    }

    pub fn as_digest(&self) -> String {
        format!("sha256:{}", self)
    }
}

impl fmt::Display for Sha256Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.iter() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
