pub mod digest_verifier;
pub mod sha256_value;

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{ReplicationError, Result};

fn digest_regex() -> &'static Regex {
    static DIGEST_RE: OnceLock<Regex> = OnceLock::new();
    // algorithm ":" encoded, per the distribution reference grammar
    DIGEST_RE.get_or_init(|| {
        Regex::new(r"^[a-z0-9]+(?:[.+_-][a-z0-9]+)*:[a-zA-Z0-9=_-]+$")
            .unwrap_or_else(|e| unreachable!("static digest regex failed to compile: {}", e))
    })
}

/// Rejects anything that cannot be placed in a blob URL as a digest.
pub fn validate_digest(digest: &str) -> Result<()> {
    if digest_regex().is_match(digest) {
        Ok(())
    } else {
        Err(ReplicationError::InvalidReference(format!(
            "{:?} is not a valid content digest",
            digest
        )))
    }
}
