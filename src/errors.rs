use std::time::Duration;

use http::StatusCode;

use crate::container_specs::blob_reference::BlobRole;

pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Which step of the registry conversation an error came from.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Phase {
    ManifestCheck,
    ManifestFetch,
    ManifestRegister,
    BlobProbe,
    BlobDownload,
    UploadSession,
    UploadCommit,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::ManifestCheck => "manifest existence check",
            Phase::ManifestFetch => "manifest fetch",
            Phase::ManifestRegister => "manifest registration",
            Phase::BlobProbe => "blob existence probe",
            Phase::BlobDownload => "blob download",
            Phase::UploadSession => "upload session open",
            Phase::UploadCommit => "upload commit",
        };
        write!(f, "{}", s)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TransportFailure {
    #[error("{0}")]
    Hyper(#[from] hyper::Error),
    #[error("request did not complete within {0:?}")]
    TimedOut(Duration),
    #[error("unable to build request: {0}")]
    Request(#[from] http::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ReplicationError {
    #[error("Source image {reference} does not exist, nothing to migrate")]
    Precondition { reference: String },

    #[error("Unexpected status {status} during {phase}, hitting url: {uri}\nResponse:{body}")]
    Protocol {
        phase: Phase,
        uri: String,
        status: StatusCode,
        body: String,
    },

    #[error("Unable to decode manifest fetched from {uri}: {reason}")]
    Decode { uri: String, reason: String },

    #[error("Transport failure during {phase}, hitting url: {uri}: {source}")]
    Transport {
        phase: Phase,
        uri: String,
        #[source]
        source: TransportFailure,
    },

    #[error("Streamed blob produced the incorrect digest. Expected {expected} -- Got {actual} after {bytes} bytes")]
    DigestMismatch {
        expected: String,
        actual: String,
        bytes: u64,
    },

    #[error("{}", describe_partial_failure(.failures))]
    PartialFailure { failures: Vec<BlobFailure> },

    #[error("Invalid registry reference: {0}")]
    InvalidReference(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transfer task for {digest} did not run to completion: {reason}")]
    TaskAborted { digest: String, reason: String },
}

/// One blob that could not be transferred, attributed by digest and role.
#[derive(Debug)]
pub struct BlobFailure {
    pub digest: String,
    pub role: BlobRole,
    pub error: ReplicationError,
}

impl std::fmt::Display for BlobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}): {}", self.digest, self.role, self.error)
    }
}

fn describe_partial_failure(failures: &[BlobFailure]) -> String {
    let mut lines = vec![format!(
        "{} blob transfer(s) failed, manifest was not registered:",
        failures.len()
    )];
    for failure in failures.iter() {
        lines.push(format!("  - {}", failure));
    }
    lines.join("\n")
}

impl ReplicationError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> ReplicationError {
        ReplicationError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn transport(
        phase: Phase,
        uri: impl ToString,
        source: impl Into<TransportFailure>,
    ) -> ReplicationError {
        ReplicationError::Transport {
            phase,
            uri: uri.to_string(),
            source: source.into(),
        }
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, ReplicationError::Precondition { .. })
    }

    pub fn is_protocol(&self) -> bool {
        matches!(self, ReplicationError::Protocol { .. })
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, ReplicationError::Decode { .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, ReplicationError::Transport { .. })
    }

    pub fn phase(&self) -> Option<Phase> {
        match self {
            ReplicationError::Protocol { phase, .. } => Some(*phase),
            ReplicationError::Transport { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Digests of every failed blob, empty unless this is a partial failure.
    pub fn failed_digests(&self) -> Vec<&str> {
        match self {
            ReplicationError::PartialFailure { failures } => {
                failures.iter().map(|f| f.digest.as_str()).collect()
            }
            _ => Vec::default(),
        }
    }
}
