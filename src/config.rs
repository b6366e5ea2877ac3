use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::errors::{ReplicationError, Result};

#[derive(Deserialize, Serialize, PartialEq, Eq, Clone)]
pub struct Credential {
    pub username: String,
    pub password: String,
}

impl Credential {
    /// Value for the `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!(
            "Basic {}",
            BASE64_STANDARD.encode(format!("{}:{}", self.username, self.password))
        )
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where an image lives: registry base url, repository path and tag.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct ImageLocation {
    pub registry: String,
    pub repository: String,
    pub tag: String,
    #[serde(default)]
    pub credential: Option<Credential>,
}

impl ImageLocation {
    fn validate(&self, which: &str) -> Result<()> {
        if self.registry.trim().is_empty() {
            return Err(ReplicationError::Config(format!("{} registry is empty", which)));
        }
        if self.repository.trim_matches('/').is_empty() {
            return Err(ReplicationError::Config(format!(
                "{} repository is empty",
                which
            )));
        }
        if self.tag.is_empty() || self.tag.contains('/') {
            return Err(ReplicationError::Config(format!(
                "{} tag {:?} is not a valid tag",
                which, self.tag
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct TransportConfig {
    #[serde(default = "default_verify_tls")]
    pub verify_tls: bool,

    /// Upper bound on a whole request, including streaming its body.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_verify_tls() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    600
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            verify_tls: default_verify_tls(),
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl TransportConfig {
    fn validate(&self) -> Result<()> {
        for (name, secs) in [
            ("request_timeout_secs", self.request_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
        ] {
            if secs == 0 || secs > MAX_TIMEOUT_SECS {
                return Err(ReplicationError::Config(format!(
                    "{} must be between 1 and {}, got {}",
                    name, MAX_TIMEOUT_SECS, secs
                )));
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

pub const DEFAULT_MAX_CONCURRENT_TRANSFERS: usize = 8;
pub const MAX_CONCURRENT_TRANSFERS: usize = Semaphore::MAX_PERMITS;

/// One day.
pub const MAX_TIMEOUT_SECS: u64 = 24 * 60 * 60;

fn default_max_concurrent_transfers() -> usize {
    DEFAULT_MAX_CONCURRENT_TRANSFERS
}

#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct MigrationConfig {
    pub source: ImageLocation,
    pub destination: ImageLocation,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,

    /// Parent directory for the staged manifest document.
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,

    /// Succeed without copying anything when the destination tag already exists.
    #[serde(default)]
    pub skip_if_destination_exists: bool,
}

impl MigrationConfig {
    pub fn new(source: ImageLocation, destination: ImageLocation) -> MigrationConfig {
        MigrationConfig {
            source,
            destination,
            transport: TransportConfig::default(),
            max_concurrent_transfers: DEFAULT_MAX_CONCURRENT_TRANSFERS,
            staging_dir: None,
            skip_if_destination_exists: false,
        }
    }

    pub fn parse_str(content: &str) -> Result<MigrationConfig> {
        let u: MigrationConfig = serde_json::from_str(content)
            .map_err(|e| ReplicationError::Config(format!("Unable to parse config: {}", e)))?;
        u.validate()?;
        Ok(u)
    }

    pub fn parse_file(f: impl AsRef<Path>) -> Result<MigrationConfig> {
        let content = std::fs::read_to_string(f.as_ref()).map_err(|e| {
            ReplicationError::io(
                format!("Attempting to read config from file: {:?}", f.as_ref()),
                e,
            )
        })?;
        Self::parse_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        self.source.validate("source")?;
        self.destination.validate("destination")?;
        if self.max_concurrent_transfers == 0
            || self.max_concurrent_transfers > MAX_CONCURRENT_TRANSFERS
        {
            return Err(ReplicationError::Config(format!(
                "max_concurrent_transfers must be between 1 and {}, got {}",
                MAX_CONCURRENT_TRANSFERS, self.max_concurrent_transfers
            )));
        }
        self.transport.validate()
    }
}
