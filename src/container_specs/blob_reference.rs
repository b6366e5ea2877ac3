use serde::{Deserialize, Serialize};

/// A descriptor as it appears inside a manifest document.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Default, Clone)]
pub struct BlobReference {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub size: u64,
    pub digest: String,
}

/// What a blob is used for. Only affects labelling, never transfer logic.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum BlobRole {
    Config,
    Layer(usize),
}

impl std::fmt::Display for BlobRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlobRole::Config => write!(f, "config.json"),
            BlobRole::Layer(idx) => write!(f, "layer{}.tar.gz", idx + 1),
        }
    }
}

/// One unit of transfer work derived from a manifest.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct BlobDescriptor {
    pub digest: String,
    pub size: u64,
    pub role: BlobRole,
}

impl BlobDescriptor {
    pub fn new(reference: &BlobReference, role: BlobRole) -> BlobDescriptor {
        BlobDescriptor {
            digest: reference.digest.clone(),
            size: reference.size,
            role,
        }
    }

    /// Short label for progress output.
    pub fn label(&self) -> String {
        let short = self
            .digest
            .split_once(':')
            .map(|(_, hex)| hex)
            .unwrap_or(&self.digest);
        let short: String = short.chars().take(12).collect();
        format!("{:<14} {}", self.role.to_string(), short)
    }
}
