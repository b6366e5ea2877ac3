use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::blob_reference::{BlobDescriptor, BlobReference, BlobRole};
use super::SpecificationType;
use crate::errors::{ReplicationError, Result};
use crate::hash::validate_digest;

/// A single platform image manifest (Docker schema 2 or OCI).
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct Manifest {
    #[serde(rename = "mediaType", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,

    #[serde(rename = "schemaVersion")]
    pub schema_version: u16,

    pub config: BlobReference,

    pub layers: Vec<BlobReference>,

    // annotations, subject and anything else we don't interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Manifest {
    /// Decodes a manifest body. `content_type` is the response header, used
    /// when the document itself omits `mediaType` (allowed for OCI).
    pub fn parse(
        manifest_bytes: &[u8],
        content_type: Option<&str>,
        origin: &str,
    ) -> Result<Manifest> {
        let decode_err = |reason: String| ReplicationError::Decode {
            uri: origin.to_string(),
            reason,
        };
        let mut manifest: Manifest =
            serde_json::from_slice(manifest_bytes).map_err(|e| decode_err(e.to_string()))?;

        if manifest.media_type.is_none() {
            manifest.media_type = content_type
                .map(|c| c.split(';').next().unwrap_or(c).trim().to_string());
        }
        manifest.specification_type().map_err(decode_err)?;

        if manifest.schema_version != 2 {
            return Err(decode_err(format!(
                "Expected schemaVersion 2, got {}",
                manifest.schema_version
            )));
        }
        for blob in std::iter::once(&manifest.config).chain(manifest.layers.iter()) {
            validate_digest(&blob.digest).map_err(|e| decode_err(e.to_string()))?;
        }
        Ok(manifest)
    }

    pub fn specification_type(&self) -> std::result::Result<SpecificationType, String> {
        match self.media_type.as_deref() {
            Some(m) => SpecificationType::from_manifest_media_type(m),
            None => Err("Manifest carries no media type".to_string()),
        }
    }

    /// Content type to register the manifest under.
    pub fn media_type(&self) -> &str {
        self.media_type
            .as_deref()
            .unwrap_or(SpecificationType::default().manifest_media_type())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| ReplicationError::Decode {
            uri: "<staged manifest>".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn write_file(&self, f: impl AsRef<Path>) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(f.as_ref(), bytes).map_err(|e| {
            ReplicationError::io(format!("Failed to write manifest to {:?}", f.as_ref()), e)
        })
    }

    /// Every blob the manifest references: the config first, then layers in
    /// manifest order.
    pub fn blob_work_set(&self) -> Vec<BlobDescriptor> {
        let mut work = Vec::with_capacity(self.layers.len() + 1);
        work.push(BlobDescriptor::new(&self.config, BlobRole::Config));
        for (idx, layer) in self.layers.iter().enumerate() {
            work.push(BlobDescriptor::new(layer, BlobRole::Layer(idx)));
        }
        work
    }

    pub fn total_size(&self) -> u64 {
        self.config.size + self.layers.iter().map(|l| l.size).sum::<u64>()
    }
}
