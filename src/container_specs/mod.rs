pub mod blob_reference;
pub mod manifest;

pub use blob_reference::{BlobDescriptor, BlobReference, BlobRole};
pub use manifest::Manifest;

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";

const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
const OCI_IMAGE_INDEX: &str = "application/vnd.oci.image.index.v1+json";

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub enum SpecificationType {
    Oci,
    Docker,
}

impl Default for SpecificationType {
    fn default() -> Self {
        SpecificationType::Docker
    }
}

impl SpecificationType {
    pub fn manifest_media_type(&self) -> &'static str {
        match self {
            SpecificationType::Oci => OCI_MANIFEST_V1,
            SpecificationType::Docker => DOCKER_MANIFEST_V2,
        }
    }

    pub fn from_manifest_media_type(media_type: &str) -> Result<SpecificationType, String> {
        match media_type {
            DOCKER_MANIFEST_V2 => Ok(SpecificationType::Docker),
            OCI_MANIFEST_V1 => Ok(SpecificationType::Oci),
            DOCKER_MANIFEST_LIST | OCI_IMAGE_INDEX => Err(format!(
                "{} is a multi-platform index, only single platform manifests can be migrated",
                media_type
            )),
            other => Err(format!("Unsupported manifest media type {:?}", other)),
        }
    }
}

/// Value for the Accept header on manifest requests.
pub fn accepted_manifest_types() -> String {
    format!("{}, {}", DOCKER_MANIFEST_V2, OCI_MANIFEST_V1)
}
