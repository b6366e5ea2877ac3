mod endpoint;
mod http;
pub mod ops;

use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures_core::Stream;

use crate::container_specs::{BlobDescriptor, Manifest};
use crate::errors::Result;

pub use self::endpoint::RegistryEndpoint;
pub use self::http::{Deadline, HttpRegistry, Transport};

/// A finite, single pass, lazily consumed blob body. Dropping it releases the
/// underlying connection.
pub type BlobStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum UploadOutcome {
    Uploaded { bytes: u64 },
    AlreadyPresent,
}

#[async_trait::async_trait]
pub trait RegistryCore: Send + Sync {
    /// `<registry>/v2/<path>/manifests/<tag>`, for reporting.
    fn manifest_reference(&self, tag: &str) -> String;

    fn registry_base(&self) -> String;

    fn repository(&self) -> &str;

    /// Three way: found, not found, or an error when the registry answered
    /// with anything else.
    async fn manifest_exists(&self, tag: &str) -> Result<bool>;

    async fn fetch_manifest(&self, tag: &str) -> Result<Manifest>;

    async fn upload_manifest(
        &self,
        tag: &str,
        manifest: &Manifest,
        manifest_bytes: &[u8],
    ) -> Result<()>;
}

#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    async fn blob_exists(&self, digest: &str) -> Result<bool>;

    async fn download_blob(&self, blob: &BlobDescriptor) -> Result<BlobStream>;

    /// Opens an upload session and commits `stream` against it, without
    /// checking for presence first. Returns the number of bytes sent.
    async fn push_blob(&self, blob: &BlobDescriptor, stream: BlobStream) -> Result<u64>;

    /// Uploads a blob unless the registry already has it.
    async fn upload_blob(&self, blob: &BlobDescriptor, stream: BlobStream) -> Result<UploadOutcome> {
        if self.blob_exists(&blob.digest).await? {
            tracing::debug!("{} {} already exists, skipping upload", blob.role, blob.digest);
            return Ok(UploadOutcome::AlreadyPresent);
        }
        let bytes = self.push_blob(blob, stream).await?;
        Ok(UploadOutcome::Uploaded { bytes })
    }
}

pub trait Registry: RegistryCore + BlobStore {}

impl<T> Registry for T where T: RegistryCore + BlobStore {}

pub fn from_endpoint(endpoint: RegistryEndpoint, transport: Arc<Transport>) -> Arc<dyn Registry> {
    Arc::new(HttpRegistry::new(endpoint, transport))
}
