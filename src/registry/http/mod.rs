mod blob;
mod transport;
mod util;

use std::sync::Arc;

use http::{Method, StatusCode, Uri};
use hyper::Body;

use crate::container_specs::{accepted_manifest_types, Manifest};
use crate::errors::{Phase, ReplicationError, Result};
use crate::registry::RegistryEndpoint;

use self::util::{dump_body_to_bytes, dump_body_to_string};

pub use self::transport::{Deadline, Transport};

pub struct HttpRegistry {
    endpoint: RegistryEndpoint,
    transport: Arc<Transport>,
}

#[async_trait::async_trait]
impl super::RegistryCore for HttpRegistry {
    fn manifest_reference(&self, tag: &str) -> String {
        self.endpoint.manifest_reference(tag)
    }

    fn registry_base(&self) -> String {
        self.endpoint.registry_base()
    }

    fn repository(&self) -> &str {
        self.endpoint.repository()
    }

    async fn manifest_exists(&self, tag: &str) -> Result<bool> {
        let uri = self.endpoint.manifest_uri(tag)?;
        let deadline = self.transport.deadline();
        let request = self
            .request_builder(Method::HEAD, &uri)
            .header(http::header::ACCEPT, accepted_manifest_types())
            .body(Body::empty())
            .map_err(|e| ReplicationError::transport(Phase::ManifestCheck, &uri, e))?;
        let mut r = self
            .transport
            .send(Phase::ManifestCheck, request, deadline)
            .await?;

        match r.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(ReplicationError::Protocol {
                phase: Phase::ManifestCheck,
                uri: uri.to_string(),
                status,
                body: dump_body_to_string(&mut r, Phase::ManifestCheck, &uri.to_string(), deadline)
                    .await,
            }),
        }
    }

    async fn fetch_manifest(&self, tag: &str) -> Result<Manifest> {
        let uri = self.endpoint.manifest_uri(tag)?;
        let uri_str = uri.to_string();
        let deadline = self.transport.deadline();
        let request = self
            .request_builder(Method::GET, &uri)
            .header(http::header::ACCEPT, accepted_manifest_types())
            .body(Body::empty())
            .map_err(|e| ReplicationError::transport(Phase::ManifestFetch, &uri, e))?;
        tracing::info!("Fetching manifest: {}", uri_str);
        let mut r = self
            .transport
            .send(Phase::ManifestFetch, request, deadline)
            .await?;

        let status = r.status();
        if status != StatusCode::OK {
            return Err(ReplicationError::Protocol {
                phase: Phase::ManifestFetch,
                uri: uri_str.clone(),
                status,
                body: dump_body_to_string(&mut r, Phase::ManifestFetch, &uri_str, deadline).await,
            });
        }

        let content_type = r
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|c| c.to_str().ok())
            .map(|c| c.to_string());
        let content = dump_body_to_bytes(&mut r, Phase::ManifestFetch, &uri_str, deadline).await?;
        Manifest::parse(&content, content_type.as_deref(), &uri_str)
    }

    async fn upload_manifest(
        &self,
        tag: &str,
        manifest: &Manifest,
        manifest_bytes: &[u8],
    ) -> Result<()> {
        let post_target_uri = self.endpoint.manifest_uri(tag)?;
        let uri_str = post_target_uri.to_string();
        let deadline = self.transport.deadline();
        let request = self
            .request_builder(Method::PUT, &post_target_uri)
            .header(http::header::CONTENT_TYPE, manifest.media_type())
            .body(Body::from(manifest_bytes.to_vec()))
            .map_err(|e| ReplicationError::transport(Phase::ManifestRegister, &uri_str, e))?;
        tracing::info!("Registering manifest: {}", uri_str);
        let mut r = self
            .transport
            .send(Phase::ManifestRegister, request, deadline)
            .await?;

        let status = r.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            return Err(ReplicationError::Protocol {
                phase: Phase::ManifestRegister,
                uri: uri_str.clone(),
                status,
                body: dump_body_to_string(&mut r, Phase::ManifestRegister, &uri_str, deadline)
                    .await,
            });
        }

        match r.headers().get(http::header::LOCATION).and_then(|l| l.to_str().ok()) {
            Some(location_str) => tracing::debug!(
                "Uploaded manifest to repository {}, for tag: {} @ {}",
                self.endpoint.repository(),
                tag,
                location_str
            ),
            None => tracing::debug!(
                "Uploaded manifest to repository {}, for tag: {}",
                self.endpoint.repository(),
                tag
            ),
        }
        Ok(())
    }
}

impl HttpRegistry {
    pub fn new(endpoint: RegistryEndpoint, transport: Arc<Transport>) -> HttpRegistry {
        HttpRegistry {
            endpoint,
            transport,
        }
    }

    fn request_builder(&self, method: Method, uri: &Uri) -> http::request::Builder {
        let builder = http::request::Builder::default()
            .method(method)
            .uri(uri.clone());
        match self.endpoint.authorization() {
            Some(auth) => builder.header(http::header::AUTHORIZATION, auth.clone()),
            None => builder,
        }
    }
}
