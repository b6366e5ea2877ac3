use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use hyper::Body;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;

use super::util::{body_stream, dump_body_to_string};
use crate::container_specs::BlobDescriptor;
use crate::errors::{Phase, ReplicationError, Result};
use crate::hash::digest_verifier::DigestVerifier;
use crate::registry::{BlobStore, BlobStream};

type BodyError = Box<dyn std::error::Error + Send + Sync>;

#[async_trait::async_trait]
impl BlobStore for super::HttpRegistry {
    async fn blob_exists(&self, digest: &str) -> Result<bool> {
        let uri = self.endpoint.blob_uri(digest)?;
        let uri_str = uri.to_string();
        let deadline = self.transport.deadline();
        let request = self
            .request_builder(Method::HEAD, &uri)
            .body(Body::empty())
            .map_err(|e| ReplicationError::transport(Phase::BlobProbe, &uri_str, e))?;

        let mut r = self
            .transport
            .send(Phase::BlobProbe, request, deadline)
            .await?;

        if r.status() == StatusCode::NOT_FOUND {
            Ok(false)
        } else if r.status() == StatusCode::OK {
            Ok(true)
        } else {
            Err(ReplicationError::Protocol {
                phase: Phase::BlobProbe,
                uri: uri_str.clone(),
                status: r.status(),
                body: dump_body_to_string(&mut r, Phase::BlobProbe, &uri_str, deadline).await,
            })
        }
    }

    async fn download_blob(&self, blob: &BlobDescriptor) -> Result<BlobStream> {
        let uri = self.endpoint.blob_uri(&blob.digest)?;
        let uri_str = uri.to_string();
        let deadline = self.transport.deadline();
        let request = self
            .request_builder(Method::GET, &uri)
            .body(Body::empty())
            .map_err(|e| ReplicationError::transport(Phase::BlobDownload, &uri_str, e))?;

        let mut response = self
            .transport
            .send(Phase::BlobDownload, request, deadline)
            .await?;

        if response.status() != StatusCode::OK {
            return Err(ReplicationError::Protocol {
                phase: Phase::BlobDownload,
                uri: uri_str.clone(),
                status: response.status(),
                body: dump_body_to_string(&mut response, Phase::BlobDownload, &uri_str, deadline)
                    .await,
            });
        }

        Ok(body_stream(response.into_body(), uri_str, deadline))
    }

    async fn push_blob(&self, blob: &BlobDescriptor, stream: BlobStream) -> Result<u64> {
        let post_target_uri = self.endpoint.upload_session_uri()?;
        let post_uri_str = post_target_uri.to_string();
        // We expect our POST request to get a location header of where to perform the real upload to.
        let deadline = self.transport.deadline();
        let request = self
            .request_builder(Method::POST, &post_target_uri)
            .body(Body::empty())
            .map_err(|e| ReplicationError::transport(Phase::UploadSession, &post_uri_str, e))?;
        let mut r = self
            .transport
            .send(Phase::UploadSession, request, deadline)
            .await?;

        if r.status() != StatusCode::ACCEPTED {
            return Err(ReplicationError::Protocol {
                phase: Phase::UploadSession,
                uri: post_uri_str.clone(),
                status: r.status(),
                body: dump_body_to_string(&mut r, Phase::UploadSession, &post_uri_str, deadline)
                    .await,
            });
        }

        let location = match r.headers().get(http::header::LOCATION) {
            Some(location_header) => location_header.to_str().map(|l| l.to_string()).map_err(|_| {
                ReplicationError::InvalidReference(format!(
                    "Upload session location header is not valid text: {:?}",
                    location_header
                ))
            })?,
            None => {
                let body =
                    dump_body_to_string(&mut r, Phase::UploadSession, &post_uri_str, deadline)
                        .await;
                return Err(ReplicationError::Protocol {
                    phase: Phase::UploadSession,
                    uri: post_uri_str,
                    status: r.status(),
                    body: format!("<response is missing the Location header> {}", body),
                });
            }
        };
        tracing::debug!(
            "Opened upload session for {} {}: {}",
            blob.role,
            blob.digest,
            location
        );

        let location_uri = self
            .endpoint
            .commit_uri(&post_target_uri, &location, &blob.digest)?;
        let location_str = location_uri.to_string();

        let total_uploaded_bytes = Arc::new(Mutex::new(0u64));
        let stream_failure: Arc<Mutex<Option<ReplicationError>>> = Arc::new(Mutex::new(None));
        let body = verified_body(
            stream,
            blob,
            Arc::clone(&total_uploaded_bytes),
            Arc::clone(&stream_failure),
        );

        let commit_deadline = self.transport.deadline();
        let request = self
            .request_builder(Method::PUT, &location_uri)
            .header(http::header::CONTENT_LENGTH, blob.size)
            .header(http::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .map_err(|e| ReplicationError::transport(Phase::UploadCommit, &location_str, e))?;
        let result = self
            .transport
            .send(Phase::UploadCommit, request, commit_deadline)
            .await;

        // A failure on the source side of the pipe explains a failed commit
        // better than whatever the destination made of the truncated body.
        if let Some(e) = stream_failure.lock().await.take() {
            return Err(e);
        }
        let mut r = result?;

        let total_uploaded_bytes: u64 = *total_uploaded_bytes.lock().await;
        if r.status() != StatusCode::CREATED {
            let body =
                dump_body_to_string(&mut r, Phase::UploadCommit, &location_str, commit_deadline)
                    .await;
            return Err(ReplicationError::Protocol {
                phase: Phase::UploadCommit,
                uri: location_str,
                status: r.status(),
                body: format!(
                    "{}\nUploaded: {} bytes\nExpected length: {}",
                    body, total_uploaded_bytes, blob.size
                ),
            });
        }

        tracing::debug!(
            "Blob upload complete for {} {}, {} bytes",
            blob.role,
            blob.digest,
            total_uploaded_bytes
        );
        Ok(total_uploaded_bytes)
    }
}

/// Wraps the source stream as an upload body. Bytes are hashed as they pass;
/// once the declared size has gone by (or the source ends) the digest is
/// checked, and a mismatch ends the body with an error instead of the final
/// chunk so the registry never receives a complete, wrong blob.
fn verified_body(
    mut stream: BlobStream,
    blob: &BlobDescriptor,
    total_uploaded_bytes: Arc<Mutex<u64>>,
    stream_failure: Arc<Mutex<Option<ReplicationError>>>,
) -> Body {
    let digest = blob.digest.clone();
    let declared_size = blob.size;

    let body_stream = async_stream::stream! {
        let mut verifier = Some(DigestVerifier::new(&digest));
        loop {
            let chunk = match stream.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    let msg = e.to_string();
                    *stream_failure.lock().await = Some(e);
                    yield Err::<Bytes, BodyError>(msg.into());
                    break;
                }
                None => {
                    if let Some(v) = verifier.take() {
                        if let Err(e) = v.finish() {
                            let msg = e.to_string();
                            *stream_failure.lock().await = Some(e);
                            yield Err(msg.into());
                        }
                    }
                    break;
                }
            };

            if let Some(v) = verifier.as_mut() {
                v.update(&chunk);
                if v.bytes() >= declared_size {
                    if let Some(v) = verifier.take() {
                        if let Err(e) = v.finish() {
                            let msg = e.to_string();
                            *stream_failure.lock().await = Some(e);
                            yield Err(msg.into());
                            break;
                        }
                    }
                }
            }

            *total_uploaded_bytes.lock().await += chunk.len() as u64;
            yield Ok(chunk);
        }
    };

    Body::wrap_stream(body_stream)
}
