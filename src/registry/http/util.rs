use bytes::Bytes;
use http::Response;
use hyper::body::HttpBody as _;
use hyper::Body;
use tokio::time::timeout_at;

use super::transport::Deadline;
use crate::errors::{Phase, ReplicationError, Result};
use crate::registry::BlobStream;

/// Reads a whole (small) response body, used for error bodies and manifests.
pub(super) async fn dump_body_to_bytes(
    response: &mut Response<Body>,
    phase: Phase,
    uri: &str,
    deadline: Deadline,
) -> Result<Vec<u8>> {
    let mut buffer = Vec::default();
    loop {
        match timeout_at(deadline.at, response.body_mut().data()).await {
            Err(_) => return Err(deadline.timed_out(phase, uri)),
            Ok(None) => break,
            Ok(Some(chunk)) => {
                let chunk = chunk.map_err(|e| ReplicationError::transport(phase, uri, e))?;
                buffer.extend_from_slice(&chunk[..]);
            }
        }
    }
    Ok(buffer)
}

/// Body of an unexpected response, best effort. Registries explain most
/// rejections in the body so we keep whatever we can read.
pub(super) async fn dump_body_to_string(
    response: &mut Response<Body>,
    phase: Phase,
    uri: &str,
    deadline: Deadline,
) -> String {
    match dump_body_to_bytes(response, phase, uri, deadline).await {
        Ok(buffer) => String::from_utf8_lossy(&buffer).to_string(),
        Err(e) => format!("<unable to read response body: {}>", e),
    }
}

/// Turns a live response body into a single pass blob stream. Each chunk read
/// is bounded by the exchange deadline.
pub(super) fn body_stream(body: Body, uri: String, deadline: Deadline) -> BlobStream {
    let stream = futures::stream::unfold(Some(body), move |state| {
        let uri = uri.clone();
        async move {
            let mut body = state?;
            match timeout_at(deadline.at, body.data()).await {
                Err(_) => Some((Err(deadline.timed_out(Phase::BlobDownload, uri)), None)),
                Ok(None) => None,
                Ok(Some(Ok(chunk))) => Some((Ok::<Bytes, ReplicationError>(chunk), Some(body))),
                Ok(Some(Err(e))) => Some((
                    Err(ReplicationError::transport(Phase::BlobDownload, uri, e)),
                    None,
                )),
            }
        }
    });
    Box::pin(stream)
}
