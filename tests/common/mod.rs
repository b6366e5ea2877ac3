#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use http::{Method, Request, Response, StatusCode};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Server};
use registry_replicator::config::{ImageLocation, MigrationConfig};
use registry_replicator::container_specs::{
    BlobDescriptor, BlobReference, Manifest, DOCKER_MANIFEST_V2,
};
use registry_replicator::errors::{Phase, ReplicationError, Result};
use registry_replicator::registry::{BlobStore, BlobStream, RegistryCore};
use sha2::{Digest, Sha256};

pub const CONFIG_MEDIA_TYPE: &str = "application/vnd.docker.container.image.v1+json";
pub const LAYER_MEDIA_TYPE: &str = "application/vnd.docker.image.rootfs.diff.tar.gzip";

pub fn digest_of(content: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(content))
}

/// A docker schema 2 manifest referencing `config` and `layers` by content.
pub fn image_manifest(config: &[u8], layers: &[&[u8]]) -> Vec<u8> {
    let layers: Vec<serde_json::Value> = layers
        .iter()
        .map(|l| {
            serde_json::json!({
                "mediaType": LAYER_MEDIA_TYPE,
                "size": l.len(),
                "digest": digest_of(l),
            })
        })
        .collect();
    serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": DOCKER_MANIFEST_V2,
        "config": {
            "mediaType": CONFIG_MEDIA_TYPE,
            "size": config.len(),
            "digest": digest_of(config),
        },
        "layers": layers,
    }))
    .unwrap()
}

#[derive(Debug, Clone)]
pub struct LoggedRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
}

#[derive(Default)]
pub struct RegistryState {
    pub requests: Vec<LoggedRequest>,
    /// (repository, tag) -> (content type, body)
    pub manifests: HashMap<(String, String), (String, Vec<u8>)>,
    /// (repository, digest) -> body
    pub blobs: HashMap<(String, String), Vec<u8>>,
    next_upload: u64,

    pub required_authorization: Option<String>,
    pub fail_downloads: HashSet<String>,
    pub corrupt_downloads: HashSet<String>,
    pub stall_downloads: Option<Duration>,
    pub fail_probes: bool,
    pub fail_manifest_fetch: bool,
    pub omit_upload_location: bool,
    /// Status for an accepted manifest PUT, 201 when unset.
    pub manifest_accept_status: Option<StatusCode>,
    pub reject_manifests: bool,
}

type SharedState = Arc<Mutex<RegistryState>>;

/// An in process registry speaking enough of the distribution v2 api for the
/// replication flow, recording every request it receives.
pub struct FakeRegistry {
    pub addr: SocketAddr,
    pub state: SharedState,
    server: tokio::task::JoinHandle<()>,
}

impl Drop for FakeRegistry {
    fn drop(&mut self) {
        self.server.abort();
    }
}

impl FakeRegistry {
    pub async fn start() -> FakeRegistry {
        let state: SharedState = Arc::new(Mutex::new(RegistryState::default()));
        let svc_state = Arc::clone(&state);
        let make_svc = make_service_fn(move |_conn| {
            let state = Arc::clone(&svc_state);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle(Arc::clone(&state), req)))
            }
        });
        let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_svc);
        let addr = server.local_addr();
        let server = tokio::spawn(async move {
            let _ = server.await;
        });
        FakeRegistry {
            addr,
            state,
            server,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn location(&self, repository: &str, tag: &str) -> ImageLocation {
        ImageLocation {
            registry: self.base_url(),
            repository: repository.to_string(),
            tag: tag.to_string(),
            credential: None,
        }
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut RegistryState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn put_blob(&self, repository: &str, content: &[u8]) -> String {
        let digest = digest_of(content);
        self.with_state(|s| {
            s.blobs
                .insert((repository.to_string(), digest.clone()), content.to_vec())
        });
        digest
    }

    pub fn put_manifest(&self, repository: &str, tag: &str, content_type: &str, body: &[u8]) {
        self.with_state(|s| {
            s.manifests.insert(
                (repository.to_string(), tag.to_string()),
                (content_type.to_string(), body.to_vec()),
            )
        });
    }

    /// Seeds a full image: blobs plus a manifest tagged `tag`.
    pub fn put_image(&self, repository: &str, tag: &str, config: &[u8], layers: &[&[u8]]) {
        self.put_blob(repository, config);
        for layer in layers {
            self.put_blob(repository, layer);
        }
        self.put_manifest(
            repository,
            tag,
            DOCKER_MANIFEST_V2,
            &image_manifest(config, layers),
        );
    }

    pub fn blob(&self, repository: &str, digest: &str) -> Option<Vec<u8>> {
        self.with_state(|s| {
            s.blobs
                .get(&(repository.to_string(), digest.to_string()))
                .cloned()
        })
    }

    pub fn manifest(&self, repository: &str, tag: &str) -> Option<(String, Vec<u8>)> {
        self.with_state(|s| {
            s.manifests
                .get(&(repository.to_string(), tag.to_string()))
                .cloned()
        })
    }

    pub fn requests(&self) -> Vec<LoggedRequest> {
        self.with_state(|s| s.requests.clone())
    }

    pub fn clear_requests(&self) {
        self.with_state(|s| s.requests.clear());
    }

    /// Number of logged requests with `method` whose path contains `fragment`.
    pub fn count(&self, method: Method, fragment: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.path.contains(fragment))
            .count()
    }

    /// Commits of blob uploads, as opposed to manifest or session requests.
    pub fn upload_commits(&self) -> Vec<LoggedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == Method::PUT && r.path.contains("/blobs/uploads/"))
            .collect()
    }
}

fn respond(status: StatusCode, body: impl Into<Body>) -> Response<Body> {
    Response::builder().status(status).body(body.into()).unwrap()
}

async fn handle(state: SharedState, req: Request<Body>) -> std::result::Result<Response<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|q| q.to_string());
    let authorization = req
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    let required_authorization = {
        let mut s = state.lock().unwrap();
        s.requests.push(LoggedRequest {
            method: method.clone(),
            path: path.clone(),
            query: query.clone(),
            authorization: authorization.clone(),
        });
        s.required_authorization.clone()
    };
    if let Some(required) = required_authorization {
        if authorization.as_deref() != Some(required.as_str()) {
            return Ok(respond(StatusCode::UNAUTHORIZED, r#"{"errors":[{"code":"UNAUTHORIZED"}]}"#));
        }
    }

    let rest = match path.strip_prefix("/v2/") {
        Some(rest) => rest.to_string(),
        None => return Ok(respond(StatusCode::NOT_FOUND, "")),
    };

    if let Some(idx) = rest.find("/blobs/uploads/") {
        let repository = rest[..idx].to_string();
        let session = rest[idx + "/blobs/uploads/".len()..].to_string();
        return Ok(match (method, session.is_empty()) {
            (Method::POST, true) => open_upload(&state, &repository),
            (Method::PUT, false) => {
                let body = hyper::body::to_bytes(req.into_body()).await;
                commit_upload(&state, &repository, query.as_deref(), body)
            }
            _ => respond(StatusCode::METHOD_NOT_ALLOWED, ""),
        });
    }

    if let Some(idx) = rest.rfind("/blobs/") {
        let repository = rest[..idx].to_string();
        let digest = rest[idx + "/blobs/".len()..].to_string();
        return Ok(serve_blob(&state, method, &repository, &digest).await);
    }

    if let Some(idx) = rest.rfind("/manifests/") {
        let repository = rest[..idx].to_string();
        let tag = rest[idx + "/manifests/".len()..].to_string();
        return Ok(match method {
            Method::PUT => {
                let content_type = req
                    .headers()
                    .get(http::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                let body = hyper::body::to_bytes(req.into_body()).await;
                register_manifest(&state, &repository, &tag, content_type, body)
            }
            method => serve_manifest(&state, method, &repository, &tag),
        });
    }

    Ok(respond(StatusCode::NOT_FOUND, ""))
}

fn open_upload(state: &SharedState, repository: &str) -> Response<Body> {
    let mut s = state.lock().unwrap();
    if s.omit_upload_location {
        return respond(StatusCode::ACCEPTED, "");
    }
    s.next_upload += 1;
    let location = format!(
        "/v2/{}/blobs/uploads/{}?_state=session{}",
        repository, s.next_upload, s.next_upload
    );
    Response::builder()
        .status(StatusCode::ACCEPTED)
        .header(http::header::LOCATION, location)
        .body(Body::empty())
        .unwrap()
}

fn commit_upload(
    state: &SharedState,
    repository: &str,
    query: Option<&str>,
    body: std::result::Result<Bytes, hyper::Error>,
) -> Response<Body> {
    let body = match body {
        Ok(b) => b,
        Err(e) => return respond(StatusCode::BAD_REQUEST, format!("body error: {}", e)),
    };
    let digest = query
        .unwrap_or("")
        .split('&')
        .find_map(|kv| kv.strip_prefix("digest="))
        .map(|d| d.to_string());
    let digest = match digest {
        Some(d) => d,
        None => return respond(StatusCode::BAD_REQUEST, r#"{"errors":[{"code":"DIGEST_INVALID"}]}"#),
    };
    if digest_of(&body) != digest {
        return respond(StatusCode::BAD_REQUEST, r#"{"errors":[{"code":"DIGEST_INVALID"}]}"#);
    }
    state
        .lock()
        .unwrap()
        .blobs
        .insert((repository.to_string(), digest.clone()), body.to_vec());
    Response::builder()
        .status(StatusCode::CREATED)
        .header(
            http::header::LOCATION,
            format!("/v2/{}/blobs/{}", repository, digest),
        )
        .body(Body::empty())
        .unwrap()
}

async fn serve_blob(
    state: &SharedState,
    method: Method,
    repository: &str,
    digest: &str,
) -> Response<Body> {
    let (content, fail_probes, fail_download, corrupt, stall) = {
        let s = state.lock().unwrap();
        (
            s.blobs
                .get(&(repository.to_string(), digest.to_string()))
                .cloned(),
            s.fail_probes,
            s.fail_downloads.contains(digest),
            s.corrupt_downloads.contains(digest),
            s.stall_downloads,
        )
    };

    match method {
        Method::HEAD => {
            if fail_probes {
                return respond(StatusCode::INTERNAL_SERVER_ERROR, "");
            }
            match content {
                Some(c) => Response::builder()
                    .status(StatusCode::OK)
                    .header(http::header::CONTENT_LENGTH, c.len())
                    .body(Body::empty())
                    .unwrap(),
                None => respond(StatusCode::NOT_FOUND, ""),
            }
        }
        Method::GET => {
            if let Some(stall) = stall {
                tokio::time::sleep(stall).await;
            }
            if fail_download {
                return respond(StatusCode::INTERNAL_SERVER_ERROR, "storage backend unavailable");
            }
            match content {
                Some(mut c) => {
                    if corrupt {
                        if let Some(last) = c.last_mut() {
                            *last ^= 0xff;
                        }
                    }
                    respond(StatusCode::OK, c)
                }
                None => respond(StatusCode::NOT_FOUND, r#"{"errors":[{"code":"BLOB_UNKNOWN"}]}"#),
            }
        }
        _ => respond(StatusCode::METHOD_NOT_ALLOWED, ""),
    }
}

fn serve_manifest(state: &SharedState, method: Method, repository: &str, tag: &str) -> Response<Body> {
    let s = state.lock().unwrap();
    let entry = s
        .manifests
        .get(&(repository.to_string(), tag.to_string()))
        .cloned();
    match (method, entry) {
        (Method::HEAD, Some((content_type, body))) => Response::builder()
            .status(StatusCode::OK)
            .header(http::header::CONTENT_TYPE, content_type)
            .header(http::header::CONTENT_LENGTH, body.len())
            .body(Body::empty())
            .unwrap(),
        (Method::GET, Some(_)) if s.fail_manifest_fetch => {
            respond(StatusCode::INTERNAL_SERVER_ERROR, "manifest storage unavailable")
        }
        (Method::GET, Some((content_type, body))) => Response::builder()
            .status(StatusCode::OK)
            .header(http::header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap(),
        (Method::HEAD, None) => respond(StatusCode::NOT_FOUND, ""),
        (Method::GET, None) => {
            respond(StatusCode::NOT_FOUND, r#"{"errors":[{"code":"MANIFEST_UNKNOWN"}]}"#)
        }
        _ => respond(StatusCode::METHOD_NOT_ALLOWED, ""),
    }
}

fn register_manifest(
    state: &SharedState,
    repository: &str,
    tag: &str,
    content_type: String,
    body: std::result::Result<Bytes, hyper::Error>,
) -> Response<Body> {
    let body = match body {
        Ok(b) => b,
        Err(e) => return respond(StatusCode::BAD_REQUEST, format!("body error: {}", e)),
    };
    let parsed: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return respond(StatusCode::BAD_REQUEST, r#"{"errors":[{"code":"MANIFEST_INVALID"}]}"#),
    };
    let mut referenced = vec![parsed["config"]["digest"].as_str().unwrap_or("").to_string()];
    if let Some(layers) = parsed["layers"].as_array() {
        for layer in layers {
            referenced.push(layer["digest"].as_str().unwrap_or("").to_string());
        }
    }

    let mut s = state.lock().unwrap();
    if s.reject_manifests {
        return respond(
            StatusCode::BAD_REQUEST,
            r#"{"errors":[{"code":"MANIFEST_INVALID","message":"rejected by policy"}]}"#,
        );
    }
    for digest in referenced {
        if !s.blobs.contains_key(&(repository.to_string(), digest)) {
            return respond(
                StatusCode::BAD_REQUEST,
                r#"{"errors":[{"code":"MANIFEST_BLOB_UNKNOWN"}]}"#,
            );
        }
    }
    s.manifests.insert(
        (repository.to_string(), tag.to_string()),
        (content_type, body.to_vec()),
    );
    respond(s.manifest_accept_status.unwrap_or(StatusCode::CREATED), "")
}

/// Config pointing `source_repo:source_tag` on one fake at `dest_repo:dest_tag`
/// on another, over plain http.
pub fn migration_config(
    source: &FakeRegistry,
    source_repo: &str,
    source_tag: &str,
    destination: &FakeRegistry,
    dest_repo: &str,
    dest_tag: &str,
) -> MigrationConfig {
    let mut config = MigrationConfig::new(
        source.location(source_repo, source_tag),
        destination.location(dest_repo, dest_tag),
    );
    config.transport.verify_tls = false;
    config.transport.request_timeout_secs = 10;
    config.transport.connect_timeout_secs = 5;
    config
}

/// Registry held entirely in memory. Counts how many pushes are in flight at
/// once so tests can observe the transfer cap.
#[derive(Default)]
pub struct MemoryRegistry {
    pub manifests: Mutex<HashMap<String, Manifest>>,
    pub blobs: Mutex<HashMap<String, Bytes>>,
    pub failing_downloads: Mutex<HashSet<String>>,
    pub push_delay: Duration,
    active_pushes: AtomicUsize,
    pub max_active_pushes: AtomicUsize,
    pub pushes: AtomicUsize,
}

impl MemoryRegistry {
    pub fn with_push_delay(push_delay: Duration) -> MemoryRegistry {
        MemoryRegistry {
            push_delay,
            ..Default::default()
        }
    }

    /// Seeds `layer_count` distinct layers plus a config and tags them.
    pub fn seed_image(&self, tag: &str, layer_count: usize) -> Manifest {
        let config_content = Bytes::from(format!("{{\"config\": \"{}\"}}", tag));
        let config = self.insert_blob(config_content, CONFIG_MEDIA_TYPE);
        let layers = (0..layer_count)
            .map(|idx| {
                self.insert_blob(
                    Bytes::from(format!("layer {} of {}", idx, tag).repeat(64)),
                    LAYER_MEDIA_TYPE,
                )
            })
            .collect();
        let manifest = Manifest {
            media_type: Some(DOCKER_MANIFEST_V2.to_string()),
            schema_version: 2,
            config,
            layers,
            extra: Default::default(),
        };
        self.manifests
            .lock()
            .unwrap()
            .insert(tag.to_string(), manifest.clone());
        manifest
    }

    fn insert_blob(&self, content: Bytes, media_type: &str) -> BlobReference {
        let digest = digest_of(&content);
        let reference = BlobReference {
            media_type: media_type.to_string(),
            size: content.len() as u64,
            digest: digest.clone(),
        };
        self.blobs.lock().unwrap().insert(digest, content);
        reference
    }

    pub fn fail_download(&self, digest: &str) {
        self.failing_downloads
            .lock()
            .unwrap()
            .insert(digest.to_string());
    }

    pub fn has_blob(&self, digest: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(digest)
    }
}

#[async_trait::async_trait]
impl RegistryCore for MemoryRegistry {
    fn manifest_reference(&self, tag: &str) -> String {
        format!("memory://local/v2/test/manifests/{}", tag)
    }

    fn registry_base(&self) -> String {
        "memory://local".to_string()
    }

    fn repository(&self) -> &str {
        "test"
    }

    async fn manifest_exists(&self, tag: &str) -> Result<bool> {
        Ok(self.manifests.lock().unwrap().contains_key(tag))
    }

    async fn fetch_manifest(&self, tag: &str) -> Result<Manifest> {
        self.manifests
            .lock()
            .unwrap()
            .get(tag)
            .cloned()
            .ok_or_else(|| ReplicationError::Protocol {
                phase: Phase::ManifestFetch,
                uri: self.manifest_reference(tag),
                status: StatusCode::NOT_FOUND,
                body: String::default(),
            })
    }

    async fn upload_manifest(
        &self,
        tag: &str,
        _manifest: &Manifest,
        manifest_bytes: &[u8],
    ) -> Result<()> {
        let manifest = Manifest::parse(manifest_bytes, None, "memory")?;
        self.manifests
            .lock()
            .unwrap()
            .insert(tag.to_string(), manifest);
        Ok(())
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryRegistry {
    async fn blob_exists(&self, digest: &str) -> Result<bool> {
        Ok(self.has_blob(digest))
    }

    async fn download_blob(&self, blob: &BlobDescriptor) -> Result<BlobStream> {
        if self.failing_downloads.lock().unwrap().contains(&blob.digest) {
            return Err(ReplicationError::Protocol {
                phase: Phase::BlobDownload,
                uri: format!("memory://local/v2/test/blobs/{}", blob.digest),
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: "injected failure".to_string(),
            });
        }
        let content = self.blobs.lock().unwrap().get(&blob.digest).cloned();
        match content {
            Some(content) => {
                let chunks: Vec<Result<Bytes>> = vec![Ok(content)];
                Ok(Box::pin(futures::stream::iter(chunks)))
            }
            None => Err(ReplicationError::Protocol {
                phase: Phase::BlobDownload,
                uri: format!("memory://local/v2/test/blobs/{}", blob.digest),
                status: StatusCode::NOT_FOUND,
                body: String::default(),
            }),
        }
    }

    async fn push_blob(&self, blob: &BlobDescriptor, mut stream: BlobStream) -> Result<u64> {
        let active = self.active_pushes.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_pushes.fetch_max(active, Ordering::SeqCst);
        self.pushes.fetch_add(1, Ordering::SeqCst);

        tokio::time::sleep(self.push_delay).await;
        let mut content = Vec::default();
        let mut result = Ok(());
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(chunk) => content.extend_from_slice(&chunk),
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }

        self.active_pushes.fetch_sub(1, Ordering::SeqCst);
        result?;
        let len = content.len() as u64;
        self.blobs
            .lock()
            .unwrap()
            .insert(blob.digest.clone(), Bytes::from(content));
        Ok(len)
    }
}
