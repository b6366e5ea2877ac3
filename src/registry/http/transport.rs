use std::sync::Arc;
use std::time::{Duration, SystemTime};

use http::{Request, Response, Uri};
use hyper::client::HttpConnector;
use hyper::{Body, Client};
use hyper_rustls::ConfigBuilderExt;
use tokio::time::{timeout_at, Instant};

use crate::config::{TransportConfig, MAX_TIMEOUT_SECS};
use crate::errors::{Phase, ReplicationError, Result, TransportFailure};

type HttpCli = Client<hyper_rustls::HttpsConnector<HttpConnector>>;

/// Accepts any server certificate. Only installed when the operator turned
/// verification off.
struct NoCertificateVerification;

impl rustls::client::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::Certificate,
        _intermediates: &[rustls::Certificate],
        _server_name: &rustls::ServerName,
        _scts: &mut dyn Iterator<Item = &[u8]>,
        _ocsp_response: &[u8],
        _now: SystemTime,
    ) -> std::result::Result<rustls::client::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::ServerCertVerified::assertion())
    }
}

fn max_timeout() -> Duration {
    Duration::from_secs(MAX_TIMEOUT_SECS)
}

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    pub at: Instant,
    pub budget: Duration,
}

impl Deadline {
    pub fn timed_out(&self, phase: Phase, uri: impl ToString) -> ReplicationError {
        ReplicationError::transport(phase, uri, TransportFailure::TimedOut(self.budget))
    }
}

/// Shared HTTP client. One instance serves every endpoint and every
/// concurrent transfer of a migration, the connection pool inside is safe for
/// concurrent use.
pub struct Transport {
    http_client: HttpCli,
    request_timeout: Duration,
}

impl Transport {
    pub fn new(config: &TransportConfig) -> Transport {
        let tls = if config.verify_tls {
            rustls::ClientConfig::builder()
                .with_safe_defaults()
                .with_native_roots()
                .with_no_client_auth()
        } else {
            tracing::warn!("TLS certificate verification is disabled");
            rustls::ClientConfig::builder()
                .with_safe_defaults()
                .with_custom_certificate_verifier(Arc::new(NoCertificateVerification))
                .with_no_client_auth()
        };

        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_connect_timeout(Some(config.connect_timeout().min(max_timeout())));

        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http);

        let http_client: HttpCli = Client::builder().build::<_, hyper::Body>(https);
        Transport {
            http_client,
            request_timeout: config.request_timeout().min(max_timeout()),
        }
    }

    /// Deadline for an exchange starting now. Covers sending the request
    /// body, receiving headers and draining the response body.
    pub fn deadline(&self) -> Deadline {
        let now = Instant::now();
        let at = now
            .checked_add(self.request_timeout)
            .or_else(|| now.checked_add(max_timeout()))
            .unwrap_or(now);
        Deadline {
            at,
            budget: self.request_timeout,
        }
    }

    pub async fn send(
        &self,
        phase: Phase,
        request: Request<Body>,
        deadline: Deadline,
    ) -> Result<Response<Body>> {
        let uri: Uri = request.uri().clone();
        tracing::trace!("{} {} ({})", request.method(), uri, phase);
        match timeout_at(deadline.at, self.http_client.request(request)).await {
            Err(_) => Err(deadline.timed_out(phase, uri)),
            Ok(Err(e)) => Err(ReplicationError::transport(phase, uri, e)),
            Ok(Ok(r)) => Ok(r),
        }
    }
}
