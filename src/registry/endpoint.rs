use http::header::HeaderValue;
use http::Uri;

use crate::config::{Credential, ImageLocation};
use crate::errors::{ReplicationError, Result};
use crate::hash::validate_digest;

/// A registry base url plus a repository path, with the static credential
/// used for every request against it.
#[derive(Clone)]
pub struct RegistryEndpoint {
    registry_uri: Uri,
    repository: String,
    authorization: Option<HeaderValue>,
}

impl std::fmt::Debug for RegistryEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEndpoint")
            .field("registry_uri", &self.registry_uri)
            .field("repository", &self.repository)
            .field("authorization", &self.authorization.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn invalid(e: impl std::fmt::Display) -> ReplicationError {
    ReplicationError::InvalidReference(e.to_string())
}

impl RegistryEndpoint {
    pub fn new<S: AsRef<str>, S2: AsRef<str>>(
        registry_base: S,
        repository: S2,
        credential: Option<&Credential>,
    ) -> Result<RegistryEndpoint> {
        let mut uri_parts = registry_base
            .as_ref()
            .trim_end_matches('/')
            .parse::<Uri>()
            .map_err(|e| invalid(format!("{:?}: {}", registry_base.as_ref(), e)))?
            .into_parts();
        // default to using https
        if uri_parts.scheme.is_none() {
            uri_parts.scheme = Some(http::uri::Scheme::HTTPS);
        }
        if uri_parts.authority.is_none() {
            return Err(invalid(format!(
                "registry {:?} has no host",
                registry_base.as_ref()
            )));
        }
        uri_parts.path_and_query = Some(http::uri::PathAndQuery::from_static("/"));
        let registry_uri = Uri::from_parts(uri_parts).map_err(invalid)?;

        // one canonical form: no leading or trailing slash, joined with a single '/'
        let repository = repository.as_ref().trim_matches('/').to_string();
        if repository.is_empty() {
            return Err(invalid("repository path is empty"));
        }

        let authorization = match credential {
            Some(c) => {
                let mut value = HeaderValue::from_str(&c.authorization_header())
                    .map_err(|_| invalid("credential cannot be used as a header value"))?;
                value.set_sensitive(true);
                Some(value)
            }
            None => None,
        };

        Ok(RegistryEndpoint {
            registry_uri,
            repository,
            authorization,
        })
    }

    pub fn from_location(location: &ImageLocation) -> Result<RegistryEndpoint> {
        Self::new(
            &location.registry,
            &location.repository,
            location.credential.as_ref(),
        )
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn authorization(&self) -> Option<&HeaderValue> {
        self.authorization.as_ref()
    }

    /// The registry base without a trailing slash, e.g. `https://harbor.local:10080`.
    pub fn registry_base(&self) -> String {
        self.registry_uri.to_string().trim_end_matches('/').to_string()
    }

    fn v2_from_path<S: AsRef<str>>(&self, path: S) -> Result<Uri> {
        let mut uri_builder = self.registry_uri.clone().into_parts();
        let path_ext = path.as_ref();
        if !path_ext.is_empty() && !path_ext.starts_with('/') {
            return Err(invalid("Invalid path reference, should start in a /"));
        }
        uri_builder.path_and_query = Some(
            format!("/v2{}", path_ext)
                .try_into()
                .map_err(|e: http::uri::InvalidUri| invalid(format!("{}: {}", path_ext, e)))?,
        );

        Uri::from_parts(uri_builder).map_err(invalid)
    }

    fn repository_uri_from_path<S: AsRef<str>>(&self, path: S) -> Result<Uri> {
        let path_ext = path.as_ref();
        if !path_ext.starts_with('/') {
            return Err(invalid("Invalid path reference, should start in a /"));
        }
        self.v2_from_path(format!("/{}{}", self.repository, path_ext))
    }

    pub fn manifest_uri(&self, tag: &str) -> Result<Uri> {
        if tag.is_empty() || tag.contains('/') {
            return Err(invalid(format!("{:?} is not a valid tag", tag)));
        }
        self.repository_uri_from_path(format!("/manifests/{}", tag))
    }

    pub fn blob_uri(&self, digest: &str) -> Result<Uri> {
        validate_digest(digest)?;
        self.repository_uri_from_path(format!("/blobs/{}", digest))
    }

    pub fn upload_session_uri(&self) -> Result<Uri> {
        self.repository_uri_from_path("/blobs/uploads/")
    }

    /// Builds the commit target from an upload session `Location` header.
    /// The location may be relative, in which case it is resolved against the
    /// uri the session was opened with.
    pub fn commit_uri(&self, session_uri: &Uri, location: &str, digest: &str) -> Result<Uri> {
        validate_digest(digest)?;
        let chr = if location.contains('?') { '&' } else { '?' };
        let location_uri = format!("{}{}digest={}", location, chr, digest)
            .parse::<Uri>()
            .map_err(|e| {
                invalid(format!(
                    "Unable to parse location header response when doing post for new upload, location header was {:?}: {}",
                    location, e
                ))
            })?;

        // Sometimes we can receive new URI's that don't contain hosts
        // we need to supply this information from the last URI we used in that case
        if location_uri.host().is_some() {
            Ok(location_uri)
        } else {
            let mut parts = session_uri.clone().into_parts();
            parts.path_and_query = location_uri.path_and_query().cloned();
            Uri::from_parts(parts).map_err(|e| {
                invalid(format!(
                    "Constructed an invalid uri from parts, new uri: {:?}: {}",
                    location_uri, e
                ))
            })
        }
    }

    /// Human facing reference of a tagged manifest, `<registry>/v2/<path>/manifests/<tag>`.
    pub fn manifest_reference(&self, tag: &str) -> String {
        format!(
            "{}/v2/{}/manifests/{}",
            self.registry_base(),
            self.repository,
            tag
        )
    }
}
