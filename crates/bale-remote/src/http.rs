use crate::{OciReference, RemoteConfig, RemoteError, Transport};
use bale_store::{LayerDescriptor, RootManifest, MEDIA_TYPE_OCI_MANIFEST};
use std::io::Read;

/// Transport for an OCI distribution registry.
///
/// Uses the read side of the distribution API:
/// - `GET /v2/<repository>/manifests/<reference>` for the root manifest
/// - `GET /v2/<repository>/blobs/sha256:<hex>` for layer blobs
pub struct HttpTransport {
    config: RemoteConfig,
    reference: OciReference,
    agent: ureq::Agent,
}

impl HttpTransport {
    pub fn new(reference: OciReference, config: RemoteConfig) -> Self {
        let agent = ureq::Agent::new_with_defaults();
        Self {
            config,
            reference,
            agent,
        }
    }

    fn base_url(&self) -> String {
        if self.config.url.is_empty() {
            let scheme = if self.config.plain_http {
                "http"
            } else {
                "https"
            };
            format!("{scheme}://{}", self.reference.registry)
        } else {
            self.config.url.clone()
        }
    }

    fn manifest_url(&self) -> String {
        format!(
            "{}/v2/{}/manifests/{}",
            self.base_url(),
            self.reference.repository,
            self.reference.reference
        )
    }

    fn blob_url(&self, desc: &LayerDescriptor) -> String {
        format!(
            "{}/v2/{}/blobs/{}",
            self.base_url(),
            self.reference.repository,
            desc.digest.to_oci()
        )
    }

    fn do_get(&self, url: &str, accept: &str) -> Result<ureq::http::Response<ureq::Body>, RemoteError> {
        let mut req = self.agent.get(url).header("Accept", accept);
        if let Some(ref token) = self.config.auth_token {
            req = req.header("Authorization", &format!("Bearer {token}"));
        }
        match req.call() {
            Ok(resp) => Ok(resp),
            Err(ureq::Error::StatusCode(404)) => Err(RemoteError::NotFound(url.to_owned())),
            Err(ureq::Error::StatusCode(code @ (401 | 403))) => Err(RemoteError::Config(format!(
                "HTTP {code} for {url}: check auth_token"
            ))),
            Err(ureq::Error::StatusCode(code)) => {
                Err(RemoteError::Http(format!("HTTP {code} for {url}")))
            }
            Err(ureq::Error::Io(e)) => Err(RemoteError::Io(e)),
            Err(e) => Err(RemoteError::Http(e.to_string())),
        }
    }
}

impl Transport for HttpTransport {
    fn location(&self) -> String {
        self.reference.to_string()
    }

    fn fetch_root(&self) -> Result<RootManifest, RemoteError> {
        let url = self.manifest_url();
        tracing::debug!("GET {url}");
        let resp = self.do_get(&url, MEDIA_TYPE_OCI_MANIFEST)?;
        let mut body = Vec::new();
        resp.into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|e| RemoteError::Http(e.to_string()))?;
        RootManifest::from_json(&body)
            .map_err(|e| RemoteError::Serialization(format!("invalid root manifest: {e}")))
    }

    fn open_blob(&self, desc: &LayerDescriptor) -> Result<Box<dyn Read + Send>, RemoteError> {
        let url = self.blob_url(desc);
        tracing::debug!("GET {url}");
        let resp = self.do_get(&url, "application/octet-stream")?;
        Ok(Box::new(resp.into_body().into_reader()))
    }
}
