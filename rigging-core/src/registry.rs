//! Artifact registry access
//!
//! Fetches artifact metadata (published versions and their tarballs) from an
//! npm-compatible registry. The rest of the crate only talks to the
//! [`RegistryClient`] trait so tests can substitute an in-memory registry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

use crate::error::{DispatchError, Result};

/// Official registry
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.npmjs.org";

/// Request timeout for metadata lookups
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Abbreviated metadata document; carries everything needed for install
const ABBREVIATED_METADATA: &str =
    "application/vnd.npm.install-v1+json; q=1.0, application/json; q=0.8";

/// Registry document for one artifact
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Artifact name as published
    #[serde(default)]
    pub name: String,

    /// Named tags such as "latest"
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: HashMap<String, String>,

    /// All published versions, keyed by version string
    #[serde(default)]
    pub versions: BTreeMap<String, VersionMetadata>,
}

/// Metadata for one published version
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VersionMetadata {
    #[serde(default)]
    pub version: String,

    /// Deprecation message, if the publisher deprecated this version
    #[serde(default)]
    pub deprecated: Option<String>,

    /// Where to download the payload
    #[serde(default)]
    pub dist: Option<Dist>,
}

/// Download location and integrity data for a payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dist {
    /// Tarball URL
    pub tarball: String,

    /// Subresource integrity string, e.g. "sha512-<base64>"
    #[serde(default)]
    pub integrity: Option<String>,

    /// Legacy SHA-1 hex digest
    #[serde(default)]
    pub shasum: Option<String>,
}

impl ArtifactMetadata {
    /// Parse a registry document
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    /// Published version strings, in registry order
    pub fn version_list(&self) -> Vec<String> {
        self.versions.keys().cloned().collect()
    }

    /// Metadata for a specific version
    pub fn get_version(&self, version: &str) -> Option<&VersionMetadata> {
        self.versions.get(version)
    }
}

/// Source of artifact metadata
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch the metadata document for `name`
    ///
    /// Returns `Ok(None)` when the registry has never heard of the artifact.
    /// Transport and HTTP failures are returned as errors and never retried.
    async fn fetch_metadata(&self, name: &str) -> Result<Option<ArtifactMetadata>>;

    /// Base URL of the registry, handed to the installer
    fn url(&self) -> &str;
}

/// Registry client speaking HTTP
pub struct HttpRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRegistry {
    /// Create a client for the registry at `base_url`
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(DispatchError::InvalidConfiguration(format!(
                "Registry URL must start with http:// or https:// (got '{base_url}')"
            )));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("rigging/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| {
                DispatchError::InvalidConfiguration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// URL of the metadata document for `name`
    pub fn metadata_url(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, encode_name(name))
    }
}

#[async_trait]
impl RegistryClient for HttpRegistry {
    async fn fetch_metadata(&self, name: &str) -> Result<Option<ArtifactMetadata>> {
        if name.is_empty() {
            return Ok(None);
        }

        let url = self.metadata_url(name);
        debug!("Fetching registry metadata from {}", url);

        let registry_error = |reason: String| DispatchError::Registry {
            name: name.to_string(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .header(reqwest::header::ACCEPT, ABBREVIATED_METADATA)
            .send()
            .await
            .map_err(|e| registry_error(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!("Registry has no document for '{}'", name);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(registry_error(format!("HTTP {status} from {url}")));
        }
        if status != reqwest::StatusCode::OK {
            debug!("Registry answered {} for '{}', treating as unknown", status, name);
            return Ok(None);
        }

        let body = response
            .text()
            .await
            .map_err(|e| registry_error(format!("failed to read response body: {e}")))?;
        if body.trim().is_empty() {
            debug!("Registry returned an empty document for '{}'", name);
            return Ok(None);
        }

        let metadata = ArtifactMetadata::from_json(&body)
            .map_err(|e| registry_error(format!("malformed metadata document: {e}")))?;

        debug!(
            "Registry lists {} versions of '{}'",
            metadata.versions.len(),
            name
        );
        Ok(Some(metadata))
    }

    fn url(&self) -> &str {
        &self.base_url
    }
}

/// Encode an artifact name as a single URL path segment
///
/// Scoped names (`@scope/name`) keep the `@` but escape the separator.
pub fn encode_name(name: &str) -> String {
    name.replace('/', "%2f")
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    fn sample_metadata_json() -> &'static str {
        r#"{
  "name": "@rigging/init",
  "dist-tags": { "latest": "1.1.0" },
  "versions": {
    "1.0.0": {
      "name": "@rigging/init",
      "version": "1.0.0",
      "dist": {
        "tarball": "https://registry.npmjs.org/@rigging/init/-/init-1.0.0.tgz",
        "integrity": "sha512-AAAA"
      }
    },
    "1.1.0": {
      "name": "@rigging/init",
      "version": "1.1.0",
      "deprecated": "use 1.2.x",
      "dist": {
        "tarball": "https://registry.npmjs.org/@rigging/init/-/init-1.1.0.tgz",
        "shasum": "0123abcd"
      }
    }
  }
}"#
    }

    #[test]
    fn test_parse_metadata() {
        let metadata = ArtifactMetadata::from_json(sample_metadata_json()).unwrap();
        assert_eq!(metadata.name, "@rigging/init");
        assert_eq!(metadata.dist_tags.get("latest").unwrap(), "1.1.0");
        assert_eq!(metadata.version_list(), vec!["1.0.0", "1.1.0"]);

        let v110 = metadata.get_version("1.1.0").unwrap();
        assert_eq!(v110.deprecated.as_deref(), Some("use 1.2.x"));
        let dist = v110.dist.as_ref().unwrap();
        assert!(dist.integrity.is_none());
        assert_eq!(dist.shasum.as_deref(), Some("0123abcd"));
    }

    #[test]
    fn test_parse_metadata_without_versions() {
        let metadata = ArtifactMetadata::from_json(r#"{"name": "empty"}"#).unwrap();
        assert!(metadata.version_list().is_empty());
    }

    #[test]
    fn test_metadata_url_encodes_scope() {
        let registry = HttpRegistry::new("https://registry.example.com/").unwrap();
        assert_eq!(
            registry.metadata_url("@rigging/init"),
            "https://registry.example.com/@rigging%2finit"
        );
        assert_eq!(
            registry.metadata_url("demo-cmd"),
            "https://registry.example.com/demo-cmd"
        );
        assert_eq!(registry.url(), "https://registry.example.com");
    }

    /// Serve one canned HTTP response on a local port and return its base URL
    async fn serve_once(response: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_fetch_unknown_artifact_is_none() {
        let url = serve_once(
            "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let registry = HttpRegistry::new(url).unwrap();

        assert!(registry.fetch_metadata("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_server_error_is_registry_error() {
        let url = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let registry = HttpRegistry::new(url).unwrap();

        let result = registry.fetch_metadata("demo-cmd").await;
        assert!(matches!(
            result,
            Err(DispatchError::Registry { ref reason, .. }) if reason.contains("503")
        ));
    }

    #[tokio::test]
    async fn test_fetch_no_content_is_none() {
        let url = serve_once("HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n").await;
        let registry = HttpRegistry::new(url).unwrap();

        assert!(registry.fetch_metadata("demo-cmd").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_empty_body_is_none() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let registry = HttpRegistry::new(url).unwrap();

        assert!(registry.fetch_metadata("demo-cmd").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_parses_document() {
        let url = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 60\r\nConnection: close\r\n\r\n{\"name\":\"demo-cmd\",\"versions\":{\"1.0.0\":{\"version\":\"1.0.0\"}}}",
        )
        .await;
        let registry = HttpRegistry::new(url).unwrap();

        let metadata = registry.fetch_metadata("demo-cmd").await.unwrap().unwrap();
        assert_eq!(metadata.version_list(), vec!["1.0.0"]);
    }

    #[tokio::test]
    async fn test_fetch_unreachable_registry_is_registry_error() {
        // Nothing listens on port 1
        let registry = HttpRegistry::new("http://127.0.0.1:1").unwrap();

        let result = registry.fetch_metadata("demo-cmd").await;
        assert!(matches!(result, Err(DispatchError::Registry { .. })));
    }

    #[test]
    fn test_rejects_non_http_url() {
        let result = HttpRegistry::new("ftp://registry.example.com");
        assert!(matches!(
            result,
            Err(DispatchError::InvalidConfiguration(_))
        ));
    }
}
