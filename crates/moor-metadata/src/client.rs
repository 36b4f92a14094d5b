//! Metadata client
//!
//! Authenticated reads from the instance metadata service.
//!
//! Callers may pass either a path (`latest/meta-data/instance-id`) or an
//! absolute URL. Absolute URLs must start with the configured endpoint
//! exactly; anything else is refused before a token is attached, so a
//! caller-supplied value cannot send the token elsewhere.

use crate::config::MetadataConfig;
use crate::error::{MetadataError, Result};
use crate::token::{TokenCache, TOKEN_HEADER};
use crate::types::{IdentityDocument, InstanceId, InstanceIdentity, Region};
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Path of the plain-text instance id
pub const INSTANCE_ID_PATH: &str = "latest/meta-data/instance-id";

/// Path of the JSON identity document
pub const IDENTITY_DOCUMENT_PATH: &str = "latest/dynamic/instance-identity/document";

/// Client for the instance metadata service
#[derive(Debug)]
pub struct MetadataClient {
    http: reqwest::Client,
    endpoint: String,
    tokens: TokenCache,
    identity: OnceCell<InstanceIdentity>,
}

impl MetadataClient {
    /// Create a client from configuration
    pub fn new(config: MetadataConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .no_proxy()
            .build()
            .map_err(|e| MetadataError::Environment(format!("cannot build HTTP client: {}", e)))?;

        let tokens = TokenCache::new(http.clone(), &config);

        Ok(Self {
            http,
            endpoint: config.endpoint,
            tokens,
            identity: OnceCell::new(),
        })
    }

    /// The metadata service base URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Turn a path or absolute URL into a URL on the metadata service
    ///
    /// Absolute URLs are accepted only when prefixed by the endpoint.
    pub fn resolve_url(&self, path_or_url: &str) -> Result<String> {
        if path_or_url.contains("://") {
            if path_or_url.starts_with(&self.endpoint) {
                return Ok(path_or_url.to_string());
            }
            return Err(MetadataError::UntrustedUrl(path_or_url.to_string()));
        }

        Ok(format!(
            "{}{}",
            self.endpoint,
            path_or_url.trim_start_matches('/')
        ))
    }

    /// Fetch a metadata document as raw bytes
    pub async fn fetch(&self, path_or_url: &str) -> Result<Vec<u8>> {
        let url = self.resolve_url(path_or_url)?;
        let token = self.tokens.get_token().await?;

        debug!(url = %url, "Fetching metadata");
        let response = self
            .http
            .get(&url)
            .header(TOKEN_HEADER, token.value())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MetadataError::Unavailable(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Fetch a metadata document as UTF-8 text
    pub async fn fetch_text(&self, path_or_url: &str) -> Result<String> {
        let body = self.fetch(path_or_url).await?;
        String::from_utf8(body).map_err(|e| {
            MetadataError::Unavailable(format!("{} is not valid UTF-8: {}", path_or_url, e))
        })
    }

    /// Read and validate this instance's id
    pub async fn instance_id(&self) -> Result<InstanceId> {
        let body = self.fetch(INSTANCE_ID_PATH).await?;
        let raw = String::from_utf8_lossy(&body);
        InstanceId::parse(&raw)
    }

    /// Read and validate this instance's region
    pub async fn region(&self) -> Result<Region> {
        let body = self.fetch(IDENTITY_DOCUMENT_PATH).await?;
        let document = IdentityDocument::from_slice(&body)?;
        Region::parse(&document.region)
    }

    /// Instance id and region, resolved on first use and then reused
    pub async fn identity(&self) -> Result<InstanceIdentity> {
        let identity = self
            .identity
            .get_or_try_init(|| async {
                let instance_id = self.instance_id().await?;
                let region = self.region().await?;
                info!(instance = %instance_id, region = %region, "Identified instance");
                Ok::<_, MetadataError>(InstanceIdentity::new(instance_id, region))
            })
            .await?;

        Ok(identity.clone())
    }
}
