//! Elastic IP association
//!
//! Accepts either a dotted-quad address or a host name. Host names are
//! resolved and the first IPv4 answer is used; the address is then
//! associated with the instance we are running on.

use crate::api::Ec2Api;
use crate::error::AddressError;
use async_trait::async_trait;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use moor_metadata::MetadataClient;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Host name resolution
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Every address the name resolves to, in answer order
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, AddressError>;
}

/// Resolver using the host's DNS configuration
pub struct SystemResolver {
    inner: TokioAsyncResolver,
}

impl SystemResolver {
    /// Build from `/etc/resolv.conf`, falling back to public defaults
    pub fn new() -> Self {
        let inner = TokioAsyncResolver::tokio_from_system_conf().unwrap_or_else(|e| {
            warn!(error = %e, "Cannot read system resolver config, using defaults");
            TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default())
        });
        Self { inner }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, AddressError> {
        let response = self.inner.lookup_ip(host).await.map_err(|e| {
            debug!(host = %host, error = %e, "Lookup failed");
            AddressError::Resolution(host.to_string())
        })?;
        Ok(response.iter().collect())
    }
}

/// Associates a public address with this instance
pub struct AddressAssociator {
    metadata: Arc<MetadataClient>,
    ec2: Arc<dyn Ec2Api>,
    resolver: Arc<dyn HostResolver>,
}

impl AddressAssociator {
    pub fn new(
        metadata: Arc<MetadataClient>,
        ec2: Arc<dyn Ec2Api>,
        resolver: Arc<dyn HostResolver>,
    ) -> Self {
        Self {
            metadata,
            ec2,
            resolver,
        }
    }

    /// Turn the target into a single IPv4 address
    pub async fn resolve_target(&self, target: &str) -> Result<Ipv4Addr, AddressError> {
        if let Ok(address) = target.parse::<Ipv4Addr>() {
            return Ok(address);
        }

        let answers = self.resolver.resolve(target).await?;
        let address = answers
            .into_iter()
            .find_map(|ip| match ip {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .ok_or_else(|| AddressError::Resolution(target.to_string()))?;

        debug!(host = %target, address = %address, "Resolved target");
        Ok(address)
    }

    /// Resolve the target and associate it with this instance
    pub async fn associate(&self, target: &str) -> Result<Ipv4Addr, AddressError> {
        let address = self.resolve_target(target).await?;
        let identity = self.metadata.identity().await?;

        self.ec2.associate_address(&identity, address).await?;
        info!(address = %address, instance = %identity.instance_id, "Elastic IP associated");

        Ok(address)
    }
}
