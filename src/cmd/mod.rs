//! Subcommands and the options they share

use clap::Args;
use color_eyre::eyre::Result;
use moor_ec2::cli::DEFAULT_PROGRAM;
use moor_ec2::AwsCli;
use moor_metadata::config::DEFAULT_ENDPOINT;
use moor_metadata::{MetadataClient, MetadataConfig};
use std::path::PathBuf;
use std::sync::Arc;

pub mod address;
pub mod metadata;
pub mod volume;

/// Options accepted by every subcommand
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Base URL of the instance metadata service
    #[arg(long, env = "MOOR_METADATA_ENDPOINT", default_value = DEFAULT_ENDPOINT, global = true)]
    pub metadata_endpoint: String,

    /// Directory holding the cached metadata token
    #[arg(long, env = "MOOR_TOKEN_DIR", global = true)]
    pub token_dir: Option<PathBuf>,

    /// Provider command-line client used for compute API calls
    #[arg(long, env = "MOOR_AWS_CLI", default_value = DEFAULT_PROGRAM, global = true)]
    pub aws_cli: String,
}

impl GlobalArgs {
    pub fn metadata_config(&self) -> MetadataConfig {
        let config = MetadataConfig::new(self.metadata_endpoint.as_str());
        match &self.token_dir {
            Some(dir) => config.with_cache_dir(dir.clone()),
            None => config,
        }
    }

    pub fn metadata_client(&self) -> Result<Arc<MetadataClient>> {
        Ok(Arc::new(MetadataClient::new(self.metadata_config())?))
    }

    pub fn aws_cli(&self) -> AwsCli {
        AwsCli::new().with_program(self.aws_cli.as_str())
    }
}
