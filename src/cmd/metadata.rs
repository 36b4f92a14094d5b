use super::GlobalArgs;
use clap::Args;
use color_eyre::eyre::Result;
use tokio::io::AsyncWriteExt;
use tracing::debug;

#[derive(Args, Debug)]
pub struct MetadataFetchArgs {
    /// Metadata path such as `latest/meta-data/instance-id`, or an absolute
    /// URL on the metadata service
    pub path: String,
}

/// Write the raw response body to stdout
pub async fn run_fetch(args: MetadataFetchArgs, global: &GlobalArgs) -> Result<()> {
    let client = global.metadata_client()?;
    let body = client.fetch(&args.path).await?;
    debug!(path = %args.path, bytes = body.len(), "Fetched metadata");

    let mut stdout = tokio::io::stdout();
    stdout.write_all(&body).await?;
    stdout.flush().await?;
    Ok(())
}
