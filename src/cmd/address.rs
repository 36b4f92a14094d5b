use super::GlobalArgs;
use clap::Args;
use color_eyre::eyre::Result;
use moor_ec2::{AddressAssociator, SystemResolver};
use std::sync::Arc;
use tracing::info;

#[derive(Args, Debug)]
pub struct AssociateArgs {
    /// Host name or dotted-quad IPv4 address of the elastic IP
    pub target: String,
}

pub async fn run_associate(args: AssociateArgs, global: &GlobalArgs) -> Result<()> {
    let associator = AddressAssociator::new(
        global.metadata_client()?,
        Arc::new(global.aws_cli()),
        Arc::new(SystemResolver::new()),
    );

    let address = associator.associate(&args.target).await?;
    info!(target = %args.target, address = %address, "Elastic IP in place");
    Ok(())
}
