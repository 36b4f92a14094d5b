// moor: attach volumes and elastic IPs to the instance it runs on
use clap::{CommandFactory, Parser, Subcommand};
use color_eyre::eyre::{Report, Result};
use moor_volume::VolumeError;
use std::io::stderr;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

mod cmd;

use cmd::address::AssociateArgs;
use cmd::metadata::MetadataFetchArgs;
use cmd::volume::EnsureVolumeArgs;
use cmd::GlobalArgs;

/// Exit status for bad arguments, matching clap's own
const USAGE_EXIT: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Attach volumes and elastic IPs to this instance",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalArgs,

    /// Verbose output - shows more detailed logs
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print a metadata value to stdout
    MetadataFetch(MetadataFetchArgs),
    /// Attach a volume to this instance and mount it (safe to repeat)
    EnsureVolumeAttached(EnsureVolumeArgs),
    /// Associate an elastic IP with this instance
    AssociateElasticIp(AssociateArgs),
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::MetadataFetch(_) => "metadata-fetch",
            Commands::EnsureVolumeAttached(_) => "ensure-volume-attached",
            Commands::AssociateElasticIp(_) => "associate-elastic-ip",
        }
    }
}

fn log_directives(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    let ours = ["moor", "moor_metadata", "moor_ec2", "moor_volume"]
        .map(|target| format!("{}={}", target, level))
        .join(",");
    format!(
        "{},reqwest=warn,hyper=warn,hyper_util=warn,hickory_resolver=warn,hickory_proto=warn",
        ours
    )
}

fn is_usage_error(report: &Report) -> bool {
    matches!(report.downcast_ref::<VolumeError>(), Some(VolumeError::Usage(_)))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    // RUST_LOG wins over the defaults
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_directives(cli.verbose)));
    registry().with(filter).with(fmt::layer().with_writer(stderr)).init();
    debug!(command = cli.command.name(), "Starting");

    let name = cli.command.name();
    let result = match cli.command {
        Commands::MetadataFetch(args) => cmd::metadata::run_fetch(args, &cli.global).await,
        Commands::EnsureVolumeAttached(args) => {
            // other commands keep the default SIGINT disposition
            let cancel = CancellationToken::new();
            let handler = tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Ctrl+C received, cancelling...");
                        cancel.cancel();
                    }
                }
            });
            let result = cmd::volume::run_ensure(args, &cli.global, cancel).await;
            handler.abort();
            result
        }
        Commands::AssociateElasticIp(args) => cmd::address::run_associate(args, &cli.global).await,
    };

    if let Err(report) = result {
        if is_usage_error(&report) {
            eprintln!("error: {}\n", report);
            if let Some(sub) = Cli::command().find_subcommand_mut(name) {
                eprintln!("{}", sub.render_help());
            }
            std::process::exit(USAGE_EXIT);
        }

        error!("{} failed: {:#}", name, report);
        eprintln!("Error: {:#}", report);
        std::process::exit(1);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::time::Duration;

    #[test]
    #[serial]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    #[serial]
    fn test_parse_ensure_volume_attached() {
        let cli = Cli::try_parse_from([
            "moor",
            "ensure-volume-attached",
            "vol-0123456789abcdef0",
            "/mnt/data",
            "--device-timeout",
            "90",
            "--verbose",
        ])
        .unwrap();

        assert!(cli.verbose);
        assert_eq!(cli.global.aws_cli, "aws");
        match cli.command {
            Commands::EnsureVolumeAttached(args) => {
                assert_eq!(args.volume_id, "vol-0123456789abcdef0");
                assert_eq!(args.mount_point, "/mnt/data");
                assert_eq!(
                    args.attach_config().device_timeout,
                    Some(Duration::from_secs(90))
                );
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_zero_timeout_waits_forever() {
        let cli =
            Cli::try_parse_from(["moor", "ensure-volume-attached", "vol-12345678", "/mnt/data"])
                .unwrap();

        match cli.command {
            Commands::EnsureVolumeAttached(args) => {
                assert!(args.attach_config().device_timeout.is_none())
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    #[serial]
    fn test_environment_fallbacks() {
        std::env::set_var("MOOR_METADATA_ENDPOINT", "http://127.0.0.1:1338");
        std::env::set_var("MOOR_TOKEN_DIR", "/run/moor-test");
        std::env::set_var("MOOR_AWS_CLI", "/opt/aws/bin/aws");

        let cli = Cli::try_parse_from(["moor", "metadata-fetch", "latest/meta-data/ami-id"]);

        std::env::remove_var("MOOR_METADATA_ENDPOINT");
        std::env::remove_var("MOOR_TOKEN_DIR");
        std::env::remove_var("MOOR_AWS_CLI");

        let cli = cli.unwrap();
        let config = cli.global.metadata_config();
        assert_eq!(config.endpoint, "http://127.0.0.1:1338/");
        assert_eq!(config.cache_dir, Some("/run/moor-test".into()));
        assert_eq!(cli.global.aws_cli().program(), "/opt/aws/bin/aws");
    }

    #[test]
    #[serial]
    fn test_missing_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["moor"]).is_err());
        assert!(Cli::try_parse_from(["moor", "ensure-volume-attached", "vol-12345678"]).is_err());
    }

    #[test]
    #[serial]
    fn test_usage_error_detection() {
        let usage: Report = VolumeError::Usage("invalid volume id".to_string()).into();
        assert!(is_usage_error(&usage));

        let other: Report = VolumeError::MountConflict("/mnt/data".to_string()).into();
        assert!(!is_usage_error(&other));
    }

    #[test]
    #[serial]
    fn test_log_directives() {
        assert!(log_directives(false).starts_with("moor=info,"));
        assert!(log_directives(true).contains("moor_volume=debug"));
        assert!(log_directives(true).contains("reqwest=warn"));
        assert!(log_directives(true).starts_with(
            "moor=debug,moor_metadata=debug,moor_ec2=debug,moor_volume=debug,"
        ));
    }
}
