//! CloudKinds operator - notifies cloud providers of resource changes

use clap::{Parser, Subcommand};

mod config;
mod startup;

use cloudkinds_common::telemetry::init_logging;

use crate::config::{ControllerArgs, Settings};

/// CloudKinds - watches cloud resource kinds and notifies their providers
#[derive(Parser, Debug)]
#[command(name = "cloudkinds", version, about, long_about = None)]
struct Cli {
    /// Print the CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    args: ControllerArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Registers every configured kind, then watches them and posts a
    /// resource event to the CloudProvider handling each kind.
    Controller,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();
    let settings = Settings::load(&cli.args)?;

    if cli.crd {
        println!("{}", startup::render_crds(&settings.kinds)?);
        return Ok(());
    }

    init_logging(cli.args.log_format)?;
    tracing::info!(
        kinds = ?settings.kinds.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
        "CloudKinds operator starting"
    );

    match cli.command {
        Some(Commands::Controller) | None => startup::run_controller(settings).await,
    }
}
