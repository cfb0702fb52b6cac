//! `stevedore mirror` command.

use clap::Args;
use stevedore_mirror::SyncTarget;

#[derive(Args)]
pub struct MirrorArgs {
    #[command(flatten)]
    pub(crate) common: super::CommonArgs,

    /// Destination registry host (e.g., "registry.example.io:5000")
    #[arg(short, long)]
    pub destination: String,
}

pub async fn execute(args: MirrorArgs) -> Result<(), Box<dyn std::error::Error>> {
    super::run_batch(&args.common, SyncTarget::Registry(args.destination)).await
}
