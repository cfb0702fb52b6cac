//! `stevedore sync` command.

use clap::Args;
use stevedore_mirror::SyncTarget;

#[derive(Args)]
pub struct SyncArgs {
    #[command(flatten)]
    pub(crate) common: super::CommonArgs,

    /// Destination directory of the OCI layout tree
    #[arg(short, long, default_value = "saved-images")]
    pub destination: std::path::PathBuf,
}

pub async fn execute(args: SyncArgs) -> Result<(), Box<dyn std::error::Error>> {
    super::run_batch(&args.common, SyncTarget::OciLayout(args.destination)).await
}
