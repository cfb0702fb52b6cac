//! CLI command definitions and dispatch.

mod mirror;
mod sync;
mod version;

use std::path::Path;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use stevedore_core::config::CommonConfig;
use stevedore_mirror::{
    FilterSet, RegistryAuth, RegistryTransport, SignaturePolicy, SyncOptions, SyncTarget, Syncer,
    SystemContext,
};

/// Stevedore — mirror and archive container images.
#[derive(Parser)]
#[command(name = "stevedore", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Sync images from registries into a local OCI layout tree
    Sync(sync::SyncArgs),
    /// Mirror images from one registry into another
    Mirror(mirror::MirrorArgs),
    /// Show version information
    Version,
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Sync(args) => sync::execute(args).await,
        Command::Mirror(args) => mirror::execute(args).await,
        Command::Version => version::execute(),
    }
}

/// Flags shared by the batch copy commands.
#[derive(Args, Clone)]
pub(crate) struct CommonArgs {
    /// Image list file, one reference per line
    #[arg(short, long)]
    pub file: std::path::PathBuf,

    /// Architecture list of images
    #[arg(short, long, value_delimiter = ',',
          default_values_t = [String::from("amd64"), String::from("arm64")])]
    pub arch: Vec<String>,

    /// OS list of images
    #[arg(long, value_delimiter = ',', default_values_t = [String::from("linux")])]
    pub os: Vec<String>,

    /// Variant list of images; empty selects every variant
    #[arg(long, value_delimiter = ',')]
    pub variant: Vec<String>,

    /// Worker number, copy images in parallel
    #[arg(short, long, default_value_t = 1)]
    pub jobs: usize,

    /// Timeout in seconds when copying each image
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,

    /// Require HTTPS and verify certificates
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub tls_verify: bool,

    /// Do not copy existing signatures
    #[arg(long)]
    pub remove_signatures: bool,

    /// Sigstore private key file used to sign copied images
    #[arg(long)]
    pub sigstore_key: Option<std::path::PathBuf>,

    /// File holding the sigstore key passphrase
    #[arg(long)]
    pub sigstore_passphrase_file: Option<std::path::PathBuf>,

    /// File name of the failed image list
    #[arg(short = 'o', long, default_value = "sync-failed.txt")]
    pub failed: std::path::PathBuf,
}

/// Read an image list file: one reference per line; blank lines and
/// `#` / `//` comments are skipped.
pub(crate) fn parse_image_list(path: &Path) -> std::io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with("//"))
        .map(str::to_string)
        .collect())
}

/// Run one batch copy against a target and report the outcome.
pub(crate) async fn run_batch(
    common: &CommonArgs,
    target: SyncTarget,
) -> Result<(), Box<dyn std::error::Error>> {
    let references = parse_image_list(&common.file)?;
    if references.is_empty() {
        return Err(format!("image list {} is empty", common.file.display()).into());
    }

    let sigstore_passphrase = match &common.sigstore_passphrase_file {
        Some(path) => Some(std::fs::read_to_string(path)?.trim_end().as_bytes().to_vec()),
        None => None,
    };
    let config = CommonConfig {
        arch: common.arch.clone(),
        os: common.os.clone(),
        variant: common.variant.clone(),
        jobs: common.jobs,
        timeout_secs: common.timeout,
        tls_verify: common.tls_verify,
    };
    let source_ctx = SystemContext {
        auth: RegistryAuth::from_env(),
        tls_verify: config.tls_verify,
    };
    let options = SyncOptions {
        filter: FilterSet::new(config.arch.clone(), config.os.clone(), config.variant.clone()),
        policy: SignaturePolicy::InsecureAcceptAnything,
        workers: config.workers(),
        timeout: config.timeout(),
        remove_signatures: common.remove_signatures,
        sigstore_private_key: common.sigstore_key.clone(),
        sigstore_passphrase,
        dest_ctx: source_ctx.clone(),
        source_ctx,
    };
    tracing::info!(arch = ?config.arch, os = ?config.os, "starting batch copy");

    let syncer = Syncer::new(Arc::new(RegistryTransport::new()), target, options);
    let report = syncer.run(&references).await;

    for image in &report.images {
        println!(
            "copied: {}:{} [{} variant(s)]",
            image.source,
            image.tag,
            image.images.len()
        );
    }
    for reference in &report.skipped {
        println!("skipped (no matching platform): {reference}");
    }
    if !report.failed.is_empty() {
        std::fs::write(&common.failed, report.failed.join("\n") + "\n")?;
        return Err(format!(
            "{} image(s) failed; list written to {}",
            report.failed.len(),
            common.failed.display()
        )
        .into());
    }
    Ok(())
}
