use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use seqlift_protocol::{UploadEvent, UserCredentials};
use seqlift_upload::config::default_credentials_path;
use seqlift_upload::{UploadOrchestrator, UploaderConfig};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to <config dir>/seqlift/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Package and upload every sequence of an image directory
    Upload {
        /// Directory the descriptor paths are relative to
        #[arg(long)]
        image_dir: PathBuf,
        /// Description file: JSON array of image descriptors
        #[arg(long)]
        desc: PathBuf,
        #[arg(long)]
        org: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Upload an existing sequence archive
    UploadZip {
        zip: PathBuf,
        #[command(flatten)]
        run: RunArgs,
    },
    /// Package sequences into archives without uploading
    Zip {
        #[arg(long)]
        image_dir: PathBuf,
        #[arg(long)]
        desc: PathBuf,
        /// Output directory for the archives
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// User record with SettingsUsername and user_upload_token
    #[arg(long)]
    user: Option<PathBuf>,
    /// Run the whole flow without network access
    #[arg(long)]
    dry_run: bool,
    /// Print upload events as JSON lines on stdout
    #[arg(long)]
    ipc: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,seqlift=debug")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => UploaderConfig::load_from(path)?,
        None => UploaderConfig::load()?,
    };

    match cli.command {
        Commands::Upload {
            image_dir,
            desc,
            org,
            project,
            run,
        } => {
            let descs = read_descriptors(&desc)?;
            let credentials = read_credentials(run.user.as_deref())?;
            let (orch, printer) = orchestrator(config, &run)?;
            let outcomes = orch
                .upload_image_dir_and_description(
                    &image_dir,
                    &descs,
                    &credentials,
                    org.as_deref(),
                    project.as_deref(),
                )
                .await?;
            finish(orch, printer).await;
            for outcome in outcomes {
                info!(
                    sequence = %outcome.sequence_uuid,
                    count = outcome.info.count,
                    size_mib = format_args!("{:.2}", outcome.info.size),
                    hash = %outcome.info.hash,
                    "sequence done"
                );
            }
        }
        Commands::UploadZip { zip, run } => {
            let credentials = read_credentials(run.user.as_deref())?;
            let (orch, printer) = orchestrator(config, &run)?;
            let hash = orch.upload_zipfile(&zip, &credentials).await?;
            finish(orch, printer).await;
            info!(zip = %zip.display(), hash = %hash, "archive uploaded");
        }
        Commands::Zip {
            image_dir,
            desc,
            out,
        } => {
            let descs = read_descriptors(&desc)?;
            let orch = UploadOrchestrator::dry_run(config);
            for path in orch.zip_image_dir(&image_dir, &descs, &out).await? {
                println!("{}", path.display());
            }
        }
    }
    Ok(())
}

/// Builds the orchestrator and wires up Ctrl-C and the `--ipc` event stream.
fn orchestrator(
    config: UploaderConfig,
    run: &RunArgs,
) -> anyhow::Result<(UploadOrchestrator, Option<JoinHandle<()>>)> {
    let mut orch = if run.dry_run {
        UploadOrchestrator::dry_run(config)
    } else {
        UploadOrchestrator::new(config)?
    };

    let cancel = orch.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, stopping at the next chunk boundary");
            cancel.cancel();
        }
    });

    let printer = if run.ipc {
        orch.take_events().map(|events| tokio::spawn(print_events(events)))
    } else {
        None
    };
    Ok((orch, printer))
}

/// Drops the orchestrator so the event stream ends, then waits for the
/// printer to flush it.
async fn finish(orch: UploadOrchestrator, printer: Option<JoinHandle<()>>) {
    drop(orch);
    if let Some(printer) = printer {
        let _ = printer.await;
    }
}

async fn print_events(mut events: mpsc::Receiver<UploadEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!("failed to encode event: {e}"),
        }
    }
}

fn read_descriptors(path: &Path) -> anyhow::Result<Vec<Value>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read description file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of descriptors", path.display()))
}

fn read_credentials(path: Option<&Path>) -> anyhow::Result<UserCredentials> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_credentials_path().context("no config directory for the user record")?,
    };
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read user record {}", path.display()))?;
    let value: Value = serde_json::from_str(&content)?;
    Ok(UserCredentials::from_value(value)?)
}
