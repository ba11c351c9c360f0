// SPDX-License-Identifier: GPL-3.0-only

//! ZenFS - drive identity, ghost index and home view management
//!
//! Every subcommand is a one-shot pass except `watcher` and `fuse`, which run
//! until interrupted.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use zenfs_core::lifecycle::AttachOutcome;
use zenfs_core::{
    DriveManager, IndexWatcher, OffloadMover, OffloadOutcome, ReverseIndex, ZenfsContext,
};
use zenfs_sys::{DesktopNotifier, MountTool, StatvfsUsage};
use zenfs_types::{DriveType, Layout, OffloadConfig};
use zenfs_union::{UnionFs, UnionResolver};

mod logging;

#[derive(Debug, Parser)]
#[command(name = "zenfs", version, about = "Roaming home directories across drives")]
struct Cli {
    /// Layout configuration file (overrides $ZENFS_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stage, validate and bind a block device
    Attach { device: String },
    /// Unmount a bound drive by mount point or UUID
    Detach { target: String },
    /// Write a fresh identity onto a device and index it
    Mint {
        device: String,
        label: String,
        #[arg(default_value_t = DriveType::Roaming)]
        drive_type: DriveType,
    },
    /// Attach every eligible partition in parallel
    Checker,
    /// Merge drive indexes and refresh the home view
    Roaming,
    /// Keep the index in step with changes on bound drives
    Watcher,
    /// Move large files off primary storage when it runs full
    Offload {
        /// JSON offload configuration
        #[arg(short = 'c', value_name = "PATH")]
        settings: PathBuf,
    },
    /// Rebuild the ghost index of a mounted drive
    Rebuild { mount: PathBuf, uuid: String },
    /// Link configuration categories into the config tree
    Core,
    /// Serve `source` at `mountpoint` through the union filesystem
    Fuse { source: PathBuf, mountpoint: PathBuf },
}

impl Command {
    fn requires_root(&self) -> bool {
        matches!(
            self,
            Command::Attach { .. }
                | Command::Detach { .. }
                | Command::Mint { .. }
                | Command::Checker
                | Command::Fuse { .. }
        )
    }

    fn long_running(&self) -> bool {
        matches!(self, Command::Watcher | Command::Fuse { .. })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.command.long_running());

    tracing::debug!("zenfs v{}", env!("CARGO_PKG_VERSION"));

    if cli.command.requires_root() && unsafe { libc::geteuid() } != 0 {
        tracing::error!("This command must run as root");
        anyhow::bail!("root privileges required");
    }

    let layout = Layout::load(cli.config.as_deref())?;
    let ctx = ZenfsContext::load(layout);

    match cli.command {
        Command::Attach { device } => {
            let mounter = MountTool::new()?;
            let outcome = DriveManager::new(&ctx, &mounter, &DesktopNotifier)
                .attach(&device, true)
                .with_context(|| format!("attaching {device}"))?;
            report_attach(&device, &outcome);
        }
        Command::Detach { target } => {
            let mounter = MountTool::new()?;
            let detached = DriveManager::new(&ctx, &mounter, &DesktopNotifier)
                .detach(&target)
                .with_context(|| format!("detaching {target}"))?;
            if !detached {
                anyhow::bail!("{target} could not be detached");
            }
        }
        Command::Mint {
            device,
            label,
            drive_type,
        } => {
            let mounter = MountTool::new()?;
            let record = DriveManager::new(&ctx, &mounter, &DesktopNotifier)
                .mint(&device, &label, drive_type)
                .with_context(|| format!("minting {device}"))?;
            println!("{}", record.uuid);
        }
        Command::Checker => {
            let mounter = MountTool::new()?;
            let results = DriveManager::new(&ctx, &mounter, &DesktopNotifier).checker()?;
            for (device, outcome) in &results {
                report_attach(device, outcome);
            }
            tracing::info!(
                "Checker finished: {} of {} devices bound",
                results.iter().filter(|(_, o)| o.is_bound()).count(),
                results.len()
            );
        }
        Command::Roaming => {
            let report = zenfs_core::roaming::sync(&ctx, &DesktopNotifier)?;
            match report.links {
                Some(links) => tracing::info!(
                    "Merged {} entries; links: {} created, {} updated, {} removed",
                    report.merged,
                    links.created,
                    links.updated,
                    links.removed
                ),
                None => tracing::info!(
                    "Merged {} entries; union filesystem serves the view",
                    report.merged
                ),
            }
        }
        Command::Watcher => {
            IndexWatcher::new(ctx).run().await?;
        }
        Command::Offload { settings } => {
            let content = std::fs::read_to_string(&settings)
                .with_context(|| format!("reading {}", settings.display()))?;
            let config = OffloadConfig::from_json(&content)
                .with_context(|| format!("parsing {}", settings.display()))?;
            let report = OffloadMover::new(&ctx, &StatvfsUsage, config).run();
            tracing::info!(
                "Offload {:?}: moved {} files ({} bytes), {} failed",
                report.outcome,
                report.moved,
                report.bytes,
                report.failed
            );
            if report.outcome == OffloadOutcome::Saturated {
                anyhow::bail!("no roaming drive can accept more data");
            }
        }
        Command::Rebuild { mount, uuid } => {
            let _lock = ctx.lock_index()?;
            let stats = zenfs_core::builder::rebuild(&mount, &uuid, &ctx.rules)?;
            tracing::info!(
                "Rebuilt index of {}: {} users, {} entries, {} skipped",
                uuid,
                stats.users,
                stats.entries,
                stats.skipped
            );
        }
        Command::Core => {
            let created = zenfs_core::config_links::sync_categories(&ctx.layout)?;
            tracing::info!("Config categories synced, {} new links", created);
        }
        Command::Fuse { source, mountpoint } => serve(ctx, source, mountpoint).await?,
    }

    Ok(())
}

/// Mount the union filesystem and block until interrupted.
async fn serve(ctx: ZenfsContext, source: PathBuf, mountpoint: PathBuf) -> Result<()> {
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to wait for shutdown signal: {}", e);
        }
    };

    if mountpoint != ctx.layout.users_mount {
        tracing::info!("Mirroring {:?} at {:?}", source, mountpoint);
        let fs = UnionFs::new(UnionResolver::mirror(source, ctx));
        let session = zenfs_union::spawn_mount(fs, &mountpoint)?;
        shutdown.await;
        drop(session);
        return Ok(());
    }

    tracing::info!("Serving union view of {:?} at {:?}", source, mountpoint);
    let reverse = ReverseIndex::load(&ctx.layout.database).shared();
    let watcher = IndexWatcher::new(ctx.clone()).with_reverse_index(reverse.clone());
    let fs = UnionFs::new(UnionResolver::union(source, ctx, Some(reverse)));
    let session = zenfs_union::spawn_mount(fs, &mountpoint)?;

    let result = watcher.run_until(shutdown).await;
    tracing::info!("Unmounting {:?}", mountpoint);
    drop(session);
    Ok(result?)
}

fn report_attach(device: &str, outcome: &AttachOutcome) {
    match outcome {
        AttachOutcome::Bound { uuid, healed } => {
            tracing::info!("{device}: bound as {uuid}{}", if *healed { " (healed)" } else { "" })
        }
        AttachOutcome::SystemDrive { uuid } => tracing::info!("{device}: system drive {uuid}"),
        AttachOutcome::AlreadyBound { mount_point } => {
            tracing::info!("{device}: already bound at {:?}", mount_point)
        }
        AttachOutcome::SystemRoot => tracing::info!("{device}: hosts the root filesystem, skipped"),
        AttachOutcome::InUse { mount_point } => {
            tracing::warn!("{device}: in use at {:?}, skipped", mount_point)
        }
        AttachOutcome::Discarded => tracing::info!("{device}: no ZenFS identity, ignored"),
    }
}
