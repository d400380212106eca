//! DSvn Working Copy CLI

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use dsvn_patch::{Callbacks, Notification, PatchOptions, apply_patch_file};
use dsvn_wc::{CancelFlag, Depth, NodeInfo, WcConfig, WcDb, workqueue};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "dsvn-wc")]
#[command(author = "DSvn Contributors")]
#[command(version)]
#[command(about = "DSvn working copy administration and patch tool", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a working copy holding only its root directory
    Init {
        path: PathBuf,
        /// Repository root URL
        #[arg(long)]
        url: String,
        /// Path of the root within the repository
        #[arg(long, default_value = "")]
        relpath: String,
        /// Repository UUID (generated when omitted)
        #[arg(long)]
        uuid: Option<String>,
        #[arg(short, long, default_value_t = 0)]
        revision: i64,
    },

    /// Show what the working copy records for a path
    Info { path: PathBuf },

    /// Apply a unified diff to a working copy
    Patch {
        patchfile: PathBuf,
        /// Working copy root
        #[arg(long, default_value = ".")]
        wc: PathBuf,
        /// Leading path components to remove from target names
        #[arg(short = 'p', long, default_value_t = 0)]
        strip: usize,
        #[arg(long)]
        reverse: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        ignore_whitespace: bool,
        /// Highest fuzz level to try (0..=2)
        #[arg(long)]
        fuzz: Option<usize>,
    },

    /// Run pending work queue items
    Cleanup { path: PathBuf },

    /// Remove a stale working copy lock
    Unlock { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = if cli.debug {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    match cli.command {
        Commands::Init { path, url, relpath, uuid, revision } => {
            let path = absolute(&path)?;
            let uuid = uuid.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let root = path.clone();
            tokio::task::spawn_blocking(move || {
                WcDb::new().init(&root, &relpath, &url, &uuid, revision, Depth::Infinity)
            })
            .await??;
            println!("Initialized working copy at {}", path.display());
        }

        Commands::Info { path } => {
            let path = absolute(&path)?;
            let node = path.clone();
            let info = tokio::task::spawn_blocking(move || WcDb::open(&node)?.read_info(&node))
                .await?
                .with_context(|| format!("Failed to read {}", path.display()))?;
            print_info(&path, &info);
        }

        Commands::Patch { patchfile, wc, strip, reverse, dry_run, ignore_whitespace, fuzz } => {
            let patchfile = absolute(&patchfile)?;
            let wc = absolute(&wc)?;
            let config = WcConfig::load(&wc)?;
            let mut options = PatchOptions::from_config(&config);
            options.strip_count = strip;
            options.reverse = reverse;
            options.dry_run = dry_run;
            options.ignore_whitespace = ignore_whitespace;
            if let Some(fuzz) = fuzz {
                options.max_fuzz = fuzz;
            }

            let cancel = CancelFlag::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, stopping after the current target");
                    on_signal.cancel();
                }
            });

            let report = tokio::task::spawn_blocking(move || -> Result<dsvn_patch::PatchReport> {
                let db = WcDb::open(&wc)?;
                let print = |n: &Notification| {
                    let line = n.to_string();
                    if !line.is_empty() {
                        println!("{}", line);
                    }
                };
                let callbacks = Callbacks { notify: Some(&print), filter: None, cancel: Some(&cancel) };
                apply_patch_file(&db, &patchfile, &wc, &options, &callbacks)
                    .with_context(|| format!("Failed to apply {}", patchfile.display()))
            })
            .await??;

            let rejected = report.targets.iter().filter(|t| t.had_rejects).count();
            if rejected > 0 {
                println!("Summary of conflicts:");
                println!("  Text conflicts: {}", rejected);
            }
        }

        Commands::Cleanup { path } => {
            let path = absolute(&path)?;
            let done = tokio::task::spawn_blocking(move || -> Result<usize> {
                let db = WcDb::open(&path)?;
                let root = db.segment_root(&path)?;
                let _lock = db.acquire_write_lock(&root, -1)?;
                Ok(workqueue::run(&db, &root, None)?)
            })
            .await??;
            info!("Ran {} work queue items", done);
        }

        Commands::Unlock { path } => {
            let path = absolute(&path)?;
            let dir = path.clone();
            tokio::task::spawn_blocking(move || WcDb::open(&dir)?.wclock_remove(&dir)).await??;
            println!("Unlocked {}", path.display());
        }
    }

    Ok(())
}

fn absolute(path: &Path) -> Result<PathBuf> {
    let path = std::path::absolute(path).with_context(|| format!("Invalid path {}", path.display()))?;
    if path.as_os_str().is_empty() {
        bail!("Empty path");
    }
    Ok(path)
}

fn format_date(micros: i64) -> String {
    DateTime::<Utc>::from_timestamp_micros(micros)
        .map(|d| d.format("%Y-%m-%d %H:%M:%S %z").to_string())
        .unwrap_or_else(|| micros.to_string())
}

fn print_info(path: &Path, info: &NodeInfo) {
    println!("Path: {}", path.display());
    println!("Node Kind: {:?}", info.kind);
    println!("Status: {:?}", info.status);
    if let (Some(root), Some(relpath)) = (&info.repos_root_url, &info.repos_relpath) {
        if relpath.is_empty() {
            println!("URL: {}", root);
        } else {
            println!("URL: {}/{}", root.trim_end_matches('/'), relpath);
        }
        println!("Repository Root: {}", root);
    }
    if let Some(uuid) = &info.repos_uuid {
        println!("Repository UUID: {}", uuid);
    }
    if let Some(rev) = info.revision {
        println!("Revision: {}", rev);
    }
    if let Some(depth) = info.depth {
        println!("Depth: {:?}", depth);
    }
    if let Some(original) = &info.original {
        println!("Copied From: {}/{}@{}", original.root_url.trim_end_matches('/'), original.repos_relpath, original.revision);
    }
    if let Some(author) = &info.changed.author {
        println!("Last Changed Author: {}", author);
    }
    if let Some(rev) = info.changed.rev {
        println!("Last Changed Rev: {}", rev);
    }
    if let Some(date) = info.changed.date {
        println!("Last Changed Date: {}", format_date(date));
    }
    if let Some(checksum) = &info.checksum {
        println!("Checksum: {}", checksum);
    }
    if let Some(target) = &info.target {
        println!("Symlink Target: {}", target);
    }
    if let Some(changelist) = &info.changelist {
        println!("Changelist: {}", changelist);
    }
    if let Some(lock) = &info.lock {
        println!("Lock Token: {}", lock.token);
        if let Some(owner) = &lock.owner {
            println!("Lock Owner: {}", owner);
        }
        if let Some(date) = lock.date {
            println!("Lock Created: {}", format_date(date));
        }
        if let Some(comment) = &lock.comment {
            println!("Lock Comment: {}", comment);
        }
    }
    if info.props_mod {
        println!("Properties: modified");
    }
    if info.conflicted {
        println!("Tree or text conflict recorded");
    }
}
