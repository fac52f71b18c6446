//! vaporfs - mount an ephemeral in-memory filesystem.
//!
//! Everything written under the mount point lives in RAM and is
//! discarded on unmount.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use vapor_fs::{FileSystem, MountConfig};

/// In-memory FUSE filesystem; contents vanish on unmount.
#[derive(Parser)]
#[command(name = "vaporfs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Mount point path
    #[arg(default_value = "./mnt")]
    mount_point: PathBuf,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Allow other users to access the mount
    #[arg(long)]
    allow_other: bool,

    /// Mount read-only
    #[arg(long)]
    read_only: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set up logging")?;

    let config = MountConfig {
        mount_point: cli.mount_point.clone(),
        allow_other: cli.allow_other,
        read_only: cli.read_only,
        ..Default::default()
    };

    let session = vapor_fs::spawn_mount(FileSystem::new(), &config)
        .context("Failed to mount filesystem")?;

    println!("mounted vaporfs at {}", cli.mount_point.display());
    println!("Press Ctrl+C to unmount");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("received shutdown signal, unmounting");
    drop(session);
    println!("unmounted {}", cli.mount_point.display());

    Ok(())
}
