use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gridfuse::cadapter::{ConnectionPool, LocalStore};
use gridfuse::chuck::ChunkLayout;
use gridfuse::config::{MountConfig, load_config};
use gridfuse::fuse::GridFuse;
use gridfuse::fuse::mount::mount_gridfs;
use gridfuse::vfs::GridFs;

#[derive(Parser, Debug)]
#[command(name = "gridfuse", version, about = "Mount a chunked document store as a filesystem")]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", env = "GRIDFUSE_LOG")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mount the store on an existing directory until interrupted
    Mount(MountArgs),
}

#[derive(Args, Debug)]
struct MountArgs {
    #[arg(value_name = "MOUNTPOINT")]
    mountpoint: PathBuf,

    /// YAML file with defaults for every flag below
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    #[arg(long)]
    db: Option<String>,

    /// Collection prefix (`<prefix>.files`, `<prefix>.chunks`)
    #[arg(long)]
    prefix: Option<String>,

    /// Chunk size for newly written files, in bytes
    #[arg(long)]
    chunk_size: Option<u64>,

    #[arg(long)]
    pool_size: Option<usize>,

    /// Directory the local store keeps its collections in
    #[arg(long, env = "GRIDFUSE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Mount directly instead of through fusermount3
    #[arg(long)]
    privileged: bool,
}

impl MountArgs {
    fn apply(&self, cfg: &mut MountConfig) {
        if let Some(db) = &self.db {
            cfg.db = db.clone();
        }
        if let Some(prefix) = &self.prefix {
            cfg.prefix = prefix.clone();
        }
        if let Some(chunk_size) = self.chunk_size {
            cfg.chunk_size = chunk_size;
        }
        if let Some(pool_size) = self.pool_size {
            cfg.pool_size = pool_size;
        }
        if self.data_dir.is_some() {
            cfg.data_dir = self.data_dir.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Mount(args) => mount(args).await,
    }
}

async fn mount(args: MountArgs) -> Result<()> {
    let mut cfg = match &args.config {
        Some(path) => load_config(path)?,
        None => MountConfig::default(),
    };
    args.apply(&mut cfg);
    cfg.validate()?;

    let data_dir = cfg.data_dir();
    info!(
        db = %cfg.db,
        prefix = %cfg.prefix,
        data_dir = %data_dir.display(),
        "opening store"
    );
    let store = LocalStore::new(&data_dir, &cfg.db, &cfg.prefix);
    let pool = ConnectionPool::new(store, None, cfg.pool_config());
    // fail fast on an unusable data directory
    drop(pool.acquire().await.context("Failed to open store")?);
    let fs = GridFs::new(pool, ChunkLayout::new(cfg.chunk_size));

    let mut mount_handle = mount_gridfs(GridFuse::new(fs), &args.mountpoint, !args.privileged)
        .await
        .with_context(|| format!("Failed to mount on {}", args.mountpoint.display()))?;
    info!(mountpoint = %args.mountpoint.display(), "mounted; press Ctrl-C to unmount");

    let handle = &mut mount_handle;
    tokio::select! {
        res = handle => res.context("FUSE session ended with an error")?,
        _ = signal::ctrl_c() => {
            info!("unmounting");
            mount_handle.unmount().await.context("Failed to unmount")?;
        }
    }
    Ok(())
}
