use anyhow::{Context, Result};
use catalog_resolver::config::DEFAULT_READ_POOL_SIZE;
use catalog_resolver::{
    CliConfig, EntityKind, FileConfig, IdentityStore, LibraryConfig, LibraryContext,
};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const RAW_QUERY_LIMIT: usize = 10;

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

/// Resolve "artist | album | track" lines read from stdin against a library
/// database. Lines starting with '?' run a raw fuzzy artist query.
#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the SQLite library database file.
    #[clap(value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// Path to a TOML config file.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Number of read-only connections.
    #[clap(long, default_value_t = DEFAULT_READ_POOL_SIZE)]
    pub read_pool_size: usize,

    /// Seconds to wait for the fuzzy index before serving degraded results.
    #[clap(long, default_value_t = 30)]
    pub ready_timeout_sec: u64,
}

fn parse_description(line: &str) -> (&str, &str, &str) {
    let mut parts = line.splitn(3, '|').map(str::trim);
    let first = parts.next().unwrap_or_default();
    match (parts.next(), parts.next()) {
        (Some(album), Some(track)) => (first, album, track),
        (Some(track), None) => (first, "", track),
        _ => ("", "", first),
    }
}

fn handle_line(context: &LibraryContext, line: &str) -> Result<()> {
    if let Some(query) = line.strip_prefix('?') {
        let matches = context
            .resolver()
            .search(query.trim(), EntityKind::Artist, RAW_QUERY_LIMIT)?;
        for m in matches {
            let artist = context.store().load_artist_record(m.id)?;
            println!("{:.3}  {}  {}", m.score, artist.id, artist.name);
        }
        return Ok(());
    }

    let (artist, album, track) = parse_description(line);
    match context.resolver().resolve_track(artist, album, track)? {
        Some(resolved) => println!("{}", serde_json::to_string_pretty(&resolved)?),
        None => println!("no match"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        db_path: cli_args.db_path.clone(),
        read_pool_size: cli_args.read_pool_size,
    };
    let config = LibraryConfig::resolve(&cli_config, file_config)?;

    let context = LibraryContext::open(config)?;
    let counts = context.store().counts()?;
    info!(
        "Library {} has {} artists, {} albums, {} tracks",
        context.store().dbid(),
        counts.artists,
        counts.albums,
        counts.tracks
    );

    let mut readiness = context.readiness();
    let timeout = Duration::from_secs(cli_args.ready_timeout_sec);
    match tokio::time::timeout(timeout, readiness.wait_ready()).await {
        Ok(true) => info!("{} entries indexed", context.index().len()),
        _ => warn!("Fuzzy index not ready, falling back to store search"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Err(e) = handle_line(&context, line) {
            eprintln!("Error: {:#}", e);
        }
    }

    context.shutdown()?;
    Ok(())
}
