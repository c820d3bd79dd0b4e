use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use flickr_api::{AUTH_CACHE_FILE, AuthCache, FlickrClient};
use flickrbackr::backup::controller::{RunConfig, RunController};

/// Incrementally back up a local media tree to Flickr photosets, one
/// photoset per top-level subdirectory.
#[derive(Debug, Parser)]
#[command(name = "flickrbackr", version)]
struct Cli {
    /// Directory to back up
    #[arg(short = 'd', long = "directory", default_value = ".")]
    directory: PathBuf,

    /// Time allowed to complete, in minutes
    #[arg(short = 't', long = "time", default_value_t = 1)]
    time_allowed: u64,

    /// Dry run: log prospective matches and misses, mutate nothing
    #[arg(short = 'x', long = "dry-run")]
    dry_run: bool,

    /// Treat the directory itself as a single collection named after it
    #[arg(short = 's', long = "single")]
    single: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();
    let cli = Cli::parse();

    let cache_path = dirs::home_dir()
        .context("home directory is unavailable")?
        .join(AUTH_CACHE_FILE);
    let auth = AuthCache::load(&cache_path).context("failed to load the cached session")?;
    let client = FlickrClient::new(auth.api_key, auth.auth_token)?;
    client
        .test_login()
        .await
        .context("cannot reach the service with the cached session")?;

    let config = RunConfig {
        directory: cli.directory,
        time_allowed: Duration::from_secs(cli.time_allowed * 60),
        dry_run: cli.dry_run,
        single_collection: cli.single,
    };
    let controller = RunController::new(client, config).await?;
    controller.run().await?;
    Ok(())
}
