use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use flickr_api::FlickrClient;
use log::info;

use super::RunError;
use super::collection::Collection;
use super::index::photo_name;
use super::media;
use super::scheduler::{SchedulerConfig, UploadJob, UploadScheduler};
use super::walker::{modified_unix, walk_files};

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub directory: PathBuf,
    pub time_allowed: Duration,
    /// No network mutation; prospective matches and misses are only logged.
    pub dry_run: bool,
    /// Back up `directory` itself as one collection instead of iterating its
    /// immediate subdirectories.
    pub single_collection: bool,
}

/// Drives the whole run: one collection at a time, walking its files through
/// the dedup check into the upload scheduler, draining and persisting each
/// collection before moving on. The global time budget only gates new
/// submissions; in-flight work is always drained.
pub struct RunController {
    client: FlickrClient,
    scheduler: UploadScheduler,
    known_sets: HashMap<String, String>,
    config: RunConfig,
    started: Instant,
}

impl RunController {
    pub async fn new(client: FlickrClient, config: RunConfig) -> Result<Self, RunError> {
        Self::with_scheduler_config(client, config, SchedulerConfig::default()).await
    }

    pub async fn with_scheduler_config(
        client: FlickrClient,
        config: RunConfig,
        scheduler_config: SchedulerConfig,
    ) -> Result<Self, RunError> {
        let known_sets = client
            .get_photosets()
            .await?
            .into_iter()
            .map(|set| (set.title, set.id))
            .collect();
        let scheduler = UploadScheduler::with_config(client.clone(), scheduler_config);
        Ok(Self {
            client,
            scheduler,
            known_sets,
            config,
            started: Instant::now(),
        })
    }

    pub async fn run(mut self) -> Result<(), RunError> {
        if self.config.single_collection {
            let directory = self.config.directory.clone();
            self.process_collection(&directory).await?;
            return Ok(());
        }
        for directory in immediate_subdirectories(&self.config.directory)? {
            let finished = self.process_collection(&directory).await?;
            if !finished {
                // Time budget spent; later directories wait for the next run.
                break;
            }
        }
        Ok(())
    }

    /// Back up one directory as one collection. Returns false when the time
    /// budget ran out mid-walk; the collection is still drained and
    /// persisted before returning.
    async fn process_collection(&mut self, directory: &Path) -> Result<bool, RunError> {
        let title = collection_title(directory);
        info!("{}", directory.display());
        let remote_id = self.known_sets.get(&title).cloned();
        let mut collection = Collection::open(&self.client, &title, remote_id, directory).await?;

        let mut finished = true;
        for (path, metadata) in walk_files(directory) {
            if self.started.elapsed() >= self.config.time_allowed {
                info!("out of time, aborting");
                finished = false;
                break;
            }
            if media::media_kind(&path).is_none() {
                continue;
            }
            let name = photo_name(&path);
            let timestamp = modified_unix(&path, &metadata);
            if collection.index.exists(&name, timestamp) {
                continue;
            }
            if self.config.dry_run {
                info!(
                    "missed {timestamp} in {:?}",
                    collection.index.timestamps_for(&name)
                );
                info!("{} ({timestamp}) -> {title}", path.display());
                continue;
            }
            let job = UploadJob {
                path,
                name,
                timestamp,
            };
            self.scheduler.submit(job, &mut collection).await?;
        }

        self.scheduler.drain(&mut collection).await?;
        collection.release();
        if let Some(id) = &collection.id {
            self.known_sets
                .entry(collection.title.clone())
                .or_insert_with(|| id.clone());
        }
        Ok(finished)
    }
}

fn collection_title(directory: &Path) -> String {
    directory
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| directory.display().to_string())
}

fn immediate_subdirectories(root: &Path) -> Result<Vec<PathBuf>, RunError> {
    let entries = std::fs::read_dir(root).map_err(|source| RunError::RootUnreadable {
        path: root.to_path_buf(),
        source,
    })?;
    let mut directories: Vec<PathBuf> = entries
        .filter_map(|entry| {
            let entry = entry.ok()?;
            entry.file_type().ok()?.is_dir().then(|| entry.path())
        })
        .collect();
    directories.sort();
    Ok(directories)
}
