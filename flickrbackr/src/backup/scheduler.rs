use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use flickr_api::{FlickrClient, FlickrError, TicketState, UploadErrorClass};
use log::{info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::task::JoinHandle;

use super::RunError;
use super::collection::Collection;
use super::index::upload_tags;

/// Ceiling on outstanding upload tickets; the pipeline's only concurrency
/// control.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 10;
const DEFAULT_TICKET_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_TRANSIENT_RETRY_DELAY: Duration = Duration::from_secs(5);
const SUBMIT_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
pub struct UploadJob {
    pub path: PathBuf,
    pub name: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub max_in_flight: usize,
    pub poll_interval: Duration,
    pub retry_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            poll_interval: DEFAULT_TICKET_POLL_INTERVAL,
            retry_delay: DEFAULT_TRANSIENT_RETRY_DELAY,
        }
    }
}

struct InFlight {
    job: UploadJob,
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug)]
enum TicketOutcome {
    Completed { photo_id: String },
    Failed,
}

#[derive(Debug)]
struct TicketResolution {
    ticket_id: String,
    outcome: TicketOutcome,
}

/// What the poller publishes: a resolved ticket, or the error that made it
/// give up on polling.
type PollResult = Result<TicketResolution, FlickrError>;

/// Drives asynchronous uploads: submits files, tracks the resulting tickets
/// in an in-flight table, and applies resolutions reported by a dedicated
/// poller task. The poller only talks to the network and publishes
/// resolutions on a channel; all collection state is mutated here, on the
/// caller's task.
pub struct UploadScheduler {
    client: FlickrClient,
    slots: Arc<Semaphore>,
    in_flight: HashMap<String, InFlight>,
    retry_delay: Duration,
    ticket_tx: UnboundedSender<String>,
    resolutions: UnboundedReceiver<PollResult>,
    poller: JoinHandle<()>,
}

impl UploadScheduler {
    pub fn new(client: FlickrClient) -> Self {
        Self::with_config(client, SchedulerConfig::default())
    }

    pub fn with_config(client: FlickrClient, config: SchedulerConfig) -> Self {
        let (ticket_tx, ticket_rx) = mpsc::unbounded_channel();
        let (resolution_tx, resolutions) = mpsc::unbounded_channel();
        let poller = tokio::spawn(poll_tickets(
            client.clone(),
            config.poll_interval,
            ticket_rx,
            resolution_tx,
        ));
        Self {
            client,
            slots: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            in_flight: HashMap::new(),
            retry_delay: config.retry_delay,
            ticket_tx,
            resolutions,
            poller,
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Submit one upload. The in-flight ceiling is checked before every
    /// submission; while it is reached, the scheduler waits on completed
    /// ticket resolutions rather than spinning. The synchronous part of the
    /// submission is retried up to five times on transient failures; a file
    /// the service rejects outright, or one that exhausts its attempts,
    /// becomes a failure record.
    pub async fn submit(
        &mut self,
        job: UploadJob,
        collection: &mut Collection,
    ) -> Result<(), RunError> {
        let permit = self.acquire_slot(collection).await?;
        self.apply_ready(collection).await?;

        let mut attempt = 0u32;
        let ticket = loop {
            attempt += 1;
            match self
                .client
                .upload_async(&job.path, &job.name, &upload_tags(job.timestamp))
                .await
            {
                Ok(ticket) => break Some(ticket),
                Err(err) => match err.upload_class() {
                    UploadErrorClass::Transient if attempt < SUBMIT_ATTEMPTS => {
                        warn!(
                            "transient upload failure for {} (attempt {attempt}): {err}",
                            job.path.display()
                        );
                        tokio::time::sleep(self.retry_delay).await;
                    }
                    UploadErrorClass::Transient => {
                        warn!(
                            "upload failed for {} after {attempt} attempts: {err}",
                            job.path.display()
                        );
                        break None;
                    }
                    UploadErrorClass::CorruptFile => {
                        warn!("{} rejected by the service: {err}", job.path.display());
                        break None;
                    }
                    UploadErrorClass::Fatal => return Err(err.into()),
                },
            }
        };

        match ticket {
            Some(ticket_id) => {
                if self.ticket_tx.send(ticket_id.clone()).is_err() {
                    return Err(RunError::PollerGone);
                }
                self.in_flight.insert(
                    ticket_id,
                    InFlight {
                        job,
                        _permit: permit,
                    },
                );
            }
            // The permit drops here, freeing the slot.
            None => collection.mark_failed(&job.name, job.timestamp),
        }
        Ok(())
    }

    /// Block until every outstanding ticket has resolved. Must run before a
    /// collection is released and persisted.
    pub async fn drain(&mut self, collection: &mut Collection) -> Result<(), RunError> {
        while !self.in_flight.is_empty() {
            let result = self.resolutions.recv().await.ok_or(RunError::PollerGone)?;
            self.apply(result?, collection).await?;
        }
        Ok(())
    }

    async fn acquire_slot(
        &mut self,
        collection: &mut Collection,
    ) -> Result<OwnedSemaphorePermit, RunError> {
        loop {
            match Arc::clone(&self.slots).try_acquire_owned() {
                Ok(permit) => return Ok(permit),
                Err(TryAcquireError::NoPermits) => {
                    let result =
                        self.resolutions.recv().await.ok_or(RunError::PollerGone)?;
                    self.apply(result?, collection).await?;
                }
                Err(TryAcquireError::Closed) => return Err(RunError::PollerGone),
            }
        }
    }

    /// Apply resolutions that are already waiting, without blocking.
    async fn apply_ready(&mut self, collection: &mut Collection) -> Result<(), RunError> {
        while let Ok(result) = self.resolutions.try_recv() {
            self.apply(result?, collection).await?;
        }
        Ok(())
    }

    async fn apply(
        &mut self,
        resolution: TicketResolution,
        collection: &mut Collection,
    ) -> Result<(), RunError> {
        let Some(entry) = self.in_flight.remove(&resolution.ticket_id) else {
            warn!("resolution for unknown ticket {}", resolution.ticket_id);
            return Ok(());
        };
        let job = entry.job;
        match resolution.outcome {
            TicketOutcome::Completed { photo_id } => {
                self.attach(&photo_id, &job, collection).await?;
            }
            TicketOutcome::Failed => {
                warn!("service failed to process {}", job.path.display());
                collection.mark_failed(&job.name, job.timestamp);
            }
        }
        // Dropping `entry` released the permit.
        Ok(())
    }

    async fn attach(
        &self,
        photo_id: &str,
        job: &UploadJob,
        collection: &mut Collection,
    ) -> Result<(), RunError> {
        match &collection.id {
            // First-ever item creates the photoset remotely.
            None => {
                let id = self
                    .client
                    .create_photoset(&collection.title, photo_id)
                    .await?;
                collection.id = Some(id);
            }
            Some(set_id) => self.client.add_photo_to_set(set_id, photo_id).await?,
        }
        info!("{} -> {}", job.path.display(), collection.title);
        collection.index.record(&job.name, photo_id, job.timestamp);
        Ok(())
    }
}

impl Drop for UploadScheduler {
    fn drop(&mut self) {
        self.poller.abort();
    }
}

/// Poller task: collects ticket ids from the scheduler and, once per
/// interval, asks the service for the status of all of them in one batched
/// call. Resolved tickets are published on the resolution channel; pending
/// ones are left for the next tick. Transient poll errors are logged and
/// retried; any other error is published and ends the poller, so the
/// scheduler aborts instead of waiting on tickets that can never resolve.
async fn poll_tickets(
    client: FlickrClient,
    interval: Duration,
    mut ticket_rx: UnboundedReceiver<String>,
    resolution_tx: UnboundedSender<PollResult>,
) {
    let mut outstanding: Vec<String> = Vec::new();
    let mut closed = false;
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        if closed && outstanding.is_empty() {
            break;
        }
        tokio::select! {
            ticket = ticket_rx.recv(), if !closed => match ticket {
                Some(id) => outstanding.push(id),
                None => closed = true,
            },
            _ = timer.tick() => {
                if outstanding.is_empty() {
                    continue;
                }
                let statuses = match client.check_tickets(&outstanding).await {
                    Ok(statuses) => statuses,
                    Err(err) if err.upload_class() == UploadErrorClass::Transient => {
                        warn!("ticket status check failed: {err}");
                        continue;
                    }
                    Err(err) => {
                        let _ = resolution_tx.send(Err(err));
                        return;
                    }
                };
                for status in statuses {
                    if !outstanding.contains(&status.id) {
                        continue;
                    }
                    let outcome = match status.state {
                        TicketState::Pending => continue,
                        TicketState::Complete { photo_id } => {
                            TicketOutcome::Completed { photo_id }
                        }
                        TicketState::Failed => TicketOutcome::Failed,
                    };
                    outstanding.retain(|id| *id != status.id);
                    let resolution = TicketResolution { ticket_id: status.id, outcome };
                    if resolution_tx.send(Ok(resolution)).is_err() {
                        // Scheduler gone; nothing left to report to.
                        return;
                    }
                }
            }
        }
    }
}
