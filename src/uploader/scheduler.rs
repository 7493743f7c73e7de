use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::{
    domain::{ServerDirectory, ServerInfo, UploadResult, Zone},
    uploader::{
        error::{ServerSelectionError, UploadError},
        task::{RetryPolicy, TaskEvent, TaskPlan, TaskState, Transition, UploadTask},
    },
    utils::config::{AuthFailurePolicy, EffectiveConfig},
};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub connections: usize,
    pub zone: Option<Zone>,
    pub timeout: Duration,
    pub policy: RetryPolicy,
    pub on_auth_failure: AuthFailurePolicy,
}

impl From<&EffectiveConfig> for SchedulerSettings {
    fn from(config: &EffectiveConfig) -> Self {
        Self {
            connections: config.connections,
            zone: config.zone,
            timeout: config.timeout,
            policy: RetryPolicy::new(config.retries, config.retry_backoff),
            on_auth_failure: config.on_auth_failure,
        }
    }
}

struct Shared {
    directory: Arc<dyn ServerDirectory>,
    settings: SchedulerSettings,
    servers: Mutex<Option<Vec<ServerInfo>>>,
    queue_tx: async_channel::Sender<UploadTask>,
    // submitted tasks without a terminal result yet, delayed retries included
    outstanding: AtomicUsize,
    feeding_done: AtomicBool,
    auth_failure: std::sync::Mutex<Option<String>>,
}

enum Step {
    Finished(UploadResult),
    Requeue(UploadTask, Duration),
}

/// Fixed group of `connections` transfer workers draining one task queue
pub struct UploadScheduler {
    shared: Arc<Shared>,
    queue_rx: async_channel::Receiver<UploadTask>,
}

impl UploadScheduler {
    pub fn new(directory: Arc<dyn ServerDirectory>, settings: SchedulerSettings) -> Self {
        let (queue_tx, queue_rx) = async_channel::unbounded();
        Self {
            shared: Arc::new(Shared {
                directory,
                settings,
                servers: Mutex::new(None),
                queue_tx,
                outstanding: AtomicUsize::new(0),
                feeding_done: AtomicBool::new(false),
                auth_failure: std::sync::Mutex::new(None),
            }),
            queue_rx,
        }
    }

    /// Fill the server cache; `NoServerAvailable` when no zone has a server
    pub async fn probe_servers(&self) -> Result<usize, ServerSelectionError> {
        let mut cache = self.shared.servers.lock().await;
        let servers = self.shared.fetch_servers().await;
        let count = servers.len();
        *cache = Some(servers);
        if count == 0 {
            return Err(ServerSelectionError::NoServerAvailable);
        }
        info!("{count} upload servers available");
        Ok(count)
    }

    /// Spawn the workers. Results arrive in completion order; the receiver
    /// closes after `finish` once every submitted task has a result.
    pub fn start(&self) -> (JoinSet<()>, mpsc::UnboundedReceiver<UploadResult>) {
        let (results_tx, results_rx) = mpsc::unbounded_channel();
        let mut workers = JoinSet::new();
        for worker in 0..self.shared.settings.connections.max(1) {
            workers.spawn(worker_loop(
                worker,
                Arc::clone(&self.shared),
                self.queue_rx.clone(),
                results_tx.clone(),
            ));
        }
        (workers, results_rx)
    }

    pub fn submit(&self, task: UploadTask) {
        self.shared.outstanding.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = self.shared.queue_tx.try_send(task) {
            error!("Upload queue closed, dropping {}", e.into_inner().candidate.path_key());
            self.shared.complete_one();
        }
    }

    /// No more tasks will be submitted
    pub fn finish(&self) {
        self.shared.feeding_done.store(true, Ordering::SeqCst);
        if self.shared.outstanding.load(Ordering::SeqCst) == 0 {
            self.shared.queue_tx.close();
        }
    }

    /// Set when an authentication failure aborted the run
    pub fn auth_failure(&self) -> Option<String> {
        self.shared.auth_failure()
    }
}

async fn worker_loop(
    worker: usize,
    shared: Arc<Shared>,
    queue: async_channel::Receiver<UploadTask>,
    results: mpsc::UnboundedSender<UploadResult>,
) {
    while let Ok(task) = queue.recv().await {
        match shared.drive(worker, task).await {
            Step::Finished(result) => {
                let _ = results.send(result);
                shared.complete_one();
            }
            Step::Requeue(task, delay) if delay.is_zero() => shared.requeue(task),
            Step::Requeue(task, delay) => {
                // the worker goes back to the queue while the task waits
                let shared = Arc::clone(&shared);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    shared.requeue(task);
                });
            }
        }
    }
    debug!("[upload {worker}] queue closed");
}

impl Shared {
    fn complete_one(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && self.feeding_done.load(Ordering::SeqCst) {
            self.queue_tx.close();
        }
    }

    fn requeue(&self, task: UploadTask) {
        if let Err(e) = self.queue_tx.try_send(task) {
            error!("Upload queue closed, dropping retry of {}", e.into_inner().candidate.path_key());
            self.complete_one();
        }
    }

    fn auth_failure(&self) -> Option<String> {
        self.auth_failure.lock().map(|guard| guard.clone()).unwrap_or_default()
    }

    fn record_auth_failure(&self, error: &UploadError) {
        if self.settings.on_auth_failure != AuthFailurePolicy::Run {
            return;
        }
        if let Ok(mut guard) = self.auth_failure.lock() {
            if guard.is_none() {
                error!("Authentication rejected, failing the remaining uploads: {error}");
                *guard = Some(error.to_string());
            }
        }
    }

    /// Servers of the configured zone, or of any zone when it has none
    async fn fetch_servers(&self) -> Vec<ServerInfo> {
        if let Some(zone) = self.settings.zone {
            match self.directory.servers(Some(zone)).await {
                Ok(servers) if !servers.is_empty() => return servers,
                Ok(_) => info!("No upload server in zone {zone}, trying every zone"),
                Err(e) => warn!("Listing servers in zone {zone} failed: {e}"),
            }
        }
        match self.directory.servers(None).await {
            Ok(servers) => servers,
            Err(e) => {
                warn!("Listing servers failed: {e}");
                Vec::new()
            }
        }
    }

    async fn select_server(&self) -> Result<ServerInfo, ServerSelectionError> {
        let mut cache = self.servers.lock().await;
        if cache.as_ref().map_or(true, Vec::is_empty) {
            *cache = Some(self.fetch_servers().await);
        }
        cache
            .as_ref()
            .and_then(|servers| servers.first())
            .cloned()
            .ok_or(ServerSelectionError::NoServerAvailable)
    }

    async fn transfer(&self, task: &UploadTask) -> TaskEvent {
        let Some(server) = &task.server else {
            return TaskEvent::Failed(UploadError::Fatal("no server selected".to_string()));
        };
        let upload = self
            .directory
            .upload(server, &task.candidate, &task.scope.folder_id);
        match tokio::time::timeout(self.settings.timeout, upload).await {
            Ok(Ok(uploaded)) => TaskEvent::Transferred(uploaded),
            Ok(Err(e)) => TaskEvent::Failed(e.into()),
            Err(_) => TaskEvent::Failed(UploadError::timeout(self.settings.timeout)),
        }
    }

    async fn rename(&self, task: &UploadTask) -> TaskEvent {
        let TaskPlan::Rename(remote) = &task.plan else {
            return TaskEvent::Failed(UploadError::Fatal("nothing to rename".to_string()));
        };
        match self
            .directory
            .rename(&remote.id, &task.candidate.file_name())
            .await
        {
            Ok(()) => TaskEvent::Renamed,
            Err(e) => TaskEvent::Failed(e.into()),
        }
    }

    /// Run a task until it finishes or asks to be requeued
    async fn drive(&self, worker: usize, mut task: UploadTask) -> Step {
        let policy = self.settings.policy;
        let mut event = match self.auth_failure() {
            Some(reason) => TaskEvent::Failed(UploadError::Unauthorized(reason)),
            None => TaskEvent::Dispatched,
        };

        loop {
            match task.apply(event, &policy) {
                Transition::Next => {}
                Transition::Finished(result) => {
                    match task.state {
                        TaskState::Succeeded => info!(
                            "[upload {worker}] {} uploaded to {}",
                            task.candidate.path_key(),
                            task.scope
                        ),
                        state => warn!(
                            "[upload {worker}] {} ended {state:?} after {} attempts: {}",
                            task.candidate.path_key(),
                            task.attempts,
                            result.error.as_deref().unwrap_or_default()
                        ),
                    }
                    return Step::Finished(result);
                }
                Transition::Requeue { delay } => {
                    debug!(
                        "[upload {worker}] retrying {} in {delay:?} (attempt {} failed)",
                        task.candidate.path_key(),
                        task.attempts
                    );
                    return Step::Requeue(task, delay);
                }
            }

            event = match task.state {
                // a rename fell back to a transfer, which the run may no longer allow
                TaskState::Queued => match self.auth_failure() {
                    Some(reason) => TaskEvent::Failed(UploadError::Unauthorized(reason)),
                    None => TaskEvent::Dispatched,
                },
                TaskState::SelectingServer => match self.select_server().await {
                    Ok(server) => TaskEvent::ServerSelected(server),
                    Err(e) => TaskEvent::NoServer(e),
                },
                TaskState::Transferring => {
                    debug!(
                        "[upload {worker}] transferring {} (attempt {})",
                        task.candidate.path_key(),
                        task.attempts
                    );
                    self.transfer(&task).await
                }
                TaskState::Renaming => self.rename(&task).await,
                state => {
                    return Step::Finished(
                        UploadResult::for_candidate(&task.candidate)
                            .failed(format!("task stalled in state {state:?}")),
                    )
                }
            };

            if let TaskEvent::Failed(error @ UploadError::Unauthorized(_)) = &event {
                self.record_auth_failure(error);
            }
        }
    }
}
