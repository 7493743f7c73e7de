use std::time::Duration;

use log::{debug, warn};

use crate::{
    domain::{DestinationScope, FileCandidate, RemoteFile, ServerInfo, UploadResult, UploadedFile},
    uploader::error::{ServerSelectionError, UploadError},
    utils::constants::MAX_RETRY_BACKOFF_MS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Queued,
    SelectingServer,
    Transferring,
    Renaming,
    FailedTransient,
    Succeeded,
    Exhausted,
    FailedFatal,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Exhausted | Self::FailedFatal)
    }
}

/// How a task reaches the destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskPlan {
    Transfer,
    /// the folder already holds this content under another name
    Rename(RemoteFile),
}

#[derive(Debug)]
pub enum TaskEvent {
    Dispatched,
    ServerSelected(ServerInfo),
    NoServer(ServerSelectionError),
    Transferred(UploadedFile),
    Renamed,
    Failed(UploadError),
}

#[derive(Debug, PartialEq)]
pub enum Transition {
    /// keep driving the task in its new state
    Next,
    /// hand the task back to the queue after `delay`
    Requeue { delay: Duration },
    Finished(UploadResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self {
            retries: retries.max(1),
            backoff,
        }
    }

    /// `backoff * 2^(attempt - 1)`, capped
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.backoff.is_zero() {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff
            .saturating_mul(factor)
            .min(Duration::from_millis(MAX_RETRY_BACKOFF_MS))
    }
}

/// One file's trip through the upload pipeline
#[derive(Debug, Clone)]
pub struct UploadTask {
    pub candidate: FileCandidate,
    pub scope: DestinationScope,
    pub digest: Option<String>,
    pub attempts: u32,
    pub state: TaskState,
    pub plan: TaskPlan,
    pub server: Option<ServerInfo>,
    pub last_error: Option<UploadError>,
}

impl UploadTask {
    pub fn new(candidate: FileCandidate, digest: Option<String>, scope: DestinationScope) -> Self {
        Self {
            candidate,
            scope,
            digest,
            attempts: 0,
            state: TaskState::Queued,
            plan: TaskPlan::Transfer,
            server: None,
            last_error: None,
        }
    }

    pub fn with_plan(mut self, plan: TaskPlan) -> Self {
        self.plan = plan;
        self
    }

    fn base_result(&self) -> UploadResult {
        UploadResult::for_candidate(&self.candidate)
            .with_digest(self.digest.as_deref())
            .with_scope(Some(&self.scope))
            .with_attempts(self.attempts)
    }

    fn finish(&mut self, state: TaskState) -> Transition {
        self.state = state;
        let result = self.base_result();
        let result = match &self.last_error {
            Some(error) => result.failed(error.to_string()),
            None => result,
        };
        Transition::Finished(result)
    }

    /// Advance the state machine by one event
    pub fn apply(&mut self, event: TaskEvent, policy: &RetryPolicy) -> Transition {
        match (self.state, event) {
            (TaskState::Queued, TaskEvent::Dispatched) => {
                match self.plan {
                    TaskPlan::Rename(_) => self.state = TaskState::Renaming,
                    TaskPlan::Transfer => {
                        self.attempts += 1;
                        self.server = None;
                        self.state = TaskState::SelectingServer;
                    }
                }
                Transition::Next
            }
            (TaskState::SelectingServer, TaskEvent::ServerSelected(server)) => {
                self.server = Some(server);
                self.state = TaskState::Transferring;
                Transition::Next
            }
            (TaskState::SelectingServer, TaskEvent::NoServer(error)) => {
                self.last_error = Some(error.into());
                self.finish(TaskState::FailedFatal)
            }
            (TaskState::Transferring, TaskEvent::Transferred(uploaded)) => {
                self.state = TaskState::Succeeded;
                self.last_error = None;
                Transition::Finished(self.base_result().with_upload(uploaded, &self.scope))
            }
            (TaskState::Renaming, TaskEvent::Renamed) => {
                self.state = TaskState::Succeeded;
                let result = match &self.plan {
                    TaskPlan::Rename(remote) => {
                        self.base_result()
                            .with_rename(remote, &self.candidate.file_name(), &self.scope)
                    }
                    TaskPlan::Transfer => self.base_result(),
                };
                Transition::Finished(result)
            }
            (TaskState::Renaming, TaskEvent::Failed(error)) => {
                // fall back to a full transfer, the rename did not use an attempt
                debug!(
                    "Rename of {} failed ({error}), uploading instead",
                    self.candidate.path_key()
                );
                self.plan = TaskPlan::Transfer;
                self.state = TaskState::Queued;
                Transition::Next
            }
            (
                TaskState::SelectingServer | TaskState::Transferring,
                TaskEvent::Failed(UploadError::Transient(reason)),
            ) => {
                self.state = TaskState::FailedTransient;
                self.last_error = Some(UploadError::Transient(reason));
                if self.attempts < policy.retries {
                    self.state = TaskState::Queued;
                    Transition::Requeue {
                        delay: policy.delay(self.attempts),
                    }
                } else {
                    self.finish(TaskState::Exhausted)
                }
            }
            (state, TaskEvent::Failed(error)) if !state.is_terminal() => {
                self.last_error = Some(error);
                self.finish(TaskState::FailedFatal)
            }
            (state, event) => {
                warn!(
                    "Ignoring {event:?} for {} in state {state:?}",
                    self.candidate.path_key()
                );
                Transition::Next
            }
        }
    }
}
