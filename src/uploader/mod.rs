pub mod dedup;
pub mod error;
pub mod hashing;
pub mod history;
pub mod report;
pub mod scheduler;
pub mod task;

use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::eyre::eyre;
use log::{debug, error, info, warn};
use tokio::fs;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::{
    cloud_storage::path_conversions::{default_folder_name, normalize_path},
    domain::{DestinationScope, FileCandidate, ServerDirectory, UploadResult},
    error::{Result, UploaderError},
    uploader::{
        dedup::{ProbeDecision, RemoteProbe},
        error::UploadError,
        hashing::{ContentHasher, HashOutcome, HashWorkerPool, Md5Hasher},
        history::{History, HistoryStore},
        report::RunSummary,
        scheduler::{SchedulerSettings, UploadScheduler},
        task::{TaskPlan, UploadTask},
    },
    utils::{
        config::{AuthFailurePolicy, EffectiveConfig},
        tools::{discover, DiscoveryOptions},
    },
};

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub path: PathBuf,
    pub folder: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub results: Vec<UploadResult>,
    pub summary: RunSummary,
    /// set when an authentication failure aborted the run
    pub auth_failure: Option<String>,
}

enum Destination {
    Ready {
        scope: DestinationScope,
        probe: RemoteProbe,
    },
    Unavailable(UploadError),
}

struct Pipeline {
    scheduler: UploadScheduler,
    workers: JoinSet<()>,
    results: mpsc::UnboundedReceiver<UploadResult>,
    destination: Destination,
}

/// Drives one run: discovery, hashing, dedup, uploads and history
pub struct Uploader {
    config: EffectiveConfig,
    history: HistoryStore,
    directory: Option<Arc<dyn ServerDirectory>>,
    hasher: Arc<dyn ContentHasher>,
}

impl Uploader {
    pub fn new(config: EffectiveConfig, history: HistoryStore) -> Self {
        Self {
            config,
            history,
            directory: None,
            hasher: Arc::new(Md5Hasher),
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn ServerDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn ContentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn history(&self) -> &History {
        self.history.history()
    }

    /// Files the request selects; nothing touches the network yet
    pub async fn discover(&self, request: &UploadRequest) -> Result<Vec<FileCandidate>> {
        Ok(discover(&request.path, &DiscoveryOptions::from(&self.config)).await?)
    }

    pub async fn run(&mut self, request: &UploadRequest) -> Result<RunReport> {
        let candidates = self.discover(request).await?;
        self.upload(request, candidates).await
    }

    /// Hash, dedup and upload already discovered files
    pub async fn upload(&mut self, request: &UploadRequest, candidates: Vec<FileCandidate>) -> Result<RunReport> {
        let mut report = RunReport {
            summary: RunSummary {
                discovered: candidates.len(),
                ..Default::default()
            },
            ..Default::default()
        };
        if candidates.is_empty() {
            warn!("No files to upload in {}", normalize_path(&request.path));
            return Ok(report);
        }
        info!("Found {} files to upload", candidates.len());

        let mut pipeline = match (&self.directory, request.dry_run) {
            (_, true) => {
                info!("Dry run, files are hashed but nothing is uploaded");
                None
            }
            (Some(directory), false) => Some(self.prepare(Arc::clone(directory), request).await?),
            (None, false) => {
                return Err(UploaderError::UnexpectedError(eyre!(
                    "no server directory to upload to"
                )))
            }
        };

        let mut hashes = HashWorkerPool::with_hasher(self.config.hash_pool_size, Arc::clone(&self.hasher))
            .hash_all(candidates);
        let mut hashing_done = false;
        loop {
            tokio::select! {
                outcome = hashes.recv(), if !hashing_done => match outcome {
                    Some(outcome) => self.accept_hash(outcome, pipeline.as_mut(), &mut report).await?,
                    None => {
                        hashing_done = true;
                        debug!("Hashing finished");
                        self.history.checkpoint().await?;
                        if let Some(pipeline) = &pipeline {
                            pipeline.scheduler.finish();
                        }
                    }
                },
                Some(result) = next_result(&mut pipeline) => {
                    if result.succeeded() {
                        report.summary.succeeded += 1;
                    } else {
                        report.summary.failed += 1;
                    }
                    self.history.append(result.clone()).await?;
                    report.results.push(result);
                },
                else => break,
            }
        }

        if let Some(mut pipeline) = pipeline {
            while let Some(joined) = pipeline.workers.join_next().await {
                joined?;
            }
            report.auth_failure = pipeline.scheduler.auth_failure();
            if let Destination::Unavailable(UploadError::Unauthorized(reason)) = &pipeline.destination {
                if self.config.on_auth_failure == AuthFailurePolicy::Run && report.auth_failure.is_none() {
                    report.auth_failure = Some(reason.clone());
                }
            }
        }
        self.history.checkpoint().await?;
        Ok(report)
    }

    /// Folder named on the command line, else the uploaded directory's own name
    async fn folder_name(&self, request: &UploadRequest) -> Option<String> {
        if request.folder.is_some() {
            return request.folder.clone();
        }
        let path = fs::canonicalize(&request.path).await.ok()?;
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_dir() => default_folder_name(&path),
            _ => None,
        }
    }

    async fn prepare(&self, directory: Arc<dyn ServerDirectory>, request: &UploadRequest) -> Result<Pipeline> {
        let scheduler = UploadScheduler::new(Arc::clone(&directory), SchedulerSettings::from(&self.config));
        scheduler
            .probe_servers()
            .await
            .map_err(|_| UploaderError::NoServerAvailable)?;

        let folder = self.folder_name(request).await;
        let destination = match directory.resolve_folder(folder.as_deref()).await {
            Ok(scope) => {
                info!("Uploading to {scope}");
                let probe = self.probe_destination(directory.as_ref(), &scope).await;
                Destination::Ready { scope, probe }
            }
            Err(e) => {
                error!("Destination folder is unavailable: {e}");
                Destination::Unavailable(e.into())
            }
        };

        let (workers, results) = scheduler.start();
        Ok(Pipeline {
            scheduler,
            workers,
            results,
            destination,
        })
    }

    /// Fetch the destination's contents once; also makes it public when asked
    async fn probe_destination(&self, directory: &dyn ServerDirectory, scope: &DestinationScope) -> RemoteProbe {
        let (probe, public) = match directory.folder_contents(&scope.folder_id).await {
            Ok(contents) => {
                debug!("Destination holds {} files", contents.files.len());
                let public = contents.public;
                (RemoteProbe::new(contents), public)
            }
            Err(e) => {
                warn!("Could not list the destination folder, assuming it is empty: {e}");
                (RemoteProbe::default(), false)
            }
        };

        if self.config.public && !public && scope.folder_id != directory.root_folder_id() {
            if let Err(e) = directory.make_public(&scope.folder_id).await {
                warn!("Could not make folder {} public: {e}", scope.folder_id);
            }
        }
        probe
    }

    async fn accept_hash(
        &mut self,
        outcome: HashOutcome,
        pipeline: Option<&mut Pipeline>,
        report: &mut RunReport,
    ) -> Result<()> {
        let (candidate, digest) = match outcome {
            HashOutcome::Hashed { candidate, digest } => (candidate, digest),
            HashOutcome::Failed { candidate, error } => {
                report.summary.hash_failed += 1;
                let scope = match pipeline.as_deref().map(|pipeline| &pipeline.destination) {
                    Some(Destination::Ready { scope, .. }) => Some(scope),
                    _ => None,
                };
                let result = UploadResult::for_candidate(&candidate)
                    .with_scope(scope)
                    .failed(error.to_string());
                self.history.append(result.clone()).await?;
                report.results.push(result);
                return Ok(());
            }
        };
        report.summary.hashed += 1;

        let Some(pipeline) = pipeline else {
            self.history.dedup().record_digest(&candidate, &digest);
            return Ok(());
        };
        let mut dedup = self.history.dedup();
        let duplicate = match &pipeline.destination {
            Destination::Ready { scope, .. } => dedup.find_duplicate(&candidate, &digest, scope).cloned(),
            Destination::Unavailable(_) => None,
        };
        dedup.record_digest(&candidate, &digest);

        if let Some(previous) = duplicate {
            info!(
                "Skipping {}, already uploaded to this folder",
                candidate.path_key()
            );
            report.summary.skipped += 1;
            report.results.push(previous.for_local_file(&candidate));
            return Ok(());
        }

        match &mut pipeline.destination {
            Destination::Unavailable(error) => {
                let result = UploadResult::for_candidate(&candidate)
                    .with_digest(Some(&digest))
                    .failed(error.to_string());
                report.summary.failed += 1;
                self.history.append(result.clone()).await?;
                report.results.push(result);
            }
            Destination::Ready { scope, probe } => {
                match probe.decide(&candidate, &digest, self.config.rename_existing) {
                    ProbeDecision::AlreadyPresent(remote) => {
                        info!(
                            "Skipping {}, the folder already holds it as {}",
                            candidate.path_key(),
                            remote.id
                        );
                        let result = UploadResult::for_candidate(&candidate).with_rename(
                            &remote,
                            &remote.name,
                            scope,
                        );
                        report.summary.skipped += 1;
                        self.history.append(result.clone()).await?;
                        report.results.push(result);
                    }
                    ProbeDecision::Rename(remote) => {
                        debug!(
                            "{} matches remote {} ({}), renaming instead of uploading",
                            candidate.path_key(),
                            remote.id,
                            remote.name
                        );
                        let task = UploadTask::new(candidate, Some(digest), scope.clone())
                            .with_plan(TaskPlan::Rename(remote));
                        pipeline.scheduler.submit(task);
                    }
                    ProbeDecision::Upload => {
                        pipeline
                            .scheduler
                            .submit(UploadTask::new(candidate, Some(digest), scope.clone()));
                    }
                }
            }
        }
        Ok(())
    }
}

async fn next_result(pipeline: &mut Option<Pipeline>) -> Option<UploadResult> {
    match pipeline {
        Some(pipeline) => pipeline.results.recv().await,
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::cloud_storage::path_conversions::md5_hex;
    use crate::domain::RemoteFile;
    use crate::uploader::error::HashError;
    use crate::uploader::hashing::md5_file;
    use crate::uploader::scheduler::tests::{unavailable, MockDirectory};
    use crate::utils::error::DiscoveryError;
    use crate::utils::config::{resolve, Options};

    fn config(overrides: Options) -> EffectiveConfig {
        let overrides = Options {
            retry_backoff: Some(0),
            ..Default::default()
        }
        .merge(overrides);
        resolve(Options::defaults(), None, overrides).unwrap()
    }

    fn files() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello world 1").unwrap();
        std::fs::write(dir.path().join("b.txt"), "hello world 2").unwrap();
        dir
    }

    fn request(dir: &TempDir, folder: &str) -> UploadRequest {
        UploadRequest {
            path: dir.path().to_path_buf(),
            folder: Some(folder.to_string()),
            dry_run: false,
        }
    }

    fn uploader(directory: &Arc<MockDirectory>, config: EffectiveConfig) -> Uploader {
        Uploader::new(config, HistoryStore::in_memory(History::default()))
            .with_directory(Arc::clone(directory) as Arc<dyn ServerDirectory>)
    }

    #[tokio::test]
    async fn same_content_same_folder_is_uploaded_once() {
        let dir = files();
        let directory = Arc::new(MockDirectory::with_servers());
        let mut uploader = uploader(&directory, config(Options::default()));

        let first = uploader.run(&request(&dir, "folder")).await.unwrap();
        assert_eq!(first.summary.succeeded, 2);
        assert_eq!(directory.uploads.load(Ordering::SeqCst), 2);

        let second = uploader.run(&request(&dir, "folder")).await.unwrap();
        assert_eq!(directory.uploads.load(Ordering::SeqCst), 2);
        assert_eq!(second.summary.skipped, 2);
        assert_eq!(uploader.history().uploads.len(), 2);

        let mut reused = second.results.clone();
        reused.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        let mut first_results = first.results.clone();
        first_results.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        assert_eq!(reused, first_results);
    }

    #[tokio::test]
    async fn same_content_different_folder_is_uploaded_again() {
        let dir = files();
        let directory = Arc::new(MockDirectory::with_servers());
        let mut uploader = uploader(&directory, config(Options::default()));

        uploader.run(&request(&dir, "one")).await.unwrap();
        let second = uploader.run(&request(&dir, "two")).await.unwrap();

        assert_eq!(second.summary.skipped, 0);
        assert_eq!(second.summary.succeeded, 2);
        assert_eq!(directory.uploads.load(Ordering::SeqCst), 4);
        assert_eq!(uploader.history().uploads.len(), 4);
    }

    #[tokio::test]
    async fn changed_content_is_uploaded_again() {
        let dir = files();
        let directory = Arc::new(MockDirectory::with_servers());
        let mut uploader = uploader(&directory, config(Options::default()));

        uploader.run(&request(&dir, "folder")).await.unwrap();
        std::fs::write(dir.path().join("a.txt"), "changed").unwrap();
        let second = uploader.run(&request(&dir, "folder")).await.unwrap();

        assert_eq!(second.summary.succeeded, 1);
        assert_eq!(second.summary.skipped, 1);
        assert_eq!(directory.uploads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn dry_run_hashes_without_network_results() {
        let dir = files();
        let mut uploader = Uploader::new(
            config(Options::default()),
            HistoryStore::in_memory(History::default()),
        );
        let report = uploader
            .run(&UploadRequest {
                path: dir.path().to_path_buf(),
                folder: None,
                dry_run: true,
            })
            .await
            .unwrap();

        assert!(report.results.is_empty());
        assert_eq!(report.summary.hashed, 2);
        assert!(uploader.history().uploads.is_empty());
        assert_eq!(uploader.history().md5_sums.len(), 2);
        assert!(uploader
            .history()
            .md5_sums
            .values()
            .any(|digest| digest == "35b783efece70cf246f5fa61ba9a4951"));
    }

    #[tokio::test]
    async fn remote_copy_with_same_name_is_not_uploaded() {
        let dir = files();
        let directory = Arc::new(MockDirectory::with_servers());
        let digest = md5_file(&dir.path().join("a.txt")).await.unwrap();
        directory.add_remote(
            "folder",
            RemoteFile {
                id: "r1".to_string(),
                name: "a.txt".to_string(),
                md5: digest,
            },
        );
        let mut uploader = uploader(&directory, config(Options::default()));

        let report = uploader.run(&request(&dir, "folder")).await.unwrap();
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(directory.uploads.load(Ordering::SeqCst), 1);
        assert_eq!(uploader.history().uploads.len(), 2);
    }

    #[tokio::test]
    async fn remote_copy_with_other_name_is_renamed() {
        let dir = files();
        let directory = Arc::new(MockDirectory::with_servers());
        let digest = md5_file(&dir.path().join("a.txt")).await.unwrap();
        directory.add_remote(
            "folder",
            RemoteFile {
                id: "r1".to_string(),
                name: "old.txt".to_string(),
                md5: digest,
            },
        );
        let mut uploader = uploader(&directory, config(Options::default()));

        let report = uploader.run(&request(&dir, "folder")).await.unwrap();
        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(directory.renames.load(Ordering::SeqCst), 1);
        assert_eq!(directory.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn public_option_publishes_the_folder() {
        let dir = files();
        let directory = Arc::new(MockDirectory::with_servers());
        let mut uploader = uploader(
            &directory,
            config(Options {
                public: Some(true),
                ..Default::default()
            }),
        );

        uploader.run(&request(&dir, "shared")).await.unwrap();
        assert!(directory.is_public("shared"));
    }

    #[tokio::test]
    async fn directory_name_is_the_default_folder() {
        let dir = files();
        let directory = Arc::new(MockDirectory::with_servers());
        let mut uploader = uploader(&directory, config(Options::default()));

        let report = uploader
            .run(&UploadRequest {
                path: dir.path().to_path_buf(),
                folder: None,
                dry_run: false,
            })
            .await
            .unwrap();
        let expected = default_folder_name(&std::fs::canonicalize(dir.path()).unwrap());
        assert!(report
            .results
            .iter()
            .all(|result| result.parent_folder == expected));
    }

    #[tokio::test]
    async fn no_server_anywhere_is_run_fatal() {
        let dir = files();
        let directory = Arc::new(MockDirectory::default());
        let mut uploader = uploader(&directory, config(Options::default()));

        let err = uploader.run(&request(&dir, "folder")).await.unwrap_err();
        assert!(matches!(err, UploaderError::NoServerAvailable));
    }

    #[tokio::test]
    async fn history_is_persisted_after_each_upload() {
        let dir = files();
        let config_dir = tempfile::tempdir().unwrap();
        let path = config_dir.path().join("config.json");
        let directory = Arc::new(MockDirectory::with_servers());
        let store = HistoryStore::load(path.clone()).await.unwrap();
        let mut uploader = Uploader::new(config(Options::default()), store)
            .with_directory(Arc::clone(&directory) as Arc<dyn ServerDirectory>);

        uploader.run(&request(&dir, "folder")).await.unwrap();

        let reloaded = HistoryStore::load(path).await.unwrap();
        assert_eq!(reloaded.history().uploads.len(), 2);
        assert_eq!(reloaded.history().md5_sums.len(), 2);
        assert!(reloaded.history().uploads.iter().all(UploadResult::succeeded));
    }

    #[tokio::test]
    async fn missing_path_fails_before_any_upload_setup() {
        let dir = tempfile::tempdir().unwrap();
        let directory = Arc::new(MockDirectory::with_servers());
        let mut uploader = uploader(&directory, config(Options::default()));
        let request = UploadRequest {
            path: dir.path().join("missing"),
            folder: None,
            dry_run: false,
        };

        assert!(matches!(
            uploader.discover(&request).await,
            Err(UploaderError::Discovery(DiscoveryError::NotFound(_)))
        ));
        let err = uploader.run(&request).await.unwrap_err();
        assert!(matches!(err, UploaderError::Discovery(_)));
        assert_eq!(directory.server_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn content_known_from_another_path_is_reported_under_its_own_path() {
        let dir = files();
        std::fs::write(dir.path().join("c.txt"), "hello world 1").unwrap();
        let directory = Arc::new(MockDirectory::with_servers());
        directory.fail("c.txt", vec![unavailable()]);
        let mut uploader = uploader(
            &directory,
            config(Options {
                retries: Some(1),
                ..Default::default()
            }),
        );

        let first = uploader.run(&request(&dir, "folder")).await.unwrap();
        assert_eq!(first.summary.failed, 1);

        let second = uploader.run(&request(&dir, "folder")).await.unwrap();
        assert_eq!(second.summary.skipped, 3);
        let c = second
            .results
            .iter()
            .find(|result| result.file_path.ends_with("/c.txt"))
            .unwrap();
        assert!(c.succeeded());
        assert_eq!(c.file_id.as_deref(), Some("id-a.txt"));
        assert_eq!(c.file_path_md5, md5_hex(&c.file_path));
        assert_eq!(c.file_name_md5, md5_hex("c.txt"));
    }

    /// `b.txt` takes a while to hash; notes how many uploads ran by then
    struct LaggingHasher {
        directory: Arc<MockDirectory>,
        uploads_before_last_hash: AtomicU32,
    }

    #[async_trait]
    impl ContentHasher for LaggingHasher {
        async fn digest(&self, candidate: &FileCandidate) -> std::result::Result<String, HashError> {
            if candidate.file_name() == "b.txt" {
                tokio::time::sleep(Duration::from_millis(300)).await;
                self.uploads_before_last_hash
                    .store(self.directory.uploads.load(Ordering::SeqCst), Ordering::SeqCst);
            }
            Ok(format!("digest-{}", candidate.file_name()))
        }
    }

    #[tokio::test]
    async fn uploads_start_while_hashing_continues() {
        let dir = files();
        let directory = Arc::new(MockDirectory::with_servers());
        let hasher = Arc::new(LaggingHasher {
            directory: Arc::clone(&directory),
            uploads_before_last_hash: AtomicU32::new(0),
        });
        let mut uploader = uploader(
            &directory,
            config(Options {
                hash_pool_size: Some(2),
                ..Default::default()
            }),
        )
        .with_hasher(hasher.clone());

        let report = uploader.run(&request(&dir, "folder")).await.unwrap();
        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(hasher.uploads_before_last_hash.load(Ordering::SeqCst), 1);
    }
}
