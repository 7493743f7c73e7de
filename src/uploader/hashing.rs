use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::{
    cloud_storage::path_conversions::normalize_path,
    domain::FileCandidate,
    uploader::error::HashError,
    utils::constants::HASH_BUFFER_SIZE,
};

/// Computes the content fingerprint of one candidate
#[async_trait]
pub trait ContentHasher: Send + Sync + 'static {
    async fn digest(&self, candidate: &FileCandidate) -> Result<String, HashError>;
}

/// Streaming md5 over fixed-size chunks, the whole file is never held in memory
pub struct Md5Hasher;

#[async_trait]
impl ContentHasher for Md5Hasher {
    async fn digest(&self, candidate: &FileCandidate) -> Result<String, HashError> {
        md5_file(&candidate.path).await
    }
}

pub async fn md5_file(path: &Path) -> Result<String, HashError> {
    let hash_err = |source| HashError {
        path: path.to_path_buf(),
        source,
    };
    let mut file = File::open(path).await.map_err(hash_err)?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer).await.map_err(hash_err)?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
    }
    Ok(format!("{:x}", context.compute()))
}

#[derive(Debug)]
pub enum HashOutcome {
    Hashed {
        candidate: FileCandidate,
        digest: String,
    },
    Failed {
        candidate: FileCandidate,
        error: HashError,
    },
}

/// Fixed group of hashing workers draining one candidate queue
pub struct HashWorkerPool {
    pool_size: usize,
    hasher: Arc<dyn ContentHasher>,
}

impl HashWorkerPool {
    pub fn new(pool_size: usize) -> Self {
        Self::with_hasher(pool_size, Arc::new(Md5Hasher))
    }

    pub fn with_hasher(pool_size: usize, hasher: Arc<dyn ContentHasher>) -> Self {
        Self {
            pool_size: pool_size.max(1),
            hasher,
        }
    }

    /// Hash every candidate. Outcomes arrive in completion order and the
    /// receiver closes once the last worker is done.
    pub fn hash_all(&self, candidates: Vec<FileCandidate>) -> mpsc::UnboundedReceiver<HashOutcome> {
        let (queue_tx, queue_rx) = async_channel::unbounded();
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        for candidate in candidates {
            // cannot fail, the receiver is held below
            let _ = queue_tx.try_send(candidate);
        }
        queue_tx.close();

        for worker in 0..self.pool_size {
            let queue = queue_rx.clone();
            let outcomes = outcome_tx.clone();
            let hasher = Arc::clone(&self.hasher);
            tokio::spawn(async move {
                while let Ok(candidate) = queue.recv().await {
                    let outcome = match hasher.digest(&candidate).await {
                        Ok(digest) => {
                            debug!("[hash {worker}] {} {digest}", normalize_path(&candidate.path));
                            HashOutcome::Hashed { candidate, digest }
                        }
                        Err(error) => {
                            warn!("{error}");
                            HashOutcome::Failed { candidate, error }
                        }
                    };
                    if outcomes.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
        outcome_rx
    }
}
