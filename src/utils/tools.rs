use std::io::ErrorKind;
use std::path::Path;

use async_recursion::async_recursion;
use log::{debug, warn};
use tokio::fs;
use tokio_stream::{wrappers::ReadDirStream, StreamExt};

use crate::{
    cloud_storage::path_conversions::normalize_path,
    domain::FileCandidate,
    utils::{config::EffectiveConfig, constants::FILES_TO_IGNORE, error::DiscoveryError},
};

#[derive(Debug, Clone, Default)]
pub struct DiscoveryOptions {
    pub recurse: bool,
    pub recurse_max: usize,
    pub only_types: Vec<String>,
    pub exclude_types: Vec<String>,
}

impl From<&EffectiveConfig> for DiscoveryOptions {
    fn from(config: &EffectiveConfig) -> Self {
        Self {
            recurse: config.recurse,
            recurse_max: config.recurse_max,
            only_types: config.only_types.clone(),
            exclude_types: config.exclude_types.clone(),
        }
    }
}

impl DiscoveryOptions {
    /// Extension filters; `only_types` is applied before `exclude_types`
    pub fn accepts(&self, candidate: &FileCandidate) -> bool {
        let extension = candidate.extension.as_deref().unwrap_or_default();
        if !self.only_types.is_empty() && !self.only_types.iter().any(|ext| ext == extension) {
            return false;
        }
        !self.exclude_types.iter().any(|ext| ext == extension)
    }
}

fn is_ignored(path: &Path) -> bool {
    path.file_name()
        .map(|name| FILES_TO_IGNORE.iter().any(|ignore| name.to_string_lossy() == *ignore))
        .unwrap_or(false)
}

/// Expand `path` into the files to upload: the file itself, or the files of a directory
pub async fn discover(path: &Path, options: &DiscoveryOptions) -> Result<Vec<FileCandidate>, DiscoveryError> {
    let root = match fs::canonicalize(path).await {
        Ok(root) => root,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(DiscoveryError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(DiscoveryError::io(path, e)),
    };
    let metadata = fs::metadata(&root)
        .await
        .map_err(|e| DiscoveryError::io(&root, e))?;

    if metadata.is_file() {
        let candidate = FileCandidate::new(root, metadata.len());
        if !options.accepts(&candidate) {
            warn!(
                "File {} is filtered out by the extension filters",
                normalize_path(&candidate.path)
            );
            return Ok(Vec::new());
        }
        return Ok(vec![candidate]);
    }

    let mut files = Vec::new();
    files_walker(&root, &root, options, &mut files).await?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    debug!("Discovered {} files in {}", files.len(), normalize_path(&root));
    Ok(files)
}

#[async_recursion]
async fn files_walker(
    root: &Path,
    dir: &Path,
    options: &DiscoveryOptions,
    files: &mut Vec<FileCandidate>,
) -> Result<(), DiscoveryError> {
    let read_dir = fs::read_dir(dir)
        .await
        .map_err(|e| DiscoveryError::io(dir, e))?;
    let mut entries = ReadDirStream::new(read_dir);

    while let Some(entry) = entries.next().await {
        let entry = entry.map_err(|e| DiscoveryError::io(dir, e))?;
        let entry_path = entry.path();
        // follows symlinks, a dangling one is skipped
        let metadata = match fs::metadata(&entry_path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Skipping {}: {e}", normalize_path(&entry_path));
                continue;
            }
        };

        if metadata.is_file() {
            if is_ignored(&entry_path) {
                continue;
            }
            let candidate = FileCandidate::new(entry_path, metadata.len());
            if options.accepts(&candidate) {
                files.push(candidate);
            }
            if options.recurse && files.len() > options.recurse_max {
                return Err(DiscoveryError::TooManyFiles {
                    path: root.to_path_buf(),
                    limit: options.recurse_max,
                });
            }
        } else if metadata.is_dir() && options.recurse {
            files_walker(root, &entry_path, options, files).await?;
        }
    }
    Ok(())
}
