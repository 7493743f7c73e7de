use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::fs;

use crate::{
    cloud_storage::path_conversions::normalize_path,
    domain::UploadResult,
    uploader::{dedup::DedupIndex, error::HistoryError},
    utils::{
        config::{load_local_options, resolve, EffectiveConfig, Options},
        error::ConfigError,
    },
};

/// Digests seen per local path plus every recorded upload outcome
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct History {
    pub md5_sums: BTreeMap<String, String>,
    pub uploads: Vec<UploadResult>,
}

impl History {
    pub fn digest(&self, path_key: &str) -> Option<&str> {
        self.md5_sums.get(path_key).map(String::as_str)
    }
}

#[derive(Debug, Default, Deserialize)]
struct Document {
    #[serde(flatten)]
    settings: Map<String, Value>,
    #[serde(default)]
    history: History,
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    #[serde(flatten)]
    settings: &'a Map<String, Value>,
    history: &'a History,
}

/// Owner of the run's history. Single writer: only the orchestrator touches it.
#[derive(Debug, Default)]
pub struct HistoryStore {
    path: Option<PathBuf>,
    settings: Map<String, Value>,
    history: History,
}

impl HistoryStore {
    /// Never written to disk
    pub fn in_memory(history: History) -> Self {
        Self {
            path: None,
            settings: Map::new(),
            history,
        }
    }

    /// Read the persisted config document; a missing file starts an empty history
    pub async fn load(path: PathBuf) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No config at {}, it will be created", normalize_path(&path));
                return Ok(Self {
                    path: Some(path),
                    ..Default::default()
                });
            }
            Err(e) => {
                return Err(ConfigError::Invalid(format!(
                    "cannot read {}: {e}",
                    normalize_path(&path)
                )))
            }
        };

        let mut document: Document = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        document.settings.retain(|_, value| !value.is_null());
        debug!(
            "Loaded history from {}: {} digests, {} uploads",
            normalize_path(&path),
            document.history.md5_sums.len(),
            document.history.uploads.len()
        );

        Ok(Self {
            path: Some(path),
            settings: document.settings,
            history: document.history,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn into_history(self) -> History {
        self.history
    }

    pub fn dedup(&mut self) -> DedupIndex<'_> {
        DedupIndex::new(&mut self.history)
    }

    /// Append a terminal result and persist right away
    pub async fn append(&mut self, result: UploadResult) -> Result<(), HistoryError> {
        self.history.uploads.push(result);
        self.checkpoint().await
    }

    /// Write the whole document to a temp file and rename it over the config
    pub async fn checkpoint(&self) -> Result<(), HistoryError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&DocumentRef {
            settings: &self.settings,
            history: &self.history,
        })?;

        let write_err = |source: std::io::Error| HistoryError::Write {
            path: path.clone(),
            source,
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await.map_err(write_err)?;
        }
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, &bytes).await.map_err(write_err)?;
        fs::rename(&temp_path, path).await.map_err(write_err)?;
        debug!("Saved history to {}", normalize_path(path));
        Ok(())
    }
}

/// Settings and history for one run.
///
/// The config file is skipped entirely with `--no-use-config`. A file that
/// cannot be located or read is fatal only when `--use-config` was given;
/// otherwise it is ignored and never rewritten during the run.
pub async fn open_run(
    config_path: Result<PathBuf, ConfigError>,
    overrides: Options,
    explicit: bool,
) -> Result<(EffectiveConfig, HistoryStore), ConfigError> {
    let config_path = match (overrides.use_config, config_path) {
        (Some(false), _) => None,
        (_, Ok(path)) => Some(path),
        (_, Err(e)) if explicit => return Err(e),
        (_, Err(e)) => {
            warn!("{e}, running without the config file");
            None
        }
    };

    let mut persist = config_path.is_some();
    let local = match load_local_options(config_path.as_deref()) {
        Ok(local) => local,
        Err(e) if explicit => return Err(e),
        Err(e) => {
            warn!("{e}, ignoring the config file for this run");
            persist = false;
            load_local_options(None).unwrap_or_default()
        }
    };
    let config = resolve(Options::defaults(), Some(local), overrides)?;

    let history = match config_path.filter(|_| persist && config.use_config) {
        Some(path) => match HistoryStore::load(path).await {
            Ok(store) => store,
            Err(e) if explicit => return Err(e),
            Err(e) => {
                warn!("{e}, history is not used for this run");
                HistoryStore::in_memory(History::default())
            }
        },
        None => HistoryStore::in_memory(History::default()),
    };
    Ok((config, history))
}
