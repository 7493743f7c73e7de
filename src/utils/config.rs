use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::domain::Zone;
use crate::utils::constants::*;
use crate::utils::error::ConfigError;

/// What an authentication failure during a transfer takes down
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AuthFailurePolicy {
    /// only the affected file fails
    #[default]
    Task,
    /// remaining files are failed without a transfer and the run errors out
    Run,
}

/// One tier of options. Every field is optional so tiers can be layered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zone: Option<Zone>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connections: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash_pool_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>, // seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurse: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurse_max: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub only_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_config: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rename_existing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_backoff: Option<u64>, // milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_auth_failure: Option<AuthFailurePolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website_token: Option<String>,
}

impl Options {
    /// Built-in defaults, the lowest tier
    pub fn defaults() -> Self {
        Self {
            token: None,
            zone: None,
            connections: Some(DEFAULT_CONNECTIONS),
            public: Some(false),
            save: Some(true),
            retries: Some(DEFAULT_RETRIES),
            hash_pool_size: Some(DEFAULT_HASH_POOL_SIZE),
            timeout: Some(DEFAULT_TIMEOUT_SECS),
            recurse: Some(false),
            recurse_max: Some(DEFAULT_RECURSE_MAX),
            exclude_types: None,
            only_types: None,
            use_config: Some(true),
            rename_existing: Some(true),
            retry_backoff: Some(DEFAULT_RETRY_BACKOFF_MS),
            on_auth_failure: Some(AuthFailurePolicy::Task),
            website_token: None,
        }
    }

    /// Layer `higher` on top of `self`, option by option
    pub fn merge(self, higher: Options) -> Options {
        Options {
            token: higher.token.or(self.token),
            zone: higher.zone.or(self.zone),
            connections: higher.connections.or(self.connections),
            public: higher.public.or(self.public),
            save: higher.save.or(self.save),
            retries: higher.retries.or(self.retries),
            hash_pool_size: higher.hash_pool_size.or(self.hash_pool_size),
            timeout: higher.timeout.or(self.timeout),
            recurse: higher.recurse.or(self.recurse),
            recurse_max: higher.recurse_max.or(self.recurse_max),
            exclude_types: higher.exclude_types.or(self.exclude_types),
            only_types: higher.only_types.or(self.only_types),
            use_config: higher.use_config.or(self.use_config),
            rename_existing: higher.rename_existing.or(self.rename_existing),
            retry_backoff: higher.retry_backoff.or(self.retry_backoff),
            on_auth_failure: higher.on_auth_failure.or(self.on_auth_failure),
            website_token: higher.website_token.or(self.website_token),
        }
    }
}

/// Options after merging, with every default filled in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub token: Option<String>,
    pub zone: Option<Zone>,
    pub connections: usize,
    pub public: bool,
    pub save: bool,
    pub retries: u32,
    pub hash_pool_size: usize,
    pub timeout: Duration,
    pub recurse: bool,
    pub recurse_max: usize,
    pub exclude_types: Vec<String>,
    pub only_types: Vec<String>,
    pub use_config: bool,
    pub rename_existing: bool,
    pub retry_backoff: Duration,
    pub on_auth_failure: AuthFailurePolicy,
    pub website_token: Option<String>,
}

impl EffectiveConfig {
    fn from_options(options: Options) -> Result<Self, ConfigError> {
        let connections = options.connections.unwrap_or(DEFAULT_CONNECTIONS);
        let hash_pool_size = options.hash_pool_size.unwrap_or(DEFAULT_HASH_POOL_SIZE);
        if connections == 0 {
            return Err(ConfigError::Invalid("connections must be at least 1".into()));
        }
        if hash_pool_size == 0 {
            return Err(ConfigError::Invalid("hash_pool_size must be at least 1".into()));
        }
        let timeout = options.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout == 0 {
            return Err(ConfigError::Invalid("timeout must be at least 1 second".into()));
        }

        Ok(Self {
            token: options.token.filter(|token| !token.trim().is_empty()),
            zone: options.zone,
            connections,
            public: options.public.unwrap_or(false),
            save: options.save.unwrap_or(true),
            // every file gets at least one attempt
            retries: options.retries.unwrap_or(DEFAULT_RETRIES).max(1),
            hash_pool_size,
            timeout: Duration::from_secs(timeout),
            recurse: options.recurse.unwrap_or(false),
            recurse_max: options.recurse_max.unwrap_or(DEFAULT_RECURSE_MAX),
            exclude_types: normalize_types(options.exclude_types),
            only_types: normalize_types(options.only_types),
            use_config: options.use_config.unwrap_or(true),
            rename_existing: options.rename_existing.unwrap_or(true),
            retry_backoff: Duration::from_millis(
                options.retry_backoff.unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
            ),
            on_auth_failure: options.on_auth_failure.unwrap_or_default(),
            website_token: options.website_token,
        })
    }
}

fn normalize_types(types: Option<Vec<String>>) -> Vec<String> {
    types
        .unwrap_or_default()
        .iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// Merge defaults < local < overrides, each option independently
pub fn resolve(
    defaults: Options,
    local: Option<Options>,
    overrides: Options,
) -> Result<EffectiveConfig, ConfigError> {
    let merged = defaults.merge(local.unwrap_or_default()).merge(overrides);
    EffectiveConfig::from_options(merged)
}

/// Location of the persisted config: `$HOME/.config/gofile-upload/config.json`
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(".config").join(CONFIG_DIR).join(CONFIG_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

/// The local tier: the persisted file (when given and present) under `GOFILE_*` environment variables
pub fn load_local_options(config_path: Option<&Path>) -> Result<Options, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path).format(FileFormat::Json).required(false));
    }
    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true));

    let error_path = config_path.map(Path::to_path_buf).unwrap_or_default();
    builder
        .build()
        .and_then(|settings| settings.try_deserialize::<Options>())
        .map_err(|source| ConfigError::Load {
            path: error_path,
            source,
        })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rstest::rstest;

    use super::*;

    #[test]
    fn merge_is_independent_per_option() {
        let defaults = Options {
            connections: Some(6),
            retries: Some(3),
            ..Default::default()
        };
        let local = Options {
            connections: Some(10),
            ..Default::default()
        };
        let cli = Options {
            retries: Some(5),
            ..Default::default()
        };

        let effective = resolve(defaults, Some(local), cli).unwrap();
        assert_eq!(effective.connections, 10);
        assert_eq!(effective.retries, 5);
    }

    #[test]
    fn missing_local_tier_falls_through_to_defaults() {
        let effective = resolve(Options::defaults(), None, Options::default()).unwrap();
        assert_eq!(effective.connections, DEFAULT_CONNECTIONS);
        assert_eq!(effective.retries, DEFAULT_RETRIES);
        assert_eq!(effective.hash_pool_size, DEFAULT_HASH_POOL_SIZE);
        assert_eq!(effective.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert!(effective.save);
        assert!(!effective.public);
        assert!(effective.use_config);
        assert!(effective.rename_existing);
        assert_eq!(effective.on_auth_failure, AuthFailurePolicy::Task);
    }

    #[rstest]
    #[case(Some("cli"), Some("local"), Some("cli"))]
    #[case(None, Some("local"), Some("local"))]
    #[case(None, None, None)]
    #[case(Some("   "), Some("local"), None)]
    fn token_precedence_test(
        #[case] cli: Option<&str>,
        #[case] local: Option<&str>,
        #[case] expected: Option<&str>,
    ) {
        let local = Options {
            token: local.map(str::to_string),
            ..Default::default()
        };
        let cli = Options {
            token: cli.map(str::to_string),
            ..Default::default()
        };
        let effective = resolve(Options::defaults(), Some(local), cli).unwrap();
        assert_eq!(expected, effective.token.as_deref());
    }

    #[test]
    fn extension_lists_are_normalized() {
        let cli = Options {
            only_types: Some(vec![".JPG".into(), " png ".into(), "".into()]),
            ..Default::default()
        };
        let effective = resolve(Options::defaults(), None, cli).unwrap();
        assert_eq!(effective.only_types, vec!["jpg", "png"]);
        assert!(effective.exclude_types.is_empty());
    }

    #[rstest]
    #[case(Options { connections: Some(0), ..Default::default() })]
    #[case(Options { hash_pool_size: Some(0), ..Default::default() })]
    #[case(Options { timeout: Some(0), ..Default::default() })]
    fn zero_limits_are_rejected(#[case] cli: Options) {
        assert!(matches!(
            resolve(Options::defaults(), None, cli),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn none_values_are_omitted_when_serialized() {
        let options = Options {
            connections: Some(4),
            ..Default::default()
        };
        assert_eq!(serde_json::to_string(&options).unwrap(), r#"{"connections":4}"#);
    }

    #[test]
    fn local_options_are_read_from_file_ignoring_history() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"connections": 10, "zone": "eu", "public": true, "history": {{"md5_sums": {{}}, "uploads": []}}}}"#
        )
        .unwrap();

        let options = load_local_options(Some(file.path())).unwrap();
        assert_eq!(options.connections, Some(10));
        assert_eq!(options.zone, Some(Zone::Eu));
        assert_eq!(options.public, Some(true));
        assert_eq!(options.retries, None);
    }

    #[test]
    fn missing_local_file_is_an_empty_tier() {
        let dir = tempfile::tempdir().unwrap();
        let options = load_local_options(Some(&dir.path().join("config.json"))).unwrap();
        assert_eq!(options.connections, None);
        assert_eq!(options.retries, None);
    }

    #[test]
    fn malformed_local_file_is_a_config_error() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            load_local_options(Some(file.path())),
            Err(ConfigError::Load { .. })
        ));
    }
}
