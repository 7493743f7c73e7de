pub mod cloud_storage;
pub mod domain;
pub mod error;
pub mod uploader;
pub mod utils;

pub use error::UploaderError;

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::domain::Zone;
use crate::utils::config::{AuthFailurePolicy, Options};

#[derive(Parser, Debug)]
#[command(name = "gofile-upload")]
#[command(version, about = "Upload files to gofile.io, skipping content that is already there")]
pub struct Cli {
    /// File or directory to upload
    pub file: PathBuf,

    /// Account token; `GOFILE_TOKEN` works too
    #[arg(short, long)]
    pub token: Option<String>,

    /// Preferred server zone
    #[arg(short, long, value_enum)]
    pub zone: Option<Zone>,

    /// Destination folder name or id; defaults to the directory name
    #[arg(short, long)]
    pub folder: Option<String>,

    /// Discover and hash only, upload nothing
    #[arg(short, long)]
    pub dry_run: bool,

    /// Uploads in flight at once
    #[arg(short, long)]
    pub connections: Option<usize>,

    /// Seconds allowed for one transfer attempt
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Make the destination folder public
    #[arg(long, overrides_with = "private")]
    pub public: bool,

    #[arg(long, overrides_with = "public")]
    pub private: bool,

    /// Write a CSV report of the run
    #[arg(long, overrides_with = "no_save")]
    pub save: bool,

    #[arg(long, overrides_with = "save")]
    pub no_save: bool,

    /// Read settings from and record history in the per-user config file
    #[arg(long, overrides_with = "no_use_config")]
    pub use_config: bool,

    #[arg(long, overrides_with = "use_config")]
    pub no_use_config: bool,

    /// Walk subdirectories too
    #[arg(long, overrides_with = "no_recurse")]
    pub recurse: bool,

    #[arg(long, overrides_with = "recurse")]
    pub no_recurse: bool,

    /// Most files accepted when recursing
    #[arg(long)]
    pub recurse_max: Option<usize>,

    /// Only upload these extensions, comma separated
    #[arg(long, value_delimiter = ',')]
    pub only_types: Option<Vec<String>>,

    /// Never upload these extensions, comma separated
    #[arg(long, value_delimiter = ',')]
    pub exclude_types: Option<Vec<String>>,

    /// Transfer attempts per file
    #[arg(short, long)]
    pub retries: Option<u32>,

    /// Files hashed at once
    #[arg(long)]
    pub hash_pool_size: Option<usize>,

    /// Rename a remote copy with the same content instead of uploading it again
    #[arg(long, overrides_with = "no_rename_existing")]
    pub rename_existing: bool,

    #[arg(long, overrides_with = "rename_existing")]
    pub no_rename_existing: bool,

    /// Base delay in milliseconds before a retry, doubled per attempt
    #[arg(long)]
    pub retry_backoff: Option<u64>,

    /// What an authentication failure takes down
    #[arg(long, value_enum)]
    pub on_auth_failure: Option<AuthFailurePolicy>,

    /// Website token sent when listing folder contents
    #[arg(long)]
    pub website_token: Option<String>,

    #[arg(long, value_enum, default_value_t = LogLevel::Warning)]
    pub log_level: LogLevel,

    /// Append logs to this file instead of stderr
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// `env_logger` filter for this level
    pub fn filter(&self) -> &'static str {
        match *self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warn",
            Self::Error | Self::Critical => "error",
        }
    }
}

/// `--x` / `--no-x` pair; neither given means the flag is absent
fn switch(on: bool, off: bool) -> Option<bool> {
    match (on, off) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    }
}

impl Cli {
    /// The command line as the highest configuration tier
    pub fn overrides(&self) -> Options {
        Options {
            token: self.token.clone(),
            zone: self.zone,
            connections: self.connections,
            public: switch(self.public, self.private),
            save: switch(self.save, self.no_save),
            retries: self.retries,
            hash_pool_size: self.hash_pool_size,
            timeout: self.timeout,
            recurse: switch(self.recurse, self.no_recurse),
            recurse_max: self.recurse_max,
            exclude_types: self.exclude_types.clone(),
            only_types: self.only_types.clone(),
            use_config: switch(self.use_config, self.no_use_config),
            rename_existing: switch(self.rename_existing, self.no_rename_existing),
            retry_backoff: self.retry_backoff,
            on_auth_failure: self.on_auth_failure,
            website_token: self.website_token.clone(),
        }
    }

    /// Config problems are only fatal when the config was asked for by name
    pub fn use_config_explicit(&self) -> bool {
        self.use_config
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("gofile-upload").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn absent_flags_are_absent_overrides() {
        let cli = parse(&["file.txt"]);
        assert_eq!(cli.overrides(), Options::default());
        assert!(!cli.use_config_explicit());
        assert_eq!(cli.log_level, LogLevel::Warning);
    }

    #[rstest]
    #[case(&["f", "--public"], Some(true))]
    #[case(&["f", "--private"], Some(false))]
    #[case(&["f", "--public", "--private"], Some(false))]
    #[case(&["f", "--private", "--public"], Some(true))]
    #[case(&["f"], None)]
    fn public_switch_test(#[case] args: &[&str], #[case] expected: Option<bool>) {
        assert_eq!(parse(args).overrides().public, expected);
    }

    #[test]
    fn values_are_carried_into_overrides() {
        let cli = parse(&[
            "dir",
            "-t",
            "tok",
            "-z",
            "eu",
            "-c",
            "10",
            "-r",
            "5",
            "--only-types",
            "jpg,png",
            "--no-save",
            "--use-config",
            "--on-auth-failure",
            "run",
        ]);
        let overrides = cli.overrides();
        assert_eq!(overrides.token.as_deref(), Some("tok"));
        assert_eq!(overrides.zone, Some(Zone::Eu));
        assert_eq!(overrides.connections, Some(10));
        assert_eq!(overrides.retries, Some(5));
        assert_eq!(overrides.only_types, Some(vec!["jpg".to_string(), "png".to_string()]));
        assert_eq!(overrides.save, Some(false));
        assert_eq!(overrides.use_config, Some(true));
        assert_eq!(overrides.on_auth_failure, Some(AuthFailurePolicy::Run));
        assert!(cli.use_config_explicit());
    }

    #[rstest]
    #[case("warning", "warn")]
    #[case("critical", "error")]
    #[case("debug", "debug")]
    fn log_level_filter_test(#[case] level: &str, #[case] filter: &str) {
        let cli = parse(&["f", "--log-level", level]);
        assert_eq!(cli.log_level.filter(), filter);
    }
}
