pub const API_BASE_URL: &str = "https://api.gofile.io";
pub const USER_AGENT: &str = concat!("gofile-upload/", env!("CARGO_PKG_VERSION"));
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

pub const CONFIG_DIR: &str = "gofile-upload"; // under $HOME/.config
pub const CONFIG_NAME: &str = "config.json";
pub const ENV_PREFIX: &str = "GOFILE"; // GOFILE_TOKEN, GOFILE_ZONE, ...

pub const DEFAULT_CONNECTIONS: usize = 6; // uploads in flight at once
pub const DEFAULT_RETRIES: u32 = 3; // transfer attempts per file
pub const DEFAULT_HASH_POOL_SIZE: usize = 4; // files hashed at once
pub const DEFAULT_TIMEOUT_SECS: u64 = 600; // per transfer attempt
pub const DEFAULT_RECURSE_MAX: usize = 1000; // candidates allowed when recursing
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;
pub const MAX_RETRY_BACKOFF_MS: u64 = 60_000;

pub const FILES_TO_IGNORE: [&str; 1] = [".DS_Store"];
pub const HASH_BUFFER_SIZE: usize = 64 * 1024; // 64 KiB read chunks while hashing
pub const REPORT_PREFIX: &str = "gofile_upload";
