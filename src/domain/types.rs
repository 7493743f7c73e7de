use std::fmt;
use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::cloud_storage::path_conversions::{md5_hex, normalize_path};

/// Geographic preference used when picking an upload server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Na,
    Eu,
}

impl AsRef<str> for Zone {
    fn as_ref(&self) -> &str {
        match *self {
            Self::Na => "na",
            Self::Eu => "eu",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// A local file selected for upload. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    pub path: PathBuf,
    pub size: u64,
    pub extension: Option<String>,
}

impl FileCandidate {
    pub fn new(path: PathBuf, size: u64) -> Self {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase());
        Self {
            path,
            size,
            extension,
        }
    }

    /// Key used in the digest map and in upload records
    pub fn path_key(&self) -> String {
        normalize_path(&self.path)
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path_key())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// An upload server as reported by the server directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInfo {
    pub id: String,
    pub zone: Option<String>,
    pub endpoint: String,
}

/// The (account, folder) pair a file lands in; dedup decisions are scoped to it
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationScope {
    pub account_id: String,
    pub folder_id: String,
}

impl fmt::Display for DestinationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.folder_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub id: String,
    pub name: String,
    pub md5: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderContents {
    pub id: String,
    pub name: String,
    pub public: bool,
    pub files: Vec<RemoteFile>,
}

/// What the remote side returns after a successful transfer
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadedFile {
    pub code: Option<String>,
    pub download_page: Option<String>,
    #[serde(alias = "id")]
    pub file_id: Option<String>,
    #[serde(alias = "name")]
    pub file_name: Option<String>,
    pub guest_token: Option<String>,
    pub md5: Option<String>,
    pub parent_folder: Option<String>,
}

pub const UPLOAD_SUCCESS: &str = "ok";

/// One terminal outcome for one file. Append-only once created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UploadResult {
    pub file_path: String,
    #[serde(rename = "filePathMD5")]
    pub file_path_md5: String,
    #[serde(rename = "fileNameMD5")]
    pub file_name_md5: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_success: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_folder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResult {
    /// Local metadata only, no remote outcome yet
    pub fn for_candidate(candidate: &FileCandidate) -> Self {
        let file_path = candidate.path_key();
        Self {
            file_path_md5: md5_hex(&file_path),
            file_name_md5: md5_hex(&candidate.file_name()),
            file_path,
            ..Default::default()
        }
    }

    /// Same remote outcome, reported under another local file
    pub fn for_local_file(mut self, candidate: &FileCandidate) -> Self {
        let local = Self::for_candidate(candidate);
        self.file_path = local.file_path;
        self.file_path_md5 = local.file_path_md5;
        self.file_name_md5 = local.file_name_md5;
        self
    }

    pub fn succeeded(&self) -> bool {
        self.upload_success.as_deref() == Some(UPLOAD_SUCCESS)
    }

    pub fn with_digest(mut self, digest: Option<&str>) -> Self {
        if let Some(digest) = digest {
            self.md5 = Some(digest.to_string());
        }
        self
    }

    pub fn with_upload(mut self, uploaded: UploadedFile, scope: &DestinationScope) -> Self {
        self.upload_success = Some(UPLOAD_SUCCESS.to_string());
        self.code = uploaded.code;
        self.download_page = uploaded.download_page;
        self.file_id = uploaded.file_id;
        self.file_name = uploaded.file_name;
        self.guest_token = uploaded.guest_token;
        if uploaded.md5.is_some() {
            self.md5 = uploaded.md5;
        }
        self.parent_folder = uploaded
            .parent_folder
            .or_else(|| Some(scope.folder_id.clone()));
        self.account_id = Some(scope.account_id.clone());
        self.error = None;
        self
    }

    /// Success by renaming a remote file that already holds the same content
    pub fn with_rename(mut self, remote: &RemoteFile, new_name: &str, scope: &DestinationScope) -> Self {
        self.upload_success = Some(UPLOAD_SUCCESS.to_string());
        self.file_id = Some(remote.id.clone());
        self.file_name = Some(new_name.to_string());
        self.md5 = Some(remote.md5.clone());
        self.parent_folder = Some(scope.folder_id.clone());
        self.account_id = Some(scope.account_id.clone());
        self.error = None;
        self
    }

    pub fn with_scope(mut self, scope: Option<&DestinationScope>) -> Self {
        if let Some(scope) = scope {
            self.parent_folder = Some(scope.folder_id.clone());
            self.account_id = Some(scope.account_id.clone());
        }
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = (attempts > 0).then_some(attempts);
        self
    }

    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.upload_success = None;
        self.error = Some(error.into());
        self
    }

    /// True if this record proves `digest` was uploaded into `scope`
    pub fn covers(&self, digest: &str, scope: &DestinationScope) -> bool {
        self.succeeded()
            && self.md5.as_deref() == Some(digest)
            && self.parent_folder.as_deref() == Some(scope.folder_id.as_str())
            && self
                .account_id
                .as_deref()
                .map_or(true, |account| account == scope.account_id)
    }
}
