use async_trait::async_trait;

use crate::cloud_storage::error::DirectoryError;
use crate::domain::types::{
    DestinationScope, FileCandidate, FolderContents, ServerInfo, UploadedFile, Zone,
};

/// Remote side of an upload run: server listing, destination folders and transfers
#[async_trait]
pub trait ServerDirectory: Send + Sync {
    /// Id of the account every upload of this run belongs to
    fn account_id(&self) -> &str;

    fn root_folder_id(&self) -> &str;

    /// Servers accepting uploads, restricted to `zone` when given
    async fn servers(&self, zone: Option<Zone>) -> Result<Vec<ServerInfo>, DirectoryError>;

    /// Locate a destination folder by name, creating it when missing.
    /// `None` means the account's root folder.
    async fn resolve_folder(&self, folder: Option<&str>) -> Result<DestinationScope, DirectoryError>;

    async fn folder_contents(&self, folder_id: &str) -> Result<FolderContents, DirectoryError>;

    async fn make_public(&self, folder_id: &str) -> Result<(), DirectoryError>;

    async fn rename(&self, content_id: &str, new_name: &str) -> Result<(), DirectoryError>;

    async fn upload(
        &self,
        server: &ServerInfo,
        candidate: &FileCandidate,
        folder_id: &str,
    ) -> Result<UploadedFile, DirectoryError>;
}
