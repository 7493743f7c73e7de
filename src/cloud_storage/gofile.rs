use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use regex::Regex;
use reqwest::{multipart, Body, Client};
use serde::Deserialize;
use tokio_util::io::ReaderStream;

use crate::{
    cloud_storage::{error::DirectoryError, path_conversions::normalize_path, tools::read_envelope},
    domain::{
        DestinationScope, FileCandidate, FolderContents, RemoteFile, ServerDirectory, ServerInfo,
        UploadedFile, Zone,
    },
    utils::constants::{API_BASE_URL, CONNECT_TIMEOUT_SECS, USER_AGENT},
};

static FOLDER_ID_RE: LazyLock<Result<Regex, regex::Error>> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
});

/// A folder name shaped like a UUIDv4 is taken to be an existing folder id
pub fn looks_like_folder_id(folder: &str) -> bool {
    match FOLDER_ID_RE.as_ref() {
        Ok(re) => re.is_match(folder),
        Err(_) => false,
    }
}

#[derive(Debug, Clone)]
pub struct GofileSettings {
    pub api_base: String,
    pub token: Option<String>,
    pub website_token: Option<String>,
}

impl GofileSettings {
    pub fn new(token: Option<String>, website_token: Option<String>) -> Self {
        Self {
            api_base: API_BASE_URL.to_string(),
            token,
            website_token,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NewAccount {
    id: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct AccountId {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountDetails {
    root_folder: String,
    #[serde(default)]
    tier: String,
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    name: String,
    #[serde(default)]
    zone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServersData {
    #[serde(default)]
    servers: Vec<ServerEntry>,
}

#[derive(Debug, Deserialize)]
struct ContentChild {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    md5: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentData {
    id: String,
    name: String,
    #[serde(default)]
    public: bool,
    #[serde(default)]
    children: HashMap<String, ContentChild>,
}

#[derive(Debug, Deserialize)]
struct CreatedFolder {
    #[serde(alias = "folderId")]
    id: String,
}

fn server_info_from(entry: ServerEntry) -> ServerInfo {
    ServerInfo {
        endpoint: format!("https://{}.gofile.io", entry.name),
        id: entry.name,
        zone: entry.zone,
    }
}

fn folder_contents_from(data: ContentData) -> FolderContents {
    let mut files: Vec<RemoteFile> = data
        .children
        .into_values()
        .filter(|child| child.kind == "file")
        .filter_map(|child| {
            child.md5.map(|md5| RemoteFile {
                id: child.id,
                name: child.name,
                md5,
            })
        })
        .collect();
    files.sort_by(|a, b| a.name.cmp(&b.name));

    FolderContents {
        id: data.id,
        name: data.name,
        public: data.public,
        files,
    }
}

fn child_folder_named(data: &ContentData, folder: &str) -> Option<String> {
    data.children
        .values()
        .find(|child| child.kind == "folder" && child.name == folder)
        .map(|child| child.id.clone())
}

/// gofile.io account session
pub struct GofileStorage {
    client: Client,
    api_base: String,
    token: String,
    website_token: Option<String>,
    account_id: String,
    root_folder_id: String,
    premium: bool,
}

impl GofileStorage {
    /// Authenticate with `token`, or create a guest account when there is none
    pub async fn connect(settings: GofileSettings) -> Result<Self, DirectoryError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        let api_base = settings.api_base.trim_end_matches('/').to_string();

        let token = match settings.token {
            Some(token) => token,
            None => {
                warn!("No token was given, creating a guest account for this run");
                let response = client.post(format!("{api_base}/accounts")).send().await?;
                let account: NewAccount = read_envelope(response).await?;
                info!("Created guest account {}", account.id);
                account.token
            }
        };

        let response = client
            .get(format!("{api_base}/accounts/getid"))
            .bearer_auth(&token)
            .send()
            .await?;
        let AccountId { id: account_id } = read_envelope(response).await?;
        debug!("Account id is {account_id}");

        let response = client
            .get(format!("{api_base}/accounts/{account_id}"))
            .bearer_auth(&token)
            .send()
            .await?;
        let details: AccountDetails = read_envelope(response).await?;
        let premium = !details.tier.is_empty() && details.tier != "standard";
        debug!(
            "Account {account_id} root folder={} tier={}",
            details.root_folder, details.tier
        );

        Ok(Self {
            client,
            api_base,
            token,
            website_token: settings.website_token,
            account_id,
            root_folder_id: details.root_folder,
            premium,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_premium(&self) -> bool {
        self.premium
    }

    async fn content(&self, content_id: &str) -> Result<ContentData, DirectoryError> {
        if self.website_token.is_none() && !self.premium {
            warn!("Listing folder contents without a website token usually requires a premium account");
        }
        let mut request = self
            .client
            .get(format!("{}/contents/{content_id}", self.api_base))
            .bearer_auth(&self.token)
            .query(&[("cache", "true")]);
        if let Some(wt) = &self.website_token {
            request = request.query(&[("wt", wt.as_str())]);
        }
        read_envelope(request.send().await?).await
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, DirectoryError> {
        debug!("Creating folder '{name}' in parent folder {parent_id}");
        let response = self
            .client
            .post(format!("{}/contents/createfolder", self.api_base))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "parentFolderId": parent_id, "folderName": name }))
            .send()
            .await?;
        let created: CreatedFolder = read_envelope(response).await?;
        info!("Created folder '{name}' ({})", created.id);
        Ok(created.id)
    }

    async fn update(&self, content_id: &str, attribute: &str, value: &str) -> Result<(), DirectoryError> {
        let response = self
            .client
            .put(format!("{}/contents/{content_id}/update", self.api_base))
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "attribute": attribute, "attributeValue": value }))
            .send()
            .await?;
        let _: serde_json::Value = read_envelope(response).await?;
        Ok(())
    }

    fn scope(&self, folder_id: String) -> DestinationScope {
        DestinationScope {
            account_id: self.account_id.clone(),
            folder_id,
        }
    }
}

#[async_trait]
impl ServerDirectory for GofileStorage {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    fn root_folder_id(&self) -> &str {
        &self.root_folder_id
    }

    async fn servers(&self, zone: Option<Zone>) -> Result<Vec<ServerInfo>, DirectoryError> {
        let mut request = self.client.get(format!("{}/servers", self.api_base));
        if let Some(zone) = zone {
            request = request.query(&[("zone", zone.as_ref())]);
        }
        let data: ServersData = read_envelope(request.send().await?).await?;
        Ok(data.servers.into_iter().map(server_info_from).collect())
    }

    async fn resolve_folder(&self, folder: Option<&str>) -> Result<DestinationScope, DirectoryError> {
        let Some(folder) = folder else {
            debug!("No folder was specified, using the root folder");
            return Ok(self.scope(self.root_folder_id.clone()));
        };
        if looks_like_folder_id(folder) {
            warn!("Folder '{folder}' looks like a folder id, assuming it already exists");
            return Ok(self.scope(folder.to_string()));
        }

        let root = self.content(&self.root_folder_id).await?;
        if root.name == folder {
            info!("Folder '{folder}' is the account root folder");
            return Ok(self.scope(root.id));
        }
        // only one level below root is searched
        if let Some(id) = child_folder_named(&root, folder) {
            info!("Reusing folder '{folder}' ({id}) inside the root folder");
            return Ok(self.scope(id));
        }
        info!("No folder named '{folder}' inside the root folder, creating one");
        let id = self.create_folder(&self.root_folder_id, folder).await?;
        Ok(self.scope(id))
    }

    async fn folder_contents(&self, folder_id: &str) -> Result<FolderContents, DirectoryError> {
        Ok(folder_contents_from(self.content(folder_id).await?))
    }

    async fn make_public(&self, folder_id: &str) -> Result<(), DirectoryError> {
        info!("Making folder {folder_id} public");
        self.update(folder_id, "public", "true").await
    }

    async fn rename(&self, content_id: &str, new_name: &str) -> Result<(), DirectoryError> {
        info!("Renaming content {content_id} to '{new_name}'");
        self.update(content_id, "name", new_name).await
    }

    async fn upload(
        &self,
        server: &ServerInfo,
        candidate: &FileCandidate,
        folder_id: &str,
    ) -> Result<UploadedFile, DirectoryError> {
        info!(
            "Uploading file: {} to {}",
            normalize_path(&candidate.path),
            server.id
        );
        let file = tokio::fs::File::open(&candidate.path).await?;
        let body = Body::wrap_stream(ReaderStream::new(file));
        let part = multipart::Part::stream_with_length(body, candidate.size)
            .file_name(candidate.file_name())
            .mime_str("application/octet-stream")?;
        let form = multipart::Form::new()
            .part("file", part)
            .text("folderId", folder_id.to_string());

        let response = self
            .client
            .post(format!(
                "{}/contents/uploadfile",
                server.endpoint.trim_end_matches('/')
            ))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .await?;
        let uploaded: UploadedFile = read_envelope(response).await?;
        info!("Uploaded file: {}", normalize_path(&candidate.path));
        Ok(uploaded)
    }
}
