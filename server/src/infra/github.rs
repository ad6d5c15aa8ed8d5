//! GitHub repository synchronizer
//!
//! Lists the branch tree through the git trees API and downloads each blob
//! through the contents API with the raw media type.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::{RequestBuilder, Response, Url};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::domain::file_tree::FileTree;
use crate::domain::package::{detect_package_manager, MANIFEST_FILE};
use crate::error::{Error, Result};
use crate::service::sync::{RepositorySynchronizer, SyncRequest, SyncedRepository};

const USER_AGENT: &str = concat!("devshell-server/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SKIPPED_DIRS: [&str; 2] = ["node_modules", ".git"];

#[derive(Debug, Deserialize)]
struct TreeResponse {
    #[serde(default)]
    tree: Vec<TreeItem>,
    #[serde(default)]
    truncated: bool,
}

#[derive(Debug, Deserialize)]
struct TreeItem {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<u64>,
}

/// Synchronizes repositories from the GitHub REST API
pub struct GithubSynchronizer {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
    max_file_bytes: u64,
    concurrency: usize,
}

impl GithubSynchronizer {
    pub fn new(
        api_url: &str,
        token: Option<String>,
        max_file_bytes: u64,
        concurrency: usize,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
            max_file_bytes,
            concurrency: concurrency.max(1),
        })
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = Url::parse(&self.api_url)
            .map_err(|e| Error::SyncFailed(format!("invalid API URL {}: {}", self.api_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::SyncFailed(format!("invalid API URL {}", self.api_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn get(&self, url: Url, accept: &str) -> RequestBuilder {
        let request = self
            .client
            .get(url)
            .header(ACCEPT, accept)
            .header("X-GitHub-Api-Version", API_VERSION);
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    async fn list_tree(&self, owner: &str, repo: &str, branch: &str) -> Result<Vec<TreeItem>> {
        let mut url = self.endpoint(
            ["repos", owner, repo, "git", "trees"]
                .into_iter()
                .chain(branch.split('/')),
        )?;
        url.query_pairs_mut().append_pair("recursive", "1");

        let response = check(self.get(url, JSON_MEDIA_TYPE).send().await?, "tree listing").await?;
        let tree: TreeResponse = response.json().await?;
        if tree.truncated {
            warn!("Tree listing for {}/{}@{} was truncated", owner, repo, branch);
        }
        Ok(tree.tree)
    }

    async fn fetch_file(&self, owner: &str, repo: &str, branch: &str, path: &str) -> Result<Vec<u8>> {
        let mut url = self.endpoint(
            ["repos", owner, repo, "contents"]
                .into_iter()
                .chain(path.split('/')),
        )?;
        url.query_pairs_mut().append_pair("ref", branch);

        let response = check(self.get(url, RAW_MEDIA_TYPE).send().await?, path).await?;
        Ok(response.bytes().await?.to_vec())
    }

    fn is_syncable(&self, item: &TreeItem) -> bool {
        if item.kind != "blob" {
            return false;
        }
        if item
            .path
            .split('/')
            .any(|segment| SKIPPED_DIRS.contains(&segment))
        {
            return false;
        }
        match item.size {
            Some(size) if size > self.max_file_bytes => {
                debug!("Skipping {} ({} bytes)", item.path, size);
                false
            }
            _ => true,
        }
    }
}

/// Turn a non-success response into a sync failure
async fn check(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::SyncFailed(format!(
        "{} returned {}: {}",
        what,
        status,
        body.trim()
    )))
}

#[async_trait]
impl RepositorySynchronizer for GithubSynchronizer {
    async fn sync(&self, request: SyncRequest) -> Result<SyncedRepository> {
        let (owner, repo, branch) = (
            request.owner.as_str(),
            request.repo.as_str(),
            request.branch.as_str(),
        );
        info!("Synchronizing {}/{}@{}", owner, repo, branch);

        let items: Vec<TreeItem> = self
            .list_tree(owner, repo, branch)
            .await?
            .into_iter()
            .filter(|item| self.is_syncable(item))
            .collect();
        if items.is_empty() {
            return Err(Error::SyncFailed(format!(
                "{}/{}@{} has no files",
                owner, repo, branch
            )));
        }

        let total = items.len();
        request.report(0, total);
        let mut downloads = stream::iter(items)
            .map(|item| async move {
                let contents = self.fetch_file(owner, repo, branch, &item.path).await?;
                Ok::<_, Error>((item.path, contents))
            })
            .buffer_unordered(self.concurrency);

        let mut files = FileTree::new();
        let mut fetched = 0;
        while let Some(download) = downloads.next().await {
            let (path, contents) = download?;
            if let Err(e) = files.insert_file(&path, contents) {
                warn!("Skipping {}: {}", path, e);
            }
            fetched += 1;
            request.report(fetched, total);
        }

        info!("Synchronized {} files from {}/{}", fetched, owner, repo);
        Ok(SyncedRepository {
            package_manager: detect_package_manager(&files),
            has_manifest: files.contains_file(MANIFEST_FILE),
            files,
        })
    }
}
