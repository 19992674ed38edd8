//! Artifact registry: repositories with named branches that receive whole
//! directories.

use crate::artifacts::{relative_unix_path, sha256_file};
use crate::error::{StrataError, StrataResult};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{Read, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use walkdir::WalkDir;

/// Largest file sent inline in a commit when the hub does not route it to LFS.
pub const DEFAULT_INLINE_LIMIT: u64 = 10 * 1024 * 1024;

const SAMPLE_LEN: u64 = 512;
const LFS_MEDIA_TYPE: &str = "application/vnd.git-lfs+json";

/// Handle to a repository returned by `create_repository`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoHandle {
    /// Fully qualified id, e.g. `org/pythia-14m-replica`.
    pub id: String,
    pub url: Option<String>,
}

/// A branch and the local directory uploaded to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryBranch {
    pub name: String,
    pub output: PathBuf,
}

#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    /// Create the repository, or return the existing one.
    async fn create_repository(&self, name: &str) -> StrataResult<RepoHandle>;

    /// Create a branch. Succeeds if it already exists.
    async fn create_branch(&self, repo: &RepoHandle, branch: &str) -> StrataResult<()>;

    /// Upload every file under `local_path` to `branch`.
    async fn upload_directory(
        &self,
        repo: &RepoHandle,
        local_path: &Path,
        branch: &str,
    ) -> StrataResult<()>;
}

fn collect_files(dir: &Path) -> StrataResult<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            StrataError::Registry(format!("failed to walk {}: {}", dir.display(), e))
        })?;
        if entry.file_type().is_file() {
            files.push((relative_unix_path(dir, entry.path()), entry.path().to_path_buf()));
        }
    }
    Ok(files)
}

/// A file under the uploaded directory.
#[derive(Debug)]
struct UploadFile {
    rel: String,
    path: PathBuf,
    size: u64,
}

impl UploadFile {
    fn collect(dir: &Path) -> StrataResult<Vec<Self>> {
        collect_files(dir)?
            .into_iter()
            .map(|(rel, path)| {
                let size = std::fs::metadata(&path)?.len();
                Ok(Self { rel, path, size })
            })
            .collect()
    }

    /// Base64 of the first bytes, which the hub uses to tell text from binary.
    fn sample(&self) -> StrataResult<String> {
        let mut head = Vec::new();
        std::fs::File::open(&self.path)?.take(SAMPLE_LEN).read_to_end(&mut head)?;
        Ok(BASE64.encode(head))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum UploadMode {
    Lfs,
    Regular,
}

#[derive(Debug, Deserialize)]
struct PreuploadResponse {
    files: Vec<PreuploadFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreuploadFile {
    path: String,
    upload_mode: UploadMode,
}

#[derive(Debug, Deserialize)]
struct LfsBatchResponse {
    objects: Vec<LfsObject>,
}

#[derive(Debug, Deserialize)]
struct LfsObject {
    oid: String,
    #[serde(default)]
    actions: Option<LfsActions>,
    #[serde(default)]
    error: Option<LfsObjectError>,
}

#[derive(Debug, Deserialize)]
struct LfsActions {
    upload: Option<LfsAction>,
    verify: Option<LfsAction>,
}

#[derive(Debug, Deserialize)]
struct LfsAction {
    href: String,
    #[serde(default)]
    header: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct LfsObjectError {
    code: u16,
    message: String,
}

/// Hugging Face compatible hub over HTTP.
///
/// Uploads ask the hub which files belong in LFS. Those are streamed from disk
/// through the LFS batch API and referenced by hash in the commit; the rest
/// are sent inline, up to `inline_limit` bytes each.
#[derive(Debug, Clone)]
pub struct HubRegistry {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    private: bool,
    inline_limit: u64,
}

impl HubRegistry {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token,
            private: false,
            inline_limit: DEFAULT_INLINE_LIMIT,
        }
    }

    #[must_use]
    pub fn with_private(mut self, private: bool) -> Self {
        self.private = private;
        self
    }

    #[must_use]
    pub fn with_inline_limit(mut self, bytes: u64) -> Self {
        self.inline_limit = bytes;
        self
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        self.authorized(self.client.post(url))
    }

    async fn check(response: reqwest::Response, what: &str) -> StrataResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StrataError::Registry(format!("{what} failed ({status}): {body}")))
    }

    async fn preupload(
        &self,
        repo: &RepoHandle,
        files: &[UploadFile],
        branch: &str,
    ) -> StrataResult<HashMap<String, UploadMode>> {
        let entries = files
            .iter()
            .map(|f| -> StrataResult<Value> {
                Ok(json!({ "path": f.rel, "size": f.size, "sample": f.sample()? }))
            })
            .collect::<StrataResult<Vec<Value>>>()?;
        let url = format!("{}/api/models/{}/preupload/{}", self.endpoint, repo.id, branch);
        let response = self.request(&url).json(&json!({ "files": entries })).send().await?;
        let parsed: PreuploadResponse = Self::check(response, "preupload").await?.json().await?;
        Ok(parsed.files.into_iter().map(|f| (f.path, f.upload_mode)).collect())
    }

    /// Store one file through the LFS batch API. Returns once the object is
    /// known to the hub.
    async fn upload_lfs(
        &self,
        repo: &RepoHandle,
        file: &UploadFile,
        oid: &str,
    ) -> StrataResult<()> {
        let url = format!("{}/{}.git/info/lfs/objects/batch", self.endpoint, repo.id);
        let response = self
            .request(&url)
            .header(ACCEPT, LFS_MEDIA_TYPE)
            .header(CONTENT_TYPE, LFS_MEDIA_TYPE)
            .json(&json!({
                "operation": "upload",
                "transfers": ["basic", "multipart"],
                "objects": [{ "oid": oid, "size": file.size }],
                "hash_algo": "sha256",
            }))
            .send()
            .await?;
        let batch: LfsBatchResponse = Self::check(response, "lfs batch").await?.json().await?;

        let object = batch.objects.into_iter().find(|o| o.oid == oid).ok_or_else(|| {
            StrataError::Registry(format!("lfs batch response has no entry for {}", file.rel))
        })?;
        if let Some(err) = object.error {
            return Err(StrataError::Registry(format!(
                "lfs batch rejected {} ({}): {}",
                file.rel, err.code, err.message
            )));
        }
        let Some(actions) = object.actions else {
            tracing::debug!(file = %file.rel, "lfs object already stored");
            return Ok(());
        };

        if let Some(upload) = &actions.upload {
            tracing::debug!(file = %file.rel, size = file.size, "uploading lfs object");
            if upload.header.contains_key("chunk_size") {
                self.upload_multipart(file, oid, upload).await?;
            } else {
                self.upload_basic(file, upload).await?;
            }
        }

        if let Some(verify) = &actions.verify {
            let mut builder = self.request(&verify.href);
            for (name, value) in &verify.header {
                builder = builder.header(name, value);
            }
            let response = builder.json(&json!({ "oid": oid, "size": file.size })).send().await?;
            Self::check(response, "lfs verify").await?;
        }
        Ok(())
    }

    async fn upload_basic(&self, file: &UploadFile, action: &LfsAction) -> StrataResult<()> {
        let handle = tokio::fs::File::open(&file.path).await?;
        let mut builder = self.client.put(&action.href).header(CONTENT_LENGTH, file.size);
        for (name, value) in &action.header {
            builder = builder.header(name, value);
        }
        let response = builder.body(reqwest::Body::from(handle)).send().await?;
        Self::check(response, "lfs upload").await?;
        Ok(())
    }

    /// Numbered header keys carry one presigned URL per part, in part order.
    async fn upload_multipart(
        &self,
        file: &UploadFile,
        oid: &str,
        action: &LfsAction,
    ) -> StrataResult<()> {
        let chunk_size = action
            .header
            .get("chunk_size")
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&n| n > 0)
            .ok_or_else(|| {
                StrataError::Registry(format!("invalid lfs chunk size for {}", file.rel))
            })?;
        let mut parts: Vec<(u32, &String)> = action
            .header
            .iter()
            .filter_map(|(key, href)| key.parse::<u32>().ok().map(|n| (n, href)))
            .filter(|(n, _)| *n > 0)
            .collect();
        parts.sort_by_key(|(n, _)| *n);

        let mut completed = Vec::with_capacity(parts.len());
        for (number, href) in parts {
            let offset = u64::from(number - 1) * chunk_size;
            let len = chunk_size.min(file.size.saturating_sub(offset));
            let mut handle = tokio::fs::File::open(&file.path).await?;
            handle.seek(SeekFrom::Start(offset)).await?;
            let body = reqwest::Body::wrap_stream(ReaderStream::new(handle.take(len)));

            let response =
                self.client.put(href).header(CONTENT_LENGTH, len).body(body).send().await?;
            let response = Self::check(response, "lfs part upload").await?;
            let etag = response
                .headers()
                .get(ETAG)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    StrataError::Registry(format!("part {number} of {} returned no etag", file.rel))
                })?;
            completed.push(json!({ "partNumber": number, "etag": etag }));
        }

        let response = self
            .client
            .post(&action.href)
            .json(&json!({ "oid": oid, "parts": completed }))
            .send()
            .await?;
        Self::check(response, "lfs multipart completion").await?;
        Ok(())
    }

    /// NDJSON commit payload: a header line, then one line per file. LFS files
    /// are referenced by hash, the others carry their content as base64.
    async fn commit_payload(
        &self,
        repo: &RepoHandle,
        files: &[UploadFile],
        modes: &HashMap<String, UploadMode>,
        summary: &str,
    ) -> StrataResult<String> {
        let mut out = serde_json::to_string(&json!({
            "key": "header",
            "value": { "summary": summary, "description": "" },
        }))?;
        out.push('\n');

        for file in files {
            let line = if modes.get(&file.rel) == Some(&UploadMode::Lfs) {
                let oid = sha256_file(&file.path)?;
                self.upload_lfs(repo, file, &oid).await?;
                json!({
                    "key": "lfsFile",
                    "value": { "path": file.rel, "algo": "sha256", "oid": oid, "size": file.size },
                })
            } else {
                let content = BASE64.encode(tokio::fs::read(&file.path).await?);
                json!({
                    "key": "file",
                    "value": { "path": file.rel, "encoding": "base64", "content": content },
                })
            };
            out.push_str(&serde_json::to_string(&line)?);
            out.push('\n');
        }
        Ok(out)
    }
}

#[derive(Debug, Deserialize)]
struct CreateRepoResponse {
    url: Option<String>,
}

#[async_trait]
impl ArtifactRegistry for HubRegistry {
    async fn create_repository(&self, name: &str) -> StrataResult<RepoHandle> {
        let (organization, repo_name) = match name.split_once('/') {
            Some((org, repo)) => (Some(org), repo),
            None => (None, name),
        };
        let url = format!("{}/api/repos/create", self.endpoint);
        let response = self
            .request(&url)
            .json(&json!({
                "name": repo_name,
                "organization": organization,
                "type": "model",
                "private": self.private,
            }))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::CONFLICT {
            tracing::debug!(repo = %name, "repository already exists");
            let url = format!("{}/{}", self.endpoint, name);
            return Ok(RepoHandle { id: name.to_string(), url: Some(url) });
        }

        let response = Self::check(response, "create repository").await?;
        let created: CreateRepoResponse =
            response.json().await.unwrap_or(CreateRepoResponse { url: None });
        Ok(RepoHandle { id: name.to_string(), url: created.url })
    }

    async fn create_branch(&self, repo: &RepoHandle, branch: &str) -> StrataResult<()> {
        let url = format!("{}/api/models/{}/branch/{}", self.endpoint, repo.id, branch);
        let response = self.request(&url).json(&json!({})).send().await?;
        if response.status() == reqwest::StatusCode::CONFLICT {
            tracing::debug!(repo = %repo.id, %branch, "branch already exists");
            return Ok(());
        }
        Self::check(response, "create branch").await?;
        Ok(())
    }

    async fn upload_directory(
        &self,
        repo: &RepoHandle,
        local_path: &Path,
        branch: &str,
    ) -> StrataResult<()> {
        let files = UploadFile::collect(local_path)?;
        let modes = self.preupload(repo, &files, branch).await?;

        let oversized = files.iter().find(|f| {
            modes.get(&f.rel) != Some(&UploadMode::Lfs) && f.size > self.inline_limit
        });
        if let Some(file) = oversized {
            return Err(StrataError::Registry(format!(
                "{} is {} bytes, over the inline upload limit of {} bytes and not routed to lfs",
                file.rel, file.size, self.inline_limit
            )));
        }

        let summary = format!("Upload {} to {}", local_path.display(), branch);
        let payload = self.commit_payload(repo, &files, &modes, &summary).await?;
        let url = format!("{}/api/models/{}/commit/{}", self.endpoint, repo.id, branch);
        let response = self
            .request(&url)
            .header(CONTENT_TYPE, "application/x-ndjson")
            .body(payload)
            .send()
            .await?;
        Self::check(response, "upload").await?;
        Ok(())
    }
}

/// Registry mirrored into a local directory: `{root}/{repo}/{branch}/...`.
///
/// Every repository starts with its default branch. Uploading to a branch that
/// was never created is an error.
#[derive(Debug, Clone)]
pub struct LocalRegistry {
    root: PathBuf,
    default_branch: String,
}

impl LocalRegistry {
    #[must_use]
    pub fn new(root: PathBuf, default_branch: impl Into<String>) -> Self {
        Self { root, default_branch: default_branch.into() }
    }

    #[must_use]
    pub fn branch_dir(&self, repo: &RepoHandle, branch: &str) -> PathBuf {
        self.root.join(&repo.id).join(branch)
    }
}

#[async_trait]
impl ArtifactRegistry for LocalRegistry {
    async fn create_repository(&self, name: &str) -> StrataResult<RepoHandle> {
        let repo_dir = self.root.join(name);
        std::fs::create_dir_all(repo_dir.join(&self.default_branch))?;
        Ok(RepoHandle { id: name.to_string(), url: Some(repo_dir.display().to_string()) })
    }

    async fn create_branch(&self, repo: &RepoHandle, branch: &str) -> StrataResult<()> {
        let repo_dir = self.root.join(&repo.id);
        if !repo_dir.is_dir() {
            return Err(StrataError::Registry(format!("unknown repository {}", repo.id)));
        }
        std::fs::create_dir_all(repo_dir.join(branch))?;
        Ok(())
    }

    async fn upload_directory(
        &self,
        repo: &RepoHandle,
        local_path: &Path,
        branch: &str,
    ) -> StrataResult<()> {
        let dest = self.branch_dir(repo, branch);
        if !dest.is_dir() {
            return Err(StrataError::Registry(format!("unknown branch {} in {}", branch, repo.id)));
        }
        for (rel, src) in collect_files(local_path)? {
            let target = dest.join(&rel);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&src, &target)?;
        }
        Ok(())
    }
}
