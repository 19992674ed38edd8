//! Shared assets: tokenizer metadata fetched once per publish run and copied
//! into every step's output.

use crate::config::AssetSettings;
use crate::error::{StrataError, StrataResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Pythia model sizes with published template repositories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelSize {
    #[serde(rename = "14M")]
    M14,
    #[serde(rename = "31M")]
    M31,
    #[serde(rename = "70M")]
    M70,
    #[serde(rename = "160M")]
    M160,
    #[serde(rename = "410M")]
    M410,
    #[serde(rename = "1B")]
    B1,
    #[serde(rename = "1.4B")]
    B1_4,
    #[serde(rename = "2.8B")]
    B2_8,
    #[serde(rename = "6.9B")]
    B6_9,
    #[serde(rename = "12B")]
    B12,
}

impl ModelSize {
    pub const ALL: [ModelSize; 10] = [
        Self::M14,
        Self::M31,
        Self::M70,
        Self::M160,
        Self::M410,
        Self::B1,
        Self::B1_4,
        Self::B2_8,
        Self::B6_9,
        Self::B12,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::M14 => "14M",
            Self::M31 => "31M",
            Self::M70 => "70M",
            Self::M160 => "160M",
            Self::M410 => "410M",
            Self::B1 => "1B",
            Self::B1_4 => "1.4B",
            Self::B2_8 => "2.8B",
            Self::B6_9 => "6.9B",
            Self::B12 => "12B",
        }
    }
}

impl std::fmt::Display for ModelSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelSize {
    type Err = StrataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Self::ALL.into_iter().find(|size| size.as_str() == upper).ok_or_else(|| {
            let valid: Vec<_> = Self::ALL.iter().map(|s| s.as_str()).collect();
            StrataError::InvalidConfig(format!("model size must be one of {}", valid.join(", ")))
        })
    }
}

/// Fetches raw file contents by URL.
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch(&self, url: &str) -> StrataResult<Vec<u8>>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpAssetSource {
    client: reqwest::Client,
}

impl HttpAssetSource {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AssetSource for HttpAssetSource {
    async fn fetch(&self, url: &str) -> StrataResult<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(StrataError::Asset(format!("GET {url} returned {status}")));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

/// The named files to fetch, with their template URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedAssetSet {
    pub files: Vec<(String, String)>,
}

impl SharedAssetSet {
    /// `{base_url}/{organization}/pythia-{size}/raw/main/{file}` for each configured file.
    #[must_use]
    pub fn for_model(settings: &AssetSettings, size: ModelSize) -> Self {
        let base = settings.base_url.trim_end_matches('/');
        let files = settings
            .files
            .iter()
            .map(|name| {
                let url = format!("{base}/{}/pythia-{size}/raw/main/{name}", settings.organization);
                (name.clone(), url)
            })
            .collect();
        Self { files }
    }

    /// Download every file into `staging_root`. Failures are logged and the
    /// file is left out; the run continues with whatever was fetched.
    pub async fn stage(
        &self,
        source: &dyn AssetSource,
        staging_root: &Path,
    ) -> StrataResult<StagedAssets> {
        std::fs::create_dir_all(staging_root)?;
        let mut staged = StagedAssets { files: Vec::new() };

        for (name, url) in &self.files {
            match source.fetch(url).await {
                Ok(bytes) => {
                    let dest = staging_root.join(name);
                    std::fs::write(&dest, bytes)?;
                    tracing::debug!(file = %name, "staged shared asset");
                    staged.files.push((name.clone(), dest));
                }
                Err(e) => {
                    tracing::warn!(
                        file = %name,
                        %url,
                        error = %e,
                        "failed to download shared asset"
                    );
                }
            }
        }

        Ok(staged)
    }
}

/// Shared asset files staged on disk for the lifetime of a run.
///
/// The staged files are removed when this value is dropped, whichever way the
/// run ends.
#[derive(Debug)]
pub struct StagedAssets {
    files: Vec<(String, PathBuf)>,
}

impl StagedAssets {
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.files.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Copy every staged file into `dest_dir`. The staged copies stay in place.
    pub fn copy_into(&self, dest_dir: &Path) -> StrataResult<()> {
        std::fs::create_dir_all(dest_dir)?;
        for (name, src) in &self.files {
            std::fs::copy(src, dest_dir.join(name))?;
        }
        Ok(())
    }
}

impl Drop for StagedAssets {
    fn drop(&mut self) {
        for (_, path) in &self.files {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(
                        file = %path.display(),
                        error = %e,
                        "failed to remove staged asset"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_model_size_parsing_is_case_insensitive() {
        assert_eq!("14m".parse::<ModelSize>().unwrap(), ModelSize::M14);
        assert_eq!("1.4b".parse::<ModelSize>().unwrap(), ModelSize::B1_4);
        assert_eq!("12B".parse::<ModelSize>().unwrap(), ModelSize::B12);
        let err = "7B".parse::<ModelSize>().unwrap_err();
        assert!(err.to_string().contains("14M, 31M"));
    }

    #[test]
    fn test_asset_urls_follow_template() {
        let set = SharedAssetSet::for_model(&AssetSettings::default(), ModelSize::M160);
        assert_eq!(set.files.len(), 2);
        assert_eq!(set.files[0].0, "special_tokens_map.json");
        assert_eq!(
            set.files[0].1,
            "https://huggingface.co/EleutherAI/pythia-160M/raw/main/special_tokens_map.json"
        );
    }

    #[tokio::test]
    async fn test_stage_is_best_effort_and_cleans_up_on_drop() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", "/EleutherAI/pythia-14M/raw/main/special_tokens_map.json")
            .with_status(200)
            .with_body(r#"{"eos_token": "<|endoftext|>"}"#)
            .create_async()
            .await;
        let missing = server
            .mock("GET", "/EleutherAI/pythia-14M/raw/main/tokenizer_config.json")
            .with_status(404)
            .create_async()
            .await;

        let settings = AssetSettings { base_url: server.url(), ..AssetSettings::default() };
        let set = SharedAssetSet::for_model(&settings, ModelSize::M14);
        let temp = TempDir::new().unwrap();

        let staged = set.stage(&HttpAssetSource::default(), temp.path()).await.unwrap();
        assert_eq!(staged.names(), vec!["special_tokens_map.json".to_string()]);
        assert!(temp.path().join("special_tokens_map.json").exists());
        assert!(!temp.path().join("tokenizer_config.json").exists());

        let step_out = temp.path().join("step1");
        staged.copy_into(&step_out).unwrap();
        assert!(step_out.join("special_tokens_map.json").exists());
        assert!(temp.path().join("special_tokens_map.json").exists());

        drop(staged);
        assert!(!temp.path().join("special_tokens_map.json").exists());
        assert!(step_out.join("special_tokens_map.json").exists());

        ok.assert_async().await;
        missing.assert_async().await;
    }
}
